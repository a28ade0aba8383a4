// tests/store_test.rs — Integration test: SQLite store transactions and persistence

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use gpurent::core::types::{
    Account, ConnectionDetails, Gpu, Money, Role, SessionStatus, WorkloadType,
};
use gpurent::infra::errors::ErrorKind;
use gpurent::store::store::{Activation, IntervalCharge, IntervalSettlement, NewSession};
use gpurent::store::Store;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// Store with a funded consumer, an approved provider and one GPU at 2.00/h.
fn seeded(store: &Store) {
    store
        .insert_account(&Account::new("alice", "Alice", Role::Consumer))
        .unwrap();
    store
        .insert_account(&Account::new("bob", "Bob", Role::Provider))
        .unwrap();
    store.set_provider_approval("bob", true).unwrap();
    store.deposit("alice", Money::from_cents(1000)).unwrap();
    store
        .insert_gpu(&Gpu::new("gpu-1", "bob", "Rig", "H100", 80, Money::from_cents(200)))
        .unwrap();
}

fn request(store: &Store, id: &str) -> gpurent::infra::errors::Result<gpurent::core::types::Session> {
    store.create_session(&NewSession {
        id: id.into(),
        consumer_id: "alice".into(),
        gpu_id: "gpu-1".into(),
        workload_type: WorkloadType::Ml,
        billing_interval_minutes: 60,
        require_funds: true,
        now: t0(),
    })
}

fn activate(store: &Store, id: &str) {
    store
        .activate_session(&Activation {
            session_id: id.into(),
            start_time: t0(),
            connection: ConnectionDetails {
                host: "127.0.0.1".into(),
                port: 5901,
                access_token: "00".repeat(16),
            },
        })
        .unwrap();
}

#[test]
fn test_claim_is_exclusive() {
    let store = gpurent::store::in_memory().unwrap();
    seeded(&store);

    request(&store, "s-1").unwrap();
    let err = request(&store, "s-2").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceUnavailable);

    // the rejected request left no row behind
    let count: i64 = store
        .conn()
        .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
    let gpu = store.get_gpu("gpu-1").unwrap().unwrap();
    assert_eq!(gpu.current_session.as_deref(), Some("s-1"));
}

#[test]
fn test_stale_watermark_is_a_conflict_with_no_effect() {
    let store = gpurent::store::in_memory().unwrap();
    seeded(&store);
    request(&store, "s-1").unwrap();
    activate(&store, "s-1");

    let err = store
        .apply_interval_charge(&IntervalCharge {
            session_id: "s-1".into(),
            watermark: t0() - Duration::minutes(1),
            minutes: 60,
            cost: Money::from_cents(200),
            now: t0() + Duration::minutes(60),
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let alice = store.get_account("alice").unwrap().unwrap();
    assert_eq!(alice.wallet_balance, Money::from_cents(1000));
    assert!(store.ledger_entries("s-1").unwrap().is_empty());
    let s = store.get_session("s-1").unwrap().unwrap();
    assert_eq!(s.total_cost, Money::ZERO);
    assert_eq!(s.last_billed_at, Some(t0()));
}

#[test]
fn test_interval_charge_moves_money_and_writes_ledger() {
    let store = gpurent::store::in_memory().unwrap();
    seeded(&store);
    request(&store, "s-1").unwrap();
    activate(&store, "s-1");

    let settled = store
        .apply_interval_charge(&IntervalCharge {
            session_id: "s-1".into(),
            watermark: t0(),
            minutes: 60,
            cost: Money::from_cents(200),
            now: t0() + Duration::minutes(61),
        })
        .unwrap();
    match settled {
        IntervalSettlement::Settled {
            session,
            consumer_balance,
            provider_balance,
            ..
        } => {
            assert_eq!(session.last_billed_at, Some(t0() + Duration::minutes(60)));
            assert_eq!(consumer_balance, Money::from_cents(800));
            assert_eq!(provider_balance, Money::from_cents(200));
        }
        other => panic!("expected Settled, got {other:?}"),
    }

    let (amount, kind): (i64, String) = store
        .conn()
        .query_row(
            "SELECT amount, kind FROM ledger_entries WHERE session_id = ?1",
            ["s-1"],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(amount, Money::from_cents(200).micros());
    assert_eq!(kind, "interval");
}

#[test]
fn test_wallets_cannot_go_negative() {
    let store = gpurent::store::in_memory().unwrap();
    seeded(&store);
    let result = store.conn().execute(
        "UPDATE accounts SET wallet_balance = -1 WHERE id = 'alice'",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("gpurent.db");

    {
        let store = gpurent::store::open(&path).unwrap();
        seeded(&store);
        request(&store, "s-1").unwrap();
        activate(&store, "s-1");
    }

    let store = gpurent::store::open(&path).unwrap();
    let s = store.get_session("s-1").unwrap().unwrap();
    assert_eq!(s.status, SessionStatus::Active);
    assert_eq!(s.start_time, Some(t0()));
    assert_eq!(s.connection.map(|c| c.port), Some(5901));
    assert_eq!(
        store.get_account("alice").unwrap().unwrap().wallet_balance,
        Money::from_cents(1000)
    );
    assert_eq!(
        store.sessions_with_status(SessionStatus::Active).unwrap().len(),
        1
    );
}
