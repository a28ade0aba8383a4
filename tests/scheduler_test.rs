// tests/scheduler_test.rs — Integration test: billing sweeps, recovery, start/stop

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use pretty_assertions::assert_eq;

use gpurent::core::billing::BillingOutcome;
use gpurent::core::lifecycle::LifecycleSettings;
use gpurent::core::notifier::{NoopNotifier, RecordingNotifier};
use gpurent::core::registry::GpuListing;
use gpurent::core::types::{Actor, Money, Role, SessionStatus, WorkloadType};
use gpurent::core::RentalCore;
use gpurent::infra::clock::ManualClock;
use gpurent::infra::daemon::BillingScheduler;
use gpurent::store::{spawn_store_server, Store};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

fn dollars(cents: i64) -> Money {
    Money::from_cents(cents)
}

fn core_on(store: Store) -> (RentalCore, Arc<ManualClock>) {
    let (handle, _join) = spawn_store_server(store);
    let clock = Arc::new(ManualClock::new(t0()));
    let core = RentalCore::new(handle, clock.clone(), LifecycleSettings::default());
    (core, clock)
}

async fn provider(core: &RentalCore) {
    core.registry
        .create_account(Some("bob".into()), "Bob", Role::Provider)
        .await
        .unwrap();
    core.registry.approve_provider("bob").await.unwrap();
}

async fn consumer(core: &RentalCore, id: &str, balance: Money) -> Actor {
    let account = core
        .registry
        .create_account(Some(id.into()), id, Role::Consumer)
        .await
        .unwrap();
    core.registry.deposit(id, balance).await.unwrap();
    account.actor()
}

/// Register a fresh 2.00/h GPU for bob and start a session on it.
async fn rent(core: &RentalCore, who: &Actor) -> String {
    let gpu = core
        .registry
        .register_gpu(GpuListing {
            provider_id: "bob".into(),
            name: format!("rig-{}", who.user_id),
            model: "L40S".into(),
            vram_gb: 48,
            price_per_hour: dollars(200),
        })
        .await
        .unwrap();
    let s = core
        .sessions
        .request_session(who, &gpu.id, WorkloadType::Ml)
        .await
        .unwrap();
    core.sessions.start_session(&s.id, who).await.unwrap();
    s.id
}

fn scheduler(core: &RentalCore, notifier: Arc<RecordingNotifier>) -> Arc<BillingScheduler> {
    Arc::new(BillingScheduler::new(
        core.billing.clone(),
        core.store.clone(),
        notifier,
        Duration::from_secs(60),
    ))
}

fn raw_update(path: &Path, sql: &str, params: &[&dyn rusqlite::ToSql]) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.busy_timeout(Duration::from_secs(5)).unwrap();
    let changed = conn.execute(sql, params).unwrap();
    assert_eq!(changed, 1);
}

#[tokio::test]
async fn test_tick_with_no_active_sessions_is_empty() {
    let (core, _clock) = core_on(gpurent::store::in_memory().unwrap());
    let notifier = Arc::new(RecordingNotifier::new());
    let report = scheduler(&core, notifier.clone()).tick().await.unwrap();
    assert!(report.is_empty());
    assert!(notifier.events().is_empty());
}

#[tokio::test]
async fn test_tick_bills_terminates_and_notifies() {
    let (core, clock) = core_on(gpurent::store::in_memory().unwrap());
    provider(&core).await;
    let alice = consumer(&core, "alice", dollars(1000)).await;
    let carl = consumer(&core, "carl", dollars(300)).await;
    let rich = rent(&core, &alice).await;
    let poor = rent(&core, &carl).await;

    let notifier = Arc::new(RecordingNotifier::new());
    let sched = scheduler(&core, notifier.clone());

    clock.advance_minutes(60);
    let first = sched.tick().await.unwrap();
    assert_eq!(first.count("billed"), 2);

    // a third session that will not be due on the next sweep
    clock.advance_minutes(30);
    let dave = consumer(&core, "dave", dollars(1000)).await;
    let fresh = rent(&core, &dave).await;

    clock.advance_minutes(30);
    let second = sched.tick().await.unwrap();
    assert_eq!(second.entries.len(), 3);
    assert_eq!(second.outcome_for(&rich).map(|o| o.kind()), Some("billed"));
    assert_eq!(second.outcome_for(&poor).map(|o| o.kind()), Some("terminated"));
    assert_eq!(
        second.outcome_for(&fresh),
        Some(&BillingOutcome::NotDue {
            minutes_until_due: 30
        })
    );

    // not_due is never pushed to the notifier
    let events = notifier.events();
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|(_, o)| matches!(o.kind(), "billed" | "terminated")));
    assert_eq!(
        events.iter().filter(|(id, _)| id == &poor).count(),
        2
    );

    let s = core.store.get_session(&poor).await.unwrap().unwrap();
    assert_eq!(s.status, SessionStatus::Terminated);
    let active = core
        .store
        .sessions_with_status(SessionStatus::Active)
        .await
        .unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn test_one_broken_session_does_not_stop_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("gpurent.db");
    let (core, clock) = core_on(gpurent::store::open(&db).unwrap());
    provider(&core).await;
    let alice = consumer(&core, "alice", dollars(1000)).await;
    let erin = consumer(&core, "erin", dollars(1000)).await;
    let healthy = rent(&core, &alice).await;
    let broken = rent(&core, &erin).await;

    raw_update(
        &db,
        "UPDATE sessions SET last_billed_at = NULL WHERE id = ?1",
        &[&broken],
    );

    clock.advance_minutes(60);
    let sched = Arc::new(BillingScheduler::new(
        core.billing.clone(),
        core.store.clone(),
        Arc::new(NoopNotifier),
        Duration::from_secs(60),
    ));
    let report = sched.tick().await.unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.outcome_for(&healthy).map(|o| o.kind()), Some("billed"));
    assert_eq!(report.outcome_for(&broken).map(|o| o.kind()), Some("error"));
    assert_eq!(
        core.registry.account("erin").await.unwrap().wallet_balance,
        dollars(1000)
    );
}

#[tokio::test]
async fn test_sweep_finalizes_interrupted_stop() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("gpurent.db");
    let (core, clock) = core_on(gpurent::store::open(&db).unwrap());
    provider(&core).await;
    let alice = consumer(&core, "alice", dollars(1000)).await;
    let id = rent(&core, &alice).await;

    // a stop that recorded its end time but never settled
    let end = (t0() + chrono::Duration::minutes(30)).to_rfc3339_opts(SecondsFormat::Micros, true);
    raw_update(
        &db,
        "UPDATE sessions SET end_time = ?1 WHERE id = ?2",
        &[&end, &id],
    );

    clock.advance_minutes(90);
    let notifier = Arc::new(RecordingNotifier::new());
    let report = scheduler(&core, notifier.clone()).tick().await.unwrap();

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert!(entry.recovered);
    match &entry.outcome {
        BillingOutcome::Billed {
            cost,
            minutes,
            final_settlement,
            ..
        } => {
            assert_eq!(*cost, dollars(100));
            assert_eq!(*minutes, 30);
            assert!(*final_settlement);
        }
        other => panic!("expected Billed, got {other:?}"),
    }
    assert_eq!(notifier.events().len(), 1);

    let s = core.store.get_session(&id).await.unwrap().unwrap();
    assert_eq!(s.status, SessionStatus::Completed);
    assert!(s.is_billed);
    let gpu = core.registry.gpu(&s.gpu_id).await.unwrap();
    assert!(gpu.is_available);

    // nothing left for the next sweep
    assert!(scheduler(&core, notifier).tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_stop_and_restart() {
    let (core, _clock) = core_on(gpurent::store::in_memory().unwrap());
    let sched = Arc::new(BillingScheduler::new(
        core.billing.clone(),
        core.store.clone(),
        Arc::new(NoopNotifier),
        Duration::from_millis(10),
    ));

    assert!(!sched.is_running());
    assert!(sched.start());
    assert!(!sched.start());
    assert!(sched.is_running());

    tokio::time::sleep(Duration::from_millis(50)).await;
    sched.stop().await;
    assert!(!sched.is_running());

    // stopping twice is harmless, and the scheduler can start again
    sched.stop().await;
    assert!(sched.start());
    sched.stop().await;
    assert!(!sched.is_running());
}
