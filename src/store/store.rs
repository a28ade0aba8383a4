// src/store/store.rs — SQLite operations
//
// Every method that touches more than one row runs in a single transaction.
// Dropping an uncommitted transaction rolls it back, so an early `?` return
// leaves no partial state behind.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::core::telemetry::{MetricSample, SessionMetrics};
use crate::core::types::{
    Account, ConnectionDetails, Gpu, Money, Role, Session, SessionStatus, WorkloadType,
};
use crate::infra::errors::{RentalError, Result};

pub const TERMINATION_INSUFFICIENT_FUNDS: &str = "insufficient funds";

/// Low-level SQLite operations for accounts, GPUs, sessions and the ledger.
pub struct Store {
    conn: Connection,
}

// ─── Inputs and results ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub consumer_id: String,
    pub gpu_id: String,
    pub workload_type: WorkloadType,
    pub billing_interval_minutes: i64,
    /// Reject the request unless the consumer can afford one hour.
    pub require_funds: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Activation {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub connection: ConnectionDetails,
}

/// One full interval to settle against the watermark the caller observed.
#[derive(Debug, Clone)]
pub struct IntervalCharge {
    pub session_id: String,
    pub watermark: DateTime<Utc>,
    pub minutes: i64,
    pub cost: Money,
    pub now: DateTime<Utc>,
}

/// Settlement of everything between the watermark and `end_time`.
#[derive(Debug, Clone)]
pub struct FinalCharge {
    pub session_id: String,
    pub watermark: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub minutes: i64,
    pub cost: Money,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum IntervalSettlement {
    Settled {
        session: Session,
        cost: Money,
        minutes: i64,
        consumer_balance: Money,
        provider_balance: Money,
    },
    /// The consumer could not cover the interval; the session was ended.
    Terminated {
        session: Session,
        required: Money,
        available: Money,
    },
}

#[derive(Debug, Clone)]
pub enum FinalSettlement {
    Settled {
        session: Session,
        cost: Money,
        minutes: i64,
        consumer_balance: Money,
        provider_balance: Money,
    },
    Shortfall {
        session: Session,
        required: Money,
        available: Money,
    },
    NothingDue {
        session: Session,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub session_id: String,
    pub consumer_id: String,
    pub provider_id: String,
    pub amount: Money,
    pub minutes: i64,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub user_id: String,
    pub wallet_balance: Money,
    pub total_spent: Money,
    pub total_earned: Money,
    pub sessions_by_status: Vec<(SessionStatus, i64)>,
}

impl UserSummary {
    pub fn count(&self, status: SessionStatus) -> i64 {
        self.sessions_by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

// ─── Row mapping ────────────────────────────────────────────────

const SESSION_COLUMNS: &str = "id, consumer_id, provider_id, gpu_id, status, workload_type,
    hourly_rate, billing_interval_minutes, start_time, end_time, last_billed_at, total_cost,
    duration_minutes, is_billed, unbilled_cost, connection_json, metrics_json,
    cancellation_reason, termination_reason, created_at, updated_at";

const GPU_COLUMNS: &str = "id, provider_id, name, model, vram_gb, price_per_hour, is_active,
    is_available, current_session, total_earnings, total_minutes_rented, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, name, role, wallet_balance, is_provider_approved, created_at";

struct SessionRow {
    id: String,
    consumer_id: String,
    provider_id: String,
    gpu_id: String,
    status: String,
    workload_type: String,
    hourly_rate: i64,
    billing_interval_minutes: i64,
    start_time: Option<String>,
    end_time: Option<String>,
    last_billed_at: Option<String>,
    total_cost: i64,
    duration_minutes: i64,
    is_billed: bool,
    unbilled_cost: i64,
    connection_json: Option<String>,
    metrics_json: String,
    cancellation_reason: Option<String>,
    termination_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            consumer_id: row.get(1)?,
            provider_id: row.get(2)?,
            gpu_id: row.get(3)?,
            status: row.get(4)?,
            workload_type: row.get(5)?,
            hourly_rate: row.get(6)?,
            billing_interval_minutes: row.get(7)?,
            start_time: row.get(8)?,
            end_time: row.get(9)?,
            last_billed_at: row.get(10)?,
            total_cost: row.get(11)?,
            duration_minutes: row.get(12)?,
            is_billed: row.get(13)?,
            unbilled_cost: row.get(14)?,
            connection_json: row.get(15)?,
            metrics_json: row.get(16)?,
            cancellation_reason: row.get(17)?,
            termination_reason: row.get(18)?,
            created_at: row.get(19)?,
            updated_at: row.get(20)?,
        })
    }

    fn into_session(self) -> Result<Session> {
        let connection = match self.connection_json {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };
        Ok(Session {
            status: self.status.parse()?,
            workload_type: self.workload_type.parse()?,
            hourly_rate: Money::from_micros(self.hourly_rate),
            billing_interval_minutes: self.billing_interval_minutes,
            start_time: parse_opt_ts(self.start_time)?,
            end_time: parse_opt_ts(self.end_time)?,
            last_billed_at: parse_opt_ts(self.last_billed_at)?,
            total_cost: Money::from_micros(self.total_cost),
            duration_minutes: self.duration_minutes,
            is_billed: self.is_billed,
            unbilled_cost: Money::from_micros(self.unbilled_cost),
            connection,
            metrics: serde_json::from_str(&self.metrics_json)?,
            cancellation_reason: self.cancellation_reason,
            termination_reason: self.termination_reason,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            consumer_id: self.consumer_id,
            provider_id: self.provider_id,
            gpu_id: self.gpu_id,
        })
    }
}

struct GpuRow {
    id: String,
    provider_id: String,
    name: String,
    model: String,
    vram_gb: u32,
    price_per_hour: i64,
    is_active: bool,
    is_available: bool,
    current_session: Option<String>,
    total_earnings: i64,
    total_minutes_rented: i64,
    created_at: String,
    updated_at: String,
}

impl GpuRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            name: row.get(2)?,
            model: row.get(3)?,
            vram_gb: row.get(4)?,
            price_per_hour: row.get(5)?,
            is_active: row.get(6)?,
            is_available: row.get(7)?,
            current_session: row.get(8)?,
            total_earnings: row.get(9)?,
            total_minutes_rented: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_gpu(self) -> Result<Gpu> {
        Ok(Gpu {
            price_per_hour: Money::from_micros(self.price_per_hour),
            total_earnings: Money::from_micros(self.total_earnings),
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
            provider_id: self.provider_id,
            name: self.name,
            model: self.model,
            vram_gb: self.vram_gb,
            is_active: self.is_active,
            is_available: self.is_available,
            current_session: self.current_session,
            total_minutes_rented: self.total_minutes_rented,
        })
    }
}

struct AccountRow {
    id: String,
    name: String,
    role: String,
    wallet_balance: i64,
    is_provider_approved: bool,
    created_at: String,
}

impl AccountRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            role: row.get(2)?,
            wallet_balance: row.get(3)?,
            is_provider_approved: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        Ok(Account {
            role: self.role.parse()?,
            wallet_balance: Money::from_micros(self.wallet_balance),
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            name: self.name,
            is_provider_approved: self.is_provider_approved,
        })
    }
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RentalError::persistence(format!("bad timestamp '{raw}': {e}")))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

// ─── Transaction-scoped helpers ─────────────────────────────────

fn load_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id], SessionRow::from_row)
        .optional()?;
    row.map(SessionRow::into_session).transpose()
}

fn require_session(conn: &Connection, id: &str) -> Result<Session> {
    load_session(conn, id)?.ok_or_else(|| RentalError::not_found("session", id))
}

fn load_gpu(conn: &Connection, id: &str) -> Result<Option<Gpu>> {
    let sql = format!("SELECT {GPU_COLUMNS} FROM gpus WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id], GpuRow::from_row)
        .optional()?;
    row.map(GpuRow::into_gpu).transpose()
}

fn load_account(conn: &Connection, id: &str) -> Result<Option<Account>> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id], AccountRow::from_row)
        .optional()?;
    row.map(AccountRow::into_account).transpose()
}

fn balance_of(conn: &Connection, user_id: &str) -> Result<Money> {
    conn.query_row(
        "SELECT wallet_balance FROM accounts WHERE id = ?1",
        params![user_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()?
    .map(Money::from_micros)
    .ok_or_else(|| RentalError::not_found("account", user_id))
}

/// Move `amount` from consumer to provider. Both legs or neither.
fn transfer(conn: &Connection, session: &Session, amount: Money) -> Result<(Money, Money)> {
    let debited = conn.execute(
        "UPDATE accounts SET wallet_balance = wallet_balance - ?1
         WHERE id = ?2 AND wallet_balance >= ?1",
        params![amount.micros(), session.consumer_id],
    )?;
    if debited != 1 {
        return Err(RentalError::InsufficientFunds {
            required: amount,
            available: balance_of(conn, &session.consumer_id)?,
        });
    }
    let credited = conn.execute(
        "UPDATE accounts SET wallet_balance = wallet_balance + ?1 WHERE id = ?2",
        params![amount.micros(), session.provider_id],
    )?;
    if credited != 1 {
        return Err(RentalError::not_found("account", &session.provider_id));
    }
    Ok((
        balance_of(conn, &session.consumer_id)?,
        balance_of(conn, &session.provider_id)?,
    ))
}

fn record_ledger_entry(
    conn: &Connection,
    session: &Session,
    amount: Money,
    minutes: i64,
    kind: &str,
    now: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO ledger_entries (session_id, consumer_id, provider_id, amount, minutes, kind, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            session.id,
            session.consumer_id,
            session.provider_id,
            amount.micros(),
            minutes,
            kind,
            ts(now)
        ],
    )?;
    Ok(())
}

fn accrue_gpu(
    conn: &Connection,
    gpu_id: &str,
    amount: Money,
    minutes: i64,
    now: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE gpus SET total_earnings = total_earnings + ?1,
         total_minutes_rented = total_minutes_rented + ?2, updated_at = ?3
         WHERE id = ?4",
        params![amount.micros(), minutes, ts(now), gpu_id],
    )?;
    Ok(())
}

/// Clear the claim `session_id` holds on `gpu_id`. A deactivated GPU stays
/// unavailable.
fn release_claim(
    conn: &Connection,
    gpu_id: &str,
    session_id: &str,
    now: &DateTime<Utc>,
) -> Result<bool> {
    let released = conn.execute(
        "UPDATE gpus SET current_session = NULL, is_available = is_active, updated_at = ?1
         WHERE id = ?2 AND current_session = ?3",
        params![ts(now), gpu_id, session_id],
    )?;
    Ok(released == 1)
}

fn ensure_watermark(session: &Session, watermark: &DateTime<Utc>) -> Result<()> {
    if session.last_billed_at.as_ref() != Some(watermark) {
        return Err(RentalError::Conflict {
            session_id: session.id.clone(),
        });
    }
    Ok(())
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Direct access to the underlying connection (tests, maintenance).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // -- Accounts --

    pub fn insert_account(&self, account: &Account) -> Result<()> {
        self.conn.execute(
            "INSERT INTO accounts (id, name, role, wallet_balance, is_provider_approved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account.id,
                account.name,
                account.role.as_str(),
                account.wallet_balance.micros(),
                account.is_provider_approved,
                ts(&account.created_at)
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, id: &str) -> Result<Option<Account>> {
        load_account(&self.conn, id)
    }

    /// Credit `amount` to a wallet and return the new balance.
    pub fn deposit(&self, user_id: &str, amount: Money) -> Result<Money> {
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE accounts SET wallet_balance = wallet_balance + ?1 WHERE id = ?2",
            params![amount.micros(), user_id],
        )?;
        if updated != 1 {
            return Err(RentalError::not_found("account", user_id));
        }
        let balance = balance_of(&tx, user_id)?;
        tx.commit()?;
        Ok(balance)
    }

    pub fn set_provider_approval(&self, user_id: &str, approved: bool) -> Result<Account> {
        let tx = self.conn.unchecked_transaction()?;
        let account =
            load_account(&tx, user_id)?.ok_or_else(|| RentalError::not_found("account", user_id))?;
        if account.role != Role::Provider {
            return Err(RentalError::InvalidInput(format!(
                "account '{user_id}' is a {}, not a provider",
                account.role.as_str()
            )));
        }
        tx.execute(
            "UPDATE accounts SET is_provider_approved = ?1 WHERE id = ?2",
            params![approved, user_id],
        )?;
        let account =
            load_account(&tx, user_id)?.ok_or_else(|| RentalError::not_found("account", user_id))?;
        tx.commit()?;
        Ok(account)
    }

    // -- GPUs --

    pub fn insert_gpu(&self, gpu: &Gpu) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let owner = load_account(&tx, &gpu.provider_id)?
            .ok_or_else(|| RentalError::not_found("account", &gpu.provider_id))?;
        if owner.role != Role::Provider {
            return Err(RentalError::InvalidInput(format!(
                "account '{}' cannot own GPUs",
                owner.id
            )));
        }
        tx.execute(
            "INSERT INTO gpus (id, provider_id, name, model, vram_gb, price_per_hour, is_active,
             is_available, current_session, total_earnings, total_minutes_rented, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                gpu.id,
                gpu.provider_id,
                gpu.name,
                gpu.model,
                gpu.vram_gb,
                gpu.price_per_hour.micros(),
                gpu.is_active,
                gpu.is_available,
                gpu.current_session,
                gpu.total_earnings.micros(),
                gpu.total_minutes_rented,
                ts(&gpu.created_at),
                ts(&gpu.updated_at)
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_gpu(&self, id: &str) -> Result<Option<Gpu>> {
        load_gpu(&self.conn, id)
    }

    /// New price applies to future requests only; open sessions keep their rate.
    pub fn set_gpu_price(&self, id: &str, price: Money, now: DateTime<Utc>) -> Result<Gpu> {
        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE gpus SET price_per_hour = ?1, updated_at = ?2 WHERE id = ?3",
            params![price.micros(), ts(&now), id],
        )?;
        if updated != 1 {
            return Err(RentalError::not_found("gpu", id));
        }
        let gpu = load_gpu(&tx, id)?.ok_or_else(|| RentalError::not_found("gpu", id))?;
        tx.commit()?;
        Ok(gpu)
    }

    pub fn deactivate_gpu(&self, id: &str, now: DateTime<Utc>) -> Result<Gpu> {
        let tx = self.conn.unchecked_transaction()?;
        let gpu = load_gpu(&tx, id)?.ok_or_else(|| RentalError::not_found("gpu", id))?;
        if let Some(session_id) = gpu.current_session.as_deref() {
            let holder = load_session(&tx, session_id)?;
            if holder.is_some_and(|s| s.status == SessionStatus::Active) {
                return Err(RentalError::InvalidInput(format!(
                    "GPU '{id}' cannot be deactivated while session '{session_id}' is active"
                )));
            }
        }
        tx.execute(
            "UPDATE gpus SET is_active = 0, is_available = 0, updated_at = ?1 WHERE id = ?2",
            params![ts(&now), id],
        )?;
        let gpu = load_gpu(&tx, id)?.ok_or_else(|| RentalError::not_found("gpu", id))?;
        tx.commit()?;
        Ok(gpu)
    }

    // -- Sessions --

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        load_session(&self.conn, id)
    }

    pub fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = ?1 ORDER BY start_time, id"
        );
        self.query_sessions(&sql, params![status.as_str()])
    }

    /// Sessions where the user is consumer or provider, newest first.
    pub fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE consumer_id = ?1 OR provider_id = ?1
             ORDER BY created_at DESC, id"
        );
        self.query_sessions(&sql, params![user_id])
    }

    fn query_sessions(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, SessionRow::from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_session()?);
        }
        Ok(result)
    }

    /// Create a pending session and claim its GPU in one step.
    pub fn create_session(&self, req: &NewSession) -> Result<Session> {
        let tx = self.conn.unchecked_transaction()?;

        let gpu = load_gpu(&tx, &req.gpu_id)?
            .ok_or_else(|| RentalError::not_found("gpu", &req.gpu_id))?;
        let consumer = load_account(&tx, &req.consumer_id)?
            .ok_or_else(|| RentalError::not_found("account", &req.consumer_id))?;

        let unavailable = |reason: &str| RentalError::ResourceUnavailable {
            gpu_id: gpu.id.clone(),
            reason: reason.to_string(),
        };
        if !gpu.is_active {
            return Err(unavailable("GPU is not active"));
        }
        if !gpu.is_available || gpu.current_session.is_some() {
            return Err(unavailable("GPU is already rented"));
        }

        let approved = load_account(&tx, &gpu.provider_id)?
            .map(|p| p.is_provider_approved)
            .unwrap_or(false);
        if !approved {
            return Err(RentalError::ProviderNotApproved {
                provider_id: gpu.provider_id.clone(),
            });
        }

        if req.require_funds && consumer.wallet_balance < gpu.price_per_hour {
            return Err(RentalError::InsufficientFunds {
                required: gpu.price_per_hour,
                available: consumer.wallet_balance,
            });
        }

        let now = ts(&req.now);
        tx.execute(
            "INSERT INTO sessions (id, consumer_id, provider_id, gpu_id, status, workload_type,
             hourly_rate, billing_interval_minutes, metrics_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                req.id,
                req.consumer_id,
                gpu.provider_id,
                gpu.id,
                req.workload_type.as_str(),
                gpu.price_per_hour.micros(),
                req.billing_interval_minutes,
                serde_json::to_string(&SessionMetrics::default())?,
                now
            ],
        )?;
        let claimed = tx.execute(
            "UPDATE gpus SET current_session = ?1, is_available = 0, updated_at = ?2
             WHERE id = ?3 AND current_session IS NULL AND is_available = 1 AND is_active = 1",
            params![req.id, now, gpu.id],
        )?;
        if claimed != 1 {
            return Err(unavailable("GPU was claimed concurrently"));
        }

        let session = require_session(&tx, &req.id)?;
        tx.commit()?;
        Ok(session)
    }

    /// `pending → active`, guarded by a funds check and by the GPU claim
    /// still being held on an active GPU, both inside the transaction.
    pub fn activate_session(&self, act: &Activation) -> Result<Session> {
        let tx = self.conn.unchecked_transaction()?;
        let session = require_session(&tx, &act.session_id)?;
        if session.status != SessionStatus::Pending {
            return Err(RentalError::InvalidTransition {
                session_id: session.id,
                status: session.status,
                action: "start",
            });
        }

        let required = session.interval_cost();
        let available = balance_of(&tx, &session.consumer_id)?;
        if available < required {
            return Err(RentalError::InsufficientFunds {
                required,
                available,
            });
        }

        // The pending claim must still hold on an active GPU.
        let gpu = load_gpu(&tx, &session.gpu_id)?
            .ok_or_else(|| RentalError::not_found("gpu", &session.gpu_id))?;
        if !gpu.is_active || gpu.current_session.as_deref() != Some(session.id.as_str()) {
            return Err(RentalError::ResourceUnavailable {
                gpu_id: gpu.id,
                reason: "GPU is not active".into(),
            });
        }

        let start = ts(&act.start_time);
        tx.execute(
            "UPDATE sessions SET status = 'active', start_time = ?1, last_billed_at = ?1,
             connection_json = ?2, metrics_json = ?3, updated_at = ?1
             WHERE id = ?4 AND status = 'pending'",
            params![
                start,
                serde_json::to_string(&act.connection)?,
                serde_json::to_string(&SessionMetrics::initial(act.start_time))?,
                session.id
            ],
        )?;
        let claimed = tx.execute(
            "UPDATE gpus SET is_available = 0, updated_at = ?2
             WHERE id = ?3 AND current_session = ?1 AND is_active = 1",
            params![session.id, start, session.gpu_id],
        )?;
        if claimed != 1 {
            return Err(RentalError::ResourceUnavailable {
                gpu_id: session.gpu_id,
                reason: "GPU is not active".into(),
            });
        }

        let session = require_session(&tx, &act.session_id)?;
        tx.commit()?;
        Ok(session)
    }

    /// `pending → cancelled`. Never touches a wallet.
    pub fn cancel_session(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<Session> {
        let tx = self.conn.unchecked_transaction()?;
        let session = require_session(&tx, id)?;
        if session.status != SessionStatus::Pending {
            return Err(RentalError::InvalidTransition {
                session_id: session.id,
                status: session.status,
                action: "cancel",
            });
        }
        tx.execute(
            "UPDATE sessions SET status = 'cancelled', cancellation_reason = ?1, end_time = ?2,
             updated_at = ?2 WHERE id = ?3",
            params![reason, ts(&now), id],
        )?;
        release_claim(&tx, &session.gpu_id, id, &now)?;

        let session = require_session(&tx, id)?;
        tx.commit()?;
        Ok(session)
    }

    /// Record the stop instant on an active session. An already-recorded
    /// end time is kept so an interrupted stop can be retried.
    pub fn mark_session_ending(&self, id: &str, end_time: DateTime<Utc>) -> Result<Session> {
        let tx = self.conn.unchecked_transaction()?;
        let session = require_session(&tx, id)?;
        if session.status != SessionStatus::Active {
            return Err(RentalError::InvalidTransition {
                session_id: session.id,
                status: session.status,
                action: "stop",
            });
        }
        tx.execute(
            "UPDATE sessions SET end_time = COALESCE(end_time, ?1), updated_at = ?1 WHERE id = ?2",
            params![ts(&end_time), id],
        )?;
        let session = require_session(&tx, id)?;
        tx.commit()?;
        Ok(session)
    }

    pub fn apply_interval_charge(&self, charge: &IntervalCharge) -> Result<IntervalSettlement> {
        let tx = self.conn.unchecked_transaction()?;
        let session = require_session(&tx, &charge.session_id)?;
        if session.status != SessionStatus::Active || session.end_time.is_some() {
            return Err(RentalError::Conflict {
                session_id: session.id,
            });
        }
        ensure_watermark(&session, &charge.watermark)?;

        let now = ts(&charge.now);
        let available = balance_of(&tx, &session.consumer_id)?;
        if available < charge.cost {
            tx.execute(
                "UPDATE sessions SET status = 'terminated', end_time = ?1, termination_reason = ?2,
                 updated_at = ?1 WHERE id = ?3",
                params![now, TERMINATION_INSUFFICIENT_FUNDS, session.id],
            )?;
            release_claim(&tx, &session.gpu_id, &session.id, &charge.now)?;
            let session = require_session(&tx, &charge.session_id)?;
            tx.commit()?;
            return Ok(IntervalSettlement::Terminated {
                session,
                required: charge.cost,
                available,
            });
        }

        let (consumer_balance, provider_balance) = transfer(&tx, &session, charge.cost)?;
        accrue_gpu(&tx, &session.gpu_id, charge.cost, charge.minutes, &charge.now)?;
        let watermark = charge.watermark + Duration::minutes(charge.minutes);
        tx.execute(
            "UPDATE sessions SET total_cost = total_cost + ?1,
             duration_minutes = duration_minutes + ?2, last_billed_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                charge.cost.micros(),
                charge.minutes,
                ts(&watermark),
                now,
                session.id
            ],
        )?;
        record_ledger_entry(
            &tx,
            &session,
            charge.cost,
            charge.minutes,
            "interval",
            &charge.now,
        )?;

        let session = require_session(&tx, &charge.session_id)?;
        tx.commit()?;
        Ok(IntervalSettlement::Settled {
            session,
            cost: charge.cost,
            minutes: charge.minutes,
            consumer_balance,
            provider_balance,
        })
    }

    pub fn apply_final_charge(&self, charge: &FinalCharge) -> Result<FinalSettlement> {
        let tx = self.conn.unchecked_transaction()?;
        let session = require_session(&tx, &charge.session_id)?;
        let settleable = matches!(
            session.status,
            SessionStatus::Active | SessionStatus::Completed
        ) && !session.is_billed
            && session.end_time == Some(charge.end_time);
        if !settleable {
            return Err(RentalError::Conflict {
                session_id: session.id,
            });
        }
        ensure_watermark(&session, &charge.watermark)?;

        let now = ts(&charge.now);

        if charge.minutes <= 0 {
            tx.execute(
                "UPDATE sessions SET status = 'completed', is_billed = 1, unbilled_cost = 0,
                 updated_at = ?1 WHERE id = ?2",
                params![now, session.id],
            )?;
            release_claim(&tx, &session.gpu_id, &session.id, &charge.now)?;
            let session = require_session(&tx, &charge.session_id)?;
            tx.commit()?;
            return Ok(FinalSettlement::NothingDue { session });
        }

        let available = balance_of(&tx, &session.consumer_id)?;
        if available < charge.cost {
            tx.execute(
                "UPDATE sessions SET status = 'completed', is_billed = 0, unbilled_cost = ?1,
                 updated_at = ?2 WHERE id = ?3",
                params![charge.cost.micros(), now, session.id],
            )?;
            release_claim(&tx, &session.gpu_id, &session.id, &charge.now)?;
            let session = require_session(&tx, &charge.session_id)?;
            tx.commit()?;
            return Ok(FinalSettlement::Shortfall {
                session,
                required: charge.cost,
                available,
            });
        }

        let (consumer_balance, provider_balance) = transfer(&tx, &session, charge.cost)?;
        accrue_gpu(&tx, &session.gpu_id, charge.cost, charge.minutes, &charge.now)?;
        tx.execute(
            "UPDATE sessions SET status = 'completed', is_billed = 1, unbilled_cost = 0,
             total_cost = total_cost + ?1, duration_minutes = duration_minutes + ?2,
             last_billed_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                charge.cost.micros(),
                charge.minutes,
                ts(&charge.end_time),
                now,
                session.id
            ],
        )?;
        record_ledger_entry(
            &tx,
            &session,
            charge.cost,
            charge.minutes,
            "final",
            &charge.now,
        )?;
        release_claim(&tx, &session.gpu_id, &session.id, &charge.now)?;

        let session = require_session(&tx, &charge.session_id)?;
        tx.commit()?;
        Ok(FinalSettlement::Settled {
            session,
            cost: charge.cost,
            minutes: charge.minutes,
            consumer_balance,
            provider_balance,
        })
    }

    /// Best-effort cleanup: clear `session_id`'s claim on `gpu_id` if still held.
    pub fn release_gpu(&self, gpu_id: &str, session_id: &str, now: DateTime<Utc>) -> Result<bool> {
        release_claim(&self.conn, gpu_id, session_id, &now)
    }

    pub fn record_metric_sample(
        &self,
        id: &str,
        sample: MetricSample,
        at: DateTime<Utc>,
    ) -> Result<Session> {
        let tx = self.conn.unchecked_transaction()?;
        let mut session = require_session(&tx, id)?;
        if session.status != SessionStatus::Active {
            return Err(RentalError::InvalidTransition {
                session_id: session.id,
                status: session.status,
                action: "record metrics for",
            });
        }
        session.metrics.push(sample, at);
        tx.execute(
            "UPDATE sessions SET metrics_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(&session.metrics)?, ts(&at), id],
        )?;
        let session = require_session(&tx, id)?;
        tx.commit()?;
        Ok(session)
    }

    // -- Ledger --

    pub fn ledger_entries(&self, session_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, consumer_id, provider_id, amount, minutes, kind, created_at
             FROM ledger_entries WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, session_id, consumer_id, provider_id, amount, minutes, kind, created_at) =
                row?;
            result.push(LedgerEntry {
                id,
                session_id,
                consumer_id,
                provider_id,
                amount: Money::from_micros(amount),
                minutes,
                kind,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(result)
    }

    pub fn user_summary(&self, user_id: &str) -> Result<UserSummary> {
        let wallet_balance = balance_of(&self.conn, user_id)?;
        let total_spent: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE consumer_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        let total_earned: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM ledger_entries WHERE provider_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM sessions
             WHERE consumer_id = ?1 OR provider_id = ?1
             GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut sessions_by_status = Vec::new();
        for row in rows {
            let (status, count) = row?;
            sessions_by_status.push((status.parse::<SessionStatus>()?, count));
        }

        Ok(UserSummary {
            user_id: user_id.to_string(),
            wallet_balance,
            total_spent: Money::from_micros(total_spent),
            total_earned: Money::from_micros(total_earned),
            sessions_by_status,
        })
    }
}
