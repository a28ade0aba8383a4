// src/core/types.rs — Core domain types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::telemetry::SessionMetrics;
use crate::infra::errors::{RentalError, Result};

const MICROS_PER_UNIT: i64 = 1_000_000;
const MICROS_PER_CENT: i64 = 10_000;

// ─── Money ──────────────────────────────────────────────────────

/// A currency amount in micro-units (1.00 == 1_000_000).
///
/// Integer storage keeps debit and credit of a transfer bit-identical, so
/// conservation checks are exact rather than tolerance-based.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_micros(micros: i64) -> Self {
        Money(micros)
    }

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents * MICROS_PER_CENT)
    }

    pub const fn micros(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Cost of `minutes` of usage when `self` is an hourly rate.
    /// Rounds down to the micro-unit.
    pub fn prorate_minutes(self, minutes: i64) -> Money {
        let micros = (self.0 as i128 * minutes as i128) / 60;
        Money(micros.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Money {
    /// Rounded to cents: `2.00`, `-0.50`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = (self.0 as i128).abs();
        let cents = (abs + (MICROS_PER_CENT as i128 / 2)) / MICROS_PER_CENT as i128;
        write!(f, "{}{}.{:02}", sign, cents / 100, cents % 100)
    }
}

impl FromStr for Money {
    type Err = RentalError;

    /// Parse a non-negative decimal with at most six fractional digits.
    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim().trim_start_matches('$');
        let invalid = || RentalError::InvalidInput(format!("not a valid amount: '{s}'"));

        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
            || frac.len() > 6
        {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_micros: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<6}", frac).parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(MICROS_PER_UNIT)
            .and_then(|m| m.checked_add(frac_micros))
            .map(Money)
            .ok_or_else(invalid)
    }
}

// ─── Enumerations ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Terminated
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SessionStatus::Pending),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "terminated" => Ok(SessionStatus::Terminated),
            other => Err(RentalError::InvalidInput(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadType {
    Gaming,
    Ml,
    Rendering,
    VideoProcessing,
    #[default]
    Other,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Gaming => "gaming",
            WorkloadType::Ml => "ml",
            WorkloadType::Rendering => "rendering",
            WorkloadType::VideoProcessing => "video-processing",
            WorkloadType::Other => "other",
        }
    }
}

impl FromStr for WorkloadType {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gaming" => Ok(WorkloadType::Gaming),
            "ml" => Ok(WorkloadType::Ml),
            "rendering" => Ok(WorkloadType::Rendering),
            "video-processing" => Ok(WorkloadType::VideoProcessing),
            "other" | "" => Ok(WorkloadType::Other),
            other => Err(RentalError::InvalidInput(format!(
                "unknown workload type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Consumer,
    Provider,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Consumer => "consumer",
            Role::Provider => "provider",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = RentalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "consumer" => Ok(Role::Consumer),
            "provider" => Ok(Role::Provider),
            "admin" => Ok(Role::Admin),
            other => Err(RentalError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// The already-authenticated caller of a lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ─── Entities ───────────────────────────────────────────────────

/// A user and their wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub wallet_balance: Money,
    pub is_provider_approved: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            wallet_balance: Money::ZERO,
            is_provider_approved: false,
            created_at: Utc::now(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.id.clone(), self.role)
    }
}

/// A rentable GPU in the resource registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    pub id: String,
    pub provider_id: String,
    pub name: String,
    pub model: String,
    pub vram_gb: u32,
    pub price_per_hour: Money,
    pub is_active: bool,
    pub is_available: bool,
    pub current_session: Option<String>,
    pub total_earnings: Money,
    pub total_minutes_rented: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Gpu {
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        name: impl Into<String>,
        model: impl Into<String>,
        vram_gb: u32,
        price_per_hour: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
            name: name.into(),
            model: model.into(),
            vram_gb,
            price_per_hour,
            is_active: true,
            is_available: true,
            current_session: None,
            total_earnings: Money::ZERO,
            total_minutes_rented: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_hours_rented(&self) -> f64 {
        self.total_minutes_rented as f64 / 60.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub host: String,
    pub port: u16,
    pub access_token: String,
}

/// One rental of one GPU by one consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub consumer_id: String,
    pub provider_id: String,
    pub gpu_id: String,
    pub status: SessionStatus,
    pub workload_type: WorkloadType,
    pub hourly_rate: Money,
    pub billing_interval_minutes: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_billed_at: Option<DateTime<Utc>>,
    pub total_cost: Money,
    pub duration_minutes: i64,
    pub is_billed: bool,
    /// Amount that could not be collected at finalization.
    pub unbilled_cost: Money,
    pub connection: Option<ConnectionDetails>,
    pub metrics: SessionMetrics,
    pub cancellation_reason: Option<String>,
    pub termination_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_party(&self, user_id: &str) -> bool {
        self.consumer_id == user_id || self.provider_id == user_id
    }

    /// Consumer, provider, or platform admin.
    pub fn authorize(&self, actor: &Actor) -> Result<()> {
        if actor.is_admin() || self.is_party(&actor.user_id) {
            Ok(())
        } else {
            Err(RentalError::NotAuthorized {
                actor_id: actor.user_id.clone(),
                target: format!("session '{}'", self.id),
            })
        }
    }

    /// Cost of one full billing interval at this session's rate.
    pub fn interval_cost(&self) -> Money {
        self.hourly_rate
            .prorate_minutes(self.billing_interval_minutes)
    }

    /// The cost implied by `duration_minutes`, for consistency checks.
    pub fn expected_total_cost(&self) -> Money {
        self.hourly_rate.prorate_minutes(self.duration_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_parse_and_display() {
        assert_eq!("2.00".parse::<Money>().unwrap(), Money::from_cents(200));
        assert_eq!("2".parse::<Money>().unwrap(), Money::from_cents(200));
        assert_eq!("$0.5".parse::<Money>().unwrap(), Money::from_cents(50));
        assert_eq!(
            "0.000001".parse::<Money>().unwrap(),
            Money::from_micros(1)
        );
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_micros(-500_000).to_string(), "-0.50");
        assert_eq!(Money::from_micros(16_667).to_string(), "0.02");
    }

    #[test]
    fn test_money_parse_rejects_garbage() {
        assert!("".parse::<Money>().is_err());
        assert!("-1".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
        assert!("1.0000001".parse::<Money>().is_err());
        // overflows i64 micro-units
        assert!("9223372036855".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
    }

    #[test]
    fn test_prorate_minutes() {
        let rate = Money::from_cents(200);
        assert_eq!(rate.prorate_minutes(60), Money::from_cents(200));
        assert_eq!(rate.prorate_minutes(30), Money::from_cents(100));
        assert_eq!(rate.prorate_minutes(90), Money::from_cents(300));
        // 1.00/h for one minute rounds down to the micro-unit
        assert_eq!(
            Money::from_cents(100).prorate_minutes(1),
            Money::from_micros(16_666)
        );
        assert_eq!(rate.prorate_minutes(0), Money::ZERO);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Terminated.is_terminal());
        assert_eq!(
            "terminated".parse::<SessionStatus>().unwrap(),
            SessionStatus::Terminated
        );
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_workload_type_parse() {
        assert_eq!(
            "video-processing".parse::<WorkloadType>().unwrap(),
            WorkloadType::VideoProcessing
        );
        assert_eq!("".parse::<WorkloadType>().unwrap(), WorkloadType::Other);
        assert!("mining".parse::<WorkloadType>().is_err());
    }
}
