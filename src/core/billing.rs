// src/core/billing.rs — Billing engine
//
// Converts elapsed session time into money. Both entry points hold the
// session's lock for their whole read-compute-settle cycle; the store then
// re-checks the watermark inside the settling transaction.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::core::invariants;
use crate::core::locks::SessionLocks;
use crate::core::types::{Money, Session, SessionStatus};
use crate::infra::clock::Clock;
use crate::infra::errors::{RentalError, Result};
use crate::store::store::{
    FinalCharge, FinalSettlement, IntervalCharge, IntervalSettlement, TERMINATION_INSUFFICIENT_FUNDS,
};
use crate::store::StoreHandle;

/// What a billing attempt did to one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingOutcome {
    /// Less than one interval has elapsed since the watermark.
    NotDue { minutes_until_due: i64 },
    Billed {
        cost: Money,
        minutes: i64,
        total_cost: Money,
        duration_minutes: i64,
        consumer_balance: Money,
        provider_balance: Money,
        /// True when this charge settled the session's final stretch.
        final_settlement: bool,
    },
    /// The consumer could not cover the next interval; the session was ended.
    Terminated {
        reason: String,
        required: Money,
        available: Money,
    },
    /// Finalization could not collect; the shortfall was recorded.
    InsufficientFunds { required: Money, available: Money },
    AlreadyBilled,
    /// The session was not in a billable state when examined.
    Skipped { reason: String },
    Error { message: String },
}

impl BillingOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            BillingOutcome::NotDue { .. } => "not_due",
            BillingOutcome::Billed { .. } => "billed",
            BillingOutcome::Terminated { .. } => "terminated",
            BillingOutcome::InsufficientFunds { .. } => "insufficient_funds",
            BillingOutcome::AlreadyBilled => "already_billed",
            BillingOutcome::Skipped { .. } => "skipped",
            BillingOutcome::Error { .. } => "error",
        }
    }

    /// Outcomes observers care about in real time.
    pub fn should_notify(&self) -> bool {
        matches!(
            self,
            BillingOutcome::Billed { .. } | BillingOutcome::Terminated { .. }
        )
    }

    pub fn error(err: impl fmt::Display) -> Self {
        BillingOutcome::Error {
            message: err.to_string(),
        }
    }
}

impl fmt::Display for BillingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingOutcome::NotDue { minutes_until_due } => {
                write!(f, "not due for another {minutes_until_due} min")
            }
            BillingOutcome::Billed {
                cost,
                minutes,
                consumer_balance,
                provider_balance,
                final_settlement,
                ..
            } => {
                let label = if *final_settlement { "settled" } else { "billed" };
                write!(
                    f,
                    "{label} {cost} for {minutes} min (consumer balance {consumer_balance}, provider balance {provider_balance})"
                )
            }
            BillingOutcome::Terminated {
                reason,
                required,
                available,
            } => write!(
                f,
                "terminated: {reason} (required {required}, available {available})"
            ),
            BillingOutcome::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "final charge not collected (required {required}, available {available})"
            ),
            BillingOutcome::AlreadyBilled => f.write_str("already billed"),
            BillingOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            BillingOutcome::Error { message } => write!(f, "error: {message}"),
        }
    }
}

pub struct BillingEngine {
    store: StoreHandle,
    locks: Arc<SessionLocks>,
    clock: Arc<dyn Clock>,
}

impl BillingEngine {
    pub fn new(store: StoreHandle, locks: Arc<SessionLocks>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks,
            clock,
        }
    }

    /// Bill one full interval if it has elapsed. Never bills more than one.
    pub async fn incremental_bill(&self, session_id: &str) -> Result<BillingOutcome> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.load(session_id).await?;

        if session.status != SessionStatus::Active {
            return Ok(BillingOutcome::Skipped {
                reason: format!("session is {}", session.status),
            });
        }
        if session.end_time.is_some() {
            return Ok(BillingOutcome::Skipped {
                reason: "session is stopping".into(),
            });
        }

        let watermark = billing_watermark(&session)?;
        let now = self.clock.now();
        let elapsed = (now - watermark).num_minutes();
        let interval = session.billing_interval_minutes;
        if elapsed < interval {
            return Ok(BillingOutcome::NotDue {
                minutes_until_due: interval - elapsed.max(0),
            });
        }

        let charge = IntervalCharge {
            session_id: session.id.clone(),
            watermark,
            minutes: interval,
            cost: session.interval_cost(),
            now,
        };

        match self.store.apply_interval_charge(charge).await? {
            IntervalSettlement::Settled {
                session,
                cost,
                minutes,
                consumer_balance,
                provider_balance,
            } => {
                invariants::report(&invariants::check_session(&session));
                info!(
                    session_id = %session.id,
                    cost = %cost,
                    total_cost = %session.total_cost,
                    "Billed interval"
                );
                Ok(BillingOutcome::Billed {
                    cost,
                    minutes,
                    total_cost: session.total_cost,
                    duration_minutes: session.duration_minutes,
                    consumer_balance,
                    provider_balance,
                    final_settlement: false,
                })
            }
            IntervalSettlement::Terminated {
                session,
                required,
                available,
            } => {
                invariants::report(&invariants::check_session(&session));
                warn!(
                    session_id = %session.id,
                    required = %required,
                    available = %available,
                    "Session terminated for insufficient funds"
                );
                Ok(BillingOutcome::Terminated {
                    reason: session
                        .termination_reason
                        .unwrap_or_else(|| TERMINATION_INSUFFICIENT_FUNDS.into()),
                    required,
                    available,
                })
            }
        }
    }

    /// Settle everything between the watermark and the session's end time.
    /// Safe to call repeatedly.
    pub async fn finalize_billing(&self, session_id: &str) -> Result<BillingOutcome> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.load(session_id).await?;
        self.finalize_locked(&session).await
    }

    /// Finalization body. The caller must hold the session's lock.
    pub(crate) async fn finalize_locked(&self, session: &Session) -> Result<BillingOutcome> {
        if session.is_billed {
            return Ok(BillingOutcome::AlreadyBilled);
        }

        let finalizable = match session.status {
            SessionStatus::Active => session.end_time.is_some(),
            // a recorded shortfall can be retried
            SessionStatus::Completed => true,
            _ => false,
        };
        let end_time = match session.end_time {
            Some(end) if finalizable => end,
            _ => {
                return Err(RentalError::InvalidTransition {
                    session_id: session.id.clone(),
                    status: session.status,
                    action: "finalize",
                })
            }
        };

        let watermark = billing_watermark(session)?;
        // whole minutes only, so duration stays an integer count
        let minutes = (end_time - watermark).num_minutes().max(0);
        let charge = FinalCharge {
            session_id: session.id.clone(),
            watermark,
            end_time,
            minutes,
            cost: session.hourly_rate.prorate_minutes(minutes),
            now: self.clock.now(),
        };

        match self.store.apply_final_charge(charge).await? {
            FinalSettlement::Settled {
                session,
                cost,
                minutes,
                consumer_balance,
                provider_balance,
            } => {
                invariants::report(&invariants::check_session(&session));
                info!(
                    session_id = %session.id,
                    cost = %cost,
                    total_cost = %session.total_cost,
                    duration_minutes = session.duration_minutes,
                    "Finalized session billing"
                );
                Ok(BillingOutcome::Billed {
                    cost,
                    minutes,
                    total_cost: session.total_cost,
                    duration_minutes: session.duration_minutes,
                    consumer_balance,
                    provider_balance,
                    final_settlement: true,
                })
            }
            FinalSettlement::Shortfall {
                session,
                required,
                available,
            } => {
                warn!(
                    session_id = %session.id,
                    required = %required,
                    available = %available,
                    "Final charge could not be collected"
                );
                Ok(BillingOutcome::InsufficientFunds {
                    required,
                    available,
                })
            }
            FinalSettlement::NothingDue { session } => {
                info!(session_id = %session.id, "Nothing left to bill");
                Ok(BillingOutcome::AlreadyBilled)
            }
        }
    }

    async fn load(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| RentalError::not_found("session", session_id))
    }
}

fn billing_watermark(session: &Session) -> Result<chrono::DateTime<chrono::Utc>> {
    session.last_billed_at.ok_or_else(|| {
        RentalError::persistence(format!(
            "session '{}' has no billing watermark",
            session.id
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_kinds_and_notify() {
        let billed = BillingOutcome::Billed {
            cost: Money::from_cents(200),
            minutes: 60,
            total_cost: Money::from_cents(200),
            duration_minutes: 60,
            consumer_balance: Money::from_cents(800),
            provider_balance: Money::from_cents(200),
            final_settlement: false,
        };
        assert_eq!(billed.kind(), "billed");
        assert!(billed.should_notify());
        assert!(billed.to_string().contains("billed 2.00 for 60 min"));

        let short = BillingOutcome::InsufficientFunds {
            required: Money::from_cents(100),
            available: Money::from_cents(40),
        };
        assert_eq!(short.kind(), "insufficient_funds");
        assert!(!short.should_notify());
        assert!(!BillingOutcome::AlreadyBilled.should_notify());
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(BillingOutcome::Terminated {
            reason: "insufficient funds".into(),
            required: Money::from_cents(200),
            available: Money::from_cents(100),
        })
        .unwrap();
        assert_eq!(json["kind"], "terminated");
        assert_eq!(json["required"], 2_000_000);
    }
}
