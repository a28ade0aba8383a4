// src/core/invariants.rs — Consistency checks over sessions and GPU claims
//
// Checks never mutate. Callers log violations; a violation means a bug in
// this crate, not bad input.

use std::fmt;

use crate::core::types::{Gpu, Money, Session, SessionStatus};

/// Rounding slack allowed between accrued cost and `rate × duration`.
pub const COST_TOLERANCE: Money = Money::from_cents(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    CostMismatch {
        session_id: String,
        total_cost: Money,
        expected: Money,
    },
    NegativeAccumulator {
        session_id: String,
    },
    StartTimeMismatch {
        session_id: String,
        status: SessionStatus,
    },
    WatermarkBeforeStart {
        session_id: String,
    },
    EndTimeMismatch {
        session_id: String,
        status: SessionStatus,
    },
    BilledButNotCompleted {
        session_id: String,
        status: SessionStatus,
    },
    TerminalSessionHoldsGpu {
        session_id: String,
        gpu_id: String,
    },
    ActiveSessionOnAvailableGpu {
        session_id: String,
        gpu_id: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::CostMismatch {
                session_id,
                total_cost,
                expected,
            } => write!(
                f,
                "session {session_id}: total cost {total_cost} != rate x duration {expected}"
            ),
            Violation::NegativeAccumulator { session_id } => {
                write!(f, "session {session_id}: negative cost or duration")
            }
            Violation::StartTimeMismatch { session_id, status } => {
                write!(f, "session {session_id}: start time inconsistent with status {status}")
            }
            Violation::WatermarkBeforeStart { session_id } => {
                write!(f, "session {session_id}: billing watermark precedes start time")
            }
            Violation::EndTimeMismatch { session_id, status } => {
                write!(f, "session {session_id}: end time inconsistent with status {status}")
            }
            Violation::BilledButNotCompleted { session_id, status } => {
                write!(f, "session {session_id}: marked billed while {status}")
            }
            Violation::TerminalSessionHoldsGpu { session_id, gpu_id } => {
                write!(f, "GPU {gpu_id} still claimed by ended session {session_id}")
            }
            Violation::ActiveSessionOnAvailableGpu { session_id, gpu_id } => {
                write!(f, "GPU {gpu_id} shows available while session {session_id} is active")
            }
        }
    }
}

pub fn check_session(session: &Session) -> Vec<Violation> {
    let mut out = Vec::new();
    let id = || session.id.clone();

    if session.total_cost < Money::ZERO || session.duration_minutes < 0 {
        out.push(Violation::NegativeAccumulator { session_id: id() });
    }

    let expected = session.expected_total_cost();
    let drift = if session.total_cost > expected {
        session.total_cost - expected
    } else {
        expected - session.total_cost
    };
    if drift > COST_TOLERANCE {
        out.push(Violation::CostMismatch {
            session_id: id(),
            total_cost: session.total_cost,
            expected,
        });
    }

    let started = session.start_time.is_some();
    // cancellation is only possible before start
    let should_be_started = matches!(
        session.status,
        SessionStatus::Active | SessionStatus::Completed | SessionStatus::Terminated
    );
    if should_be_started != started {
        out.push(Violation::StartTimeMismatch {
            session_id: id(),
            status: session.status,
        });
    }

    if let (Some(start), Some(mark)) = (session.start_time, session.last_billed_at) {
        if mark < start {
            out.push(Violation::WatermarkBeforeStart { session_id: id() });
        }
    }

    // An active session may carry an end time only while its stop is in flight.
    let ended = session.end_time.is_some();
    let end_ok = match session.status {
        SessionStatus::Pending => !ended,
        SessionStatus::Active => true,
        _ => ended,
    };
    if !end_ok {
        out.push(Violation::EndTimeMismatch {
            session_id: id(),
            status: session.status,
        });
    }

    if session.is_billed && session.status != SessionStatus::Completed {
        out.push(Violation::BilledButNotCompleted {
            session_id: id(),
            status: session.status,
        });
    }

    out
}

/// The GPU side of a session: claimed while live, released once ended.
pub fn check_claim(gpu: &Gpu, session: &Session) -> Vec<Violation> {
    let mut out = Vec::new();
    let holds = gpu.current_session.as_deref() == Some(session.id.as_str());

    if holds && session.status.is_terminal() {
        out.push(Violation::TerminalSessionHoldsGpu {
            session_id: session.id.clone(),
            gpu_id: gpu.id.clone(),
        });
    }
    if session.status == SessionStatus::Active && gpu.is_available {
        out.push(Violation::ActiveSessionOnAvailableGpu {
            session_id: session.id.clone(),
            gpu_id: gpu.id.clone(),
        });
    }
    out
}

/// Log every violation at `error`. Returns how many were found.
pub fn report(violations: &[Violation]) -> usize {
    for v in violations {
        tracing::error!(violation = %v, "invariant violated");
    }
    violations.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telemetry::SessionMetrics;
    use crate::core::types::WorkloadType;
    use chrono::{Duration, TimeZone, Utc};

    fn active_session() -> Session {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        Session {
            id: "s-1".into(),
            consumer_id: "c".into(),
            provider_id: "p".into(),
            gpu_id: "g".into(),
            status: SessionStatus::Active,
            workload_type: WorkloadType::Ml,
            hourly_rate: Money::from_cents(200),
            billing_interval_minutes: 60,
            start_time: Some(start),
            end_time: None,
            last_billed_at: Some(start + Duration::minutes(60)),
            total_cost: Money::from_cents(200),
            duration_minutes: 60,
            is_billed: false,
            unbilled_cost: Money::ZERO,
            connection: None,
            metrics: SessionMetrics::initial(start),
            cancellation_reason: None,
            termination_reason: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_consistent_session_passes() {
        assert!(check_session(&active_session()).is_empty());
    }

    #[test]
    fn test_cost_drift_detected() {
        let mut s = active_session();
        s.total_cost = Money::from_cents(250);
        let v = check_session(&s);
        assert!(matches!(v.as_slice(), [Violation::CostMismatch { .. }]));
    }

    #[test]
    fn test_sub_cent_rounding_tolerated() {
        let mut s = active_session();
        s.total_cost = Money::from_micros(s.total_cost.micros() - 3);
        assert!(check_session(&s).is_empty());
    }

    #[test]
    fn test_terminal_without_end_time_detected() {
        let mut s = active_session();
        s.status = SessionStatus::Completed;
        let v = check_session(&s);
        assert!(v
            .iter()
            .any(|v| matches!(v, Violation::EndTimeMismatch { .. })));
    }

    #[test]
    fn test_terminal_session_holding_gpu_detected() {
        let mut s = active_session();
        s.status = SessionStatus::Terminated;
        s.end_time = Some(Utc::now());
        let mut gpu = Gpu::new("g", "p", "Rig", "RTX 4090", 24, Money::from_cents(200));
        gpu.current_session = Some("s-1".into());
        gpu.is_available = false;
        let v = check_claim(&gpu, &s);
        assert_eq!(v.len(), 1);
        assert!(v[0].to_string().contains("ended session"));
    }
}
