// src/infra/daemon/scheduler.rs — Periodic billing sweep
//
// Each sweep lists active sessions and bills each in its own task. One
// session failing (or panicking) becomes an `Error` entry for that session
// and never aborts the others.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::billing::{BillingEngine, BillingOutcome};
use crate::core::notifier::BillingNotifier;
use crate::core::types::SessionStatus;
use crate::infra::errors::Result;
use crate::store::StoreHandle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepEntry {
    pub session_id: String,
    /// True when the session already had an end time and was finalized
    /// instead of incrementally billed.
    pub recovered: bool,
    pub outcome: BillingOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub entries: Vec<SweepEntry>,
}

impl SweepReport {
    pub fn count(&self, kind: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome.kind() == kind)
            .count()
    }

    pub fn outcome_for(&self, session_id: &str) -> Option<&BillingOutcome> {
        self.entries
            .iter()
            .find(|e| e.session_id == session_id)
            .map(|e| &e.outcome)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BillingScheduler {
    billing: Arc<BillingEngine>,
    store: StoreHandle,
    notifier: Arc<dyn BillingNotifier>,
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl BillingScheduler {
    pub fn new(
        billing: Arc<BillingEngine>,
        store: StoreHandle,
        notifier: Arc<dyn BillingNotifier>,
        period: Duration,
    ) -> Self {
        Self {
            billing,
            store,
            notifier,
            period,
            running: Mutex::new(None),
        }
    }

    /// Run one sweep now. Only listing the active sessions can fail the
    /// whole sweep; per-session failures are entries in the report.
    pub async fn tick(&self) -> Result<SweepReport> {
        let sessions = self.store.sessions_with_status(SessionStatus::Active).await?;
        if sessions.is_empty() {
            tracing::debug!("Billing sweep: no active sessions");
            return Ok(SweepReport::default());
        }

        let tasks = sessions.into_iter().map(|session| {
            let billing = self.billing.clone();
            let recovered = session.end_time.is_some();
            let session_id = session.id;
            let handle = {
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    if recovered {
                        billing.finalize_billing(&session_id).await
                    } else {
                        billing.incremental_bill(&session_id).await
                    }
                })
            };
            async move {
                let outcome = match handle.await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => BillingOutcome::error(e),
                    Err(join_err) => BillingOutcome::error(format!("billing task failed: {join_err}")),
                };
                SweepEntry {
                    session_id,
                    recovered,
                    outcome,
                }
            }
        });
        let entries = join_all(tasks).await;

        for entry in &entries {
            if let BillingOutcome::Error { message } = &entry.outcome {
                tracing::error!(session_id = %entry.session_id, "Billing failed: {}", message);
            }
            if entry.outcome.should_notify() {
                self.notifier.notify(&entry.session_id, &entry.outcome).await;
            }
        }

        let report = SweepReport { entries };
        tracing::info!(
            sessions = report.entries.len(),
            billed = report.count("billed"),
            terminated = report.count("terminated"),
            errors = report.count("error"),
            "Billing sweep complete"
        );
        Ok(report)
    }

    /// Start sweeping every `period`. Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the immediate first tick
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = this.tick().await {
                            tracing::error!("Billing sweep failed: {}", e);
                        }
                    }
                }
            }
            tracing::info!("Billing scheduler stopped");
        });

        tracing::info!(period_secs = self.period.as_secs(), "Billing scheduler started");
        *running = Some(Running { token, handle });
        true
    }

    /// Stop sweeping and wait for an in-flight sweep to finish. The
    /// scheduler can be started again afterwards.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(Running { token, handle }) = running {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("Billing scheduler task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
