// src/core/lifecycle.rs — Session lifecycle manager
//
// request → pending → start → active → stop → completed
//                   ↘ cancel → cancelled      ↘ (insolvency) terminated
//
// Validation failures return before anything is written. Status changes and
// GPU claim/release happen in the same store transaction.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::billing::{BillingEngine, BillingOutcome};
use crate::core::invariants;
use crate::core::locks::SessionLocks;
use crate::core::telemetry::{MetricSample, MetricsSummary};
use crate::core::types::{Actor, ConnectionDetails, Session, WorkloadType};
use crate::infra::clock::Clock;
use crate::infra::config::{Config, ConnectionConfig};
use crate::infra::errors::{RentalError, Result};
use crate::store::store::{Activation, LedgerEntry, NewSession, UserSummary};
use crate::store::StoreHandle;

pub const DEFAULT_CANCEL_REASON: &str = "Cancelled by user";

/// Per-deployment knobs the manager needs from the config file.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub billing_interval_minutes: i64,
    pub require_funds_at_request: bool,
    pub connection: ConnectionConfig,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            billing_interval_minutes: config.billing.default_interval_minutes,
            require_funds_at_request: config.billing.require_funds_at_request,
            connection: config.connection.clone(),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Result of a stop: the final session snapshot and how finalization went.
#[derive(Debug, Clone, Serialize)]
pub struct StoppedSession {
    pub session: Session,
    pub billing: BillingOutcome,
}

pub struct SessionManager {
    store: StoreHandle,
    billing: Arc<BillingEngine>,
    locks: Arc<SessionLocks>,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
}

impl SessionManager {
    pub fn new(
        store: StoreHandle,
        billing: Arc<BillingEngine>,
        locks: Arc<SessionLocks>,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            store,
            billing,
            locks,
            clock,
            settings,
        }
    }

    /// Create a pending session on `gpu_id` for the calling consumer and
    /// claim the GPU. The rate is fixed from the GPU's current price.
    pub async fn request_session(
        &self,
        consumer: &Actor,
        gpu_id: &str,
        workload_type: WorkloadType,
    ) -> Result<Session> {
        let req = NewSession {
            id: Uuid::new_v4().to_string(),
            consumer_id: consumer.user_id.clone(),
            gpu_id: gpu_id.to_string(),
            workload_type,
            billing_interval_minutes: self.settings.billing_interval_minutes,
            require_funds: self.settings.require_funds_at_request,
            now: self.clock.now(),
        };
        let session = self.store.create_session(req).await?;
        info!(
            session_id = %session.id,
            gpu_id,
            consumer_id = %session.consumer_id,
            hourly_rate = %session.hourly_rate,
            "Session requested"
        );
        Ok(session)
    }

    pub async fn start_session(&self, session_id: &str, actor: &Actor) -> Result<Session> {
        let _guard = self.locks.acquire(session_id).await;
        self.load_authorized(session_id, actor).await?;

        let act = Activation {
            session_id: session_id.to_string(),
            start_time: self.clock.now(),
            connection: generate_connection(&self.settings.connection)?,
        };
        let session = self.store.activate_session(act).await?;
        info!(session_id, "Session started");
        Ok(session)
    }

    /// End an active session and settle what it owes. Every finalization
    /// outcome (settled, shortfall, nothing due) releases the GPU. If
    /// finalization returns an error, the session stays active with its
    /// recorded end time and keeps the GPU claim until a retried stop or the
    /// scheduler's recovery sweep settles it and releases the GPU.
    pub async fn stop_session(&self, session_id: &str, actor: &Actor) -> Result<StoppedSession> {
        let _guard = self.locks.acquire(session_id).await;
        self.load_authorized(session_id, actor).await?;

        let ending = self
            .store
            .mark_session_ending(session_id, self.clock.now())
            .await?;

        let billing = match self.billing.finalize_locked(&ending).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id, error = %e, "Finalization failed; stop left pending");
                return Err(e);
            }
        };

        let session = self.require(session_id).await?;
        self.ensure_released(&session).await?;
        info!(session_id, outcome = billing.kind(), "Session stopped");
        Ok(StoppedSession { session, billing })
    }

    /// Cancel a session that never started. No money moves.
    pub async fn cancel_session(
        &self,
        session_id: &str,
        actor: &Actor,
        reason: Option<&str>,
    ) -> Result<Session> {
        let _guard = self.locks.acquire(session_id).await;
        self.load_authorized(session_id, actor).await?;

        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_CANCEL_REASON);
        let session = self
            .store
            .cancel_session(session_id, reason, self.clock.now())
            .await?;
        info!(session_id, reason, "Session cancelled");
        Ok(session)
    }

    /// Retry settlement of a session whose final charge was not collected.
    pub async fn finalize_session(&self, session_id: &str, actor: &Actor) -> Result<BillingOutcome> {
        self.load_authorized(session_id, actor).await?;
        self.billing.finalize_billing(session_id).await
    }

    pub async fn get_session(&self, session_id: &str, actor: &Actor) -> Result<Session> {
        self.load_authorized(session_id, actor).await
    }

    /// Sessions where `user_id` is consumer or provider.
    pub async fn list_sessions(&self, actor: &Actor, user_id: &str) -> Result<Vec<Session>> {
        self.ensure_self_or_admin(actor, user_id)?;
        self.store.sessions_for_user(user_id).await
    }

    pub async fn record_metrics(
        &self,
        session_id: &str,
        actor: &Actor,
        sample: MetricSample,
    ) -> Result<Session> {
        self.load_authorized(session_id, actor).await?;
        self.store
            .record_metric_sample(session_id, sample, self.clock.now())
            .await
    }

    pub async fn metrics_summary(&self, session_id: &str, actor: &Actor) -> Result<MetricsSummary> {
        Ok(self
            .load_authorized(session_id, actor)
            .await?
            .metrics
            .summary())
    }

    pub async fn ledger_entries(&self, session_id: &str, actor: &Actor) -> Result<Vec<LedgerEntry>> {
        self.load_authorized(session_id, actor).await?;
        self.store.ledger_entries(session_id).await
    }

    pub async fn user_summary(&self, actor: &Actor, user_id: &str) -> Result<UserSummary> {
        self.ensure_self_or_admin(actor, user_id)?;
        self.store.user_summary(user_id).await
    }

    async fn require(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| RentalError::not_found("session", session_id))
    }

    async fn load_authorized(&self, session_id: &str, actor: &Actor) -> Result<Session> {
        let session = self.require(session_id).await?;
        session.authorize(actor)?;
        Ok(session)
    }

    fn ensure_self_or_admin(&self, actor: &Actor, user_id: &str) -> Result<()> {
        if actor.is_admin() || actor.user_id == user_id {
            Ok(())
        } else {
            Err(RentalError::NotAuthorized {
                actor_id: actor.user_id.clone(),
                target: format!("the records of user '{user_id}'"),
            })
        }
    }

    /// Clear any claim a terminal session still holds on its GPU.
    async fn ensure_released(&self, session: &Session) -> Result<()> {
        let Some(gpu) = self.store.get_gpu(&session.gpu_id).await? else {
            return Ok(());
        };
        let violations = invariants::check_claim(&gpu, session);
        if invariants::report(&violations) > 0 && session.status.is_terminal() {
            self.store
                .release_gpu(&gpu.id, &session.id, self.clock.now())
                .await?;
        }
        Ok(())
    }
}

/// Ephemeral credentials for the rented machine.
fn generate_connection(cfg: &ConnectionConfig) -> Result<ConnectionDetails> {
    let mut token = [0u8; 16];
    let mut port_seed = [0u8; 2];
    getrandom::getrandom(&mut token)
        .and_then(|_| getrandom::getrandom(&mut port_seed))
        .map_err(|e| RentalError::Other(anyhow::anyhow!("entropy source unavailable: {e}")))?;

    let offset = u16::from_le_bytes(port_seed) % cfg.port_span.max(1);
    Ok(ConnectionDetails {
        host: cfg.host.clone(),
        port: cfg.port_base.saturating_add(offset),
        access_token: hex::encode(token),
    })
}
