// src/store/store_server.rs — Async message passing for Store
//
// The Store owns the only connection. Every command runs to completion
// before the next is received, so each ledger row has a single writer.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::core::telemetry::MetricSample;
use crate::core::types::{Account, Gpu, Money, Session, SessionStatus};
use crate::infra::errors::{RentalError, Result};
use crate::store::store::{
    Activation, FinalCharge, FinalSettlement, IntervalCharge, IntervalSettlement, LedgerEntry,
    NewSession, Store, UserSummary,
};

type Reply<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum StoreCommand {
    InsertAccount {
        account: Account,
        resp: Reply<()>,
    },
    GetAccount {
        id: String,
        resp: Reply<Option<Account>>,
    },
    Deposit {
        user_id: String,
        amount: Money,
        resp: Reply<Money>,
    },
    SetProviderApproval {
        user_id: String,
        approved: bool,
        resp: Reply<Account>,
    },
    InsertGpu {
        gpu: Gpu,
        resp: Reply<()>,
    },
    GetGpu {
        id: String,
        resp: Reply<Option<Gpu>>,
    },
    SetGpuPrice {
        id: String,
        price: Money,
        now: DateTime<Utc>,
        resp: Reply<Gpu>,
    },
    DeactivateGpu {
        id: String,
        now: DateTime<Utc>,
        resp: Reply<Gpu>,
    },
    GetSession {
        id: String,
        resp: Reply<Option<Session>>,
    },
    SessionsWithStatus {
        status: SessionStatus,
        resp: Reply<Vec<Session>>,
    },
    SessionsForUser {
        user_id: String,
        resp: Reply<Vec<Session>>,
    },
    CreateSession {
        req: NewSession,
        resp: Reply<Session>,
    },
    ActivateSession {
        act: Activation,
        resp: Reply<Session>,
    },
    CancelSession {
        id: String,
        reason: String,
        now: DateTime<Utc>,
        resp: Reply<Session>,
    },
    MarkSessionEnding {
        id: String,
        end_time: DateTime<Utc>,
        resp: Reply<Session>,
    },
    ApplyIntervalCharge {
        charge: IntervalCharge,
        resp: Reply<IntervalSettlement>,
    },
    ApplyFinalCharge {
        charge: FinalCharge,
        resp: Reply<FinalSettlement>,
    },
    ReleaseGpu {
        gpu_id: String,
        session_id: String,
        now: DateTime<Utc>,
        resp: Reply<bool>,
    },
    RecordMetricSample {
        id: String,
        sample: MetricSample,
        at: DateTime<Utc>,
        resp: Reply<Session>,
    },
    LedgerEntries {
        session_id: String,
        resp: Reply<Vec<LedgerEntry>>,
    },
    UserSummary {
        user_id: String,
        resp: Reply<UserSummary>,
    },
}

#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreCommand>) -> Self {
        Self { tx }
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> StoreCommand) -> Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(command(resp_tx))
            .await
            .map_err(|_| RentalError::persistence("store server has shut down"))?;
        resp_rx
            .await
            .map_err(|_| RentalError::persistence("store server dropped the request"))?
    }

    pub async fn insert_account(&self, account: Account) -> Result<()> {
        self.call(|resp| StoreCommand::InsertAccount { account, resp })
            .await
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let id = id.to_string();
        self.call(|resp| StoreCommand::GetAccount { id, resp }).await
    }

    pub async fn deposit(&self, user_id: &str, amount: Money) -> Result<Money> {
        let user_id = user_id.to_string();
        self.call(|resp| StoreCommand::Deposit {
            user_id,
            amount,
            resp,
        })
        .await
    }

    pub async fn set_provider_approval(&self, user_id: &str, approved: bool) -> Result<Account> {
        let user_id = user_id.to_string();
        self.call(|resp| StoreCommand::SetProviderApproval {
            user_id,
            approved,
            resp,
        })
        .await
    }

    pub async fn insert_gpu(&self, gpu: Gpu) -> Result<()> {
        self.call(|resp| StoreCommand::InsertGpu { gpu, resp }).await
    }

    pub async fn get_gpu(&self, id: &str) -> Result<Option<Gpu>> {
        let id = id.to_string();
        self.call(|resp| StoreCommand::GetGpu { id, resp }).await
    }

    pub async fn set_gpu_price(&self, id: &str, price: Money, now: DateTime<Utc>) -> Result<Gpu> {
        let id = id.to_string();
        self.call(|resp| StoreCommand::SetGpuPrice {
            id,
            price,
            now,
            resp,
        })
        .await
    }

    pub async fn deactivate_gpu(&self, id: &str, now: DateTime<Utc>) -> Result<Gpu> {
        let id = id.to_string();
        self.call(|resp| StoreCommand::DeactivateGpu { id, now, resp })
            .await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let id = id.to_string();
        self.call(|resp| StoreCommand::GetSession { id, resp }).await
    }

    pub async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        self.call(|resp| StoreCommand::SessionsWithStatus { status, resp })
            .await
    }

    pub async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let user_id = user_id.to_string();
        self.call(|resp| StoreCommand::SessionsForUser { user_id, resp })
            .await
    }

    pub async fn create_session(&self, req: NewSession) -> Result<Session> {
        self.call(|resp| StoreCommand::CreateSession { req, resp })
            .await
    }

    pub async fn activate_session(&self, act: Activation) -> Result<Session> {
        self.call(|resp| StoreCommand::ActivateSession { act, resp })
            .await
    }

    pub async fn cancel_session(
        &self,
        id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let id = id.to_string();
        let reason = reason.to_string();
        self.call(|resp| StoreCommand::CancelSession {
            id,
            reason,
            now,
            resp,
        })
        .await
    }

    pub async fn mark_session_ending(&self, id: &str, end_time: DateTime<Utc>) -> Result<Session> {
        let id = id.to_string();
        self.call(|resp| StoreCommand::MarkSessionEnding { id, end_time, resp })
            .await
    }

    pub async fn apply_interval_charge(&self, charge: IntervalCharge) -> Result<IntervalSettlement> {
        self.call(|resp| StoreCommand::ApplyIntervalCharge { charge, resp })
            .await
    }

    pub async fn apply_final_charge(&self, charge: FinalCharge) -> Result<FinalSettlement> {
        self.call(|resp| StoreCommand::ApplyFinalCharge { charge, resp })
            .await
    }

    pub async fn release_gpu(
        &self,
        gpu_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let gpu_id = gpu_id.to_string();
        let session_id = session_id.to_string();
        self.call(|resp| StoreCommand::ReleaseGpu {
            gpu_id,
            session_id,
            now,
            resp,
        })
        .await
    }

    pub async fn record_metric_sample(
        &self,
        id: &str,
        sample: MetricSample,
        at: DateTime<Utc>,
    ) -> Result<Session> {
        let id = id.to_string();
        self.call(|resp| StoreCommand::RecordMetricSample {
            id,
            sample,
            at,
            resp,
        })
        .await
    }

    pub async fn ledger_entries(&self, session_id: &str) -> Result<Vec<LedgerEntry>> {
        let session_id = session_id.to_string();
        self.call(|resp| StoreCommand::LedgerEntries { session_id, resp })
            .await
    }

    pub async fn user_summary(&self, user_id: &str) -> Result<UserSummary> {
        let user_id = user_id.to_string();
        self.call(|resp| StoreCommand::UserSummary { user_id, resp })
            .await
    }
}

/// Helper to spawn the store server and return a handle.
pub fn spawn_store_server(store: Store) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(100);
    let handle = StoreHandle::new(tx);
    let join_handle = tokio::spawn(run_store_server(store, rx));
    (handle, join_handle)
}

/// The background task that owns the Store.
pub async fn run_store_server(store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::InsertAccount { account, resp } => {
                let _ = resp.send(store.insert_account(&account));
            }
            StoreCommand::GetAccount { id, resp } => {
                let _ = resp.send(store.get_account(&id));
            }
            StoreCommand::Deposit {
                user_id,
                amount,
                resp,
            } => {
                let _ = resp.send(store.deposit(&user_id, amount));
            }
            StoreCommand::SetProviderApproval {
                user_id,
                approved,
                resp,
            } => {
                let _ = resp.send(store.set_provider_approval(&user_id, approved));
            }
            StoreCommand::InsertGpu { gpu, resp } => {
                let _ = resp.send(store.insert_gpu(&gpu));
            }
            StoreCommand::GetGpu { id, resp } => {
                let _ = resp.send(store.get_gpu(&id));
            }
            StoreCommand::SetGpuPrice {
                id,
                price,
                now,
                resp,
            } => {
                let _ = resp.send(store.set_gpu_price(&id, price, now));
            }
            StoreCommand::DeactivateGpu { id, now, resp } => {
                let _ = resp.send(store.deactivate_gpu(&id, now));
            }
            StoreCommand::GetSession { id, resp } => {
                let _ = resp.send(store.get_session(&id));
            }
            StoreCommand::SessionsWithStatus { status, resp } => {
                let _ = resp.send(store.sessions_with_status(status));
            }
            StoreCommand::SessionsForUser { user_id, resp } => {
                let _ = resp.send(store.sessions_for_user(&user_id));
            }
            StoreCommand::CreateSession { req, resp } => {
                let _ = resp.send(store.create_session(&req));
            }
            StoreCommand::ActivateSession { act, resp } => {
                let _ = resp.send(store.activate_session(&act));
            }
            StoreCommand::CancelSession {
                id,
                reason,
                now,
                resp,
            } => {
                let _ = resp.send(store.cancel_session(&id, &reason, now));
            }
            StoreCommand::MarkSessionEnding { id, end_time, resp } => {
                let _ = resp.send(store.mark_session_ending(&id, end_time));
            }
            StoreCommand::ApplyIntervalCharge { charge, resp } => {
                let _ = resp.send(store.apply_interval_charge(&charge));
            }
            StoreCommand::ApplyFinalCharge { charge, resp } => {
                let _ = resp.send(store.apply_final_charge(&charge));
            }
            StoreCommand::ReleaseGpu {
                gpu_id,
                session_id,
                now,
                resp,
            } => {
                let _ = resp.send(store.release_gpu(&gpu_id, &session_id, now));
            }
            StoreCommand::RecordMetricSample {
                id,
                sample,
                at,
                resp,
            } => {
                let _ = resp.send(store.record_metric_sample(&id, sample, at));
            }
            StoreCommand::LedgerEntries { session_id, resp } => {
                let _ = resp.send(store.ledger_entries(&session_id));
            }
            StoreCommand::UserSummary { user_id, resp } => {
                let _ = resp.send(store.user_summary(&user_id));
            }
        }
    }
    tracing::debug!("store server stopped");
}
