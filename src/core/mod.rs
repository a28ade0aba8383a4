// src/core/mod.rs — Session lifecycle and billing core

pub mod billing;
pub mod invariants;
pub mod lifecycle;
pub mod locks;
pub mod notifier;
pub mod registry;
pub mod telemetry;
pub mod types;

use std::sync::Arc;

use crate::core::billing::BillingEngine;
use crate::core::lifecycle::{LifecycleSettings, SessionManager};
use crate::core::locks::SessionLocks;
use crate::core::registry::Registry;
use crate::infra::clock::Clock;
use crate::store::StoreHandle;

/// The wired-up core. Every component shares one store handle, one lock
/// table and one clock; nothing here is process-global.
#[derive(Clone)]
pub struct RentalCore {
    pub store: StoreHandle,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<SessionLocks>,
    pub billing: Arc<BillingEngine>,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<Registry>,
}

impl RentalCore {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>, settings: LifecycleSettings) -> Self {
        let locks = Arc::new(SessionLocks::new());
        let billing = Arc::new(BillingEngine::new(
            store.clone(),
            locks.clone(),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            billing.clone(),
            locks.clone(),
            clock.clone(),
            settings,
        ));
        let registry = Arc::new(Registry::new(store.clone(), clock.clone()));
        Self {
            store,
            clock,
            locks,
            billing,
            sessions,
            registry,
        }
    }
}
