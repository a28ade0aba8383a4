// src/core/notifier.rs — Real-time notification port
//
// Delivery is best-effort: billing state never depends on a notification
// having been delivered.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::billing::BillingOutcome;

#[async_trait]
pub trait BillingNotifier: Send + Sync {
    async fn notify(&self, session_id: &str, outcome: &BillingOutcome);
}

/// Writes outcomes to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl BillingNotifier for LogNotifier {
    async fn notify(&self, session_id: &str, outcome: &BillingOutcome) {
        tracing::info!(session_id, kind = outcome.kind(), "billing update: {}", outcome);
    }
}

#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl BillingNotifier for NoopNotifier {
    async fn notify(&self, _session_id: &str, _outcome: &BillingOutcome) {}
}

/// Keeps every notification in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(String, BillingOutcome)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, BillingOutcome)> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BillingNotifier for RecordingNotifier {
    async fn notify(&self, session_id: &str, outcome: &BillingOutcome) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((session_id.to_string(), outcome.clone()));
    }
}
