// src/core/locks.rs — Per-session serialization
//
// Billing and stop-finalization on the same session must never interleave.
// Different sessions never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct SessionLocks {
    table: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`. Held until the guard drops.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            // Drop slots nobody holds or waits on.
            table.retain(|id, slot| id == session_id || Arc::strong_count(slot) > 1);
            table
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Number of sessions currently tracked.
    pub fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
