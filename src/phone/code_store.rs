//! Ephemeral one-time-code storage.
//!
//! At most one live code per user; a new `put` overwrites the previous code
//! and restarts its window. Expiry is enforced by the flow at verification
//! time, never by a background sweep, so entries for users who walk away
//! simply sit until overwritten or the process restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A pending verification code and its window.
#[derive(Debug, Clone)]
pub struct PendingCode {
    pub code: String,
    pub phone: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
}

impl PendingCode {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Key-value seam for pending codes, keyed by user id.
pub trait CodeStore: Send + Sync {
    fn put(&self, user_id: Uuid, entry: PendingCode) -> Result<()>;
    fn get(&self, user_id: Uuid) -> Result<Option<PendingCode>>;
    fn remove(&self, user_id: Uuid) -> Result<()>;
}

/// Process-local store, the session-storage analog of the original design.
/// Codes do not survive a restart and are not shared across instances.
#[derive(Default)]
pub struct InMemoryCodeStore {
    entries: Mutex<HashMap<Uuid, PendingCode>>,
}

impl InMemoryCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, PendingCode>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("code store lock poisoned"))
    }
}

impl CodeStore for InMemoryCodeStore {
    fn put(&self, user_id: Uuid, entry: PendingCode) -> Result<()> {
        self.lock()?.insert(user_id, entry);
        Ok(())
    }

    fn get(&self, user_id: Uuid) -> Result<Option<PendingCode>> {
        Ok(self.lock()?.get(&user_id).cloned())
    }

    fn remove(&self, user_id: Uuid) -> Result<()> {
        self.lock()?.remove(&user_id);
        Ok(())
    }
}
