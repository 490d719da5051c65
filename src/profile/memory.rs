//! In-memory [`ProfileStore`] for local development and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ProfileStore, SecurityProfile, VerificationLog};

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<Uuid, SecurityProfile>>,
    logs: Mutex<Vec<VerificationLog>>,
}

impl InMemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a profile row directly.
    pub fn put_profile(&self, profile: SecurityProfile) {
        if let Ok(mut profiles) = self.profiles.lock() {
            profiles.insert(profile.user_id, profile);
        }
    }

    /// Audit entries written so far, in insertion order.
    #[must_use]
    pub fn logs(&self) -> Vec<VerificationLog> {
        self.logs.lock().map(|logs| logs.clone()).unwrap_or_default()
    }

    fn update<F>(&self, user_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SecurityProfile),
    {
        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| anyhow!("profile store lock poisoned"))?;
        let profile = profiles
            .entry(user_id)
            .or_insert_with(|| SecurityProfile::empty(user_id));
        apply(profile);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn security_profile(&self, user_id: Uuid) -> Result<SecurityProfile> {
        let profiles = self
            .profiles
            .lock()
            .map_err(|_| anyhow!("profile store lock poisoned"))?;
        Ok(profiles
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| SecurityProfile::empty(user_id)))
    }

    async fn enable_mfa(&self, user_id: Uuid, enrolled_at: DateTime<Utc>) -> Result<()> {
        self.update(user_id, |profile| {
            profile.mfa_enabled = true;
            if profile.mfa_enrolled_at.is_none() {
                profile.mfa_enrolled_at = Some(enrolled_at);
            }
        })
    }

    async fn disable_mfa(&self, user_id: Uuid) -> Result<()> {
        self.update(user_id, |profile| {
            profile.mfa_enabled = false;
            profile.mfa_enrolled_at = None;
        })
    }

    async fn mark_phone_verified(
        &self,
        user_id: Uuid,
        phone: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update(user_id, |profile| {
            profile.phone_number = Some(phone.to_string());
            profile.phone_verified = true;
            profile.phone_verified_at = Some(verified_at);
        })
    }

    async fn insert_verification_log(&self, entry: VerificationLog) -> Result<()> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| anyhow!("verification log lock poisoned"))?;
        logs.push(entry);
        Ok(())
    }
}
