//! Identity provider seam.
//!
//! The provider owns factor existence and verification; this crate never
//! sees a TOTP secret after enrollment material is handed to the user.
//! `HttpIdentityProvider` talks to a hosted GoTrue-style MFA API;
//! `InMemoryIdentityProvider` backs local development and tests.

pub mod client;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub use client::HttpIdentityProvider;

/// Verification status of an enrolled factor, as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FactorStatus {
    Unverified,
    Verified,
}

impl FactorStatus {
    pub(crate) fn parse(value: &str) -> Result<Self> {
        match value {
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            _ => Err(anyhow!("invalid factor status: {value}")),
        }
    }
}

/// An authentication factor enrolled with the identity provider.
///
/// Read-only on this side; only the provider mutates factor state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthFactor {
    pub id: Uuid,
    pub factor_type: String,
    pub status: FactorStatus,
    pub friendly_name: String,
    pub created_at: DateTime<Utc>,
}

impl AuthFactor {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.status == FactorStatus::Verified
    }
}

/// Material returned by a new enrollment, shown once to the user.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Enrollment {
    pub factor_id: Uuid,
    pub secret: String,
    pub otpauth_uri: String,
}

/// Caller resolved from an access token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub phone: Option<String>,
}

/// Operations consumed from the identity provider.
///
/// All TOTP cryptography (secret generation, code validation, challenge
/// bookkeeping) lives behind this seam.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the principal for a session access token.
    async fn authenticate(&self, access_token: &str) -> Result<Principal>;

    /// List every factor enrolled for the user, verified or not.
    async fn list_factors(&self, user_id: Uuid) -> Result<Vec<AuthFactor>>;

    /// Enroll a new TOTP factor and return its enrollment material.
    async fn enroll_factor(&self, user_id: Uuid, friendly_name: &str) -> Result<Enrollment>;

    /// Create a challenge against a factor; returns the challenge id.
    async fn create_challenge(&self, user_id: Uuid, factor_id: Uuid) -> Result<Uuid>;

    /// Verify a code against a challenge. `Ok(false)` means the provider
    /// rejected the code; `Err` means the provider could not be consulted.
    async fn verify_challenge(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        challenge_id: Uuid,
        code: &str,
    ) -> Result<bool>;

    /// Remove a factor from the account.
    async fn unenroll_factor(&self, user_id: Uuid, factor_id: Uuid) -> Result<()>;
}

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Default code accepted by [`InMemoryIdentityProvider`] for factors it
/// enrolls itself. Tests override per factor with `set_accepted_code`.
pub const IN_MEMORY_DEFAULT_CODE: &str = "000000";

#[derive(Default)]
struct InMemoryState {
    tokens: HashMap<String, Principal>,
    factors: HashMap<Uuid, Vec<AuthFactor>>,
    accepted_codes: HashMap<Uuid, String>,
    challenges: HashMap<Uuid, Uuid>,
    failing_unenrolls: HashSet<Uuid>,
    offline: bool,
}

/// Provider stand-in for local development and tests.
///
/// A successful challenge verification promotes an unverified factor to
/// verified, mirroring the hosted provider's first-code semantics.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    state: Mutex<InMemoryState>,
}

impl InMemoryIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an access token to a principal.
    pub fn register_token(&self, token: &str, user_id: Uuid, phone: Option<&str>) {
        if let Ok(mut state) = self.state.lock() {
            state.tokens.insert(
                token.to_string(),
                Principal {
                    user_id,
                    phone: phone.map(ToString::to_string),
                },
            );
        }
    }

    /// Seed a factor directly, bypassing enrollment.
    pub fn insert_factor(&self, user_id: Uuid, status: FactorStatus, code: &str) -> Uuid {
        let factor_id = Uuid::new_v4();
        if let Ok(mut state) = self.state.lock() {
            state.factors.entry(user_id).or_default().push(AuthFactor {
                id: factor_id,
                factor_type: "totp".to_string(),
                status,
                friendly_name: format!("seeded-{factor_id}"),
                created_at: Utc::now(),
            });
            state.accepted_codes.insert(factor_id, code.to_string());
        }
        factor_id
    }

    pub fn set_accepted_code(&self, factor_id: Uuid, code: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.accepted_codes.insert(factor_id, code.to_string());
        }
    }

    /// Make unenrollment of a single factor fail while other calls keep
    /// working, for exercising partial-removal paths.
    pub fn fail_unenroll(&self, factor_id: Uuid) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_unenrolls.insert(factor_id);
        }
    }

    pub fn clear_unenroll_faults(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_unenrolls.clear();
        }
    }

    /// Simulate the provider being unreachable; every call returns an error.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    #[must_use]
    pub fn factor_count(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .map(|state| state.factors.get(&user_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("in-memory provider lock poisoned"))?;
        if state.offline {
            return Err(anyhow!("identity provider unreachable"));
        }
        Ok(state)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn authenticate(&self, access_token: &str) -> Result<Principal> {
        let state = self.lock()?;
        state
            .tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| anyhow!("unknown access token"))
    }

    async fn list_factors(&self, user_id: Uuid) -> Result<Vec<AuthFactor>> {
        let state = self.lock()?;
        Ok(state.factors.get(&user_id).cloned().unwrap_or_default())
    }

    async fn enroll_factor(&self, user_id: Uuid, friendly_name: &str) -> Result<Enrollment> {
        let mut state = self.lock()?;
        let factor_id = Uuid::new_v4();
        let mut rng = rand::thread_rng();
        let secret: String = (0..32)
            .map(|_| BASE32_ALPHABET[rng.gen_range(0..BASE32_ALPHABET.len())] as char)
            .collect();
        state.factors.entry(user_id).or_default().push(AuthFactor {
            id: factor_id,
            factor_type: "totp".to_string(),
            status: FactorStatus::Unverified,
            friendly_name: friendly_name.to_string(),
            created_at: Utc::now(),
        });
        state
            .accepted_codes
            .insert(factor_id, IN_MEMORY_DEFAULT_CODE.to_string());
        Ok(Enrollment {
            factor_id,
            otpauth_uri: format!("otpauth://totp/guarita:{user_id}?secret={secret}&issuer=guarita"),
            secret,
        })
    }

    async fn create_challenge(&self, user_id: Uuid, factor_id: Uuid) -> Result<Uuid> {
        let mut state = self.lock()?;
        let known = state
            .factors
            .get(&user_id)
            .is_some_and(|factors| factors.iter().any(|f| f.id == factor_id));
        if !known {
            return Err(anyhow!("factor not found"));
        }
        let challenge_id = Uuid::new_v4();
        state.challenges.insert(challenge_id, factor_id);
        Ok(challenge_id)
    }

    async fn verify_challenge(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        challenge_id: Uuid,
        code: &str,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        if state.challenges.get(&challenge_id) != Some(&factor_id) {
            return Ok(false);
        }
        let accepted = state.accepted_codes.get(&factor_id).cloned();
        if accepted.as_deref() != Some(code) {
            return Ok(false);
        }
        state.challenges.remove(&challenge_id);
        if let Some(factors) = state.factors.get_mut(&user_id) {
            for factor in factors.iter_mut() {
                if factor.id == factor_id {
                    factor.status = FactorStatus::Verified;
                }
            }
        }
        Ok(true)
    }

    async fn unenroll_factor(&self, user_id: Uuid, factor_id: Uuid) -> Result<()> {
        let mut state = self.lock()?;
        if state.failing_unenrolls.contains(&factor_id) {
            return Err(anyhow!("factor unenrollment failed"));
        }
        let factors = state
            .factors
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("factor not found"))?;
        let before = factors.len();
        factors.retain(|f| f.id != factor_id);
        if factors.len() == before {
            return Err(anyhow!("factor not found"));
        }
        state.accepted_codes.remove(&factor_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enroll_then_verify_promotes_factor() -> Result<()> {
        let provider = InMemoryIdentityProvider::new();
        let user = Uuid::new_v4();
        let enrollment = provider.enroll_factor(user, "phone-1").await?;
        let factors = provider.list_factors(user).await?;
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].status, FactorStatus::Unverified);

        let challenge = provider.create_challenge(user, enrollment.factor_id).await?;
        assert!(
            provider
                .verify_challenge(user, enrollment.factor_id, challenge, IN_MEMORY_DEFAULT_CODE)
                .await?
        );
        let factors = provider.list_factors(user).await?;
        assert_eq!(factors[0].status, FactorStatus::Verified);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_code_is_rejected_without_promotion() -> Result<()> {
        let provider = InMemoryIdentityProvider::new();
        let user = Uuid::new_v4();
        let factor_id = provider.insert_factor(user, FactorStatus::Unverified, "654321");
        let challenge = provider.create_challenge(user, factor_id).await?;
        assert!(
            !provider
                .verify_challenge(user, factor_id, challenge, "111111")
                .await?
        );
        let factors = provider.list_factors(user).await?;
        assert_eq!(factors[0].status, FactorStatus::Unverified);
        Ok(())
    }

    #[tokio::test]
    async fn offline_provider_errors() {
        let provider = InMemoryIdentityProvider::new();
        provider.set_offline(true);
        assert!(provider.list_factors(Uuid::new_v4()).await.is_err());
    }

    #[test]
    fn factor_status_parse() {
        assert_eq!(
            FactorStatus::parse("verified").ok(),
            Some(FactorStatus::Verified)
        );
        assert_eq!(
            FactorStatus::parse("unverified").ok(),
            Some(FactorStatus::Unverified)
        );
        assert!(FactorStatus::parse("pending").is_err());
    }
}
