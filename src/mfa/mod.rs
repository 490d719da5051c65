//! MFA enrollment, verification, and step-down flows.
//!
//! Flow overview:
//! 1) `check_status` reconciles the provider's factor list with the cached
//!    profile flag and repairs drift in either direction.
//! 2) `enroll` clears abandoned unverified factors, then creates a fresh
//!    TOTP factor. Nothing touches the profile until the first code check.
//! 3) `verify` promotes the factor and flips the profile to enabled.
//! 4) `disable` is gated by a step-up challenge against a verified factor
//!    and removes every factor before clearing the profile flags.
//!
//! Security boundaries:
//! - The provider owns code validation; a rejected code and a provider
//!   error during verification surface identically to the caller.
//! - Disable removes verified factors last, so a partial failure leaves the
//!   step-up gate intact and the whole operation retryable.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::idp::{AuthFactor, Enrollment, IdentityProvider};
use crate::profile::{
    log_verification, ProfileStore, VerificationKind, VerificationLog, VerificationStatus,
};

/// Snapshot of a user's MFA state.
///
/// `factors` is empty when the provider could not be consulted; `enabled`
/// then reflects the cached profile flag only.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MfaStatus {
    pub enabled: bool,
    pub factors: Vec<AuthFactor>,
}

/// Outcome of an enrollment verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    /// Wrong code, expired challenge, or provider error: one opaque answer.
    Invalid,
}

/// Outcome of a disable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled { removed: usize },
    /// Step-up code rejected; nothing was removed.
    Rejected,
    /// No verified factor exists, so there is nothing to disable.
    NotEnabled,
}

#[derive(Clone)]
pub struct MfaService {
    provider: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
}

impl MfaService {
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self { provider, profiles }
    }

    /// Report MFA state, repairing profile drift opportunistically.
    ///
    /// The provider is the source of truth for factor existence; the profile
    /// flag is a cache. An unreachable provider is treated as "no
    /// information": the cached flag is returned and no error is raised.
    ///
    /// # Errors
    /// Returns an error only if the profile itself cannot be read.
    pub async fn check_status(&self, user_id: Uuid) -> Result<MfaStatus> {
        let profile = self
            .profiles
            .security_profile(user_id)
            .await
            .context("failed to read security profile")?;

        let factors = match self.provider.list_factors(user_id).await {
            Ok(factors) => factors,
            Err(err) => {
                warn!(user_id = %user_id, "factor listing unavailable, using cached flag: {err}");
                return Ok(MfaStatus {
                    enabled: profile.mfa_enabled,
                    factors: Vec::new(),
                });
            }
        };

        let has_verified = factors.iter().any(AuthFactor::is_verified);

        // Repairs are best-effort; the next status check retries anyway.
        if has_verified && !profile.mfa_enabled {
            if let Err(err) = self.profiles.enable_mfa(user_id, Utc::now()).await {
                error!(user_id = %user_id, "failed to repair profile to enabled: {err}");
            }
        } else if !has_verified && profile.mfa_enabled {
            if let Err(err) = self.profiles.disable_mfa(user_id).await {
                error!(user_id = %user_id, "failed to repair profile to disabled: {err}");
            }
        }

        Ok(MfaStatus {
            enabled: has_verified,
            factors,
        })
    }

    /// Start enrollment: drop abandoned unverified factors, then create a
    /// new TOTP factor with a uniquified friendly name.
    ///
    /// The profile is untouched; only `verify` commits state.
    ///
    /// # Errors
    /// Returns an error if the provider rejects any step. No partial state
    /// is committed on this side.
    pub async fn enroll(&self, user_id: Uuid) -> Result<Enrollment> {
        let factors = self.provider.list_factors(user_id).await?;
        for factor in factors.iter().filter(|f| !f.is_verified()) {
            self.provider
                .unenroll_factor(user_id, factor.id)
                .await
                .with_context(|| format!("failed to clean up stale factor {}", factor.id))?;
        }

        let friendly_name = format!("guarita-{}", Utc::now().timestamp_millis());
        self.provider.enroll_factor(user_id, &friendly_name).await
    }

    /// Verify a code against a factor, creating a challenge when the caller
    /// has none, and enable MFA on the profile on success.
    ///
    /// # Errors
    /// Returns an error only if the profile update fails after the provider
    /// accepted the code; every provider-side failure maps to `Invalid`.
    pub async fn verify(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        code: &str,
        challenge_id: Option<Uuid>,
    ) -> Result<VerifyOutcome> {
        let challenge_id = match challenge_id {
            Some(id) => id,
            None => match self.provider.create_challenge(user_id, factor_id).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(user_id = %user_id, "challenge creation failed: {err}");
                    return Ok(VerifyOutcome::Invalid);
                }
            },
        };

        let accepted = match self
            .provider
            .verify_challenge(user_id, factor_id, challenge_id, code)
            .await
        {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(user_id = %user_id, "challenge verification failed: {err}");
                false
            }
        };

        if !accepted {
            log_verification(
                self.profiles.as_ref(),
                VerificationLog::new(
                    user_id,
                    None,
                    VerificationKind::Mfa,
                    VerificationStatus::Failed,
                ),
            )
            .await;
            return Ok(VerifyOutcome::Invalid);
        }

        self.profiles
            .enable_mfa(user_id, Utc::now())
            .await
            .context("failed to enable MFA after verification")?;

        log_verification(
            self.profiles.as_ref(),
            VerificationLog::new(
                user_id,
                None,
                VerificationKind::Mfa,
                VerificationStatus::Verified,
            ),
        )
        .await;

        info!(user_id = %user_id, "MFA factor verified and enabled");
        Ok(VerifyOutcome::Verified)
    }

    /// Disable MFA, gated by a step-up code check.
    ///
    /// Unverified factors are removed first and verified factors last, so a
    /// failure mid-removal leaves the step-up gate functional and the whole
    /// call retryable. Profile flags are cleared only after every factor is
    /// gone.
    ///
    /// # Errors
    /// Returns an error if the provider cannot be consulted, a removal
    /// fails, or the profile update fails. A rejected code is an outcome,
    /// not an error.
    pub async fn disable(&self, user_id: Uuid, code: &str) -> Result<DisableOutcome> {
        let factors = self.provider.list_factors(user_id).await?;
        let Some(target) = factors.iter().find(|f| f.is_verified()) else {
            return Ok(DisableOutcome::NotEnabled);
        };

        // Step-up gate: no factor is touched until the code is accepted.
        let challenge_id = self.provider.create_challenge(user_id, target.id).await?;
        let accepted = self
            .provider
            .verify_challenge(user_id, target.id, challenge_id, code)
            .await?;
        if !accepted {
            warn!(user_id = %user_id, "step-up code rejected for MFA disable");
            log_verification(
                self.profiles.as_ref(),
                VerificationLog::new(
                    user_id,
                    None,
                    VerificationKind::Mfa,
                    VerificationStatus::Failed,
                ),
            )
            .await;
            return Ok(DisableOutcome::Rejected);
        }

        let (verified, unverified): (Vec<&AuthFactor>, Vec<&AuthFactor>) =
            factors.iter().partition(|f| f.is_verified());

        let mut removed = 0usize;
        for factor in unverified.iter().chain(verified.iter()) {
            self.provider
                .unenroll_factor(user_id, factor.id)
                .await
                .with_context(|| format!("failed to unenroll factor {}", factor.id))?;
            removed += 1;
        }

        self.profiles
            .disable_mfa(user_id)
            .await
            .context("failed to clear MFA flags after unenrollment")?;

        log_verification(
            self.profiles.as_ref(),
            VerificationLog::new(
                user_id,
                None,
                VerificationKind::Mfa,
                VerificationStatus::Verified,
            ),
        )
        .await;

        info!(user_id = %user_id, removed, "MFA disabled");
        Ok(DisableOutcome::Disabled { removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idp::{FactorStatus, InMemoryIdentityProvider, IN_MEMORY_DEFAULT_CODE};
    use crate::profile::{InMemoryProfileStore, SecurityProfile};

    struct Harness {
        provider: Arc<InMemoryIdentityProvider>,
        profiles: Arc<InMemoryProfileStore>,
        service: MfaService,
    }

    fn harness() -> Harness {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let service = MfaService::new(
            provider.clone() as Arc<dyn IdentityProvider>,
            profiles.clone() as Arc<dyn ProfileStore>,
        );
        Harness {
            provider,
            profiles,
            service,
        }
    }

    #[tokio::test]
    async fn status_repairs_disabled_profile_with_verified_factor() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.provider.insert_factor(user, FactorStatus::Verified, "123456");

        let status = h.service.check_status(user).await?;
        assert!(status.enabled);
        assert_eq!(status.factors.len(), 1);

        let profile = h.profiles.security_profile(user).await?;
        assert!(profile.mfa_enabled);
        assert!(profile.mfa_enrolled_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn status_repairs_enabled_profile_without_factors() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.profiles.put_profile(SecurityProfile {
            mfa_enabled: true,
            mfa_enrolled_at: Some(Utc::now()),
            ..SecurityProfile::empty(user)
        });

        let status = h.service.check_status(user).await?;
        assert!(!status.enabled);

        let profile = h.profiles.security_profile(user).await?;
        assert!(!profile.mfa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn status_falls_back_to_cache_when_provider_is_down() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.profiles.put_profile(SecurityProfile {
            mfa_enabled: true,
            mfa_enrolled_at: Some(Utc::now()),
            ..SecurityProfile::empty(user)
        });
        h.provider.set_offline(true);

        let status = h.service.check_status(user).await?;
        assert!(status.enabled);
        assert!(status.factors.is_empty());

        // The cached flag was not "repaired" against missing information.
        h.provider.set_offline(false);
        let profile = h.profiles.security_profile(user).await?;
        assert!(profile.mfa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn repeat_enroll_unenrolls_abandoned_factor() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();

        let first = h.service.enroll(user).await?;
        assert_eq!(h.provider.factor_count(user), 1);

        let second = h.service.enroll(user).await?;
        assert_eq!(h.provider.factor_count(user), 1);
        assert_ne!(first.factor_id, second.factor_id);
        Ok(())
    }

    #[tokio::test]
    async fn enroll_keeps_verified_factor() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.provider.insert_factor(user, FactorStatus::Verified, "123456");

        h.service.enroll(user).await?;
        let factors = h.provider.list_factors(user).await?;
        assert_eq!(factors.len(), 2);
        assert_eq!(factors.iter().filter(|f| f.is_verified()).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn enroll_does_not_touch_profile() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.service.enroll(user).await?;
        let profile = h.profiles.security_profile(user).await?;
        assert!(!profile.mfa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn verify_enables_profile() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        let enrollment = h.service.enroll(user).await?;

        let outcome = h
            .service
            .verify(user, enrollment.factor_id, IN_MEMORY_DEFAULT_CODE, None)
            .await?;
        assert_eq!(outcome, VerifyOutcome::Verified);

        let profile = h.profiles.security_profile(user).await?;
        assert!(profile.mfa_enabled);
        assert!(profile.mfa_enrolled_at.is_some());

        let statuses: Vec<_> = h.profiles.logs().iter().map(|l| l.status).collect();
        assert_eq!(statuses, vec![VerificationStatus::Verified]);
        Ok(())
    }

    #[tokio::test]
    async fn verify_with_wrong_code_is_invalid_and_uncommitted() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        let enrollment = h.service.enroll(user).await?;

        let outcome = h
            .service
            .verify(user, enrollment.factor_id, "111111", None)
            .await?;
        assert_eq!(outcome, VerifyOutcome::Invalid);

        let profile = h.profiles.security_profile(user).await?;
        assert!(!profile.mfa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn verify_with_provider_down_is_invalid_not_an_error() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        let enrollment = h.service.enroll(user).await?;
        h.provider.set_offline(true);

        let outcome = h
            .service
            .verify(user, enrollment.factor_id, IN_MEMORY_DEFAULT_CODE, None)
            .await?;
        assert_eq!(outcome, VerifyOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn disable_with_wrong_code_removes_nothing() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.provider.insert_factor(user, FactorStatus::Verified, "123456");
        h.profiles.put_profile(SecurityProfile {
            mfa_enabled: true,
            mfa_enrolled_at: Some(Utc::now()),
            ..SecurityProfile::empty(user)
        });

        let outcome = h.service.disable(user, "000000").await?;
        assert_eq!(outcome, DisableOutcome::Rejected);
        assert_eq!(h.provider.factor_count(user), 1);

        let profile = h.profiles.security_profile(user).await?;
        assert!(profile.mfa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn disable_removes_every_factor_and_clears_flags() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.provider.insert_factor(user, FactorStatus::Verified, "123456");
        h.provider.insert_factor(user, FactorStatus::Verified, "123456");
        h.provider.insert_factor(user, FactorStatus::Unverified, "654321");
        h.profiles.put_profile(SecurityProfile {
            mfa_enabled: true,
            mfa_enrolled_at: Some(Utc::now()),
            ..SecurityProfile::empty(user)
        });

        let outcome = h.service.disable(user, "123456").await?;
        assert_eq!(outcome, DisableOutcome::Disabled { removed: 3 });
        assert_eq!(h.provider.factor_count(user), 0);

        let profile = h.profiles.security_profile(user).await?;
        assert!(!profile.mfa_enabled);
        assert!(profile.mfa_enrolled_at.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn disable_failure_mid_removal_keeps_step_up_retryable() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        let verified = h.provider.insert_factor(user, FactorStatus::Verified, "123456");
        let abandoned = h.provider.insert_factor(user, FactorStatus::Unverified, "654321");
        h.profiles.put_profile(SecurityProfile {
            mfa_enabled: true,
            mfa_enrolled_at: Some(Utc::now()),
            ..SecurityProfile::empty(user)
        });

        // Unverified factors go first, so this fault fires before the
        // verified factor is touched.
        h.provider.fail_unenroll(abandoned);
        assert!(h.service.disable(user, "123456").await.is_err());

        let factors = h.provider.list_factors(user).await?;
        assert!(factors.iter().any(|f| f.id == verified));
        let profile = h.profiles.security_profile(user).await?;
        assert!(profile.mfa_enabled);

        // With the fault gone the whole operation completes end-to-end.
        h.provider.clear_unenroll_faults();
        let outcome = h.service.disable(user, "123456").await?;
        assert_eq!(outcome, DisableOutcome::Disabled { removed: 2 });
        assert_eq!(h.provider.factor_count(user), 0);
        let profile = h.profiles.security_profile(user).await?;
        assert!(!profile.mfa_enabled);
        Ok(())
    }

    #[tokio::test]
    async fn disable_without_verified_factor_reports_not_enabled() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.provider.insert_factor(user, FactorStatus::Unverified, "123456");

        let outcome = h.service.disable(user, "123456").await?;
        assert_eq!(outcome, DisableOutcome::NotEnabled);
        assert_eq!(h.provider.factor_count(user), 1);
        Ok(())
    }
}
