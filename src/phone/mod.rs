//! Phone ownership verification flow.
//!
//! A 6-digit code is drawn uniformly, held in the ephemeral [`CodeStore`]
//! for ten minutes, and delivered through the outbound [`Messenger`]. The
//! code is compared locally at verification time; on a match the profile is
//! marked verified and the entry destroyed. "Never sent", "timed out" and
//! "burned by too many attempts" all surface as the same opaque
//! [`CodeOutcome::Expired`] so a caller probing the endpoint learns nothing.

pub mod code_store;
pub mod messenger;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use tracing::{error, warn};
use uuid::Uuid;

use crate::profile::{
    log_verification, ProfileStore, VerificationKind, VerificationLog, VerificationStatus,
};

pub use code_store::{CodeStore, InMemoryCodeStore, PendingCode};
pub use messenger::{HttpMessenger, LogMessenger, Messenger};

/// Wall-clock validity window for a dispatched code.
pub const CODE_TTL_MINUTES: i64 = 10;

/// Failed attempts after which a pending code is burned.
const MAX_ATTEMPTS: u32 = 5;

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\D").expect("static pattern")
});

/// Result of a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    InvalidPhone,
}

/// Result of a verification attempt. `Expired` covers every case where no
/// usable entry exists; `Invalid` means the entry survives for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOutcome {
    Verified,
    Invalid,
    Expired,
}

/// Normalize a raw phone number to a `+`-prefixed international form.
/// Bare 10/11 digit numbers get the Brazilian country code.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = NON_DIGITS.replace_all(raw, "");
    match digits.len() {
        10 | 11 => Some(format!("+55{digits}")),
        12 | 13 if digits.starts_with("55") => Some(format!("+{digits}")),
        _ => None,
    }
}

#[derive(Clone)]
pub struct PhoneVerificationService {
    codes: Arc<dyn CodeStore>,
    messenger: Arc<dyn Messenger>,
    profiles: Arc<dyn ProfileStore>,
}

impl PhoneVerificationService {
    #[must_use]
    pub fn new(
        codes: Arc<dyn CodeStore>,
        messenger: Arc<dyn Messenger>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            codes,
            messenger,
            profiles,
        }
    }

    /// Generate, store, and dispatch a fresh code, overwriting any pending
    /// one and restarting its window.
    ///
    /// # Errors
    /// Returns an error if the store or the outbound dispatch fails. A
    /// dispatch failure rolls the stored code back first: an undeliverable
    /// code must never remain verifiable.
    pub async fn send_code(&self, user_id: Uuid, raw_phone: &str) -> Result<SendOutcome> {
        let Some(phone) = normalize_phone(raw_phone) else {
            return Ok(SendOutcome::InvalidPhone);
        };

        let code = rand::thread_rng().gen_range(100_000..=999_999).to_string();
        self.codes.put(
            user_id,
            PendingCode {
                code: code.clone(),
                phone: phone.clone(),
                expires_at: Utc::now() + Duration::minutes(CODE_TTL_MINUTES),
                attempts: 0,
            },
        )?;

        let body = format!(
            "Seu código de verificação é {code}. Ele expira em {CODE_TTL_MINUTES} minutos."
        );
        if let Err(err) = self.messenger.send(&phone, &body).await {
            if let Err(remove_err) = self.codes.remove(user_id) {
                error!("failed to roll back undeliverable code: {remove_err}");
            }
            return Err(err.context("failed to dispatch verification code"));
        }

        log_verification(
            self.profiles.as_ref(),
            VerificationLog::new(
                user_id,
                Some(phone),
                VerificationKind::Phone,
                VerificationStatus::Sent,
            ),
        )
        .await;

        Ok(SendOutcome::Sent)
    }

    /// Check a candidate against the pending code.
    ///
    /// A mismatch keeps the entry so the user can retry inside the window;
    /// expiry and the attempt cap destroy it.
    ///
    /// # Errors
    /// Returns an error only for store/profile failures, never for a wrong code.
    pub async fn verify_code(&self, user_id: Uuid, candidate: &str) -> Result<CodeOutcome> {
        let Some(entry) = self.codes.get(user_id)? else {
            return Ok(CodeOutcome::Expired);
        };

        let now = Utc::now();
        if entry.is_expired(now) || entry.attempts >= MAX_ATTEMPTS {
            self.codes.remove(user_id)?;
            return Ok(CodeOutcome::Expired);
        }

        if entry.code != candidate.trim() {
            let mut retained = entry.clone();
            retained.attempts += 1;
            self.codes.put(user_id, retained)?;
            warn!(user_id = %user_id, "phone verification code mismatch");
            log_verification(
                self.profiles.as_ref(),
                VerificationLog::new(
                    user_id,
                    Some(entry.phone),
                    VerificationKind::Phone,
                    VerificationStatus::Failed,
                ),
            )
            .await;
            return Ok(CodeOutcome::Invalid);
        }

        self.profiles
            .mark_phone_verified(user_id, &entry.phone, now)
            .await
            .context("failed to persist phone verification")?;
        self.codes.remove(user_id)?;

        log_verification(
            self.profiles.as_ref(),
            VerificationLog::new(
                user_id,
                Some(entry.phone),
                VerificationKind::Phone,
                VerificationStatus::Verified,
            ),
        )
        .await;

        Ok(CodeOutcome::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::InMemoryProfileStore;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct FailingMessenger;

    #[async_trait]
    impl Messenger for FailingMessenger {
        async fn send(&self, _destination: &str, _body: &str) -> Result<()> {
            Err(anyhow!("gateway timeout"))
        }
    }

    struct Harness {
        codes: Arc<InMemoryCodeStore>,
        profiles: Arc<InMemoryProfileStore>,
        service: PhoneVerificationService,
    }

    fn harness() -> Harness {
        harness_with(Arc::new(LogMessenger))
    }

    fn harness_with(messenger: Arc<dyn Messenger>) -> Harness {
        let codes = Arc::new(InMemoryCodeStore::new());
        let profiles = Arc::new(InMemoryProfileStore::new());
        let service = PhoneVerificationService::new(
            codes.clone() as Arc<dyn CodeStore>,
            messenger,
            profiles.clone() as Arc<dyn ProfileStore>,
        );
        Harness {
            codes,
            profiles,
            service,
        }
    }

    fn pending_code(harness: &Harness, user: Uuid) -> Result<PendingCode> {
        harness
            .codes
            .get(user)?
            .ok_or_else(|| anyhow!("no pending code"))
    }

    #[test]
    fn normalize_handles_bare_and_prefixed_numbers() {
        assert_eq!(
            normalize_phone("11987654321").as_deref(),
            Some("+5511987654321")
        );
        assert_eq!(
            normalize_phone("(11) 98765-4321").as_deref(),
            Some("+5511987654321")
        );
        assert_eq!(
            normalize_phone("+55 11 98765-4321").as_deref(),
            Some("+5511987654321")
        );
        assert_eq!(normalize_phone("123").as_deref(), None);
        assert_eq!(normalize_phone("").as_deref(), None);
    }

    #[tokio::test]
    async fn send_stores_code_and_audits() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        assert_eq!(h.service.send_code(user, "11987654321").await?, SendOutcome::Sent);
        let entry = pending_code(&h, user)?;
        assert_eq!(entry.code.len(), 6);
        assert!(entry.code.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(entry.phone, "+5511987654321");
        let logs = h.profiles.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, VerificationStatus::Sent);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_phone_is_reported_without_side_effects() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        assert_eq!(
            h.service.send_code(user, "123").await?,
            SendOutcome::InvalidPhone
        );
        assert!(h.codes.get(user)?.is_none());
        assert!(h.profiles.logs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn resend_invalidates_previous_code() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.service.send_code(user, "11987654321").await?;
        let first = pending_code(&h, user)?.code;
        h.service.send_code(user, "11987654321").await?;
        let second = pending_code(&h, user)?.code;

        // Even if the draw repeats, the first entry is gone; force distinct
        // codes to observe the rejection.
        if first == second {
            let mut entry = pending_code(&h, user)?;
            entry.code = if first == "999999" { "100000" } else { "999999" }.to_string();
            h.codes.put(user, entry)?;
        }
        assert_eq!(h.service.verify_code(user, &first).await?, CodeOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn expired_code_fails_even_with_matching_digits() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.codes.put(
            user,
            PendingCode {
                code: "123456".to_string(),
                phone: "+5511987654321".to_string(),
                expires_at: Utc::now() - Duration::seconds(1),
                attempts: 0,
            },
        )?;
        assert_eq!(h.service.verify_code(user, "123456").await?, CodeOutcome::Expired);
        assert!(h.codes.get(user)?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn absent_code_reports_expired() -> Result<()> {
        let h = harness();
        assert_eq!(
            h.service.verify_code(Uuid::new_v4(), "123456").await?,
            CodeOutcome::Expired
        );
        Ok(())
    }

    #[tokio::test]
    async fn mismatch_keeps_entry_for_retry() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.service.send_code(user, "11987654321").await?;
        let code = pending_code(&h, user)?.code;
        let wrong = if code == "999999" { "100000" } else { "999999" };

        assert_eq!(h.service.verify_code(user, wrong).await?, CodeOutcome::Invalid);
        assert_eq!(pending_code(&h, user)?.attempts, 1);
        assert_eq!(h.service.verify_code(user, &code).await?, CodeOutcome::Verified);

        let profile = h.profiles.security_profile(user).await?;
        assert!(profile.phone_verified);
        assert_eq!(profile.phone_number.as_deref(), Some("+5511987654321"));
        assert!(profile.phone_verified_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn attempt_cap_burns_the_code() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.service.send_code(user, "11987654321").await?;
        let code = pending_code(&h, user)?.code;
        let wrong = if code == "999999" { "100000" } else { "999999" };

        for _ in 0..5 {
            assert_eq!(h.service.verify_code(user, wrong).await?, CodeOutcome::Invalid);
        }
        // Sixth attempt hits the cap; even the right code is refused.
        assert_eq!(h.service.verify_code(user, &code).await?, CodeOutcome::Expired);
        assert!(h.codes.get(user)?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_failure_rolls_back_stored_code() -> Result<()> {
        let h = harness_with(Arc::new(FailingMessenger));
        let user = Uuid::new_v4();
        assert!(h.service.send_code(user, "11987654321").await.is_err());
        assert!(h.codes.get(user)?.is_none());
        assert!(h.profiles.logs().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn verification_is_audited() -> Result<()> {
        let h = harness();
        let user = Uuid::new_v4();
        h.service.send_code(user, "11987654321").await?;
        let code = pending_code(&h, user)?.code;
        h.service.verify_code(user, &code).await?;
        let statuses: Vec<_> = h.profiles.logs().iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![VerificationStatus::Sent, VerificationStatus::Verified]
        );
        Ok(())
    }
}
