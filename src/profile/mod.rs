//! Security profile storage seam.
//!
//! One row per user caches the MFA state derived from the identity provider
//! and holds the phone verification flags the enforcement gate reads. An
//! insert-only verification log records sent/verified/failed events;
//! writing it is always best-effort.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

pub use memory::InMemoryProfileStore;
pub use postgres::PgProfileStore;

/// Per-user security flags.
///
/// `mfa_enabled` is a cache of "the provider holds at least one verified
/// factor"; `mfa_enrolled_at` doubles as the verified signal (set on first
/// successful code check, cleared on disable).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SecurityProfile {
    pub user_id: Uuid,
    pub mfa_enabled: bool,
    pub mfa_enrolled_at: Option<DateTime<Utc>>,
    pub phone_number: Option<String>,
    pub phone_verified: bool,
    pub phone_verified_at: Option<DateTime<Utc>>,
}

impl SecurityProfile {
    #[must_use]
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationKind {
    Phone,
    Mfa,
}

impl VerificationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Mfa => "mfa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Sent,
    Verified,
    Failed,
}

impl VerificationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone)]
pub struct VerificationLog {
    pub user_id: Uuid,
    pub phone_number: Option<String>,
    pub kind: VerificationKind,
    pub status: VerificationStatus,
    pub created_at: DateTime<Utc>,
}

impl VerificationLog {
    #[must_use]
    pub fn new(
        user_id: Uuid,
        phone_number: Option<String>,
        kind: VerificationKind,
        status: VerificationStatus,
    ) -> Self {
        Self {
            user_id,
            phone_number,
            kind,
            status,
            created_at: Utc::now(),
        }
    }
}

/// Profile reads/writes consumed by the flows.
///
/// Reading a user with no row yet returns an empty profile; writes upsert.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn security_profile(&self, user_id: Uuid) -> Result<SecurityProfile>;

    async fn enable_mfa(&self, user_id: Uuid, enrolled_at: DateTime<Utc>) -> Result<()>;

    async fn disable_mfa(&self, user_id: Uuid) -> Result<()>;

    async fn mark_phone_verified(
        &self,
        user_id: Uuid,
        phone: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn insert_verification_log(&self, entry: VerificationLog) -> Result<()>;
}

/// Write an audit entry, swallowing failures. Audit writes never fail a flow.
pub async fn log_verification(store: &dyn ProfileStore, entry: VerificationLog) {
    let kind = entry.kind;
    let status = entry.status;
    if let Err(err) = store.insert_verification_log(entry).await {
        error!(
            kind = kind.as_str(),
            status = status.as_str(),
            "failed to write verification log: {err}"
        );
    }
}
