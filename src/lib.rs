//! # Guarita (MFA & Phone Verification Gate)
//!
//! `guarita` fronts a hosted identity provider and a Postgres profile store
//! with the security flows a back-office application needs before letting a
//! user in:
//!
//! - **Factor registry sync**: the identity provider owns the truth about
//!   enrolled TOTP factors; the profile row caches a fast `mfa_enabled`
//!   boolean. Every status check reconciles the two and repairs drift.
//! - **Enrollment**: stale unverified factors are unenrolled before a new
//!   factor is created; the profile only flips to enabled on the first
//!   successful code verification.
//! - **Step-up disable**: turning MFA off requires a fresh code against a
//!   verified factor. Removal is all-or-nothing; the profile flags are only
//!   cleared once every factor is gone.
//! - **Phone verification**: a 6-digit one-time code held in an in-process
//!   TTL store, delivered over an outbound messaging channel, with a
//!   10-minute window and an attempt cap.
//! - **Enforcement gate**: until the phone is verified, the API rejects
//!   everything except the verification endpoints themselves.
//!
//! User-facing error copy is Portuguese; logs and internal errors are not.

pub mod api;
pub mod cli;
pub mod idp;
pub mod mfa;
pub mod phone;
pub mod profile;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
