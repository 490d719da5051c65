//! sqlx/Postgres implementation of [`ProfileStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{ProfileStore, SecurityProfile, VerificationLog};

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn security_profile(&self, user_id: Uuid) -> Result<SecurityProfile> {
        let query = r"
            SELECT mfa_enabled, mfa_enrolled_at, phone_number, phone_verified, phone_verified_at
            FROM security_profiles
            WHERE user_id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load security profile")?;

        let Some(row) = row else {
            return Ok(SecurityProfile::empty(user_id));
        };

        Ok(SecurityProfile {
            user_id,
            mfa_enabled: row.try_get("mfa_enabled")?,
            mfa_enrolled_at: row.try_get("mfa_enrolled_at")?,
            phone_number: row.try_get("phone_number")?,
            phone_verified: row.try_get("phone_verified")?,
            phone_verified_at: row.try_get("phone_verified_at")?,
        })
    }

    async fn enable_mfa(&self, user_id: Uuid, enrolled_at: DateTime<Utc>) -> Result<()> {
        let query = r"
            INSERT INTO security_profiles (user_id, mfa_enabled, mfa_enrolled_at)
            VALUES ($1, TRUE, $2)
            ON CONFLICT (user_id) DO UPDATE
            SET mfa_enabled = TRUE,
                mfa_enrolled_at = COALESCE(security_profiles.mfa_enrolled_at, EXCLUDED.mfa_enrolled_at)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(enrolled_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to enable MFA on profile")?;
        Ok(())
    }

    async fn disable_mfa(&self, user_id: Uuid) -> Result<()> {
        let query = r"
            INSERT INTO security_profiles (user_id, mfa_enabled, mfa_enrolled_at)
            VALUES ($1, FALSE, NULL)
            ON CONFLICT (user_id) DO UPDATE
            SET mfa_enabled = FALSE,
                mfa_enrolled_at = NULL
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to disable MFA on profile")?;
        Ok(())
    }

    async fn mark_phone_verified(
        &self,
        user_id: Uuid,
        phone: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            INSERT INTO security_profiles (user_id, phone_number, phone_verified, phone_verified_at)
            VALUES ($1, $2, TRUE, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET phone_number = EXCLUDED.phone_number,
                phone_verified = TRUE,
                phone_verified_at = EXCLUDED.phone_verified_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(phone)
            .bind(verified_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark phone verified")?;
        Ok(())
    }

    async fn insert_verification_log(&self, entry: VerificationLog) -> Result<()> {
        let query = r"
            INSERT INTO verification_logs (user_id, phone_number, verification_type, status, created_at)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(entry.user_id)
            .bind(entry.phone_number.as_deref())
            .bind(entry.kind.as_str())
            .bind(entry.status.as_str())
            .bind(entry.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert verification log")?;
        Ok(())
    }
}
