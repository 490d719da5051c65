//! HTTP client for a hosted GoTrue-style MFA API.
//!
//! The service key authorizes the admin factor endpoints; user access
//! tokens are only forwarded for introspection. Provider error bodies are
//! logged server-side and collapsed into generic errors for callers.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::error;
use url::Url;
use uuid::Uuid;

use crate::idp::{AuthFactor, Enrollment, FactorStatus, IdentityProvider, Principal};
use crate::APP_USER_AGENT;

pub struct HttpIdentityProvider {
    base_url: Url,
    service_key: SecretString,
    client: Client,
}

impl HttpIdentityProvider {
    /// # Errors
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn new(base_url: &str, service_key: SecretString) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid identity provider URL")?;
        if base_url.host().is_none() {
            return Err(anyhow!("identity provider URL has no host"));
        }
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            base_url,
            service_key,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid identity provider endpoint: {path}"))
    }

    fn parse_factor(value: &Value) -> Result<AuthFactor> {
        let id = value["id"]
            .as_str()
            .ok_or_else(|| anyhow!("factor without id"))?;
        let status = value["status"].as_str().unwrap_or("unverified");
        let created_at = value["created_at"]
            .as_str()
            .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now);
        Ok(AuthFactor {
            id: Uuid::parse_str(id).context("factor id is not a UUID")?,
            factor_type: value["factor_type"].as_str().unwrap_or("totp").to_string(),
            status: FactorStatus::parse(status)?,
            friendly_name: value["friendly_name"].as_str().unwrap_or("").to_string(),
            created_at,
        })
    }

    async fn provider_error(context: &str, response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or_default();
        let message = body["msg"]
            .as_str()
            .or_else(|| body["error"].as_str())
            .unwrap_or_default();
        error!("{context}: {status} {message}");
        anyhow!("{context}: {status}")
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn authenticate(&self, access_token: &str) -> Result<Principal> {
        let url = self.endpoint("user")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("apikey", self.service_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error("token introspection failed", response).await);
        }

        let body: Value = response.json().await?;
        let id = body["id"]
            .as_str()
            .ok_or_else(|| anyhow!("introspection response has no user id"))?;
        Ok(Principal {
            user_id: Uuid::parse_str(id).context("user id is not a UUID")?,
            phone: body["phone"].as_str().map(ToString::to_string),
        })
    }

    async fn list_factors(&self, user_id: Uuid) -> Result<Vec<AuthFactor>> {
        let url = self.endpoint(&format!("admin/users/{user_id}/factors"))?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.service_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error("factor listing failed", response).await);
        }

        let body: Value = response.json().await?;
        body.as_array()
            .ok_or_else(|| anyhow!("factor listing is not an array"))?
            .iter()
            .map(Self::parse_factor)
            .collect()
    }

    async fn enroll_factor(&self, user_id: Uuid, friendly_name: &str) -> Result<Enrollment> {
        let url = self.endpoint(&format!("admin/users/{user_id}/factors"))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.service_key.expose_secret())
            .json(&json!({
                "factor_type": "totp",
                "friendly_name": friendly_name,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error("factor enrollment failed", response).await);
        }

        let body: Value = response.json().await?;
        let factor_id = body["id"]
            .as_str()
            .ok_or_else(|| anyhow!("enrollment response has no factor id"))?;
        let secret = body["totp"]["secret"]
            .as_str()
            .ok_or_else(|| anyhow!("enrollment response has no secret"))?;
        Ok(Enrollment {
            factor_id: Uuid::parse_str(factor_id).context("factor id is not a UUID")?,
            secret: secret.to_string(),
            otpauth_uri: body["totp"]["uri"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn create_challenge(&self, user_id: Uuid, factor_id: Uuid) -> Result<Uuid> {
        let url = self.endpoint(&format!("admin/users/{user_id}/factors/{factor_id}/challenge"))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.service_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error("challenge creation failed", response).await);
        }

        let body: Value = response.json().await?;
        let id = body["id"]
            .as_str()
            .ok_or_else(|| anyhow!("challenge response has no id"))?;
        Uuid::parse_str(id).context("challenge id is not a UUID")
    }

    async fn verify_challenge(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        challenge_id: Uuid,
        code: &str,
    ) -> Result<bool> {
        let url = self.endpoint(&format!("admin/users/{user_id}/factors/{factor_id}/verify"))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.service_key.expose_secret())
            .json(&json!({
                "challenge_id": challenge_id,
                "code": code,
            }))
            .send()
            .await?;

        // 4xx means the provider saw and rejected the code; anything else
        // unexpected is a provider failure, not a code failure.
        if response.status().is_success() {
            Ok(true)
        } else if response.status().is_client_error()
            && response.status() != StatusCode::UNAUTHORIZED
        {
            Ok(false)
        } else {
            Err(Self::provider_error("challenge verification failed", response).await)
        }
    }

    async fn unenroll_factor(&self, user_id: Uuid, factor_id: Uuid) -> Result<()> {
        let url = self.endpoint(&format!("admin/users/{user_id}/factors/{factor_id}"))?;
        let response = self
            .client
            .delete(url)
            .bearer_auth(self.service_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::provider_error("factor unenrollment failed", response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_url_without_host() {
        let result = HttpIdentityProvider::new("file:///etc", SecretString::from("key"));
        assert!(result.is_err());
    }

    #[test]
    fn endpoint_joins_paths() -> Result<()> {
        let provider =
            HttpIdentityProvider::new("https://auth.example.com/v1/", SecretString::from("key"))?;
        let url = provider.endpoint("admin/users/abc/factors")?;
        assert_eq!(
            url.as_str(),
            "https://auth.example.com/v1/admin/users/abc/factors"
        );
        Ok(())
    }

    #[test]
    fn parse_factor_requires_uuid() {
        let value = json!({
            "id": "not-a-uuid",
            "status": "verified",
        });
        assert!(HttpIdentityProvider::parse_factor(&value).is_err());
    }

    #[test]
    fn parse_factor_defaults() -> Result<()> {
        let id = Uuid::new_v4();
        let value = json!({
            "id": id.to_string(),
            "status": "unverified",
        });
        let factor = HttpIdentityProvider::parse_factor(&value)?;
        assert_eq!(factor.id, id);
        assert_eq!(factor.factor_type, "totp");
        assert_eq!(factor.status, FactorStatus::Unverified);
        Ok(())
    }
}
