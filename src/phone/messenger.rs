//! Outbound message delivery abstraction.
//!
//! The flow only needs "send one message to one destination"; the gateway
//! decides the channel (SMS or chat app). `LogMessenger` stands in for
//! local development.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{error, info};
use url::Url;

use crate::APP_USER_AGENT;

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Deliver a message or return an error so the caller can roll back.
    async fn send(&self, destination: &str, body: &str) -> Result<()>;
}

/// Local dev messenger that logs the payload instead of dispatching it.
#[derive(Clone, Debug, Default)]
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, destination: &str, body: &str) -> Result<()> {
        info!(destination = %destination, body = %body, "message dispatch stub");
        Ok(())
    }
}

/// Messaging gateway client: one POST per message, bearer-authenticated.
pub struct HttpMessenger {
    endpoint: Url,
    token: SecretString,
    client: Client,
}

impl HttpMessenger {
    /// # Errors
    /// Returns an error if the gateway URL is invalid or the client cannot be built.
    pub fn new(endpoint: &str, token: SecretString) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        if endpoint.host().is_none() {
            return Err(anyhow!("messaging gateway URL has no host"));
        }
        let client = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            endpoint,
            token,
            client,
        })
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send(&self, destination: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.token.expose_secret())
            .json(&json!({
                "to": destination,
                "body": body,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let json_response: Value = response.json().await.unwrap_or_default();
            let message = json_response["error"].as_str().unwrap_or_default();
            error!("message dispatch failed: {status} {message}");
            return Err(anyhow!("message dispatch failed: {status}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_messenger_always_succeeds() -> Result<()> {
        LogMessenger.send("+5511987654321", "oi").await
    }

    #[test]
    fn gateway_url_must_have_host() {
        assert!(HttpMessenger::new("not a url", SecretString::from("token")).is_err());
        assert!(HttpMessenger::new(
            "https://gateway.example.com/v1/messages",
            SecretString::from("token")
        )
        .is_ok());
    }
}
