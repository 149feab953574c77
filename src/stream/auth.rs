//! Upstream authentication (C20, SPEC_FULL.md §10.6).
//!
//! A one-shot REST handshake that exchanges the configured consumer
//! id/secret for a bearer token, used both at startup and after the
//! supervisor exhausts a streaming connection (tokens expire and must be
//! re-fetched before reconnecting). Bounded to 15 seconds so a hung auth
//! endpoint can't stall process startup indefinitely.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

const AUTH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct AccessTokenEnvelope {
    data: Option<AccessTokenData>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessTokenData {
    #[serde(rename = "accessToken")]
    access_token: String,
}

pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    consumer_id: String,
    consumer_secret: String,
}

impl AuthClient {
    pub fn new(base_url: String, consumer_id: String, consumer_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            consumer_id,
            consumer_secret,
        }
    }

    /// Fetches a fresh bearer token. Callers re-invoke this after every
    /// reconnect since the upstream token has a short lifetime.
    pub async fn fetch_token(&self) -> Result<String> {
        let url = format!("{}Market/AccessToken", self.base_url);
        debug!(%url, "requesting upstream access token");

        let request = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "consumerID": self.consumer_id,
                "consumerSecret": self.consumer_secret,
            }))
            .send();

        let response = tokio::time::timeout(AUTH_TIMEOUT, request)
            .await
            .context("upstream auth request timed out")?
            .context("upstream auth request failed")?;

        if !response.status().is_success() {
            bail!("upstream auth returned status {}", response.status());
        }

        let envelope: AccessTokenEnvelope = response
            .json()
            .await
            .context("failed to decode upstream auth response")?;

        let token = envelope
            .data
            .map(|d| d.access_token)
            .filter(|t| !t.is_empty())
            .with_context(|| {
                format!(
                    "upstream auth response carried no access token (message: {:?})",
                    envelope.message
                )
            })?;

        info!("upstream access token acquired");
        Ok(token)
    }
}
