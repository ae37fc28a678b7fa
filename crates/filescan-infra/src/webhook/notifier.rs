use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::Duration;

use filescan_core::notify::{InfectionAlert, InfectionMessage, NotificationError, Notifier};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex hmac of body>` when a signing secret is set.
pub const SIGNATURE_HEADER: &str = "X-Filescan-Signature";

#[derive(Clone, Debug)]
pub struct WebhookNotifierConfig {
    pub url: String,
    pub signing_secret: Option<String>,
    pub timeout: Duration,
}

/// Posts `{text, filename, scannedAt}` to a single configured URL. One attempt
/// per alert; the caller decides what to do with a failure.
#[derive(Clone)]
pub struct WebhookNotifier {
    http_client: Client,
    config: WebhookNotifierConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookNotifierConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for webhooks")?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Sign webhook payload with HMAC-SHA256
    pub fn sign_payload(body: &str, secret: &str) -> Result<String> {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid signing secret")?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[tracing::instrument(skip(self, alert), fields(file.id = %alert.file_id))]
    async fn notify_infected(&self, alert: &InfectionAlert) -> Result<(), NotificationError> {
        let body = serde_json::to_string(&InfectionMessage::from(alert))
            .map_err(|e| NotificationError::Build(e.to_string()))?;

        let mut request = self
            .http_client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "Filescan-Webhook/1.0");

        if let Some(secret) = &self.config.signing_secret {
            let signature = Self::sign_payload(&body, secret)
                .map_err(|e| NotificationError::Build(e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(status = status.as_u16(), "Infection alert delivered");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Failed to read response body"));
        Err(NotificationError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
