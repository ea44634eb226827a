//! Output publishers.
//!
//! The hot path for emitted signals: a webhook publisher with HMAC signing
//! and bounded retries, plus a console publisher for local runs.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::omen_signal::OmenSignal;
use crate::error::{OmenError, PublishError};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait OutputPublisher: Send + Sync {
    async fn publish(&self, signal: &OmenSignal) -> Result<(), OmenError>;
}

/// Logs each signal; useful for local development and dry runs.
pub struct ConsolePublisher;

#[async_trait]
impl OutputPublisher for ConsolePublisher {
    async fn publish(&self, signal: &OmenSignal) -> Result<(), OmenError> {
        info!(
            signal_id = %signal.signal_id,
            category = signal.category.as_str(),
            confidence = signal.confidence_score,
            "signal emitted"
        );
        Ok(())
    }
}

/// POSTs each signal as JSON to a webhook, signing the body with
/// HMAC-SHA256 when a secret is configured.
pub struct WebhookPublisher {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    timeout: Duration,
    max_attempts: u32,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            secret,
            timeout: Duration::from_secs(10),
            max_attempts: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn signature(&self, body: &str) -> Option<String> {
        let secret = self.secret.as_ref()?;
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(body.as_bytes());
        Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }
}

#[async_trait]
impl OutputPublisher for WebhookPublisher {
    async fn publish(&self, signal: &OmenSignal) -> Result<(), OmenError> {
        let body = signal
            .canonical_json()
            .map_err(|e| OmenError::internal(format!("serialize signal for webhook: {e}")))?;
        let signature = self.signature(&body);

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let mut request = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .header("Content-Type", "application/json")
                .header("X-OMEN-Signal-Id", &signal.signal_id);
            if let Some(sig) = &signature {
                request = request.header("X-OMEN-Signature", sig);
            }

            match request.body(body.clone()).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = format!("status {}", response.status());
                }
                Err(e) if e.is_timeout() => {
                    return Err(PublishError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    }
                    .into());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
            warn!(
                signal_id = %signal.signal_id,
                attempt,
                error = %last_error,
                "webhook publish attempt failed"
            );
            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
        }

        Err(PublishError::RetriesExhausted {
            attempts: self.max_attempts,
            message: last_error,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let publisher = WebhookPublisher::new("http://localhost/hook", Some("secret".into()));
        let a = publisher.signature("payload").unwrap();
        let b = publisher.signature("payload").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
    }

    #[test]
    fn no_secret_means_no_signature() {
        let publisher = WebhookPublisher::new("http://localhost/hook", None);
        assert!(publisher.signature("payload").is_none());
    }
}
