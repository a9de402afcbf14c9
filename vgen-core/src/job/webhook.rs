use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::WebhookSection;

use super::models::{JobDelivery, JobStatus, VariantResult};

pub const SIGNATURE_HEADER: &str = "X-Vgen-Signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("receiver answered with status {0}")]
    Status(u16),
    #[error("hmac error")]
    Hmac,
}

/// Body of the single terminal-state notification sent for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookPayload {
    pub job_id: String,
    pub status: JobStatus,
    pub results: Vec<VariantResult>,
    pub completed_at: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn from_delivery(delivery: JobDelivery) -> Self {
        Self {
            job_id: delivery.job_id,
            status: delivery.status,
            results: delivery.results,
            completed_at: delivery.updated_at,
        }
    }
}

#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError>;
}

pub struct HttpWebhookNotifier {
    client: reqwest::Client,
    secret: Option<Vec<u8>>,
    timeout: Duration,
}

impl HttpWebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret: None,
            timeout,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn from_config(config: &WebhookSection) -> Self {
        let notifier = Self::new(config.timeout());
        match &config.secret {
            Some(secret) if !secret.is_empty() => notifier.with_secret(secret.as_bytes()),
            _ => notifier,
        }
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(payload)?;
        let mut request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
        }
        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// `sha256=<hex hmac>` over the raw request body.
pub fn sign_payload(secret: &[u8], body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| WebhookError::Hmac)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_keyed() {
        let a = sign_payload(b"secret", b"{\"job_id\":\"1\"}").unwrap();
        let b = sign_payload(b"secret", b"{\"job_id\":\"1\"}").unwrap();
        let c = sign_payload(b"other", b"{\"job_id\":\"1\"}").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("sha256="));
        assert_eq!(a.len(), "sha256=".len() + 64);
    }
}
