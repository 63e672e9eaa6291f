//! Downstream link submission.
//!
//! Recognized links are POSTed as JSON to the configured endpoint. When a
//! secret is configured the body is signed with HMAC-SHA256 and the digest
//! sent as `X-Tgdl-Signature: sha256=<hex>`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::SubmitEndpoint;
use crate::error::SubmitError;
use crate::source::MessageId;

pub const SIGNATURE_HEADER: &str = "X-Tgdl-Signature";

/// Body of a submission request.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSubmission {
    pub provider: String,
    pub url: String,
    pub access_code: Option<String>,
    pub canonical_url: String,
    pub message_id: MessageId,
    pub channel_title: String,
    pub submitted_at: DateTime<Utc>,
}

/// Client for the link submission endpoint.
pub struct LinkSubmitter {
    client: reqwest::Client,
    url: String,
    secret: Option<SecretString>,
    timeout: Duration,
}

impl LinkSubmitter {
    pub fn new(endpoint: &SubmitEndpoint) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: endpoint.url.clone(),
            secret: endpoint.secret.clone().map(SecretString::from),
            timeout: Duration::from_millis(endpoint.timeout_ms),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one link. Any 2xx is success; nothing is retried here.
    pub async fn submit(&self, submission: &LinkSubmission) -> Result<(), SubmitError> {
        let body = serde_json::to_string(submission)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .body(body.clone());

        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, compute_signature(secret, &body)?);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(
            provider = %submission.provider,
            url = %submission.canonical_url,
            message_id = submission.message_id,
            "Link submitted"
        );
        Ok(())
    }
}

/// HMAC-SHA256 over the request body, formatted as `sha256=<hex>`.
pub fn compute_signature(secret: &SecretString, payload: &str) -> Result<String, SubmitError> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| SubmitError::Signature(e.to_string()))?;
    mac.update(payload.as_bytes());
    let result = mac.finalize();

    Ok(format!("sha256={}", hex::encode(result.into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> LinkSubmission {
        LinkSubmission {
            provider: "quark".to_string(),
            url: "https://pan.quark.cn/s/abc".to_string(),
            access_code: None,
            canonical_url: "https://pan.quark.cn/s/abc".to_string(),
            message_id: 103,
            channel_title: "Archive".to_string(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_signature_matches_reference_vector() {
        let secret = SecretString::from("key".to_string());
        let sig =
            compute_signature(&secret, "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(
            sig,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_payload_fields() {
        let value = serde_json::to_value(submission()).unwrap();
        for field in [
            "provider",
            "url",
            "access_code",
            "canonical_url",
            "message_id",
            "channel_title",
            "submitted_at",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["message_id"], 103);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_request_error() {
        let submitter = LinkSubmitter::new(&SubmitEndpoint {
            url: "http://127.0.0.1:9/links".to_string(),
            secret: Some("s3cret".to_string()),
            timeout_ms: 500,
        });
        let err = submitter.submit(&submission()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Request(_)));
    }
}
