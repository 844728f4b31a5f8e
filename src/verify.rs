//! Post-fix end-to-end check against the designated endpoint.

use crate::probe::{describe_error, DurationPreference, ProbePayload};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub error_message: Option<String>,
}

/// Small request that exercises the pipeline without a long compilation.
pub fn verification_payload() -> ProbePayload {
    ProbePayload::new("test compilation after fixes")
        .with_clips(2, 6)
        .with_duration(DurationPreference::Short)
}

/// One POST, no retry. Success means a 2xx status.
pub async fn verify_endpoint(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> VerificationResult {
    let start = Instant::now();
    let sent = client
        .post(url)
        .json(&verification_payload())
        .timeout(timeout)
        .send()
        .await;

    let result = match sent {
        Ok(response) => {
            let status = response.status();
            VerificationResult {
                url: url.to_string(),
                success: status.is_success(),
                status_code: Some(status.as_u16()),
                latency_ms: start.elapsed().as_millis() as u64,
                error_message: None,
            }
        }
        Err(err) => VerificationResult {
            url: url.to_string(),
            success: false,
            status_code: None,
            latency_ms: start.elapsed().as_millis() as u64,
            error_message: Some(describe_error(&err)),
        },
    };
    info!(url, success = result.success, status = ?result.status_code, "end-to-end verification");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_payload_shape() {
        let value = serde_json::to_value(verification_payload()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "query": "test compilation after fixes",
                "max_clips": 2,
                "quality_threshold": 6,
                "duration_preference": "short"
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_without_status() {
        let client = reqwest::Client::new();
        let result = verify_endpoint(
            &client,
            "http://127.0.0.1:1/webhook/compile-video",
            Duration::from_secs(2),
        )
        .await;
        assert!(!result.success);
        assert!(result.status_code.is_none());
        assert!(result.error_message.is_some());
    }
}
