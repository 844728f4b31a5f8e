//! Probe runner
//!
//! Issues the diagnostic request matrix: every deduplicated base URL crossed
//! with every candidate webhook path, plus authenticated API listing and plain
//! reachability checks. A failed probe is a recorded result, never an `Err`,
//! so one dead endpoint cannot cut the batch short.

use crate::config::{DoctorConfig, NetworkTarget};
use crate::env::Environment;
use crate::n8n::{ApiError, N8nClient, API_KEY_HEADER};
use crate::util::excerpt;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::time::{Duration, Instant};
use tracing::debug;

/// Characters of response body kept for diagnostics
pub const RESPONSE_EXCERPT_CHARS: usize = 200;

pub const USER_AGENT: &str = concat!("n8n-doctor/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationPreference {
    Short,
    Medium,
    Long,
}

/// Body POSTed to compile-video webhooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbePayload {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_clips: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_preference: Option<DurationPreference>,
}

impl ProbePayload {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_clips: None,
            quality_threshold: None,
            duration_preference: None,
        }
    }

    pub fn with_clips(mut self, max_clips: u32, quality_threshold: u32) -> Self {
        self.max_clips = Some(max_clips);
        self.quality_threshold = Some(quality_threshold);
        self
    }

    pub fn with_duration(mut self, preference: DurationPreference) -> Self {
        self.duration_preference = Some(preference);
        self
    }

    /// Payload used for the broad webhook probe matrix.
    pub fn diagnostic() -> Self {
        Self::new("test compilation request")
            .with_clips(3, 7)
            .with_duration(DurationPreference::Medium)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub url: String,
    pub http_method: String,
    /// `None` exactly when no HTTP response arrived
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    pub error_message: Option<String>,
    pub response_excerpt: Option<String>,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, Some(200) | Some(201))
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTestResult {
    pub endpoint_url: String,
    pub auth_header_name: String,
    pub status_code: Option<u16>,
    pub workflow_count: Option<usize>,
    pub error_message: Option<String>,
}

impl AuthTestResult {
    pub fn is_success(&self) -> bool {
        self.error_message.is_none() && self.status_code.is_some_and(|s| (200..300).contains(&s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCheck {
    pub name: String,
    pub url: String,
    pub reachable: bool,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
    pub error_message: Option<String>,
}

/// Shared HTTP client for a run. Per-request timeouts are set at call sites.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to create HTTP client")
}

/// Drop exact-duplicate strings, keeping the first occurrence.
pub fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Environment base URL, its webhook base, then the configured extras.
pub fn candidate_bases(env: &Environment, config: &DoctorConfig) -> Vec<String> {
    let mut all = vec![env.n8n_base_url.clone(), env.webhook_base()];
    all.extend(config.candidates.base_urls.iter().cloned());
    dedup_preserving_order(all)
}

/// Full probe URLs in matrix order (base-major).
pub fn probe_matrix(bases: &[String], paths: &[String]) -> Vec<String> {
    bases
        .iter()
        .flat_map(|base| {
            let base = base.trim_end_matches('/');
            paths.iter().map(move |path| format!("{}{}", base, path))
        })
        .collect()
}

/// Render a transport error with its cause chain, e.g. "connection refused".
pub fn describe_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        return "request timed out".to_string();
    }
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// POST the payload to one URL and record whatever happens.
pub async fn probe_webhook(
    client: &reqwest::Client,
    url: &str,
    payload: &ProbePayload,
    timeout: Duration,
) -> ProbeResult {
    let start = Instant::now();
    let sent = client.post(url).json(payload).timeout(timeout).send().await;

    let result = match sent {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    debug!(url, error = %describe_error(&err), "webhook probe body read failed");
                    format!("<body read failed: {}>", describe_error(&err))
                }
            };
            ProbeResult {
                url: url.to_string(),
                http_method: "POST".to_string(),
                status_code: Some(status),
                latency_ms: start.elapsed().as_millis() as u64,
                error_message: None,
                response_excerpt: excerpt(&body, RESPONSE_EXCERPT_CHARS),
            }
        }
        Err(err) => ProbeResult {
            url: url.to_string(),
            http_method: "POST".to_string(),
            status_code: None,
            latency_ms: start.elapsed().as_millis() as u64,
            error_message: Some(describe_error(&err)),
            response_excerpt: None,
        },
    };

    debug!(
        url = %result.url,
        status = ?result.status_code,
        latency_ms = result.latency_ms,
        "webhook probe"
    );
    result
}

/// Probe every (base, path) pair with at most `concurrency` requests in
/// flight. Results come back in matrix order regardless of completion order.
pub async fn run_webhook_probes(
    client: &reqwest::Client,
    bases: &[String],
    paths: &[String],
    payload: &ProbePayload,
    timeout: Duration,
    concurrency: usize,
) -> Vec<ProbeResult> {
    let urls = probe_matrix(bases, paths);
    stream::iter(urls)
        .map(|url| async move { probe_webhook(client, &url, payload, timeout).await })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// List workflows on each API endpoint with the key header. Without a key
/// there is nothing to test and the result is empty.
pub async fn run_auth_tests(
    client: &reqwest::Client,
    env: &Environment,
    endpoints: &[String],
    timeout: Duration,
) -> Vec<AuthTestResult> {
    let Some(api_key) = env.n8n_api_key.as_deref() else {
        return Vec::new();
    };
    let api = N8nClient::new(client.clone(), &env.n8n_base_url, api_key, timeout);

    let mut results = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        let endpoint_url = format!("{}{}", env.n8n_base_url.trim_end_matches('/'), endpoint);
        let result = match api.get(&endpoint_url).await {
            Ok((status, shape)) => AuthTestResult {
                endpoint_url,
                auth_header_name: API_KEY_HEADER.to_string(),
                status_code: Some(status),
                workflow_count: Some(shape.workflow_count()),
                error_message: None,
            },
            // An answer the shape check rejects still proves the key was accepted.
            Err(ApiError::Body { status, message }) => {
                debug!(endpoint = %endpoint_url, status, %message, "auth test body not recognized");
                AuthTestResult {
                    endpoint_url,
                    auth_header_name: API_KEY_HEADER.to_string(),
                    status_code: Some(status),
                    workflow_count: Some(0),
                    error_message: None,
                }
            }
            Err(err) => AuthTestResult {
                endpoint_url,
                auth_header_name: API_KEY_HEADER.to_string(),
                status_code: err.status(),
                workflow_count: None,
                error_message: Some(match &err {
                    ApiError::Transport(inner) => describe_error(inner),
                    other => other.to_string(),
                }),
            },
        };
        debug!(endpoint = %result.endpoint_url, status = ?result.status_code, "auth test");
        results.push(result);
    }
    results
}

/// Base URL, `/healthz`, then configured extras. Any status counts as reachable.
pub fn network_targets(env: &Environment, extra: &[NetworkTarget]) -> Vec<NetworkTarget> {
    let base = env.n8n_base_url.trim_end_matches('/');
    let mut targets = vec![
        NetworkTarget::new("n8n-base", base),
        NetworkTarget::new("n8n-health", format!("{}/healthz", base)),
    ];
    targets.extend(extra.iter().cloned());
    targets
}

pub async fn run_network_checks(
    client: &reqwest::Client,
    targets: &[NetworkTarget],
    timeout: Duration,
) -> Vec<NetworkCheck> {
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        let start = Instant::now();
        let check = match client.get(&target.url).timeout(timeout).send().await {
            Ok(response) => NetworkCheck {
                name: target.name.clone(),
                url: target.url.clone(),
                reachable: true,
                status_code: Some(response.status().as_u16()),
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error_message: None,
            },
            Err(err) => NetworkCheck {
                name: target.name.clone(),
                url: target.url.clone(),
                reachable: false,
                status_code: None,
                latency_ms: None,
                error_message: Some(describe_error(&err)),
            },
        };
        debug!(name = %check.name, reachable = check.reachable, "network check");
        results.push(check);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let out = dedup_preserving_order(strings(&["b", "a", "b", "c", "a"]));
        assert_eq!(out, strings(&["b", "a", "c"]));
    }

    #[test]
    fn test_dedup_is_exact_match_only() {
        let out = dedup_preserving_order(strings(&[
            "http://localhost:5678",
            "http://localhost:5678/",
            "http://127.0.0.1:5678",
        ]));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_candidate_bases_with_default_env() {
        let env = Environment::from_lookup(|_| None);
        let bases = candidate_bases(&env, &DoctorConfig::default());
        assert_eq!(
            bases,
            strings(&["http://localhost:5678", "http://127.0.0.1:5678"])
        );
    }

    #[test]
    fn test_matrix_is_full_cross_product_in_order() {
        let bases = strings(&["http://a", "http://b/"]);
        let paths = strings(&["/x", "/y", "/z"]);
        let urls = probe_matrix(&bases, &paths);
        assert_eq!(urls.len(), bases.len() * paths.len());
        assert_eq!(urls[0], "http://a/x");
        assert_eq!(urls[2], "http://a/z");
        assert_eq!(urls[3], "http://b/x");
    }

    #[test]
    fn test_payload_serialization_omits_unset_fields() {
        let json = serde_json::to_value(ProbePayload::new("dunks")).unwrap();
        assert_eq!(json, serde_json::json!({"query": "dunks"}));

        let json = serde_json::to_value(ProbePayload::diagnostic()).unwrap();
        assert_eq!(json["duration_preference"], "medium");
        assert_eq!(json["max_clips"], 3);
    }

    #[test]
    fn test_probe_result_classification() {
        let mut probe = ProbeResult {
            url: "http://a/x".to_string(),
            http_method: "POST".to_string(),
            status_code: Some(201),
            latency_ms: 3,
            error_message: None,
            response_excerpt: None,
        };
        assert!(probe.is_success());
        probe.status_code = Some(204);
        assert!(!probe.is_success());
        probe.status_code = Some(404);
        assert!(probe.is_not_found());
    }

    #[tokio::test]
    async fn test_refused_connection_is_recorded_not_raised() {
        // Bind then drop a listener to get a port with nothing behind it.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = http_client().unwrap();
        let bases = vec![format!("http://127.0.0.1:{}", port)];
        let paths = strings(&["/webhook/a", "/webhook/b"]);

        let results = run_webhook_probes(
            &client,
            &bases,
            &paths,
            &ProbePayload::diagnostic(),
            Duration::from_secs(2),
            2,
        )
        .await;

        assert_eq!(results.len(), 2);
        for probe in &results {
            assert!(probe.status_code.is_none());
            assert!(probe.error_message.is_some());
        }
        assert!(results[0].url.ends_with("/webhook/a"));
    }
}
