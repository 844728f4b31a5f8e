//! Recommendation engine
//!
//! Turns raw probe results into a short, ordered list of findings. When more
//! than one webhook answered, the first in probe order is the designated
//! endpoint; latency plays no part so repeated runs agree.

use crate::env::Environment;
use crate::probe::{AuthTestResult, NetworkCheck, ProbeResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Success,
    Warning,
    Error,
}

impl RecommendationKind {
    pub fn icon(&self) -> &'static str {
        match self {
            RecommendationKind::Success => "+",
            RecommendationKind::Warning => "!",
            RecommendationKind::Error => "●",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub message: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Recommendation {
    fn new(kind: RecommendationKind, message: String, action: &str) -> Self {
        Self {
            kind,
            message,
            action: action.to_string(),
            url: None,
        }
    }
}

/// Probes split by outcome, each list in original probe order.
#[derive(Debug, Default)]
pub struct ProbePartition<'a> {
    pub successful: Vec<&'a ProbeResult>,
    pub not_found: Vec<&'a ProbeResult>,
    pub failed: Vec<&'a ProbeResult>,
}

pub fn partition(probes: &[ProbeResult]) -> ProbePartition<'_> {
    let mut out = ProbePartition::default();
    for probe in probes {
        if probe.is_success() {
            out.successful.push(probe);
        } else if probe.is_not_found() {
            out.not_found.push(probe);
        } else {
            out.failed.push(probe);
        }
    }
    out
}

/// First probe that answered 200/201.
pub fn recommended_endpoint(probes: &[ProbeResult]) -> Option<&ProbeResult> {
    probes.iter().find(|p| p.is_success())
}

fn join_urls(probes: &[&ProbeResult]) -> String {
    probes
        .iter()
        .map(|p| p.url.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn recommend(
    env: &Environment,
    probes: &[ProbeResult],
    auth_tests: &[AuthTestResult],
    network: &[NetworkCheck],
) -> Vec<Recommendation> {
    let parts = partition(probes);
    let mut recommendations = Vec::new();

    if let Some(first) = parts.successful.first() {
        let mut rec = Recommendation::new(
            RecommendationKind::Success,
            format!("Found working webhook URLs: {}", join_urls(&parts.successful)),
            "Update the MCP server to use the first working URL",
        );
        rec.url = Some(first.url.clone());
        recommendations.push(rec);
    }

    if !parts.not_found.is_empty() {
        recommendations.push(Recommendation::new(
            RecommendationKind::Warning,
            format!("Found 404 errors for: {}", join_urls(&parts.not_found)),
            "Avoid these URLs in the MCP server configuration",
        ));
    }

    if !parts.failed.is_empty() {
        let details = parts
            .failed
            .iter()
            .map(|p| match (p.status_code, p.error_message.as_deref()) {
                (Some(status), _) => format!("{} ({})", p.url, status),
                (None, Some(err)) => format!("{} ({})", p.url, err),
                (None, None) => p.url.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        recommendations.push(Recommendation::new(
            RecommendationKind::Error,
            format!("Webhook probes failed: {}", details),
            "Check that n8n is running and the workflow is active",
        ));
    }

    if env.has_api_key() && !auth_tests.iter().any(AuthTestResult::is_success) {
        recommendations.push(Recommendation::new(
            RecommendationKind::Error,
            "API authentication failing despite API key being present".to_string(),
            "Check API key validity and n8n API endpoint configuration",
        ));
    }

    if !env.has_api_key() {
        recommendations.push(Recommendation::new(
            RecommendationKind::Warning,
            "No N8N_API_KEY found in environment".to_string(),
            "Set N8N_API_KEY environment variable for API access",
        ));
    }

    let unreachable: Vec<&str> = network
        .iter()
        .filter(|c| !c.reachable)
        .map(|c| c.name.as_str())
        .collect();
    if !unreachable.is_empty() {
        recommendations.push(Recommendation::new(
            RecommendationKind::Error,
            format!(
                "Network connectivity issues detected: {}",
                unreachable.join(", ")
            ),
            "Check if n8n is running and accessible",
        ));
    }

    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(url: &str, status: Option<u16>) -> ProbeResult {
        ProbeResult {
            url: url.to_string(),
            http_method: "POST".to_string(),
            status_code: status,
            latency_ms: 1,
            error_message: status.is_none().then(|| "connection refused".to_string()),
            response_excerpt: None,
        }
    }

    fn env_with_key(key: Option<&str>) -> Environment {
        let key = key.map(str::to_string);
        Environment::from_lookup(move |name| {
            if name == "N8N_API_KEY" {
                key.clone()
            } else {
                None
            }
        })
    }

    fn count(recs: &[Recommendation], kind: RecommendationKind) -> usize {
        recs.iter().filter(|r| r.kind == kind).count()
    }

    #[test]
    fn test_single_success_names_the_url() {
        let probes = vec![
            probe("http://localhost:5678/webhook/compile-video", Some(200)),
            probe("http://localhost:5678/webhook-test/compile-video", Some(404)),
        ];
        let recs = recommend(&env_with_key(Some("k")), &probes, &[], &[]);

        assert_eq!(count(&recs, RecommendationKind::Success), 1);
        let success = recs
            .iter()
            .find(|r| r.kind == RecommendationKind::Success)
            .unwrap();
        assert_eq!(
            success.url.as_deref(),
            Some("http://localhost:5678/webhook/compile-video")
        );
    }

    #[test]
    fn test_first_success_in_probe_order_wins() {
        let mut slow = probe("http://a/first", Some(201));
        slow.latency_ms = 900;
        let fast = probe("http://a/second", Some(200));
        let probes = vec![slow, fast];

        assert_eq!(recommended_endpoint(&probes).unwrap().url, "http://a/first");
    }

    #[test]
    fn test_all_not_found_gives_no_success() {
        let probes = vec![probe("http://a/x", Some(404)), probe("http://a/y", Some(404))];
        let recs = recommend(&env_with_key(Some("k")), &probes, &[], &[]);

        assert_eq!(count(&recs, RecommendationKind::Success), 0);
        assert!(recs
            .iter()
            .any(|r| r.kind == RecommendationKind::Warning && r.message.contains("404")));
        assert!(recommended_endpoint(&probes).is_none());
    }

    #[test]
    fn test_missing_api_key_warns() {
        let recs = recommend(&env_with_key(None), &[], &[], &[]);
        assert!(recs.iter().any(|r| r.action.contains("Set N8N_API_KEY")));
        assert!(!recs.iter().any(|r| r.message.contains("despite API key")));
    }

    #[test]
    fn test_failing_auth_with_key_is_an_error() {
        let auth = vec![AuthTestResult {
            endpoint_url: "http://a/api/v1/workflows".to_string(),
            auth_header_name: "X-N8N-API-KEY".to_string(),
            status_code: Some(401),
            workflow_count: None,
            error_message: Some("unauthorized".to_string()),
        }];
        let recs = recommend(&env_with_key(Some("k")), &[], &auth, &[]);
        assert!(recs.iter().any(|r| r.kind == RecommendationKind::Error
            && r.message.contains("despite API key")));
    }

    #[test]
    fn test_partition_covers_every_probe_once() {
        let probes = vec![
            probe("http://a/1", Some(200)),
            probe("http://a/2", Some(404)),
            probe("http://a/3", Some(500)),
            probe("http://a/4", None),
        ];
        let parts = partition(&probes);
        assert_eq!(parts.successful.len(), 1);
        assert_eq!(parts.not_found.len(), 1);
        assert_eq!(parts.failed.len(), 2);
    }
}
