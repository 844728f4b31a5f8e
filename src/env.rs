//! Environment snapshot
//!
//! Connection parameters are read from the process environment exactly once
//! at startup and passed explicitly to every stage of a run.

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5678";
const DEFAULT_NODE_ENV: &str = "development";
const REDACTED: &str = "<set>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub n8n_base_url: String,
    pub n8n_api_key: Option<String>,
    pub youtube_api_key: Option<String>,
    pub node_env: String,
}

impl Environment {
    /// Snapshot the process environment.
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a snapshot from an arbitrary lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            n8n_base_url: get("N8N_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            n8n_api_key: get("N8N_API_KEY"),
            youtube_api_key: get("YOUTUBE_API_KEY"),
            node_env: get("NODE_ENV").unwrap_or_else(|| DEFAULT_NODE_ENV.to_string()),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.n8n_api_key.is_some()
    }

    /// Base URL with the REST `/api` segment removed; webhooks live beside it.
    pub fn webhook_base(&self) -> String {
        strip_api_segment(&self.n8n_base_url)
    }

    /// Report-safe view of the snapshot. Secrets are reduced to a marker.
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            n8n_base_url: self.n8n_base_url.clone(),
            n8n_api_key: self.n8n_api_key.as_ref().map(|_| REDACTED.to_string()),
            youtube_api_key: self.youtube_api_key.as_ref().map(|_| REDACTED.to_string()),
            node_env: self.node_env.clone(),
        }
    }
}

pub fn strip_api_segment(url: &str) -> String {
    url.replacen("/api", "", 1).trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    #[serde(rename = "N8N_BASE_URL")]
    pub n8n_base_url: String,
    #[serde(rename = "N8N_API_KEY")]
    pub n8n_api_key: Option<String>,
    #[serde(rename = "YOUTUBE_API_KEY")]
    pub youtube_api_key: Option<String>,
    #[serde(rename = "NODE_ENV")]
    pub node_env: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let env = env_from(&[]);
        assert_eq!(env.n8n_base_url, DEFAULT_BASE_URL);
        assert!(env.n8n_api_key.is_none());
        assert_eq!(env.node_env, "development");
    }

    #[test]
    fn test_empty_values_are_unset() {
        let env = env_from(&[("N8N_API_KEY", "  "), ("N8N_BASE_URL", "")]);
        assert!(!env.has_api_key());
        assert_eq!(env.n8n_base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_webhook_base_strips_api_segment() {
        let env = env_from(&[("N8N_BASE_URL", "http://n8n.local:5678/api/")]);
        assert_eq!(env.n8n_base_url, "http://n8n.local:5678/api");
        assert_eq!(env.webhook_base(), "http://n8n.local:5678");
    }

    #[test]
    fn test_snapshot_redacts_and_nulls_api_key() {
        let missing = env_from(&[]).snapshot();
        let json = serde_json::to_value(&missing).unwrap();
        assert!(json["N8N_API_KEY"].is_null());

        let present = env_from(&[("N8N_API_KEY", "secret-value")]).snapshot();
        let json = serde_json::to_value(&present).unwrap();
        assert_eq!(json["N8N_API_KEY"], "<set>");
        assert!(!json.to_string().contains("secret-value"));
    }
}
