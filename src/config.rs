//! Tool configuration
//!
//! Candidate URLs and paths are environment-specific guesses, so they live in
//! an optional `doctor.toml` at the project root instead of in code. Every
//! field has a default matching a stock local n8n install.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "doctor.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid candidate base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("probe_concurrency must be at least 1")]
    ZeroConcurrency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    /// Maximum webhook probes in flight at once (1 = strictly sequential)
    pub probe_concurrency: usize,
    pub candidates: Candidates,
    pub timeouts: Timeouts,
    pub paths: ProjectPaths,
    pub server: ServerSettings,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: 4,
            candidates: Candidates::default(),
            timeouts: Timeouts::default(),
            paths: ProjectPaths::default(),
            server: ServerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Candidates {
    /// Extra base URLs tried after the environment base URL
    pub base_urls: Vec<String>,
    pub webhook_paths: Vec<String>,
    /// REST endpoints used for authenticated workflow listing
    pub api_endpoints: Vec<String>,
    /// Plain reachability targets beyond the base URL and its `/healthz`
    pub network_targets: Vec<NetworkTarget>,
}

impl Default for Candidates {
    fn default() -> Self {
        Self {
            base_urls: vec![
                "http://localhost:5678".to_string(),
                "http://127.0.0.1:5678".to_string(),
            ],
            webhook_paths: [
                "/webhook/compile-video",
                "/webhook-test/compile-video",
                "/api/webhook/compile-video",
                "/webhook/compile-video-webhook",
                "/hooks/compile-video",
                "/compile-video",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            api_endpoints: ["/api/v1/workflows", "/api/workflows", "/rest/workflows"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            network_targets: vec![
                NetworkTarget::new("localhost-5678", "http://localhost:5678"),
                NetworkTarget::new("localhost-api", "http://localhost:5678/api"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTarget {
    pub name: String,
    pub url: String,
}

impl NetworkTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub probe_secs: u64,
    pub network_secs: u64,
    pub validate_secs: u64,
    pub verify_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_secs: 10,
            network_secs: 5,
            validate_secs: 15,
            verify_secs: 20,
        }
    }
}

impl Timeouts {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn network(&self) -> Duration {
        Duration::from_secs(self.network_secs)
    }

    pub fn validate(&self) -> Duration {
        Duration::from_secs(self.validate_secs)
    }

    pub fn verify(&self) -> Duration {
        Duration::from_secs(self.verify_secs)
    }
}

/// File layout relative to the project root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectPaths {
    pub mcp_config: PathBuf,
    pub server_script: PathBuf,
    pub env_file: PathBuf,
    pub env_example: PathBuf,
    pub debug_report: PathBuf,
    pub validation_report: PathBuf,
    pub fix_report: PathBuf,
}

impl Default for ProjectPaths {
    fn default() -> Self {
        Self {
            mcp_config: PathBuf::from("config/mcp-config.json"),
            server_script: PathBuf::from("scripts/mcp-server.js"),
            env_file: PathBuf::from(".env"),
            env_example: PathBuf::from(".env.example"),
            debug_report: PathBuf::from("debug-results.json"),
            validation_report: PathBuf::from("validation-results.json"),
            fix_report: PathBuf::from("fix-results.json"),
        }
    }
}

/// Names used inside the MCP config and server script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Key under `mcpServers`
    pub name: String,
    /// Key under `workflows` holding `webhook_path`
    pub workflow_key: String,
    /// Variable assigned the webhook URL in the server script
    pub assignment: String,
    /// Command args that replace an `npx` launcher
    pub local_args: Vec<String>,
    pub youtube_search_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "n8n-video-compilation".to_string(),
            workflow_key: "enhanced_video_compilation".to_string(),
            assignment: "webhookUrl".to_string(),
            local_args: vec!["scripts/mcp-server.js".to_string()],
            youtube_search_url: "https://www.googleapis.com/youtube/v3/search".to_string(),
        }
    }
}

impl DoctorConfig {
    /// Load `doctor.toml` from the project root, or defaults when absent.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        Self::load_from(&project_root.join(CONFIG_FILE_NAME))
    }

    /// Load an explicit config file. A missing file yields defaults; a
    /// malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        for candidate in &self.candidates.base_urls {
            check_base_url(candidate)?;
        }
        Ok(())
    }
}

fn check_base_url(candidate: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(candidate).map_err(|e| ConfigError::InvalidBaseUrl {
        url: candidate.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: candidate.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DoctorConfig::load(dir.path()).unwrap();
        assert_eq!(config, DoctorConfig::default());
        assert_eq!(config.candidates.webhook_paths.len(), 6);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
probe_concurrency = 1

[candidates]
webhook_paths = ["/webhook/custom"]

[timeouts]
verify_secs = 30
"#,
        )
        .unwrap();

        let config = DoctorConfig::load(dir.path()).unwrap();
        assert_eq!(config.probe_concurrency, 1);
        assert_eq!(config.candidates.webhook_paths, vec!["/webhook/custom"]);
        assert_eq!(config.candidates.api_endpoints.len(), 3);
        assert_eq!(config.timeouts.verify_secs, 30);
        assert_eq!(config.timeouts.probe_secs, 10);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "probe_concurrency = [").unwrap();
        assert!(matches!(
            DoctorConfig::load(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = DoctorConfig::default();
        config.candidates.base_urls.push("ftp://example.com".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let config = DoctorConfig {
            probe_concurrency: 0,
            ..DoctorConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroConcurrency)));
    }
}
