//! Shared fixtures for integration tests

#![allow(dead_code)]

use n8n_doctor::config::DoctorConfig;
use n8n_doctor::env::Environment;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment pointing at a mock server, with an optional API key.
pub fn env_for(base: &str, api_key: Option<&str>) -> Environment {
    let base = base.to_string();
    let key = api_key.map(str::to_string);
    Environment::from_lookup(move |name| match name {
        "N8N_BASE_URL" => Some(base.clone()),
        "N8N_API_KEY" => key.clone(),
        _ => None,
    })
}

/// Defaults without the localhost extras so only the mock server is probed.
pub fn isolated_config() -> DoctorConfig {
    let mut config = DoctorConfig::default();
    config.candidates.base_urls.clear();
    config.candidates.network_targets.clear();
    config.timeouts.probe_secs = 2;
    config.timeouts.network_secs = 2;
    config.timeouts.validate_secs = 2;
    config.timeouts.verify_secs = 2;
    config
}

pub fn short_timeout() -> Duration {
    Duration::from_secs(2)
}

pub fn write_project(root: &Path, mcp_config: &str, script: &str) {
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("scripts")).unwrap();
    fs::write(root.join("config/mcp-config.json"), mcp_config).unwrap();
    fs::write(root.join("scripts/mcp-server.js"), script).unwrap();
}

pub fn mcp_config_json(base: &str, command: &str) -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "mcpServers": {
            "n8n-video-compilation": {
                "command": command,
                "args": ["-y", "@n8n/mcp-server"],
                "env": {"N8N_BASE_URL": base}
            }
        },
        "workflows": {
            "enhanced_video_compilation": {"webhook_path": "/webhook/compile-video"}
        }
    }))
    .unwrap()
}

pub fn backup_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
                .count()
        })
        .unwrap_or(0)
}
