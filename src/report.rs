//! Run report persistence
//!
//! A run report is plain data. It is written pretty-printed to a fixed path
//! per mode and overwrites whatever the previous run left there.

use crate::env::EnvironmentSnapshot;
use crate::patch::{BackupRecord, ConfigPatch, CreatedFile};
use crate::probe::{AuthTestResult, NetworkCheck, ProbeResult};
use crate::recommend::Recommendation;
use crate::util::{now_iso, write_atomic};
use crate::validate::{ConfigCheck, ValidationReport};
use crate::verify::VerificationResult;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Debug,
    Validate,
    Fix,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::Debug => "debug",
            RunMode::Validate => "validate",
            RunMode::Fix => "fix",
        };
        write!(f, "{}", name)
    }
}

/// A stage that stopped on a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub timestamp: String,
    pub environment: EnvironmentSnapshot,
    #[serde(default)]
    pub probes: Vec<ProbeResult>,
    #[serde(default)]
    pub auth_tests: Vec<AuthTestResult>,
    #[serde(default)]
    pub network_checks: Vec<NetworkCheck>,
    #[serde(default)]
    pub config_checks: Vec<ConfigCheck>,
    #[serde(default)]
    pub patches: Vec<ConfigPatch>,
    #[serde(default)]
    pub backups: Vec<BackupRecord>,
    #[serde(default)]
    pub created_files: Vec<CreatedFile>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    pub verification: Option<VerificationResult>,
    pub validation: Option<ValidationReport>,
    #[serde(default)]
    pub errors: Vec<StageError>,
    pub success: bool,
}

impl RunReport {
    pub fn new(mode: RunMode, environment: EnvironmentSnapshot) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            timestamp: now_iso(),
            environment,
            probes: Vec::new(),
            auth_tests: Vec::new(),
            network_checks: Vec::new(),
            config_checks: Vec::new(),
            patches: Vec::new(),
            backups: Vec::new(),
            created_files: Vec::new(),
            recommendations: Vec::new(),
            verification: None,
            validation: None,
            errors: Vec::new(),
            success: false,
        }
    }

    pub fn record_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(StageError {
            stage: stage.to_string(),
            message: message.into(),
        });
    }
}

pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    write_atomic(path, &format!("{}\n", json))
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

pub fn read_report(path: &Path) -> Result<RunReport> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read report {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid report {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::patch::PatchState;
    use crate::recommend::RecommendationKind;

    fn sample() -> RunReport {
        let env = Environment::from_lookup(|k| (k == "N8N_API_KEY").then(|| "secret".to_string()));
        let mut report = RunReport::new(RunMode::Fix, env.snapshot());
        report.probes.push(ProbeResult {
            url: "http://localhost:5678/webhook/compile-video".to_string(),
            http_method: "POST".to_string(),
            status_code: Some(200),
            latency_ms: 12,
            error_message: None,
            response_excerpt: Some("{\"ok\":true}".to_string()),
        });
        report.patches.push(ConfigPatch {
            kind: "webhook_url_fix".to_string(),
            target_file: "scripts/mcp-server.js".into(),
            field_path: "webhookUrl".to_string(),
            old_value: serde_json::json!("http://old"),
            new_value: serde_json::json!("http://new"),
            success: true,
            outcome: PatchState::Written,
            backup_path: Some("scripts/mcp-server.js.backup.1".into()),
            error: None,
        });
        report.recommendations.push(Recommendation {
            kind: RecommendationKind::Success,
            message: "Found working webhook URLs".to_string(),
            action: "Use it".to_string(),
            url: Some("http://localhost:5678/webhook/compile-video".to_string()),
        });
        report.record_error("mcp_config", "config/mcp-config.json is not valid JSON");
        report
    }

    #[test]
    fn test_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fix-results.json");
        let report = sample();

        write_report(&path, &report).unwrap();
        let loaded = read_report(&path).unwrap();
        assert_eq!(loaded, report);
    }

    #[test]
    fn test_report_json_keys_and_redaction() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("runId").is_some());
        assert_eq!(value["mode"], "fix");
        assert_eq!(value["environment"]["N8N_API_KEY"], "<set>");
        assert_eq!(value["environment"]["YOUTUBE_API_KEY"], serde_json::Value::Null);
        assert_eq!(value["probes"][0]["statusCode"], 200);
        assert_eq!(value["patches"][0]["outcome"], "written");
        assert_eq!(value["recommendations"][0]["type"], "success");
    }

    #[test]
    fn test_write_overwrites_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug-results.json");
        fs::write(&path, "stale").unwrap();

        let report = RunReport::new(RunMode::Debug, Environment::from_lookup(|_| None).snapshot());
        write_report(&path, &report).unwrap();
        assert_eq!(read_report(&path).unwrap().run_id, report.run_id);
    }
}
