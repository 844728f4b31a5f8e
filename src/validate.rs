//! Integration validator
//!
//! Checks the workflow engine side (video workflows present, active, webhook
//! triggers answering), node hygiene (hardcoded YouTube keys, AI nodes), and
//! the local side (MCP config, the server script's webhook URL). Findings are
//! collected as severity-tagged issues; nothing here returns early on a
//! failed check except where later checks depend on it.

use crate::config::{DoctorConfig, ServerSettings};
use crate::env::Environment;
use crate::n8n::{ApiError, N8nClient, Workflow};
use crate::probe::{describe_error, DurationPreference, ProbePayload};
use crate::script::{self, Lookup};
use crate::util::now_iso;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
    Security,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
            Severity::Security => "SECURITY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Pending,
    Pass,
    Fail,
    CriticalFail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub tags: Vec<Value>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(w: &Workflow) -> Self {
        Self {
            id: w.id.clone(),
            name: w.name.clone(),
            active: w.active,
            tags: w.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSection {
    pub valid: bool,
    pub count: usize,
    pub workflows: Vec<WorkflowSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookCheck {
    pub url: String,
    pub path: String,
    pub test_successful: bool,
    pub response_status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YoutubeCredentials {
    pub nodes_found: usize,
    pub key_configured: bool,
    pub security_ok: bool,
    pub api_working: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCredentials {
    pub nodes_found: usize,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsSection {
    pub youtube: Option<YoutubeCredentials>,
    pub ai: Option<AiCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSection {
    pub valid: bool,
    pub expected_webhook_url: Option<String>,
    pub webhook_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub workflows: WorkflowSection,
    /// Most recently tested webhook trigger
    pub webhook: Option<WebhookCheck>,
    pub credentials: CredentialsSection,
    pub configuration: ConfigurationSection,
    pub issues: Vec<Issue>,
    pub action_plan: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            status: ValidationStatus::Pending,
            workflows: WorkflowSection::default(),
            webhook: None,
            credentials: CredentialsSection::default(),
            configuration: ConfigurationSection::default(),
            issues: Vec::new(),
            action_plan: Vec::new(),
        }
    }
}

impl ValidationReport {
    pub fn add_issue(
        &mut self,
        severity: Severity,
        message: impl Into<String>,
        recommendation: impl Into<String>,
    ) {
        let issue = Issue {
            severity,
            message: message.into(),
            recommendation: recommendation.into(),
            timestamp: now_iso(),
        };
        warn!(severity = issue.severity.label(), "{}", issue.message);
        self.issues.push(issue);
    }

    fn issues_with(&self, severity: Severity) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    /// Settle the status and build the action plan from collected issues.
    pub fn finalize(&mut self) {
        let has = |s| self.issues.iter().any(|i| i.severity == s);
        self.status = if has(Severity::Critical) {
            ValidationStatus::CriticalFail
        } else if has(Severity::Error) {
            ValidationStatus::Fail
        } else {
            ValidationStatus::Pass
        };

        let groups = [
            (Severity::Critical, "URGENT: Fix critical issues first"),
            (Severity::Error, "Fix errors to enable functionality"),
            (Severity::Warning, "Address warnings for optimal performance"),
        ];
        let mut plan = Vec::new();
        for (severity, heading) in groups {
            let recs: Vec<String> = self
                .issues_with(severity)
                .map(|i| format!("   - {}", i.recommendation))
                .collect();
            if !recs.is_empty() {
                plan.push(heading.to_string());
                plan.extend(recs);
            }
        }
        self.action_plan = plan;
    }
}

/// Result of inspecting the MCP config file during diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCheck {
    pub file: String,
    pub valid: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub webhook_path: Option<String>,
    pub error: Option<String>,
}

fn server_entry<'a>(doc: &'a Value, server: &ServerSettings) -> Option<&'a Value> {
    doc.get("mcpServers").and_then(|s| s.get(&server.name))
}

fn configured_webhook_path<'a>(doc: &'a Value, server: &ServerSettings) -> Option<&'a str> {
    doc.get("workflows")
        .and_then(|w| w.get(&server.workflow_key))
        .and_then(|w| w.get("webhook_path"))
        .and_then(Value::as_str)
}

/// Read-only look at the MCP config: base URL drift and an `npx` launcher.
pub fn inspect_mcp_config(
    path: &Path,
    display_name: &str,
    env: &Environment,
    server: &ServerSettings,
) -> ConfigCheck {
    let mut check = ConfigCheck {
        file: display_name.to_string(),
        valid: false,
        issues: Vec::new(),
        recommendations: Vec::new(),
        webhook_path: None,
        error: None,
    };

    let doc: Value = match fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
    {
        Ok(doc) => doc,
        Err(err) => {
            check.error = Some(err);
            return check;
        }
    };
    check.valid = true;

    let entry = server_entry(&doc, server);
    let config_base = entry
        .and_then(|e| e.pointer("/env/N8N_BASE_URL"))
        .and_then(Value::as_str);
    if config_base != Some(env.n8n_base_url.as_str()) {
        check.issues.push(format!(
            "Base URL mismatch: config={}, env={}",
            config_base.unwrap_or("<unset>"),
            env.n8n_base_url
        ));
    }

    check.webhook_path = configured_webhook_path(&doc, server).map(str::to_string);

    if entry.and_then(|e| e.get("command")).and_then(Value::as_str) == Some("npx") {
        check
            .issues
            .push("Using npx instead of local script - may cause version issues".to_string());
        check.recommendations.push(format!(
            "Consider using local script: \"command\": \"node\", \"args\": {:?}",
            server.local_args
        ));
    }
    check
}

/// Payload sent to each webhook trigger while validating.
fn validation_payload() -> ProbePayload {
    ProbePayload::new("validation test")
        .with_clips(1, 5)
        .with_duration(DurationPreference::Short)
}

pub struct Validator<'a> {
    http: &'a reqwest::Client,
    env: &'a Environment,
    config: &'a DoctorConfig,
    project_root: &'a Path,
    report: ValidationReport,
}

impl<'a> Validator<'a> {
    pub fn new(
        http: &'a reqwest::Client,
        env: &'a Environment,
        config: &'a DoctorConfig,
        project_root: &'a Path,
    ) -> Self {
        Self {
            http,
            env,
            config,
            project_root,
            report: ValidationReport::default(),
        }
    }

    /// Run every check and return the finished report.
    pub async fn run(mut self) -> ValidationReport {
        self.validate_workflows().await;
        self.validate_mcp_config();
        self.cross_validate();
        self.report.finalize();
        info!(status = ?self.report.status, issues = self.report.issues.len(), "validation finished");
        self.report
    }

    async fn validate_workflows(&mut self) {
        let Some(api_key) = self.env.n8n_api_key.as_deref() else {
            self.report.add_issue(
                Severity::Critical,
                "No N8N_API_KEY found",
                "Set N8N_API_KEY environment variable",
            );
            return;
        };
        let api = N8nClient::new(
            self.http.clone(),
            &self.env.n8n_base_url,
            api_key,
            self.config.timeouts.probe(),
        );

        let (endpoint, workflows) = match self.list_workflows(&api).await {
            Ok(found) => found,
            Err(err) => {
                self.report.add_issue(
                    Severity::Critical,
                    format!("Failed to access n8n API: {}", api_error_text(&err)),
                    "Check n8n connection and API key",
                );
                return;
            }
        };
        info!(count = workflows.len(), endpoint = %endpoint, "workflows listed");

        let video: Vec<&Workflow> = workflows.iter().filter(|w| w.is_video_compilation()).collect();
        if video.is_empty() {
            self.report.add_issue(
                Severity::Error,
                "No video compilation workflows found",
                "Import the video-generation-workflow.json",
            );
            return;
        }

        for workflow in &video {
            self.validate_workflow(&api, &endpoint, workflow).await;
        }
        self.report.workflows = WorkflowSection {
            valid: true,
            count: video.len(),
            workflows: video.into_iter().map(WorkflowSummary::from).collect(),
        };
    }

    /// First configured API endpoint that answers with workflows.
    async fn list_workflows(&self, api: &N8nClient) -> Result<(String, Vec<Workflow>), ApiError> {
        let mut last_err = ApiError::Shape("no API endpoints configured".to_string());
        for endpoint in &self.config.candidates.api_endpoints {
            match api.list_workflows(endpoint).await {
                Ok(list) => return Ok((endpoint.clone(), list)),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    async fn validate_workflow(&mut self, api: &N8nClient, endpoint: &str, workflow: &Workflow) {
        let detail = match api.workflow_detail(endpoint, &workflow.id).await {
            Ok(detail) => detail,
            Err(err) => {
                self.report.add_issue(
                    Severity::Error,
                    format!(
                        "Failed to validate workflow \"{}\": {}",
                        workflow.name,
                        api_error_text(&err)
                    ),
                    "Check workflow configuration",
                );
                return;
            }
        };

        if !detail.active {
            self.report.add_issue(
                Severity::Warning,
                format!("Workflow \"{}\" is not active", workflow.name),
                "Activate the workflow in n8n",
            );
        }

        let webhooks: Vec<_> = detail.webhook_nodes().collect();
        if webhooks.is_empty() {
            self.report.add_issue(
                Severity::Error,
                format!("No webhook nodes found in \"{}\"", workflow.name),
                "Add webhook trigger node",
            );
            return;
        }
        for node in webhooks {
            match node.webhook_path() {
                Some(path) => self.test_webhook(path).await,
                None => self.report.add_issue(
                    Severity::Error,
                    "Webhook node has no path configured",
                    "Set webhook path in node parameters",
                ),
            }
        }

        self.validate_youtube(&detail).await;
        self.validate_ai(&detail);
    }

    async fn test_webhook(&mut self, path: &str) {
        let url = format!(
            "{}/webhook/{}",
            self.env.webhook_base(),
            path.trim_start_matches('/')
        );
        let sent = self
            .http
            .post(&url)
            .json(&validation_payload())
            .timeout(self.config.timeouts.validate())
            .send()
            .await;

        let check = match sent {
            Ok(response) if response.status().is_success() => WebhookCheck {
                url,
                path: path.to_string(),
                test_successful: true,
                response_status: Some(response.status().as_u16()),
                error: None,
            },
            Ok(response) => {
                let status = response.status().as_u16();
                self.report.add_issue(
                    Severity::Error,
                    format!("Webhook test failed: {} - {}", status, url),
                    "Check webhook configuration and workflow status",
                );
                WebhookCheck {
                    url,
                    path: path.to_string(),
                    test_successful: false,
                    response_status: Some(status),
                    error: Some(format!("status {}", status)),
                }
            }
            Err(err) => {
                let message = describe_error(&err);
                self.report.add_issue(
                    Severity::Error,
                    format!("Webhook test failed: ERROR - {}", message),
                    "Check webhook configuration and workflow status",
                );
                WebhookCheck {
                    url,
                    path: path.to_string(),
                    test_successful: false,
                    response_status: None,
                    error: Some(message),
                }
            }
        };
        self.report.webhook = Some(check);
    }

    async fn validate_youtube(&mut self, workflow: &Workflow) {
        let nodes: Vec<_> = workflow.nodes.iter().filter(|n| n.is_youtube_request()).collect();
        if nodes.is_empty() {
            self.report.add_issue(
                Severity::Warning,
                "No YouTube API nodes found",
                "Workflow may not be able to search YouTube",
            );
            return;
        }

        let hardcoded = nodes.iter().filter(|n| n.hardcoded_api_key()).count();
        for _ in 0..hardcoded {
            self.report.add_issue(
                Severity::Security,
                "Hardcoded YouTube API key found",
                "Use environment variables for API keys",
            );
        }

        let env = self.env;
        let api_working = match env.youtube_api_key.as_deref() {
            Some(key) => Some(self.test_youtube_api(key).await),
            None => {
                self.report.add_issue(
                    Severity::Warning,
                    "No YOUTUBE_API_KEY environment variable",
                    "Set YOUTUBE_API_KEY for YouTube integration",
                );
                None
            }
        };

        self.report.credentials.youtube = Some(YoutubeCredentials {
            nodes_found: nodes.len(),
            key_configured: env.youtube_api_key.is_some(),
            security_ok: hardcoded == 0,
            api_working,
        });
    }

    async fn test_youtube_api(&mut self, key: &str) -> bool {
        let sent = self
            .http
            .get(&self.config.server.youtube_search_url)
            .query(&[
                ("part", "snippet"),
                ("q", "test"),
                ("type", "video"),
                ("maxResults", "1"),
                ("key", key),
            ])
            .timeout(self.config.timeouts.probe())
            .send()
            .await;

        let failure = match sent {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => Some(format!("status {}", response.status().as_u16())),
            Err(err) => Some(describe_error(&err)),
        };
        match failure {
            None => true,
            Some(reason) => {
                self.report.add_issue(
                    Severity::Error,
                    format!("YouTube API test failed: {}", reason),
                    "Check YouTube API key and quota",
                );
                false
            }
        }
    }

    fn validate_ai(&mut self, workflow: &Workflow) {
        let nodes: Vec<_> = workflow.nodes.iter().filter(|n| n.is_ai()).collect();
        if nodes.is_empty() {
            self.report.add_issue(
                Severity::Info,
                "No AI nodes found",
                "Workflow may not use AI features",
            );
            return;
        }
        let types: BTreeSet<String> = nodes.iter().map(|n| n.kind.clone()).collect();
        self.report.credentials.ai = Some(AiCredentials {
            nodes_found: nodes.len(),
            types: types.into_iter().collect(),
        });
    }

    fn validate_mcp_config(&mut self) {
        let path = self.project_root.join(&self.config.paths.mcp_config);
        let server = &self.config.server;

        let doc: Value = match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(doc) => doc,
            Err(err) => {
                self.report.add_issue(
                    Severity::Error,
                    format!("MCP configuration error: {}", err),
                    format!("Check {} file", self.config.paths.mcp_config.display()),
                );
                return;
            }
        };

        if doc.get("mcpServers").is_none() {
            self.report.add_issue(
                Severity::Error,
                "MCP config missing mcpServers section",
                "Add mcpServers configuration",
            );
            return;
        }
        let Some(entry) = server_entry(&doc, server) else {
            self.report.add_issue(
                Severity::Error,
                format!("{} server not configured", server.name),
                "Add server configuration",
            );
            return;
        };

        if let Some(config_base) = entry.pointer("/env/N8N_BASE_URL").and_then(Value::as_str) {
            if config_base != self.env.n8n_base_url {
                self.report.add_issue(
                    Severity::Warning,
                    format!(
                        "Base URL mismatch: config={}, env={}",
                        config_base, self.env.n8n_base_url
                    ),
                    "Ensure environment variables match config",
                );
            }
        }

        if let Some(webhook_path) = configured_webhook_path(&doc, server) {
            self.report.configuration.expected_webhook_url =
                Some(format!("{}{}", self.env.webhook_base(), webhook_path));
            self.report.configuration.webhook_path = Some(webhook_path.to_string());
        }
        self.report.configuration.valid = true;
    }

    fn cross_validate(&mut self) {
        let path = self.project_root.join(&self.config.paths.server_script);
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => {
                self.report.add_issue(
                    Severity::Warning,
                    format!("Could not analyze MCP server: {}", err),
                    format!("Check {} file", self.config.paths.server_script.display()),
                );
                return;
            }
        };

        let Lookup::Found(assignment) = script::find_assignment(&source, &self.config.server.assignment)
        else {
            return;
        };
        if let Some(webhook) = &self.report.webhook {
            if webhook.url != assignment.value {
                let message = format!(
                    "Webhook URL mismatch: MCP={}, Workflow={}",
                    assignment.value, webhook.url
                );
                self.report.add_issue(
                    Severity::Error,
                    message,
                    "Update MCP server webhook URL to match workflow",
                );
            }
        }
    }
}

fn api_error_text(err: &ApiError) -> String {
    match err {
        ApiError::Transport(inner) => describe_error(inner),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(base: &str) -> Environment {
        let base = base.to_string();
        Environment::from_lookup(move |k| (k == "N8N_BASE_URL").then(|| base.clone()))
    }

    #[test]
    fn test_status_follows_worst_issue() {
        let mut report = ValidationReport::default();
        report.add_issue(Severity::Warning, "w", "fix w");
        report.add_issue(Severity::Security, "s", "fix s");
        report.finalize();
        assert_eq!(report.status, ValidationStatus::Pass);

        report.add_issue(Severity::Error, "e", "fix e");
        report.finalize();
        assert_eq!(report.status, ValidationStatus::Fail);

        report.add_issue(Severity::Critical, "c", "fix c");
        report.finalize();
        assert_eq!(report.status, ValidationStatus::CriticalFail);
        assert_eq!(report.action_plan[0], "URGENT: Fix critical issues first");
        assert_eq!(report.action_plan[1], "   - fix c");
    }

    #[test]
    fn test_severity_serializes_upper_case() {
        let value = serde_json::to_value(Severity::Security).unwrap();
        assert_eq!(value, json!("SECURITY"));
    }

    #[test]
    fn test_inspect_flags_drift_and_npx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-config.json");
        fs::write(
            &path,
            json!({
                "mcpServers": {"n8n-video-compilation": {
                    "command": "npx",
                    "env": {"N8N_BASE_URL": "http://old:5678"}
                }},
                "workflows": {"enhanced_video_compilation": {"webhook_path": "/webhook/compile-video"}}
            })
            .to_string(),
        )
        .unwrap();

        let check = inspect_mcp_config(
            &path,
            "config/mcp-config.json",
            &env("http://localhost:5678"),
            &ServerSettings::default(),
        );
        assert!(check.valid);
        assert_eq!(check.issues.len(), 2);
        assert_eq!(check.webhook_path.as_deref(), Some("/webhook/compile-video"));
        assert_eq!(check.recommendations.len(), 1);
    }

    #[test]
    fn test_inspect_reports_unreadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let check = inspect_mcp_config(
            &dir.path().join("missing.json"),
            "missing.json",
            &env("http://localhost:5678"),
            &ServerSettings::default(),
        );
        assert!(!check.valid);
        assert!(check.error.is_some());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_critical() {
        let dir = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let env = env("http://127.0.0.1:1");
        let config = DoctorConfig::default();

        let report = Validator::new(&client, &env, &config, dir.path()).run().await;
        assert_eq!(report.status, ValidationStatus::CriticalFail);
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Critical && i.message.contains("N8N_API_KEY")));
    }

    #[tokio::test]
    async fn test_cross_validation_flags_script_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = DoctorConfig::default();
        let script_path = dir.path().join(&config.paths.server_script);
        fs::create_dir_all(script_path.parent().unwrap()).unwrap();
        fs::write(&script_path, "const webhookUrl = 'http://a/webhook-test/x';\n").unwrap();

        let client = reqwest::Client::new();
        let env = env("http://localhost:5678");
        let mut validator = Validator::new(&client, &env, &config, dir.path());
        validator.report.webhook = Some(WebhookCheck {
            url: "http://a/webhook/x".to_string(),
            path: "x".to_string(),
            test_successful: true,
            response_status: Some(200),
            error: None,
        });
        validator.cross_validate();
        assert!(validator
            .report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Error && i.message.contains("mismatch")));
    }
}
