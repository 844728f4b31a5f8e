//! Pipelines behind the `debug`, `validate` and `fix` commands
//!
//! Stages run one after another. A stage that hits a configuration error is
//! recorded in the report and the pipeline moves on; connectivity failures
//! are just results.

use crate::config::DoctorConfig;
use crate::env::Environment;
use crate::patch::{self, Patcher, ScriptPatchStatus};
use crate::probe::{self, ProbePayload};
use crate::recommend::{self, RecommendationKind};
use crate::report::{write_report, RunMode, RunReport};
use crate::util::{display_relative, truncate};
use crate::validate::{inspect_mcp_config, ValidationReport, ValidationStatus, Validator};
use crate::verify::verify_endpoint;
use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct Doctor {
    project_root: PathBuf,
    config: DoctorConfig,
    env: Environment,
    http: reqwest::Client,
}

impl Doctor {
    pub fn new(project_root: &Path, config: DoctorConfig, env: Environment) -> Result<Self> {
        Ok(Self {
            project_root: project_root.to_path_buf(),
            config,
            env,
            http: probe::http_client()?,
        })
    }

    fn path(&self, relative: &Path) -> PathBuf {
        self.project_root.join(relative)
    }

    fn show(&self, path: &Path) -> String {
        display_relative(&self.project_root, path)
    }

    pub fn report_path(&self, mode: RunMode) -> PathBuf {
        let paths = &self.config.paths;
        match mode {
            RunMode::Debug => self.path(&paths.debug_report),
            RunMode::Validate => self.path(&paths.validation_report),
            RunMode::Fix => self.path(&paths.fix_report),
        }
    }

    /// Network checks, webhook probe matrix, auth tests, config inspection
    /// and recommendations, all recorded into `report`.
    async fn diagnose(&self, report: &mut RunReport) {
        let timeouts = &self.config.timeouts;

        println!("Checking network connectivity...");
        let targets = probe::network_targets(&self.env, &self.config.candidates.network_targets);
        report.network_checks =
            probe::run_network_checks(&self.http, &targets, timeouts.network()).await;
        for check in &report.network_checks {
            match (&check.status_code, &check.error_message) {
                (Some(status), _) => println!("  ✓ {}: {} ({})", check.name, check.url, status),
                (None, err) => println!(
                    "  ✗ {}: {} ({})",
                    check.name,
                    check.url,
                    err.as_deref().unwrap_or("unreachable")
                ),
            }
        }

        println!("Probing webhook URLs...");
        let bases = probe::candidate_bases(&self.env, &self.config);
        report.probes = probe::run_webhook_probes(
            &self.http,
            &bases,
            &self.config.candidates.webhook_paths,
            &ProbePayload::diagnostic(),
            timeouts.probe(),
            self.config.probe_concurrency,
        )
        .await;
        for result in &report.probes {
            match result.status_code {
                Some(status) => println!("  • {} -> {} ({}ms)", result.url, status, result.latency_ms),
                None => println!(
                    "  • {} -> {}",
                    result.url,
                    result.error_message.as_deref().unwrap_or("no response")
                ),
            }
        }
        info!(probes = report.probes.len(), bases = bases.len(), "webhook probes finished");

        if self.env.has_api_key() {
            println!("Testing API authentication...");
        }
        report.auth_tests = probe::run_auth_tests(
            &self.http,
            &self.env,
            &self.config.candidates.api_endpoints,
            timeouts.probe(),
        )
        .await;
        for test in &report.auth_tests {
            match (test.is_success(), test.workflow_count) {
                (true, Some(count)) => {
                    println!("  ✓ {}: {} workflows", test.endpoint_url, count)
                }
                _ => println!(
                    "  ✗ {}: {}",
                    test.endpoint_url,
                    test.error_message.as_deref().unwrap_or("failed")
                ),
            }
        }

        let config_path = self.path(&self.config.paths.mcp_config);
        let check = inspect_mcp_config(
            &config_path,
            &self.show(&config_path),
            &self.env,
            &self.config.server,
        );
        if let Some(err) = &check.error {
            println!("  Warning: {}: {}", check.file, err);
        }
        for issue in &check.issues {
            println!("  Warning: {}", issue);
        }
        report.config_checks.push(check);

        report.recommendations = recommend::recommend(
            &self.env,
            &report.probes,
            &report.auth_tests,
            &report.network_checks,
        );
        println!();
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  {} {}", rec.kind.icon(), rec.message);
            println!("    {}", rec.action);
        }
    }

    pub async fn run_debug(&self) -> Result<RunReport> {
        let mut report = RunReport::new(RunMode::Debug, self.env.snapshot());
        self.diagnose(&mut report).await;
        report.success = recommend::recommended_endpoint(&report.probes).is_some();
        self.persist(&report)?;
        Ok(report)
    }

    pub async fn run_validate(&self) -> Result<RunReport> {
        let mut report = RunReport::new(RunMode::Validate, self.env.snapshot());
        let validation = self.validate().await;
        report.success = validation.status == ValidationStatus::Pass;
        report.validation = Some(validation);
        self.persist(&report)?;
        Ok(report)
    }

    async fn validate(&self) -> ValidationReport {
        println!("Validating integration...");
        let validation =
            Validator::new(&self.http, &self.env, &self.config, &self.project_root)
                .run()
                .await;
        for issue in &validation.issues {
            println!("  {}: {}", issue.severity.label(), issue.message);
        }
        if !validation.action_plan.is_empty() {
            println!("Action plan:");
            for line in &validation.action_plan {
                println!("  {}", line);
            }
        }
        println!("  Validation status: {:?}", validation.status);
        validation
    }

    pub async fn run_fix(&self) -> Result<RunReport> {
        let mut report = RunReport::new(RunMode::Fix, self.env.snapshot());
        self.diagnose(&mut report).await;
        let validation = self.validate().await;

        let mut patcher = Patcher::new();
        let paths = &self.config.paths;
        let script_path = self.path(&paths.server_script);

        println!("Checking environment files...");
        let env_path = self.path(&paths.env_file);
        match patcher.ensure_env_file(&env_path, &self.path(&paths.env_example), &self.env) {
            Ok(0) => println!("  Environment variables are configured"),
            Ok(added) => {
                println!("  ✓ Added {} variable(s) to {}", added, self.show(&env_path));
                println!("  Warning: review the API keys in {}", self.show(&env_path));
            }
            Err(err) => {
                println!("  ✗ {}", err);
                report.record_error("env_file", err.to_string());
            }
        }

        println!("Fixing MCP configuration...");
        let config_path = self.path(&paths.mcp_config);
        match patch::apply_mcp_config_fixes(&mut patcher, &config_path, &self.env, &self.config.server) {
            Ok(0) => println!("  No configuration changes needed"),
            Ok(changed) => println!("  ✓ Updated {} field(s) in {}", changed, self.show(&config_path)),
            Err(err) => {
                println!("  ✗ {}", err);
                report.record_error("mcp_config", err.to_string());
            }
        }

        let designated =
            recommend::recommended_endpoint(&report.probes).map(|p| p.url.clone());
        match &designated {
            Some(url) => {
                println!("Found working webhook URL: {}", url);
                self.patch_script(&mut patcher, &mut report, &script_path, url);
            }
            None => {
                println!("  Warning: no working webhook URLs found");
                if let Some(url) = self.workflow_webhook_url(&validation) {
                    println!("Aligning server script with workflow webhook path...");
                    self.patch_script(&mut patcher, &mut report, &script_path, &url);
                }
            }
        }
        report.validation = Some(validation);

        report.verification = match &designated {
            Some(url) => {
                println!("Testing integration end-to-end...");
                let result = verify_endpoint(&self.http, url, self.config.timeouts.verify()).await;
                match result.status_code {
                    Some(status) if result.success => println!("  ✓ End-to-end test successful: {}", status),
                    Some(status) => println!("  ✗ End-to-end test failed: {}", status),
                    None => println!(
                        "  ✗ End-to-end test failed: {}",
                        result.error_message.as_deref().unwrap_or("no response")
                    ),
                }
                Some(result)
            }
            None => None,
        };

        let (backups, patches, created) = patcher.into_parts();
        report.backups = backups;
        report.patches = patches;
        report.created_files = created;
        report.success = fix_succeeded(&report);

        self.print_fix_summary(&report);
        self.persist(&report)?;
        Ok(report)
    }

    fn patch_script(&self, patcher: &mut Patcher, report: &mut RunReport, script: &Path, url: &str) {
        let ident = &self.config.server.assignment;
        match patcher.patch_script_assignment(script, ident, url) {
            Ok(ScriptPatchStatus::Applied { old_value }) => {
                println!("  ✓ Updated {} in {}", ident, self.show(script));
                println!("    {} -> {}", old_value, url);
            }
            Ok(ScriptPatchStatus::Unchanged) => {
                println!("  {} already points at {}", ident, url)
            }
            Ok(ScriptPatchStatus::Skipped) => {
                println!("  Warning: no {} assignment found in {}", ident, self.show(script))
            }
            Ok(ScriptPatchStatus::Failed(err)) => println!("  ✗ {}", err),
            Err(err) => {
                println!("  ✗ {}", err);
                report.record_error("server_script", err.to_string());
            }
        }
    }

    /// The validator's webhook URL rebuilt on the webhook base, when its test failed.
    fn workflow_webhook_url(&self, validation: &ValidationReport) -> Option<String> {
        let webhook = validation.webhook.as_ref().filter(|w| !w.test_successful)?;
        let re = Regex::new(r"/webhook/(.+)$").ok()?;
        let path = re.captures(&webhook.url)?.get(1)?.as_str();
        Some(format!("{}/webhook/{}", self.env.webhook_base(), path))
    }

    fn print_fix_summary(&self, report: &RunReport) {
        let succeeded: Vec<_> = report.patches.iter().filter(|p| p.success).collect();
        let failed: Vec<_> = report.patches.iter().filter(|p| !p.success).collect();

        println!();
        println!("Fix summary:");
        println!("  Successful fixes: {}", succeeded.len());
        println!("  Failed or skipped fixes: {}", failed.len());
        println!("  Backups created: {}", report.backups.len());

        for patch in &succeeded {
            println!(
                "  • {}: {} {}",
                patch.kind,
                self.show(&patch.target_file),
                patch.field_path
            );
        }
        for patch in &failed {
            println!(
                "  Warning: {} {}: {}",
                patch.kind,
                self.show(&patch.target_file),
                patch.error.as_deref().unwrap_or("pattern not found")
            );
        }
        for backup in &report.backups {
            println!("  • backup {}", self.show(&backup.backup_path));
        }
        for created in &report.created_files {
            println!("  • created {} ({})", self.show(&created.path), created.reason);
        }
        for err in &report.errors {
            println!("  ✗ {}: {}", err.stage, truncate(&err.message, 200));
        }

        if report.success {
            println!("  ✓ All fixes applied. Restart the MCP server to pick up changes.");
        } else if report.recommendations.iter().any(|r| r.kind == RecommendationKind::Success) {
            println!("  Warning: some fixes were applied, but issues may remain.");
        } else {
            println!("  ✗ No working webhook endpoint; fixes could not be verified.");
        }
    }

    fn persist(&self, report: &RunReport) -> Result<()> {
        let path = self.report_path(report.mode);
        write_report(&path, report)?;
        println!();
        println!("Results saved to {}", self.show(&path));
        info!(mode = %report.mode, success = report.success, "run finished");
        if !report.success {
            warn!(mode = %report.mode, "run did not fully succeed");
        }
        Ok(())
    }
}

/// No write failed, no stage stopped on bad config, and the end-to-end
/// check ran and passed.
pub fn fix_succeeded(report: &RunReport) -> bool {
    let no_failed_writes = report
        .patches
        .iter()
        .all(|p| p.success || p.outcome == patch::PatchState::PatternNotFound);
    let verified = report.verification.as_ref().is_some_and(|v| v.success);
    no_failed_writes && report.errors.is_empty() && verified
}
