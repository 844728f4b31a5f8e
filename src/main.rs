use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use n8n_doctor::config::DoctorConfig;
use n8n_doctor::doctor::Doctor;
use n8n_doctor::env::Environment;
use n8n_doctor::logging;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "n8n-doctor",
    about = "Diagnose and repair MCP-to-n8n webhook integrations",
    version
)]
struct Args {
    /// Project directory holding config/, scripts/ and .env
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Tool config file (defaults to <project-root>/doctor.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON (also enabled by N8N_DOCTOR_LOG_JSON=1)
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Probe webhook URLs, API auth and connectivity; write debug-results.json
    Debug,
    /// Validate workflows, credentials and local config; write validation-results.json
    Validate,
    /// Diagnose, patch configuration, verify end to end; write fix-results.json
    Fix,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_logging(args.json_logs || logging::should_use_json(), "warn");

    let project_root = args
        .project_root
        .canonicalize()
        .with_context(|| format!("Project root {} not found", args.project_root.display()))?;

    let config = match &args.config {
        Some(path) => DoctorConfig::load_from(path),
        None => DoctorConfig::load(&project_root),
    }
    .context("Failed to load doctor configuration")?;

    let env = Environment::from_process();
    let doctor = Doctor::new(&project_root, config, env)?;

    let report = match args.command.unwrap_or(Command::Fix) {
        Command::Debug => doctor.run_debug().await?,
        Command::Validate => doctor.run_validate().await?,
        Command::Fix => doctor.run_fix().await?,
    };

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}
