//! Mender CLI - run recovery flows from the command line
//!
//! The `mender` command wires the default collaborator kit into a container
//! and drives the recovery orchestrator for a single error.
//!
//! ## Commands
//!
//! - `recover`: Diagnose and recover from an error, printing the result
//! - `config`: Print the effective configuration as TOML
//! - `show-artifact`: Print a persisted recovery flow after verifying its digest

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mender_core::{
    cancellation, read_flow_artifact, write_flow_artifact, DependencyContainer, ErrorReport,
    FlowCancellation, MenderConfig, Orchestrator, RecoveryFlow, RecoveryRequest, RecoveryResult,
    SystemState,
};
use mender_kit::{register_defaults, KitOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "mender")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Autonomous error-recovery orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long, global = true, env = "MENDER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recovery flow for one error
    Recover(RecoverArgs),

    /// Print the effective configuration
    Config,

    /// Print a persisted recovery flow
    ShowArtifact {
        /// Flow id to load
        #[arg(short, long)]
        flow: String,

        /// Directory the flow was written to
        #[arg(long, default_value = ".mender/flows")]
        artifact_dir: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct RecoverArgs {
    /// Error type, e.g. NetworkError
    #[arg(short = 't', long, required_unless_present = "error_file")]
    error_type: Option<String>,

    /// Error message
    #[arg(short, long, default_value = "")]
    message: String,

    /// Error code, e.g. ECONNREFUSED
    #[arg(long)]
    code: Option<String>,

    /// Component the error was raised in
    #[arg(long)]
    component: Option<String>,

    /// Read the full error report from a JSON file instead
    #[arg(long, conflicts_with = "error_type")]
    error_file: Option<PathBuf>,

    /// Context to thread through the flow
    #[arg(long)]
    context_id: Option<String>,

    /// JSON object merged into the system state before the flow starts
    #[arg(long)]
    system_state: Option<PathBuf>,

    /// Persist the finished flow under this directory
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Fail actions that have no registered handler
    #[arg(long)]
    strict: bool,
}

/// Configuration file layout: the core sections plus an optional `[kit]`
/// table for the default collaborators.
#[derive(Debug, Clone, Default)]
struct HostConfig {
    mender: MenderConfig,
    kit: KitOptions,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KitSection {
    #[serde(default)]
    kit: KitOptions,
}

impl HostConfig {
    fn from_toml_str(text: &str) -> Result<Self> {
        let mender = MenderConfig::from_toml_str(text)?;
        let section: KitSection = toml::from_str(text).context("Invalid [kit] section")?;
        Ok(Self {
            mender,
            kit: section.kit,
        })
    }

    fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                Self::from_toml_str(&text).with_context(|| format!("Invalid config in {:?}", path))
            }
            None => Ok(Self::default()),
        }
    }

    fn to_toml_string(&self) -> Result<String> {
        let core = self.mender.to_toml_string()?;
        let kit = toml::to_string_pretty(&KitSection {
            kit: self.kit.clone(),
        })?;
        Ok(format!("{core}\n{kit}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mender_core::init_tracing(cli.json, level);

    let config = HostConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Recover(args) => {
            let (handle, cancel) = cancellation();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, aborting recovery");
                    handle.cancel();
                }
            });

            let result = cmd_recover(&config, args, Some(cancel)).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                let reason = result
                    .reason
                    .map(|r| r.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                anyhow::bail!("Recovery flow {} failed: {}", result.flow_id, reason);
            }
            Ok(())
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Commands::ShowArtifact { flow, artifact_dir } => {
            let flow = cmd_show_artifact(&flow, &artifact_dir)?;
            println!("{}", serde_json::to_string_pretty(&flow)?);
            Ok(())
        }
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

fn error_report(args: &RecoverArgs) -> Result<ErrorReport> {
    if let Some(path) = &args.error_file {
        return read_json_file(path);
    }
    let error_type = args
        .error_type
        .clone()
        .context("Either --error-type or --error-file is required")?;
    let mut report = ErrorReport::new(error_type, args.message.clone());
    report.code = args.code.clone();
    report.component = args.component.clone();
    Ok(report)
}

/// Build the default kit, run one flow and optionally persist it.
async fn cmd_recover(
    config: &HostConfig,
    args: RecoverArgs,
    cancel: Option<FlowCancellation>,
) -> Result<RecoveryResult> {
    let report = error_report(&args)?;

    let mut kit = config.kit.clone();
    kit.strict_executor |= args.strict;

    let container = DependencyContainer::new();
    register_defaults(&container, &config.mender, &kit)?;
    container
        .initialize_all()
        .await
        .context("Failed to initialise collaborators")?;
    let orchestrator = Orchestrator::from_container(&container, &config.mender).await?;

    if let Some(path) = &args.system_state {
        let state: SystemState = read_json_file(path)?;
        orchestrator.contexts().update_system_state(state, "cli");
    }

    let mut request = RecoveryRequest::new(report);
    if let Some(id) = args.context_id {
        request = request.with_context(id);
    }
    if let Some(cancel) = cancel {
        request = request.with_cancellation(cancel);
    }

    let result = orchestrator.recover_from_error(request).await;

    if let Some(dir) = &args.artifact_dir {
        let path = write_flow_artifact(&result.flow, dir)
            .with_context(|| format!("Failed to persist flow to {:?}", dir))?;
        info!(flow_id = %result.flow_id, path = %path.display(), "flow persisted");
    }

    for failure in container.dispose().await {
        warn!(service = %failure.name, error = %failure.error, "dispose failed");
    }

    Ok(result)
}

fn cmd_show_artifact(flow_id: &str, artifact_dir: &Path) -> Result<RecoveryFlow> {
    read_flow_artifact(flow_id, artifact_dir)
        .with_context(|| format!("Failed to load flow {} from {:?}", flow_id, artifact_dir))
}
