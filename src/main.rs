//! Headless engine CLI. Metrics and events are pushed as structured JSON
//! log lines; there is no HTTP surface.
//!
//! Exit codes: 0 normal, 1 configuration error, 2 unrecoverable runtime
//! fault.

use anyhow::Result;
use clap::{Parser, Subcommand};
use quorum::application::engine::Engine;
use quorum::config::Config;
use std::process::ExitCode;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "quorum", version, about = "Multi-bot trading orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until interrupted
    Run,
    /// Print a one-shot registry + safety + deployment summary
    Status,
    /// Helios deployment protocol operations
    Helios {
        #[command(subcommand)]
        command: HeliosCommand,
    },
}

#[derive(Subcommand)]
enum HeliosCommand {
    /// Register a new deployment with the protocol
    Deploy {
        deployment_id: String,
        version: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Close a postmortem with its root cause analysis
    CompletePostmortem {
        postmortem_id: String,
        #[arg(long)]
        root_cause: String,
        /// Repeatable: --action "add warmup" --action "alert on miss rate"
        #[arg(long = "action")]
        corrective_actions: Vec<String>,
    },
    /// Mark a version as the stable rollback target
    MarkStable {
        version_id: String,
        #[arg(long)]
        deployment_id: Option<String>,
    },
}

fn init_tracing() {
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Unrecoverable fault: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run_command(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Run => {
            info!("quorum {} starting", env!("CARGO_PKG_VERSION"));
            let engine = Engine::build(config).await?;
            engine.run().await
        }
        Command::Status => {
            let engine = Engine::build(config).await?;
            let snapshot = engine.status_snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Helios { command } => {
            let engine = Engine::build(config).await?;
            let helios = engine.helios();
            match command {
                HeliosCommand::Deploy {
                    deployment_id,
                    version,
                    description,
                } => {
                    let record = helios
                        .register_deployment(&deployment_id, &version, &description)
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(())
                }
                HeliosCommand::CompletePostmortem {
                    postmortem_id,
                    root_cause,
                    corrective_actions,
                } => {
                    let postmortem = helios
                        .complete_postmortem(&postmortem_id, &root_cause, &corrective_actions)
                        .await?;
                    println!("{}", serde_json::to_string_pretty(&postmortem)?);
                    Ok(())
                }
                HeliosCommand::MarkStable {
                    version_id,
                    deployment_id,
                } => {
                    helios
                        .mark_version_stable(&version_id, deployment_id.as_deref())
                        .await?;
                    println!("version {} marked stable", version_id);
                    Ok(())
                }
            }
        }
    }
}
