//! EDRR runner.
//!
//! # Usage
//!
//! ```bash
//! # Single task, offline provider, default config
//! edrr-runner --task "Design a rate limiter for the API gateway"
//!
//! # Manifest with per-phase instructions, manual transitions
//! edrr-runner --manifest manifest.yaml --config edrr.toml --manual
//!
//! # Real endpoint, JSON report on stdout
//! EDRR_PROVIDER=openai EDRR_MODEL=gpt-4o-mini edrr-runner --task "..." --json
//! ```
//!
//! Exit code 0 when the cycle completed, 1 when it failed, 2 on setup errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use edrr_coordination::{
    EdrrConfig, Manifest, Orchestrator, Task, TransitionMode, UnresolvedPolicy,
};
use edrr_runner::{load_config, render_json, render_text, StdinGate};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Task description to run through one EDRR cycle
    #[arg(long, conflicts_with = "manifest")]
    task: Option<String>,

    /// YAML or JSON manifest with the task and per-phase instructions
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Config file (.toml, .yaml/.yml or .json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Confirm every phase transition on stdin (overrides the config)
    #[arg(long, default_value_t = false)]
    manual: bool,

    /// Print the report as JSON on stdout
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print the manifest JSON schema and exit
    #[arg(long, default_value_t = false)]
    manifest_schema: bool,
}

enum Input {
    Task(Task),
    Manifest(Manifest),
}

fn resolve_input(args: &Args) -> Result<Input> {
    match (&args.task, &args.manifest) {
        (Some(text), None) => {
            let task = Task::new(text.clone());
            task.validate().context("Invalid task")?;
            Ok(Input::Task(task))
        }
        (None, Some(path)) => {
            let manifest = Manifest::from_file(path)
                .with_context(|| format!("Failed to load manifest {}", path.display()))?;
            Ok(Input::Manifest(manifest))
        }
        (None, None) => bail!("either --task or --manifest is required"),
        (Some(_), Some(_)) => bail!("--task and --manifest are mutually exclusive"),
    }
}

async fn setup(args: &Args, cancel: CancellationToken) -> Result<(Orchestrator, Input)> {
    let mut config: EdrrConfig = load_config(args.config.as_deref())?;
    if args.manual {
        config.transition_mode = TransitionMode::Manual;
    }
    let input = resolve_input(args)?;

    let mut builder = Orchestrator::builder(config.clone()).cancellation(cancel);
    if config.transition_mode == TransitionMode::Manual
        || config.unresolved_policy == UnresolvedPolicy::Escalate
    {
        builder = builder.gate(Arc::new(StdinGate::new()));
    }
    let orchestrator = builder
        .build()
        .await
        .context("Failed to build orchestrator")?;
    Ok((orchestrator, input))
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling the running cycle");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.manifest_schema {
        return match serde_json::to_string_pretty(&Manifest::json_schema()) {
            Ok(schema) => {
                println!("{}", schema);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::from(2)
            }
        };
    }

    let cancel = CancellationToken::new();
    let (orchestrator, input) = match setup(&args, cancel.clone()).await {
        Ok(ready) => ready,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };
    spawn_ctrl_c(cancel);

    let outcome = match &input {
        Input::Task(task) => {
            info!(task = %task.id, "Running task");
            orchestrator.run_task(task.clone()).await
        }
        Input::Manifest(manifest) => orchestrator.run_manifest(manifest).await,
    };
    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error [{}]: {}", e.code(), e);
            return ExitCode::from(2);
        }
    };

    if args.json {
        match render_json(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: {e:#}");
                return ExitCode::from(2);
            }
        }
    } else {
        print!("{}", render_text(&report));
    }

    if let Some(failure) = &report.cycle.failure {
        let phase = failure
            .phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "setup".into());
        eprintln!(
            "cycle failed at {}: [{}] {}",
            phase, failure.code, failure.message
        );
    }
    ExitCode::from(report.exit_code as u8)
}
