use crate::model::{DeployConfig, DeployEvent, DeploymentOutcome, PlanSelector};
use crate::orchestrator::{DeployRequest, Orchestrator, TracingReporter};
use crate::platform::CloudFoundryClient;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "cf-deployer",
    version,
    about = "Provision a backing service and deploy an artifact to Cloud Foundry"
)]
pub struct Cli {
    /// Cloud Foundry API endpoint
    #[arg(long, env = "CF_API")]
    pub api: String,

    /// OAuth access token, with or without the "bearer " prefix
    #[arg(long, env = "CF_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// GUID of the target space
    #[arg(long, env = "CF_SPACE_GUID")]
    pub space_guid: String,

    /// Marketplace offering that provides the backing service
    #[arg(long, default_value = "p-mysql")]
    pub offering: String,

    /// Name of the service instance to create or reuse
    #[arg(long, default_value = "cnj-mysql")]
    pub service_instance: String,

    /// Application name
    #[arg(long, default_value = "cnj-hda")]
    pub app: String,

    /// Service plan to use when creating the instance (default: first free plan)
    #[arg(long)]
    pub plan: Option<String>,

    /// Artifact to push (default: ~/Desktop/in.jar)
    #[arg(long, env = "ARTIFACT")]
    pub artifact: Option<PathBuf>,

    /// Timeout for each HTTP request to the platform
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// How long to wait for platform-side work (jobs, package processing, staging)
    #[arg(long, default_value = "15m")]
    pub operation_timeout: humantime::Duration,

    /// Interval between status polls of platform-side work
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Accept invalid TLS certificates from the API endpoint
    #[arg(long)]
    pub skip_tls_verify: bool,

    /// Print the deployment outcome as JSON
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress all output except errors (for CI usage)
    #[arg(long)]
    pub silent: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let cfg = build_config(&args);
    let platform =
        CloudFoundryClient::new(&cfg).context("failed to set up the Cloud Foundry client")?;
    let orchestrator = Orchestrator::new(Arc::new(platform), Arc::new(TracingReporter));
    let request = DeployRequest::from_config(&cfg);

    if args.json {
        return run_json(orchestrator, request, args.silent).await;
    }

    run_text(orchestrator, request).await
}

/// Build a `DeployConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> DeployConfig {
    DeployConfig {
        api_url: args.api.clone(),
        token: args.token.clone(),
        space_guid: args.space_guid.clone(),
        offering: args.offering.clone(),
        service_instance: args.service_instance.clone(),
        app_name: args.app.clone(),
        plan: args
            .plan
            .clone()
            .map(PlanSelector::Named)
            .unwrap_or(PlanSelector::Free),
        artifact: crate::config::resolve_artifact(args.artifact.as_deref()),
        request_timeout: Duration::from(args.request_timeout),
        operation_timeout: Duration::from(args.operation_timeout),
        poll_interval: Duration::from(args.poll_interval),
        user_agent: format!("cf-deployer/{}", env!("CARGO_PKG_VERSION")),
        skip_tls_verify: args.skip_tls_verify,
    }
}

/// Turn a failed outcome into the error reported by `main`.
fn outcome_to_result(outcome: DeploymentOutcome) -> Result<()> {
    if outcome.success {
        return Ok(());
    }
    let context = format!("deployment of '{}' failed", outcome.application_name);
    let err = match outcome.error {
        Some(e) => anyhow::Error::from(e),
        None => anyhow::anyhow!(outcome
            .failure_reason
            .unwrap_or_else(|| "unknown error".into())),
    };
    Err(err.context(context))
}

async fn run_json(orchestrator: Orchestrator, request: DeployRequest, silent: bool) -> Result<()> {
    let outcome = orchestrator.deploy(&request).await;

    if !silent {
        let (out_tx, out_handle) = spawn_output_writer();
        let out = serde_json::to_string_pretty(&outcome)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
        drop(out_tx);
        let _ = out_handle.await;
    }

    outcome_to_result(outcome)
}

async fn run_text(orchestrator: Orchestrator, request: DeployRequest) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<DeployEvent>();

    let orchestrator = orchestrator.with_events(evt_tx);
    let handle = tokio::spawn(async move { orchestrator.deploy(&request).await });

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            DeployEvent::StageEntered { stage } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("== {stage} ==")));
            }
            DeployEvent::Finished { outcome } => {
                let summary = crate::text_summary::build_text_summary(&outcome);
                for line in summary.lines {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
            }
        }
    }

    let outcome = handle.await.context("deployment task failed")?;
    drop(out_tx);
    let _ = out_handle.await;
    outcome_to_result(outcome)
}
