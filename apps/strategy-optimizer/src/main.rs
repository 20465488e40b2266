//! Strategy Optimizer Binary
//!
//! Runs one optimisation sweep to completion, or inspects stored runs.
//!
//! # Usage
//!
//! ```bash
//! strategy-optimizer --config optimizer.yaml run --request sweep.yaml
//! strategy-optimizer list
//! strategy-optimizer show <run_id>
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log filter (default: `strategy_optimizer=<observability.logging.level>`)
//! - Any variable referenced as `${VAR}` / `${VAR:-default}` in the config file,
//!   e.g. `ENGINE_URL`, `ENGINE_TOKEN`
//!
//! A `.env` file in the working directory or any ancestor is loaded first.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use strategy_optimizer::application::ports::{BacktestEnginePort, JobStorePort};
use strategy_optimizer::config::{Config, StoreBackend, load_config};
use strategy_optimizer::observability::{ExporterConfig, init_metrics};
use strategy_optimizer::telemetry::init_tracing;
use strategy_optimizer::{
    HttpBacktestEngine, InMemoryJobStore, Orchestrator, RunId, RunStatus, ScriptedEngine,
    SqliteJobStore, StartRunRequest,
};
use tokio::signal;

/// Config file read when `--config` is not given, if present.
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Parser)]
#[command(name = "strategy-optimizer", version, about = "Parameter sweep orchestrator")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute one run to completion and print its final detail as JSON.
    Run {
        /// Run request (`.json`, `.yaml` or `.yml`).
        #[arg(long, short)]
        request: PathBuf,
        /// Use the in-process scripted engine instead of the HTTP engine.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print run summaries as JSON, newest first.
    List,
    /// Print one run as JSON.
    Show {
        /// Run identifier.
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    load_dotenv();
    let config = read_config(cli.config.as_deref())?;
    init_tracing(&config.observability.logging).context("failed to initialize tracing")?;
    start_metrics(&config)?;

    let dry_run = matches!(cli.command, Command::Run { dry_run: true, .. });
    let orchestrator = Arc::new(build_orchestrator(&config, dry_run)?);

    match cli.command {
        Command::Run { request, .. } => {
            let request = read_request(&request)?;
            let signals = tokio::spawn(cancel_on_signal(Arc::clone(&orchestrator)));
            let detail = orchestrator.execute_run(request).await?;
            signals.abort();

            println!("{}", serde_json::to_string_pretty(&detail)?);
            if detail.status() == RunStatus::Failed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::List => {
            let runs = orchestrator.list_runs().await?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        Command::Show { run_id } => {
            let run_id = RunId::new(run_id);
            let Some(detail) = orchestrator.get_run(&run_id).await? else {
                bail!("run {run_id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Explicit path, else `config.yaml` when present, else built-in defaults.
fn read_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => PathBuf::from(DEFAULT_CONFIG_PATH),
        None => return Ok(Config::default()),
    };
    let display = path.display().to_string();
    load_config(Some(&display)).with_context(|| format!("failed to load config from {display}"))
}

fn read_request(path: &Path) -> anyhow::Result<StartRunRequest> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let request = if is_json {
        serde_json::from_str(&contents)
            .with_context(|| format!("invalid JSON request {}", path.display()))?
    } else {
        serde_yaml_bw::from_str(&contents)
            .with_context(|| format!("invalid YAML request {}", path.display()))?
    };
    Ok(request)
}

fn start_metrics(config: &Config) -> anyhow::Result<()> {
    let metrics = &config.observability.metrics;
    if !metrics.enabled {
        return Ok(());
    }
    let addr: SocketAddr = metrics
        .listen_addr
        .parse()
        .with_context(|| format!("invalid metrics listen_addr {}", metrics.listen_addr))?;
    init_metrics(&ExporterConfig::with_addr(addr))?;
    Ok(())
}

fn build_orchestrator(config: &Config, dry_run: bool) -> anyhow::Result<Orchestrator> {
    let engine: Arc<dyn BacktestEnginePort> = if dry_run {
        tracing::warn!("Dry run: using the scripted engine, no backtests will execute");
        Arc::new(ScriptedEngine::new())
    } else {
        tracing::info!(base_url = %config.engine.base_url, "Using HTTP backtest engine");
        Arc::new(HttpBacktestEngine::new(&config.engine)?)
    };

    let store: Arc<dyn JobStorePort> = match config.persistence.backend {
        StoreBackend::Sqlite => Arc::new(SqliteJobStore::open(&config.persistence.db_path)?),
        StoreBackend::Memory => {
            tracing::warn!("In-memory job store: run history is lost on exit");
            Arc::new(InMemoryJobStore::new())
        }
    };

    Ok(Orchestrator::new(
        engine,
        store,
        config.orchestrator_settings(),
    ))
}

/// Cancel every live run on SIGINT or SIGTERM.
async fn cancel_on_signal(orchestrator: Arc<Orchestrator>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling runs");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, cancelling runs");
        }
    }

    orchestrator.shutdown();
}
