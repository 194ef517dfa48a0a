//! cutoverd — the cutover daemon.
//!
//! Single binary that assembles the orchestrator:
//! - Process supervisor and per-version log sinks
//! - Health monitor
//! - Traffic router (reverse proxy)
//! - Deployment coordinator
//! - Control API
//!
//! # Usage
//!
//! ```text
//! cutoverd run --config /etc/cutover.toml --initial-artifact /srv/app.jar
//! cutoverd check-config --config /etc/cutover.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use cutover_core::{CutoverConfig, VersionStore};
use cutover_rollout::Coordinator;
use cutover_supervisor::{LogSinks, LogTailer};

const DEFAULT_FILTER: &str = "info,cutover=debug,cutoverd=debug";

#[derive(Parser)]
#[command(name = "cutoverd", about = "Blue-green deployment orchestrator")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the control API and proxy traffic to the active instance.
    Run {
        /// Path to a TOML config file. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides `server.listen`).
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Artifact to deploy at startup (overrides `lifecycle.initial_artifact`).
        #[arg(long)]
        initial_artifact: Option<PathBuf>,
    },
    /// Validate a config file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            listen,
            initial_artifact,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if initial_artifact.is_some() {
                config.lifecycle.initial_artifact = initial_artifact;
            }
            run(config).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CutoverConfig> {
    let config = match path {
        Some(path) => CutoverConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CutoverConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn run(config: CutoverConfig) -> anyhow::Result<()> {
    info!("cutover daemon starting");

    // ── Directories and history ────────────────────────────────

    std::fs::create_dir_all(&config.paths.log_dir)
        .with_context(|| format!("creating {}", config.paths.log_dir.display()))?;
    std::fs::create_dir_all(&config.paths.backup_dir)
        .with_context(|| format!("creating {}", config.paths.backup_dir.display()))?;

    let history = if config.lifecycle.rescan_backups {
        let history = VersionStore::rebuild_from(&config.paths.backup_dir)?;
        info!(count = history.len(), dir = %config.paths.backup_dir.display(), "version history rebuilt");
        history
    } else {
        VersionStore::new()
    };

    // ── Orchestrator ───────────────────────────────────────────

    let coordinator = Coordinator::from_config(&config).history(history).build();
    let tailer = LogTailer::new(
        LogSinks::new(&config.paths.log_dir),
        config.lifecycle.tail_poll,
    );

    if let Some(artifact) = &config.lifecycle.initial_artifact {
        match coordinator.begin_deploy(artifact).await {
            Ok(pending) => {
                info!(version_id = %pending.version_id(), port = pending.port(), "initial deployment started");
                drop(pending);
            }
            Err(e) => error!(artifact = %artifact.display(), error = %e, "initial deployment failed"),
        }
    }

    // ── API server ─────────────────────────────────────────────

    let router = cutover_api::build_router(
        cutover_api::ApiState {
            coordinator: coordinator.clone(),
            tailer,
        },
        &config.server.control_prefix,
    );

    let addr = config.server.listen;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, prefix = %config.server.control_prefix, "listening");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    if !config.lifecycle.stop_on_shutdown {
        warn!("leaving managed instances running");
    }
    coordinator.shutdown(config.lifecycle.stop_on_shutdown).await;

    info!("cutover daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "cutoverd",
            "--log-json",
            "run",
            "--listen",
            "127.0.0.1:9000",
            "--initial-artifact",
            "/srv/app.jar",
        ])
        .unwrap();
        assert!(cli.log_json);
        match cli.command {
            Command::Run {
                config,
                listen,
                initial_artifact,
            } => {
                assert!(config.is_none());
                assert_eq!(listen, Some("127.0.0.1:9000".parse().unwrap()));
                assert_eq!(initial_artifact, Some(PathBuf::from("/srv/app.jar")));
            }
            Command::CheckConfig { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = std::env::temp_dir().join("cutoverd-missing-config.toml");
        assert!(load_config(Some(&dir)).is_err());
        assert!(load_config(None).is_ok());
    }
}
