use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sa_domain::config::Config;
use tokio_util::sync::CancellationToken;

use sa_gateway::cli::{self, Cli, Command, ConfigCommand};
use sa_gateway::{bootstrap, telemetry, workers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (config, config_path) = cli::load_config(cli.config.as_ref())?;
            telemetry::init(&config.observability, &config.run.log_level)?;
            tracing::info!(config = %config_path, "serialrunner starting");
            serve(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config(cli.config.as_ref())?;
            if !cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config(cli.config.as_ref())?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("serialrunner {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Boot the worker and block until a shutdown signal, then drain.
async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let state = Arc::new(bootstrap::build_app_state(config.clone())?);
    let token = CancellationToken::new();

    let consumers = tokio::spawn(workers::run(state.clone(), token.clone()));
    tracing::info!(
        concurrency = config.run.worker_concurrency,
        trigger_poll_ms = config.run.trigger_poll_interval_ms,
        "queue consumers started"
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received — draining in-flight jobs");
    token.cancel();

    let drain = std::time::Duration::from_millis(config.run.queue_drain_timeout_ms);
    if tokio::time::timeout(drain, consumers).await.is_err() {
        tracing::warn!(drain_ms = config.run.queue_drain_timeout_ms, "drain window elapsed with jobs still in flight");
    }
    tracing::info!("serialrunner stopped");
    Ok(())
}
