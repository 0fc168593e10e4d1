use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kms_envelope::{
    cli::{self, Cli, Commands},
    kms::GrpcConnector,
    observability::{init_observability, log_config_info},
    Engine, APP_NAME, VERSION,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Must run before any config is read from the environment
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    let config = cli.app_config().context("invalid engine configuration")?;

    match cli.command() {
        Commands::CheckConfig => {
            cli::check_config(&config).context("encryption configuration rejected")?;
            return Ok(());
        }
        Commands::Probe => {
            if !cli::probe(&config).await? {
                std::process::exit(1);
            }
            return Ok(());
        }
        Commands::Serve => {}
    }

    init_observability(&config.observability).await?;
    info!(app_name = APP_NAME, version = VERSION, "Starting KMS envelope engine");
    log_config_info(&config);

    let engine = Engine::bootstrap(&config, Arc::new(GrpcConnector))
        .context("failed to load initial encryption configuration")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    if let Err(e) = engine.run(&config, shutdown).await {
        error!(error = %e, "Engine terminated with error");
        std::process::exit(1);
    }

    info!("Engine shutdown completed");
    Ok(())
}
