//! Resilient Bus - Main Entry Point
//!
//! Runs a bus client against an MQTT broker and serves its health over HTTP
//! until interrupted.

use clap::{Parser, Subcommand};
use resilient_bus::bus::BusClient;
use resilient_bus::config::BusConfig;
use resilient_bus::observability::{health::HealthServer, init_default_logging, metrics::metrics};
use resilient_bus::transport::mqtt::MqttTransport;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Resilient message-bus client
#[derive(Parser)]
#[command(name = "resilient-bus")]
#[command(about = "Message-bus client with fail-fast publishing and health reporting")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "RESILIENT_BUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and serve health until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting resilient-bus v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<BusConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BusConfig::load_from_file(path)?);
    }

    // Try default locations
    for path_str in ["bus.toml", "config/bus.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BusConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create bus.toml".into())
}

async fn run_client(config: BusConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Client starting with ID: {}", config.client.id);

    let transport = MqttTransport::new(config.client.id.clone(), vec![config.reply_destination()]);
    let client = BusClient::from_config(&config, Arc::new(transport))?;

    // HEALTH_PORT overrides the configured port
    let health_port = std::env::var("HEALTH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(config.health.port);

    let health_server = Arc::new(HealthServer::new(
        config.client.id.clone(),
        health_port,
        client.health_monitor(),
    ));
    let (health_shutdown_tx, health_shutdown_rx) = oneshot::channel::<()>();
    let health_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = health_shutdown_rx.await;
        };
        if let Err(e) = health_server.start(shutdown).await {
            error!("Health server error: {}", e);
        }
    });

    client.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Client is running, waiting for shutdown signal");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    client.stop().await;
    let _ = health_shutdown_tx.send(());
    if let Err(e) = health_task.await {
        warn!("Health server task ended abnormally: {}", e);
    }

    let snapshot = metrics().get_metrics();
    info!(
        connection_attempts = snapshot.connection.connection_attempts,
        publishes_succeeded = snapshot.publish.publishes_succeeded,
        requests_issued = snapshot.requests.requests_issued,
        "Final bus metrics"
    );
    Ok(())
}

fn handle_config_command(config: BusConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", config.to_toml_string()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
