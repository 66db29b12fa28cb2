//! Vending orchestrator - unattended retail transaction service
//!
//! Coordinates card swipe, door lock, CV inference and ledger finalization
//! for one vending cabinet.
//!
//! Module structure:
//! - `domain/` - Core business types (TransactionSession, VendingState, ledger wire types)
//! - `io/` - External interfaces (MQTT, command/ledger/auth HTTP, status API, audit)
//! - `services/` - Business logic (Orchestrator, monitors, event filter, ports)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use vending_orchestrator::infra::{Config, Metrics};
use vending_orchestrator::io::{
    create_command_port, start_http_api, ApiState, HttpAccountResolver, HttpLedgerPort,
};
use vending_orchestrator::services::{
    AccountResolver, CardIsAccount, EventFilter, Orchestrator, Ports,
};

/// Vending orchestrator - automated checkout transaction service
#[derive(Parser, Debug)]
#[command(name = "vending-orchestrator", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

/// Orchestrator queue capacity (bounded for backpressure)
const EVENT_QUEUE_CAPACITY: usize = 256;

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }
}

fn build_ports(config: &Config) -> anyhow::Result<Ports> {
    let command = create_command_port(config).context("Failed to create command port")?;
    let ledger = HttpLedgerPort::new(config).context("Failed to create ledger client")?;
    let accounts: Arc<dyn AccountResolver> = match config.auth_url() {
        Some(url) => Arc::new(
            HttpAccountResolver::new(url, config.port_timeout())
                .context("Failed to create authentication client")?,
        ),
        None => Arc::new(CardIsAccount),
    };
    Ok(Ports { command, ledger: Arc::new(ledger), accounts })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(git_hash = %env!("GIT_HASH"), "vending-orchestrator starting");

    // Fail fast on missing or invalid required settings
    let config = match args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load(&[])?,
    };

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        card_reader = %config.card_reader_device(),
        inference_device = %config.inference_device(),
        door_open_wait_ms = %config.door_open_wait().as_millis(),
        inference_wait_ms = %config.inference_wait().as_millis(),
        door_close_wait_ms = %config.door_close_wait().as_millis(),
        port_timeout_ms = %config.port_timeout().as_millis(),
        inference_timeout_policy = %config.inference_timeout_policy().as_str(),
        lockout_on_stuck_door = %config.lockout_on_stuck_door(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        ledger_url = %config.ledger_url(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let ports = build_ports(&config)?;

    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    let (mut orchestrator, status_rx) = Orchestrator::new(
        config.clone(),
        ports,
        metrics.clone(),
        event_tx.clone(),
        shutdown_rx.clone(),
    );

    // Start MQTT ingestion
    let mqtt_config = config.clone();
    let mqtt_filter = EventFilter::new(&config, metrics.clone());
    let mqtt_tx = event_tx.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = vending_orchestrator::io::mqtt::start_mqtt_client(
            &mqtt_config,
            mqtt_filter,
            mqtt_tx,
            mqtt_metrics,
            mqtt_shutdown,
        )
        .await
        {
            error!(error = %e, "mqtt_client_error");
        }
    });

    // Start status/control HTTP API (if port > 0)
    if config.http_port() > 0 {
        let api_state = Arc::new(ApiState {
            event_tx: event_tx.clone(),
            status_rx,
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
        });
        let bind_address = config.http_bind_address().to_string();
        let port = config.http_port();
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_api(&bind_address, port, api_state, api_shutdown).await {
                error!(error = %e, "http_api_error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = metrics_shutdown.changed() => {
                    if *metrics_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run orchestrator - consumes events until shutdown
    orchestrator.run(event_rx).await;

    info!("vending-orchestrator shutdown complete");
    Ok(())
}
