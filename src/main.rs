//! Pickup bridge - BLE pickup sensors to screen play commands
//!
//! Subscribes to BLE gateway telemetry over MQTT, turns motion samples into
//! debounced pickup events and publishes play commands for the matching
//! screen.
//!
//! Module structure:
//! - `domain/` - Core types (DeviceId, SensorRecord, Product, Event)
//! - `io/` - External interfaces (MQTT, status server, catalog and gateway files)
//! - `services/` - Correlation logic (Pipeline, EventClassifier, TimeoutWatchdog)
//! - `infra/` - Infrastructure (Config, RuntimeSettings, Metrics)

use anyhow::Context;
use clap::Parser;
use pickup_bridge::infra::{Config, Metrics, RuntimeSettings};
use pickup_bridge::io::{load_catalog, start_status_server, ApiState, BusAdapter, JsonGatewayStore};
use pickup_bridge::services::{Catalog, GatewayRegistry, Pipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Pickup bridge - BLE pickup sensor to screen playback service
#[derive(Parser, Debug)]
#[command(name = "pickup-bridge", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(
        version = %env!("CARGO_PKG_VERSION"),
        git = %env!("GIT_HASH"),
        "pickup-bridge starting"
    );

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config);
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        telemetry_topic = %config.telemetry_topic(),
        gateway_topic = %config.gateway_topic(),
        dedup_window_ms = %config.dedup_window().as_millis(),
        timeout_ms = %config.sensor_timeout().as_millis(),
        idle_evict = ?config.idle_evict_after(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    let products = load_catalog(config.product_map_file())?;
    let catalog = Arc::new(Catalog::from_products(products));
    let gateway_store = JsonGatewayStore::new(config.gateways_file());
    let gateways = Arc::new(
        GatewayRegistry::with_store(Box::new(gateway_store))
            .with_context(|| format!("failed to load gateways from {}", config.gateways_file()))?,
    );
    info!(products = %catalog.len(), gateways = %gateways.list().len(), "data_loaded");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let settings = Arc::new(RuntimeSettings::from_config(&config));

    // Bounded channel between the bus adapter and the ingestion worker
    let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity());
    let (bus, bus_handle) = BusAdapter::new(&config, inbound_tx, metrics.clone());

    let pipeline = Arc::new(Pipeline::new(
        catalog,
        gateways,
        settings,
        Arc::new(bus_handle),
        metrics.clone(),
    ));

    // Start MQTT bus adapter
    let bus_shutdown = shutdown_rx.clone();
    let bus_task = tokio::spawn(async move {
        if let Err(e) = bus.run(bus_shutdown).await {
            error!(error = %e, "mqtt_adapter_error");
        }
    });

    // Start timeout watchdog
    let watchdog = pipeline.watchdog(config.idle_evict_after());
    let watchdog_tick = config.watchdog_tick();
    let watchdog_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        watchdog.run(watchdog_tick, watchdog_shutdown).await;
    });

    // Start status HTTP server (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let state = Arc::new(ApiState {
            pipeline: pipeline.clone(),
            site_id: config.site_id().to_string(),
            mqtt_host: config.mqtt_host().to_string(),
            mqtt_port: config.mqtt_port(),
        });
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_status_server(http_port, state, http_shutdown).await {
                error!(error = %e, "status_server_error");
            }
        });
    }

    // Start metrics reporter
    let reporter = pipeline.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            let summary =
                metrics.report(reporter.active_sensor_count(), reporter.known_sensor_count());
            summary.log();
        }
    });

    // Reload runtime settings and the catalog on SIGHUP
    #[cfg(unix)]
    {
        let reload_pipeline = pipeline.clone();
        let reload_path = config_path.clone();
        tokio::spawn(async move {
            reload_on_hangup(reload_path, reload_pipeline).await;
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run ingestion - consumes inbound messages until shutdown
    pipeline.run(inbound_rx, shutdown_rx).await;

    // Give the adapter a moment to send its MQTT disconnect
    if tokio::time::timeout(Duration::from_secs(2), bus_task).await.is_err() {
        warn!("mqtt_adapter_shutdown_timeout");
    }

    info!("pickup-bridge shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_hangup(config_path: String, pipeline: Arc<Pipeline>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "sighup_handler_unavailable");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match reload(&config_path, &pipeline) {
            Ok(products) => info!(config_file = %config_path, products = %products, "reloaded"),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "reload_failed: keeping current settings")
            }
        }
    }
}

/// Re-read the config and catalog files; nothing is applied unless both load
#[cfg(unix)]
fn reload(config_path: &str, pipeline: &Pipeline) -> anyhow::Result<usize> {
    let config = Config::from_file(config_path)?;
    let products = load_catalog(config.product_map_file())?;
    let count = products.len();

    pipeline.settings().apply(&config);
    pipeline.catalog().replace_all(products);
    info!(
        dedup_window_ms = %config.dedup_window().as_millis(),
        timeout_ms = %config.sensor_timeout().as_millis(),
        "runtime_settings_applied"
    );
    Ok(count)
}
