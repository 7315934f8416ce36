//! Sensor event correlation pipeline
//!
//! The Pipeline owns the shared tables and is the single ingestion entry
//! point for bus messages:
//! - Telemetry -> `EventClassifier` (state, debounce, catalog, event log)
//! - Heartbeats -> `GatewayRegistry`
//! - Play dispatches -> `BusPublisher`, after the device lock is released
//!
//! The `TimeoutWatchdog` built from it shares the same tables and runs on
//! its own task.

mod query;
mod routing;

pub use query::SensorView;

use crate::domain::event::epoch_ms;
use crate::domain::types::InboundMessage;
use crate::infra::config::RuntimeSettings;
use crate::infra::metrics::Metrics;
use crate::services::catalog::Catalog;
use crate::services::classifier::EventClassifier;
use crate::services::debounce::DebounceController;
use crate::services::event_log::EventLog;
use crate::services::gateway_registry::GatewayRegistry;
use crate::services::publisher::BusPublisher;
use crate::services::sensor_table::SensorStateTable;
use crate::services::watchdog::TimeoutWatchdog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

pub struct Pipeline {
    pub(crate) sensors: Arc<SensorStateTable>,
    pub(crate) debounce: Arc<DebounceController>,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) events: Arc<EventLog>,
    pub(crate) gateways: Arc<GatewayRegistry>,
    pub(crate) classifier: EventClassifier,
    pub(crate) settings: Arc<RuntimeSettings>,
    pub(crate) publisher: Arc<dyn BusPublisher>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        gateways: Arc<GatewayRegistry>,
        settings: Arc<RuntimeSettings>,
        publisher: Arc<dyn BusPublisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let sensors = Arc::new(SensorStateTable::new());
        let debounce = Arc::new(DebounceController::new());
        let events = Arc::new(EventLog::new());
        let classifier = EventClassifier::new(
            sensors.clone(),
            debounce.clone(),
            catalog.clone(),
            events.clone(),
            settings.clone(),
            metrics.clone(),
        );
        Self {
            sensors,
            debounce,
            catalog,
            events,
            gateways,
            classifier,
            settings,
            publisher,
            metrics,
        }
    }

    /// Watchdog sharing this pipeline's tables
    pub fn watchdog(&self, idle_evict_after: Option<Duration>) -> TimeoutWatchdog {
        TimeoutWatchdog::new(
            self.sensors.clone(),
            self.debounce.clone(),
            self.catalog.clone(),
            self.events.clone(),
            self.settings.clone(),
            self.metrics.clone(),
        )
        .with_idle_eviction(idle_evict_after)
    }

    /// Consume inbound bus messages until the channel closes or shutdown
    pub async fn run(
        self: Arc<Self>,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("ingestion_started");
        loop {
            tokio::select! {
                msg = inbound_rx.recv() => {
                    match msg {
                        Some(msg) => self.process_inbound(&msg),
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("ingestion_stopped");
    }

    /// Handle one message and record its end-to-end latency
    pub fn process_inbound(&self, msg: &InboundMessage) {
        self.handle_message(&msg.topic, &msg.payload, epoch_ms());
        self.metrics.record_message_processed(msg.received_at.elapsed().as_micros() as u64);
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn settings(&self) -> &Arc<RuntimeSettings> {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}
