//! Telemetry classification: the per-device pickup state machine
//!
//! | prior        | motion | outcome                                      |
//! |--------------|--------|----------------------------------------------|
//! | absent/false | false  | nothing                                      |
//! | absent/false | true   | `picked_up`, then debounce -> `play`/`unknown` |
//! | true         | false  | `put_down`                                   |
//! | true         | true   | nothing                                      |
//!
//! The whole decision for one sample runs under that device's slot lock.
//! The resulting publish is returned to the caller and sent after the lock
//! is released.

use crate::domain::event::{Event, EventKind};
use crate::domain::types::{play_topic, DeviceId, PlayCommand, SensorRecord, SeenMeta, Telemetry};
use crate::infra::config::RuntimeSettings;
use crate::infra::metrics::Metrics;
use crate::services::catalog::ProductCatalog;
use crate::services::debounce::DebounceController;
use crate::services::event_log::EventLog;
use crate::services::sensor_table::SensorStateTable;
use std::sync::Arc;
use tracing::{debug, info};

/// Playback command decided for a device, ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct PlayDispatch {
    pub device_id: DeviceId,
    pub topic: String,
    pub command: PlayCommand,
}

/// What a pickup led to after the debounce gate
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Inside the debounce window; no trigger
    Debounced,
    /// Passed the gate but the device has no product
    Unknown,
    Play(PlayDispatch),
}

/// Outcome of one telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Unchanged,
    PutDown,
    PickedUp(Trigger),
}

impl Classification {
    /// The publish this sample requires, if any
    pub fn into_dispatch(self) -> Option<PlayDispatch> {
        match self {
            Classification::PickedUp(Trigger::Play(dispatch)) => Some(dispatch),
            _ => None,
        }
    }
}

pub struct EventClassifier {
    sensors: Arc<SensorStateTable>,
    debounce: Arc<DebounceController>,
    catalog: Arc<dyn ProductCatalog>,
    events: Arc<EventLog>,
    settings: Arc<RuntimeSettings>,
    metrics: Arc<Metrics>,
}

impl EventClassifier {
    pub fn new(
        sensors: Arc<SensorStateTable>,
        debounce: Arc<DebounceController>,
        catalog: Arc<dyn ProductCatalog>,
        events: Arc<EventLog>,
        settings: Arc<RuntimeSettings>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sensors, debounce, catalog, events, settings, metrics }
    }

    /// Apply one telemetry sample observed at `at` (epoch ms)
    pub fn classify(&self, telemetry: &Telemetry, at: u64) -> Classification {
        let meta = SeenMeta {
            gateway_id: telemetry.gateway_id.clone(),
            rssi: telemetry.rssi,
            updated_at: at,
        };

        self.sensors.with_device(&telemetry.device_id, |slot| {
            let record = slot.get_or_insert_with(|| SensorRecord::new(meta.clone()));
            record.last_seen = meta;
            if !record.observe(telemetry.motion, at) {
                return Classification::Unchanged;
            }

            if telemetry.motion {
                Classification::PickedUp(self.picked_up(telemetry, at))
            } else {
                self.put_down(telemetry, at);
                Classification::PutDown
            }
        })
    }

    fn picked_up(&self, telemetry: &Telemetry, at: u64) -> Trigger {
        let id = &telemetry.device_id;
        let product = self.catalog.lookup(id);
        let (sku, name) = product
            .as_ref()
            .map(|p| (p.sku.as_str(), p.name.as_str()))
            .unwrap_or_default();

        self.metrics.record_picked_up();
        info!(
            mac = %id,
            sku = %sku,
            rssi = %telemetry.rssi,
            gateway = %telemetry.gateway_id,
            "sensor_picked_up"
        );
        self.events.append(
            Event::new(EventKind::PickedUp, id.as_str(), at)
                .with_attr("sku", sku)
                .with_attr("name", name)
                .with_attr("rssi", telemetry.rssi)
                .with_attr("gateway_id", telemetry.gateway_id.as_str()),
        );

        let window = product
            .as_ref()
            .and_then(|p| p.dedup_override)
            .unwrap_or_else(|| self.settings.dedup_window());
        if !self.debounce.should_trigger(id, at, window) {
            self.metrics.record_debounce_suppressed();
            debug!(mac = %id, window_ms = %window.as_millis(), "trigger_debounced");
            return Trigger::Debounced;
        }

        let Some(product) = product else {
            self.metrics.record_unknown();
            info!(mac = %id, gateway = %telemetry.gateway_id, "unknown_sensor");
            self.events.append(
                Event::new(EventKind::Unknown, id.as_str(), at)
                    .with_attr("gateway_id", telemetry.gateway_id.as_str()),
            );
            return Trigger::Unknown;
        };

        self.metrics.record_play();
        info!(
            mac = %id,
            sku = %product.sku,
            video = %product.video,
            screen = %product.screen,
            "play_triggered"
        );
        self.events.append(
            Event::new(EventKind::Play, id.as_str(), at)
                .with_attr("sku", product.sku.as_str())
                .with_attr("name", product.name.as_str())
                .with_attr("video", product.video.as_str())
                .with_attr("screen", product.screen.as_str()),
        );

        Trigger::Play(PlayDispatch {
            device_id: id.clone(),
            topic: play_topic(&product.screen),
            command: PlayCommand { video: product.video, sku: product.sku, name: product.name },
        })
    }

    fn put_down(&self, telemetry: &Telemetry, at: u64) {
        let id = &telemetry.device_id;
        let product = self.catalog.lookup(id);
        let (sku, name) = product
            .as_ref()
            .map(|p| (p.sku.as_str(), p.name.as_str()))
            .unwrap_or_default();

        self.metrics.record_put_down();
        info!(mac = %id, sku = %sku, "sensor_put_down");
        self.events.append(
            Event::new(EventKind::PutDown, id.as_str(), at)
                .with_attr("sku", sku)
                .with_attr("name", name)
                .with_attr("rssi", telemetry.rssi)
                .with_attr("gateway_id", telemetry.gateway_id.as_str()),
        );
    }
}
