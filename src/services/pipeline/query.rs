//! Read-only views for the status server

use super::Pipeline;
use crate::domain::event::Event;
use crate::domain::types::{gateway_cmd_topic, DeviceId, GatewayRecord, Product, SeenMeta};
use crate::services::catalog::ProductCatalog;
use serde::Serialize;
use tracing::info;

/// Sensor record joined with its product, if mapped
#[derive(Debug, Clone, Serialize)]
pub struct SensorView {
    pub mac: DeviceId,
    pub active: bool,
    pub last_active_at: Option<u64>,
    pub inactive_since: Option<u64>,
    pub last_seen: SeenMeta,
    pub product: Option<Product>,
}

impl Pipeline {
    /// All sensors ever seen, sorted by device id
    pub fn sensor_states(&self) -> Vec<SensorView> {
        self.sensors
            .snapshot()
            .into_iter()
            .map(|(mac, record)| {
                let product = self.catalog.lookup(&mac);
                SensorView {
                    mac,
                    active: record.active,
                    last_active_at: record.last_active_at,
                    inactive_since: record.inactive_since,
                    last_seen: record.last_seen,
                    product,
                }
            })
            .collect()
    }

    /// Sensors reporting telemetry that have no catalog entry
    pub fn unmapped_devices(&self) -> Vec<DeviceId> {
        self.sensors
            .snapshot()
            .into_iter()
            .map(|(mac, _)| mac)
            .filter(|mac| !self.catalog.contains(mac))
            .collect()
    }

    /// Newest-first event log entries
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.events.recent(limit)
    }

    pub fn gateways(&self) -> Vec<GatewayRecord> {
        self.gateways.list()
    }

    pub fn products(&self) -> Vec<Product> {
        self.catalog.products()
    }

    pub fn bus_connected(&self) -> bool {
        self.publisher.is_connected()
    }

    pub fn active_sensor_count(&self) -> usize {
        self.sensors.active_count()
    }

    pub fn known_sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// Ask a gateway to blink; false when the bus is down or the publish was not sent
    pub fn identify_gateway(&self, gateway_id: &str) -> bool {
        if !self.publisher.is_connected() {
            return false;
        }
        let topic = gateway_cmd_topic(gateway_id);
        let sent = self.publisher.publish(&topic, br#"{"cmd":"identify"}"#.to_vec());
        info!(gateway = %gateway_id, sent = %sent, "gateway_identify");
        sent
    }
}
