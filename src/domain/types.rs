//! Shared types for the pickup bridge

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Normalized sensor identity: lowercase hex MAC, no separators
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Normalize a raw MAC (`AA:BB:CC:DD:EE:FF`, `aa-bb-...`, `AABBCC...`)
    ///
    /// Returns None when nothing is left after stripping separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let id: String = raw
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where and how a device was last heard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeenMeta {
    pub gateway_id: String,
    pub rssi: i32,
    /// Epoch ms of the last telemetry sample
    pub updated_at: u64,
}

/// Per-device motion state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorRecord {
    pub active: bool,
    /// Epoch ms, refreshed only by `motion=true` samples
    pub last_active_at: Option<u64>,
    /// Epoch ms of the last active -> inactive transition
    pub inactive_since: Option<u64>,
    pub last_seen: SeenMeta,
}

impl SensorRecord {
    pub fn new(meta: SeenMeta) -> Self {
        Self { active: false, last_active_at: None, inactive_since: None, last_seen: meta }
    }

    /// Apply a telemetry sample, returning whether `active` changed
    pub fn observe(&mut self, motion: bool, at: u64) -> bool {
        if motion {
            self.last_active_at = Some(at);
        }
        let transitioned = self.active != motion;
        if transitioned && !motion {
            self.inactive_since = Some(at);
        }
        self.active = motion;
        transitioned
    }

    /// Force the device inactive, returning whether it was active
    pub fn force_inactive(&mut self, at: u64) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.inactive_since = Some(at);
        true
    }
}

/// Product metadata bound to a sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub mac: DeviceId,
    pub sku: String,
    pub name: String,
    pub video: String,
    pub screen: String,
    /// Overrides the global sensor timeout for this product
    #[serde(rename = "timeout_ms", serialize_with = "serialize_opt_ms")]
    pub timeout_override: Option<Duration>,
    /// Overrides the global debounce window for this product
    #[serde(rename = "dedup_window_ms", serialize_with = "serialize_opt_ms")]
    pub dedup_override: Option<Duration>,
}

fn serialize_opt_ms<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
        None => serializer.serialize_none(),
    }
}

/// Telemetry payload from `bthome/<mac>/state`
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryPayload {
    #[serde(default)]
    pub motion: bool,
    #[serde(default)]
    pub rssi: i32,
    #[serde(default = "default_gateway_id")]
    pub gateway_id: String,
}

fn default_gateway_id() -> String {
    "unknown".to_string()
}

/// Decoded telemetry sample for one device
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub device_id: DeviceId,
    pub motion: bool,
    pub rssi: i32,
    pub gateway_id: String,
}

/// Heartbeat payload from `gateway/<id>/info`
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayHeartbeat {
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub action: String,
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub board: Option<String>,
}

/// Fields a heartbeat may refresh; empty or missing values leave the record as is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayUpdate {
    pub mac: Option<String>,
    pub ip: Option<String>,
    pub board: Option<String>,
}

impl From<&GatewayHeartbeat> for GatewayUpdate {
    fn from(hb: &GatewayHeartbeat) -> Self {
        Self { mac: hb.mac.clone(), ip: hb.ip.clone(), board: hb.board.clone() }
    }
}

/// Registry entry for a BLE gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRecord {
    pub gateway_id: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub board: String,
    /// Operator-set, never written by heartbeats
    #[serde(default)]
    pub label: String,
    /// Epoch ms of the last heartbeat
    #[serde(default)]
    pub last_seen_at: u64,
}

/// Raw message handed from the bus adapter to the ingestion worker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: Instant,
}

/// Playback command published to `screen/<screen>/play`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayCommand {
    pub video: String,
    pub sku: String,
    pub name: String,
}

/// Topic a playback command for `screen` is published on
pub fn play_topic(screen: &str) -> String {
    format!("screen/{}/play", screen)
}

/// Topic a command for `gateway_id` is published on
pub fn gateway_cmd_topic(gateway_id: &str) -> String {
    format!("gateway/{}/cmd", gateway_id)
}
