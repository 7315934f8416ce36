//! Event log entries produced by the classifier, watchdog and gateway registry

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Render epoch milliseconds as RFC 3339 (UTC)
pub fn format_epoch_ms(ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_default()
}

/// Kind of a logged event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PickedUp,
    PutDown,
    Play,
    Unknown,
    Timeout,
    Gateway,
}

impl EventKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PickedUp => "picked_up",
            EventKind::PutDown => "put_down",
            EventKind::Play => "play",
            EventKind::Unknown => "unknown",
            EventKind::Timeout => "timeout",
            EventKind::Gateway => "gateway",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event log entry
///
/// Serializes flat: `{"id", "ts", "time", "type", "mac", ...attributes}`.
/// For `gateway` events `mac` carries the gateway id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub ts: u64,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "mac")]
    pub device_id: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, device_id: impl Into<String>, ts: u64) -> Self {
        Self {
            id: new_uuid_v7(),
            ts,
            time: format_epoch_ms(ts),
            kind,
            device_id: device_id.into(),
            attributes: Map::new(),
        }
    }

    /// Builder method to attach an attribute
    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Attribute value as a string, if present and a string
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = Event::new(EventKind::Play, "aabbccddeeff", 1_767_617_600_000)
            .with_attr("sku", "SKU-1")
            .with_attr("screen", "s1");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "play");
        assert_eq!(json["mac"], "aabbccddeeff");
        assert_eq!(json["sku"], "SKU-1");
        assert_eq!(json["screen"], "s1");
        assert_eq!(json["ts"], 1_767_617_600_000u64);
        assert!(json["time"].as_str().unwrap().starts_with("2026-01-05T"));
    }

    #[test]
    fn test_event_ids_unique() {
        let a = Event::new(EventKind::PickedUp, "a", 1);
        let b = Event::new(EventKind::PickedUp, "a", 1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 36);
    }

    #[test]
    fn test_format_epoch_ms() {
        assert_eq!(format_epoch_ms(0), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_kind_as_str() {
        assert_eq!(EventKind::PickedUp.as_str(), "picked_up");
        assert_eq!(EventKind::PutDown.to_string(), "put_down");
    }
}
