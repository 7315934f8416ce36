//! Topic routing and payload decoding for inbound bus messages
//!
//! Decode faults (bad topic shape, non-JSON or non-object payloads, empty
//! ids) drop the message before any state is touched.

use super::Pipeline;
use crate::domain::event::{Event, EventKind};
use crate::domain::types::{DeviceId, GatewayHeartbeat, GatewayUpdate, Telemetry, TelemetryPayload};
use crate::services::classifier::PlayDispatch;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

const TELEMETRY_PREFIX: &str = "bthome/";
const GATEWAY_PREFIX: &str = "gateway/";

impl Pipeline {
    /// Route one raw message by topic prefix
    pub fn handle_message(&self, topic: &str, payload: &[u8], at: u64) {
        if topic.starts_with(TELEMETRY_PREFIX) {
            self.handle_telemetry(topic, payload, at);
        } else if topic.starts_with(GATEWAY_PREFIX) {
            self.handle_heartbeat(topic, payload, at);
        } else {
            debug!(topic = %topic, "unrouted_topic");
        }
    }

    fn handle_telemetry(&self, topic: &str, payload: &[u8], at: u64) {
        let Some(telemetry) = decode_telemetry(topic, payload) else {
            self.metrics.record_decode_dropped();
            debug!(topic = %topic, bytes = %payload.len(), "telemetry_dropped");
            return;
        };
        self.metrics.record_telemetry();

        if let Some(dispatch) = self.classifier.classify(&telemetry, at).into_dispatch() {
            self.dispatch_play(dispatch);
        }
    }

    fn dispatch_play(&self, dispatch: PlayDispatch) {
        let payload = match serde_json::to_vec(&dispatch.command) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(mac = %dispatch.device_id, error = %e, "play_encode_failed");
                self.metrics.record_publish(false);
                return;
            }
        };

        let sent = self.publisher.publish(&dispatch.topic, payload);
        self.metrics.record_publish(sent);
        if sent {
            debug!(mac = %dispatch.device_id, topic = %dispatch.topic, "play_dispatched");
        } else {
            warn!(
                mac = %dispatch.device_id,
                topic = %dispatch.topic,
                connected = %self.publisher.is_connected(),
                "play_publish_skipped"
            );
        }
    }

    fn handle_heartbeat(&self, topic: &str, payload: &[u8], at: u64) {
        let Some(heartbeat) = decode_heartbeat(payload) else {
            self.metrics.record_decode_dropped();
            debug!(topic = %topic, bytes = %payload.len(), "heartbeat_dropped");
            return;
        };
        self.metrics.record_heartbeat();

        let update = GatewayUpdate::from(&heartbeat);
        let record = self.gateways.upsert(&heartbeat.gateway_id, &update, at);
        info!(
            gateway = %record.gateway_id,
            action = %heartbeat.action,
            ip = %record.ip,
            "gateway_heartbeat"
        );
        self.events.append(
            Event::new(EventKind::Gateway, heartbeat.gateway_id.as_str(), at)
                .with_attr("action", heartbeat.action.as_str())
                .with_attr("ip", heartbeat.ip.as_deref().unwrap_or_default()),
        );
    }
}

/// Decode `bthome/<mac>/state`; None on any decode fault
pub(crate) fn decode_telemetry(topic: &str, payload: &[u8]) -> Option<Telemetry> {
    let segments: Vec<&str> = topic.split('/').collect();
    let [_, mac, _] = segments.as_slice() else {
        return None;
    };
    let device_id = DeviceId::parse(mac)?;
    let payload: TelemetryPayload = decode_object(payload)?;
    Some(Telemetry {
        device_id,
        motion: payload.motion,
        rssi: payload.rssi,
        gateway_id: payload.gateway_id,
    })
}

/// Decode a JSON object payload; arrays and scalars are rejected
fn decode_object<T: DeserializeOwned>(payload: &[u8]) -> Option<T> {
    match serde_json::from_slice::<Value>(payload).ok()? {
        value @ Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

/// Decode a gateway heartbeat; `gateway_id` is required
pub(crate) fn decode_heartbeat(payload: &[u8]) -> Option<GatewayHeartbeat> {
    let heartbeat: GatewayHeartbeat = decode_object(payload)?;
    if heartbeat.gateway_id.is_empty() {
        return None;
    }
    Some(heartbeat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_telemetry() {
        let t = decode_telemetry(
            "bthome/A4:C1:38:00:00:01/state",
            br#"{"motion":true,"rssi":-61,"gateway_id":"gw1"}"#,
        )
        .unwrap();
        assert_eq!(t.device_id.as_str(), "a4c138000001");
        assert!(t.motion);
        assert_eq!(t.rssi, -61);
        assert_eq!(t.gateway_id, "gw1");
    }

    #[test]
    fn test_decode_telemetry_defaults() {
        let t = decode_telemetry("bthome/aabb/state", b"{}").unwrap();
        assert!(!t.motion);
        assert_eq!(t.rssi, 0);
        assert_eq!(t.gateway_id, "unknown");
    }

    #[test]
    fn test_decode_telemetry_faults() {
        let ok = br#"{"motion":true}"#;
        assert!(decode_telemetry("bthome/aabb", ok).is_none());
        assert!(decode_telemetry("bthome/aabb/state/extra", ok).is_none());
        assert!(decode_telemetry("bthome//state", ok).is_none());
        assert!(decode_telemetry("bthome/aabb/state", b"not json").is_none());
        assert!(decode_telemetry("bthome/aabb/state", b"[true]").is_none());
        assert!(decode_telemetry("bthome/aabb/state", b"true").is_none());
        assert!(decode_telemetry("bthome/aabb/state", br#"{"motion":"yes"}"#).is_none());
    }

    #[test]
    fn test_decode_heartbeat() {
        let hb = decode_heartbeat(br#"{"gateway_id":"gw1","action":"online","ip":"10.0.0.5"}"#)
            .unwrap();
        assert_eq!(hb.gateway_id, "gw1");
        assert_eq!(hb.ip.as_deref(), Some("10.0.0.5"));
        assert!(hb.mac.is_none());

        assert!(decode_heartbeat(br#"{"action":"online"}"#).is_none());
        assert!(decode_heartbeat(br#"{"gateway_id":""}"#).is_none());
        assert!(decode_heartbeat(b"garbage").is_none());
    }
}
