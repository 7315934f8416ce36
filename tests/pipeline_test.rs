//! End-to-end tests: catalog file + gateway file + pipeline

use bytes::Bytes;
use parking_lot::Mutex;
use pickup_bridge::domain::types::{InboundMessage, PlayCommand};
use pickup_bridge::domain::EventKind;
use pickup_bridge::infra::{Metrics, RuntimeSettings};
use pickup_bridge::io::{load_catalog, JsonGatewayStore};
use pickup_bridge::services::{BusPublisher, Catalog, GatewayRegistry, GatewayStore, Pipeline};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl BusPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        self.sent.lock().push((topic.to_string(), payload));
        true
    }

    fn is_connected(&self) -> bool {
        true
    }
}

const CATALOG: &str = r#"
[[product]]
mac = "AA:BB:CC:DD:EE:01"
sku = "MUG-01"
name = "Ceramic mug"
video = "mug.mp4"
screen = "front"
"#;

fn message(topic: &str, payload: &str) -> InboundMessage {
    InboundMessage {
        topic: topic.to_string(),
        payload: Bytes::from(payload.to_string()),
        received_at: Instant::now(),
    }
}

fn build(
    dir: &tempfile::TempDir,
) -> (Arc<Pipeline>, Arc<RecordingPublisher>, std::path::PathBuf) {
    let catalog_path = dir.path().join("products.toml");
    std::fs::write(&catalog_path, CATALOG).unwrap();
    let gateways_path = dir.path().join("gateways.json");

    let catalog = Arc::new(Catalog::from_products(load_catalog(&catalog_path).unwrap()));
    let registry =
        GatewayRegistry::with_store(Box::new(JsonGatewayStore::new(&gateways_path))).unwrap();
    let publisher = Arc::new(RecordingPublisher::default());
    let pipeline = Pipeline::new(
        catalog,
        Arc::new(registry),
        Arc::new(RuntimeSettings::new(Duration::from_secs(2), Duration::from_secs(5))),
        publisher.clone(),
        Arc::new(Metrics::new()),
    );
    (Arc::new(pipeline), publisher, gateways_path)
}

#[tokio::test]
async fn test_pickup_from_channel_publishes_play() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, publisher, _) = build(&dir);

    let (tx, rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // Separator-formatted MAC in the topic still matches the catalog entry
    tx.send(message("bthome/AA-BB-CC-DD-EE-01/state", r#"{"motion":true,"rssi":-60}"#))
        .await
        .unwrap();
    tx.send(message("bthome/aabbccddee01/state", r#"{"motion":false}"#)).await.unwrap();
    drop(tx);

    pipeline.clone().run(rx, shutdown_rx).await;

    let sent = publisher.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "screen/front/play");
    let command: PlayCommand = serde_json::from_slice(&sent[0].1).unwrap();
    assert_eq!(command.video, "mug.mp4");
    assert_eq!(command.sku, "MUG-01");

    let kinds: Vec<EventKind> = pipeline.recent_events(10).iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::PutDown, EventKind::Play, EventKind::PickedUp]);
    assert_eq!(pipeline.metrics().messages_total(), 2);
}

#[tokio::test]
async fn test_heartbeat_persists_to_gateway_file() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, _, gateways_path) = build(&dir);

    pipeline.process_inbound(&message(
        "gateway/gw-7/info",
        r#"{"gateway_id":"gw-7","action":"boot","ip":"10.0.0.7","board":"esp32"}"#,
    ));

    let stored = JsonGatewayStore::new(&gateways_path).load().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].gateway_id, "gw-7");
    assert_eq!(stored[0].ip, "10.0.0.7");
    assert_eq!(stored[0].board, "esp32");

    // A fresh registry over the same file sees the record
    let reopened = GatewayRegistry::with_store(Box::new(JsonGatewayStore::new(&gateways_path)))
        .unwrap();
    assert_eq!(reopened.get("gw-7").map(|r| r.ip), Some("10.0.0.7".to_string()));
}

#[tokio::test]
async fn test_catalog_reload_applies_to_next_pickup() {
    let dir = tempfile::tempdir().unwrap();
    let (pipeline, publisher, _) = build(&dir);

    pipeline.handle_message("bthome/1122334455ff/state", r#"{"motion":true}"#.as_bytes(), 1_000);
    assert!(publisher.sent.lock().is_empty());
    assert_eq!(pipeline.unmapped_devices().len(), 1);

    let reloaded = dir.path().join("products2.toml");
    std::fs::write(
        &reloaded,
        "[[product]]\nmac = \"11:22:33:44:55:FF\"\nsku = \"PLATE\"\nvideo = \"plate.mp4\"\n\
         screen = \"side\"\n",
    )
    .unwrap();
    pipeline.catalog().replace_all(load_catalog(&reloaded).unwrap());

    pipeline.handle_message("bthome/1122334455ff/state", r#"{"motion":false}"#.as_bytes(), 2_000);
    pipeline.handle_message("bthome/1122334455ff/state", r#"{"motion":true}"#.as_bytes(), 5_000);

    let sent = publisher.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "screen/side/play");
    assert!(pipeline.unmapped_devices().is_empty());
}
