//! MQTT bus adapter
//!
//! Owns the rumqttc event loop: reconnects after a fixed delay on any
//! connection error, re-subscribes on every ConnAck, and hands inbound
//! publishes to the ingestion worker over a bounded channel. Decoding and
//! routing happen on the worker side.
//!
//! `BusHandle` is the publish side; it never waits on the network.

use crate::domain::types::InboundMessage;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::publisher::BusPublisher;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Capacity of the rumqttc request queue
const CLIENT_QUEUE_CAPACITY: usize = 100;

/// How long shutdown waits for the DISCONNECT packet to be written
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Publish side of the bus, shared with the pipeline and status server
#[derive(Clone)]
pub struct BusHandle {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl BusPublisher for BusHandle {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.client.try_publish(topic, QoS::AtMostOnce, false, payload) {
            Ok(()) => true,
            Err(e) => {
                debug!(topic = %topic, error = %e, "mqtt_publish_failed");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

pub struct BusAdapter {
    client: AsyncClient,
    eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    subscriptions: Vec<String>,
    reconnect_delay: Duration,
    host: String,
    port: u16,
    inbound_tx: mpsc::Sender<InboundMessage>,
    metrics: Arc<Metrics>,
}

impl BusAdapter {
    /// Build the adapter and its publish handle; nothing connects until `run`
    pub fn new(
        config: &Config,
        inbound_tx: mpsc::Sender<InboundMessage>,
        metrics: Arc<Metrics>,
    ) -> (Self, BusHandle) {
        let mut mqttoptions =
            MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(config.mqtt_keep_alive());
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, CLIENT_QUEUE_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let handle = BusHandle { client: client.clone(), connected: connected.clone() };

        let adapter = Self {
            client,
            eventloop,
            connected,
            subscriptions: vec![
                config.telemetry_topic().to_string(),
                config.gateway_topic().to_string(),
            ],
            reconnect_delay: config.mqtt_reconnect_delay(),
            host: config.mqtt_host().to_string(),
            port: config.mqtt_port(),
            inbound_tx,
            metrics,
        };
        (adapter, handle)
    }

    /// Drive the connection until shutdown or the ingestion channel closes
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(
            host = %self.host,
            port = %self.port,
            topics = ?self.subscriptions,
            "mqtt_adapter_started"
        );

        // Rate-limit drop warnings to 1 per second
        let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.disconnect().await;
                        return Ok(());
                    }
                }
                result = self.eventloop.poll() => {
                    match result {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            self.connected.store(true, Ordering::Relaxed);
                            info!(host = %self.host, port = %self.port, "mqtt_connected");
                            self.subscribe_all();
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let msg = InboundMessage {
                                topic: publish.topic,
                                payload: publish.payload,
                                received_at: Instant::now(),
                            };
                            let open = offer_inbound(
                                &self.inbound_tx,
                                msg,
                                &self.metrics,
                                &mut last_drop_warn,
                            );
                            if !open {
                                warn!("ingestion_channel_closed");
                                self.disconnect().await;
                                return Ok(());
                            }
                        }
                        Ok(Event::Incoming(Packet::Disconnect)) => {
                            self.connected.store(false, Ordering::Relaxed);
                            warn!("mqtt_disconnected_by_broker");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if self.connected.swap(false, Ordering::Relaxed) {
                                warn!(error = %e, "mqtt_disconnected");
                            } else {
                                warn!(
                                    error = %e,
                                    retry_secs = %self.reconnect_delay.as_secs(),
                                    "mqtt_connect_failed"
                                );
                            }

                            tokio::select! {
                                _ = tokio::time::sleep(self.reconnect_delay) => {}
                                _ = shutdown.changed() => {}
                            }
                            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                                self.disconnect().await;
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    fn subscribe_all(&self) {
        for topic in &self.subscriptions {
            match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => debug!(topic = %topic, "mqtt_subscribe_requested"),
                Err(e) => warn!(topic = %topic, error = %e, "mqtt_subscribe_failed"),
            }
        }
    }

    /// Send an MQTT DISCONNECT if connected and drive the event loop until it is written
    async fn disconnect(&mut self) {
        let was_connected = self.connected.swap(false, Ordering::Relaxed);
        if was_connected {
            match self.client.try_disconnect() {
                Ok(()) => self.flush_disconnect().await,
                Err(e) => debug!(error = %e, "mqtt_disconnect_failed"),
            }
        }
        info!(was_connected = %was_connected, "mqtt_shutdown");
    }

    async fn flush_disconnect(&mut self) {
        let eventloop = &mut self.eventloop;
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "mqtt_disconnect_poll_error");
                        return false;
                    }
                }
            }
        })
        .await;

        if !matches!(flushed, Ok(true)) {
            warn!("mqtt_disconnect_not_flushed");
        }
    }
}

/// Offer a message to the ingestion channel without blocking the event loop
///
/// A full channel drops the message (counted, warning at most once per
/// second). Returns false once the receiver is gone.
fn offer_inbound(
    tx: &mpsc::Sender<InboundMessage>,
    msg: InboundMessage,
    metrics: &Metrics,
    last_drop_warn: &mut Instant,
) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(msg)) => {
            metrics.record_channel_dropped();
            if last_drop_warn.elapsed() > Duration::from_secs(1) {
                warn!(topic = %msg.topic, "inbound_dropped: channel full");
                *last_drop_warn = Instant::now();
            }
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
