//! Timeout watchdog: forces stale active sensors back to inactive
//!
//! Runs on its own tick, independent of the ingestion worker. A device is
//! stale when `now - last_active_at` exceeds its product's timeout override
//! or the global default. The sweep never triggers playback.

use crate::domain::event::{epoch_ms, Event, EventKind};
use crate::infra::config::RuntimeSettings;
use crate::infra::metrics::Metrics;
use crate::services::catalog::ProductCatalog;
use crate::services::debounce::DebounceController;
use crate::services::event_log::EventLog;
use crate::services::sensor_table::SensorStateTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub struct TimeoutWatchdog {
    sensors: Arc<SensorStateTable>,
    debounce: Arc<DebounceController>,
    catalog: Arc<dyn ProductCatalog>,
    events: Arc<EventLog>,
    settings: Arc<RuntimeSettings>,
    metrics: Arc<Metrics>,
    /// Inactive devices silent for longer than this are dropped; None keeps them forever
    idle_evict_after: Option<Duration>,
}

impl TimeoutWatchdog {
    pub fn new(
        sensors: Arc<SensorStateTable>,
        debounce: Arc<DebounceController>,
        catalog: Arc<dyn ProductCatalog>,
        events: Arc<EventLog>,
        settings: Arc<RuntimeSettings>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sensors, debounce, catalog, events, settings, metrics, idle_evict_after: None }
    }

    /// Builder method to enable idle eviction
    pub fn with_idle_eviction(mut self, idle_evict_after: Option<Duration>) -> Self {
        self.idle_evict_after = idle_evict_after;
        self
    }

    /// Run one sweep at `now` (epoch ms), returning the number of timeouts emitted
    pub fn sweep(&self, now: u64) -> usize {
        let default_timeout = self.settings.sensor_timeout();
        let mut timed_out = 0;

        for id in self.sensors.active_ids() {
            let product = self.catalog.lookup(&id);
            let timeout =
                product.as_ref().and_then(|p| p.timeout_override).unwrap_or(default_timeout);
            let timeout_ms = timeout.as_millis() as u64;

            let fired = self.sensors.with_existing(&id, |record| {
                let Some(last_active_at) = record.last_active_at else {
                    return false;
                };
                if now.saturating_sub(last_active_at) <= timeout_ms || !record.force_inactive(now) {
                    return false;
                }

                let (sku, name) = product
                    .as_ref()
                    .map(|p| (p.sku.as_str(), p.name.as_str()))
                    .unwrap_or_default();
                info!(
                    mac = %id,
                    sku = %sku,
                    idle_ms = %now.saturating_sub(last_active_at),
                    timeout_ms = %timeout_ms,
                    "sensor_timeout"
                );
                self.events.append(
                    Event::new(EventKind::Timeout, id.as_str(), now)
                        .with_attr("sku", sku)
                        .with_attr("name", name)
                        .with_attr("timeout_ms", timeout_ms),
                );
                true
            });

            if fired == Some(true) {
                self.metrics.record_timeout();
                timed_out += 1;
            }
        }

        if let Some(max_idle) = self.idle_evict_after {
            let evicted = self.sensors.evict_idle(now, max_idle, |id| self.debounce.forget(id));
            if !evicted.is_empty() {
                self.metrics.record_sensors_evicted(evicted.len() as u64);
                debug!(count = %evicted.len(), "sensors_evicted");
            }
        }

        timed_out
    }

    /// Sweep every `tick` until shutdown
    pub async fn run(self, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = %tick.as_millis(), "watchdog_started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(epoch_ms());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("watchdog_shutdown");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{DeviceId, Product, SeenMeta};
    use crate::services::catalog::Catalog;

    struct Fixture {
        watchdog: TimeoutWatchdog,
        sensors: Arc<SensorStateTable>,
        debounce: Arc<DebounceController>,
        catalog: Arc<Catalog>,
        events: Arc<EventLog>,
    }

    fn fixture() -> Fixture {
        let sensors = Arc::new(SensorStateTable::new());
        let debounce = Arc::new(DebounceController::new());
        let catalog = Arc::new(Catalog::new());
        let events = Arc::new(EventLog::new());
        let watchdog = TimeoutWatchdog::new(
            sensors.clone(),
            debounce.clone(),
            catalog.clone(),
            events.clone(),
            Arc::new(RuntimeSettings::new(Duration::from_secs(2), Duration::from_secs(5))),
            Arc::new(Metrics::new()),
        );
        Fixture { watchdog, sensors, debounce, catalog, events }
    }

    fn id(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    fn activate(sensors: &SensorStateTable, dev: &str, at: u64) {
        let meta = SeenMeta { gateway_id: "gw1".to_string(), rssi: -50, updated_at: at };
        sensors.observe(&id(dev), true, at, meta);
    }

    #[test]
    fn test_fresh_device_untouched() {
        let f = fixture();
        activate(&f.sensors, "aa", 10_000);

        assert_eq!(f.watchdog.sweep(15_000), 0);
        assert!(f.sensors.get(&id("aa")).unwrap().active);
        assert!(f.events.is_empty());
    }

    #[test]
    fn test_repeated_sweeps_emit_one_timeout() {
        let f = fixture();
        activate(&f.sensors, "aa", 10_000);

        assert_eq!(f.watchdog.sweep(15_001), 1);
        for now in (16_000..30_000).step_by(1_000) {
            assert_eq!(f.watchdog.sweep(now), 0);
        }

        let events = f.events.recent(usize::MAX);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Timeout);
        assert!(!f.sensors.get(&id("aa")).unwrap().active);
    }

    #[test]
    fn test_timeout_event_carries_product() {
        let f = fixture();
        f.catalog.upsert(Product {
            mac: id("aa"),
            sku: "SKU-9".to_string(),
            name: "Speaker".to_string(),
            video: "speaker.mp4".to_string(),
            screen: "s2".to_string(),
            timeout_override: None,
            dedup_override: None,
        });
        activate(&f.sensors, "aa", 10_000);
        f.watchdog.sweep(20_000);

        let events = f.events.recent(1);
        let event = &events[0];
        assert_eq!(event.attr_str("sku"), Some("SKU-9"));
        assert_eq!(event.attributes["timeout_ms"], 5_000);
    }

    #[test]
    fn test_idle_eviction_forgets_trigger_record() {
        let f = fixture();
        let watchdog = f.watchdog.with_idle_eviction(Some(Duration::from_secs(60)));
        activate(&f.sensors, "aa", 10_000);
        f.debounce.should_trigger(&id("aa"), 10_000, Duration::from_secs(2));

        watchdog.sweep(20_000);
        assert!(f.sensors.get(&id("aa")).is_some());

        watchdog.sweep(71_000);
        assert!(f.sensors.get(&id("aa")).is_none());
        assert_eq!(f.debounce.last_triggered(&id("aa")), None);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(f.watchdog.run(Duration::from_millis(10), rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
