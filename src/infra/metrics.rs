//! Lock-free metrics collection and periodic reporting
//!
//! Counters are statistical only and use Relaxed ordering throughout.
//! Never read them to make pipeline decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Exported bucket layout for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Inbound bus messages handed to the ingestion path (monotonic)
    messages_total: AtomicU64,
    /// Messages since last report (reset on report)
    messages_since_report: AtomicU64,
    /// Ingestion latency sum, max and histogram (reset on report)
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Ingestion latency sum and histogram since start (monotonic, for scrapes)
    latency_sum_total_us: AtomicU64,
    latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    telemetry_total: AtomicU64,
    heartbeats_total: AtomicU64,
    /// Malformed topic or payload
    decode_dropped: AtomicU64,
    /// Bus -> ingestion channel full
    channel_dropped: AtomicU64,
    picked_up_total: AtomicU64,
    put_down_total: AtomicU64,
    play_total: AtomicU64,
    unknown_total: AtomicU64,
    timeout_total: AtomicU64,
    debounce_suppressed: AtomicU64,
    publish_sent: AtomicU64,
    publish_skipped: AtomicU64,
    sensors_evicted: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_total: AtomicU64::new(0),
            messages_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_total_us: AtomicU64::new(0),
            latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            telemetry_total: AtomicU64::new(0),
            heartbeats_total: AtomicU64::new(0),
            decode_dropped: AtomicU64::new(0),
            channel_dropped: AtomicU64::new(0),
            picked_up_total: AtomicU64::new(0),
            put_down_total: AtomicU64::new(0),
            play_total: AtomicU64::new(0),
            unknown_total: AtomicU64::new(0),
            timeout_total: AtomicU64::new(0),
            debounce_suppressed: AtomicU64::new(0),
            publish_sent: AtomicU64::new(0),
            publish_skipped: AtomicU64::new(0),
            sensors_evicted: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a message went through the ingestion path with given latency
    #[inline]
    pub fn record_message_processed(&self, latency_us: u64) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
        self.messages_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_telemetry(&self) {
        self.telemetry_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decode_dropped(&self) {
        self.decode_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_channel_dropped(&self) {
        self.channel_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_picked_up(&self) {
        self.picked_up_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_put_down(&self) {
        self.put_down_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_play(&self) {
        self.play_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown(&self) {
        self.unknown_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.timeout_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_debounce_suppressed(&self) {
        self.debounce_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a publish attempt
    #[inline]
    pub fn record_publish(&self, sent: bool) {
        if sent {
            self.publish_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publish_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_sensors_evicted(&self, count: u64) {
        self.sensors_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn messages_total(&self) -> u64 {
        self.messages_total.load(Ordering::Relaxed)
    }

    pub fn decode_dropped(&self) -> u64 {
        self.decode_dropped.load(Ordering::Relaxed)
    }

    pub fn play_total(&self) -> u64 {
        self.play_total.load(Ordering::Relaxed)
    }

    pub fn timeout_total(&self) -> u64 {
        self.timeout_total.load(Ordering::Relaxed)
    }

    pub fn publish_skipped(&self) -> u64 {
        self.publish_skipped.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, active_sensors: usize, known_sensors: usize) -> MetricsSummary {
        let window = PeriodWindow {
            messages: self.messages_since_report.swap(0, Ordering::Relaxed),
            latency_sum_us: self.latency_sum_us.swap(0, Ordering::Relaxed),
            latency_max_us: self.latency_max_us.swap(0, Ordering::Relaxed),
            lat_buckets: swap_buckets(&self.latency_buckets),
        };

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summarize(window, elapsed.as_secs_f64(), active_sensors, known_sensors)
    }

    /// Same view as `report`, without resetting the periodic counters
    ///
    /// Used by scrapers so they don't steal the periodic log's window.
    pub fn snapshot(&self, active_sensors: usize, known_sensors: usize) -> MetricsSummary {
        let window = PeriodWindow {
            messages: self.messages_since_report.load(Ordering::Relaxed),
            latency_sum_us: self.latency_sum_us.load(Ordering::Relaxed),
            latency_max_us: self.latency_max_us.load(Ordering::Relaxed),
            lat_buckets: load_buckets(&self.latency_buckets),
        };
        let elapsed_secs = self.last_report_time.lock().elapsed().as_secs_f64();

        self.summarize(window, elapsed_secs, active_sensors, known_sensors)
    }

    fn summarize(
        &self,
        window: PeriodWindow,
        elapsed_secs: f64,
        active_sensors: usize,
        known_sensors: usize,
    ) -> MetricsSummary {
        let messages_per_sec =
            if elapsed_secs > 0.0 { window.messages as f64 / elapsed_secs } else { 0.0 };
        let avg_latency =
            if window.messages > 0 { window.latency_sum_us / window.messages } else { 0 };

        MetricsSummary {
            messages_total: self.messages_total.load(Ordering::Relaxed),
            messages_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: window.latency_max_us,
            lat_p50_us: percentile_from_buckets(&window.lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&window.lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&window.lat_buckets, 0.99),
            lat_buckets: window.lat_buckets,
            lat_buckets_total: load_buckets(&self.latency_buckets_total),
            latency_sum_total_us: self.latency_sum_total_us.load(Ordering::Relaxed),
            telemetry_total: self.telemetry_total.load(Ordering::Relaxed),
            heartbeats_total: self.heartbeats_total.load(Ordering::Relaxed),
            decode_dropped: self.decode_dropped.load(Ordering::Relaxed),
            channel_dropped: self.channel_dropped.load(Ordering::Relaxed),
            picked_up_total: self.picked_up_total.load(Ordering::Relaxed),
            put_down_total: self.put_down_total.load(Ordering::Relaxed),
            play_total: self.play_total.load(Ordering::Relaxed),
            unknown_total: self.unknown_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            debounce_suppressed: self.debounce_suppressed.load(Ordering::Relaxed),
            publish_sent: self.publish_sent.load(Ordering::Relaxed),
            publish_skipped: self.publish_skipped.load(Ordering::Relaxed),
            sensors_evicted: self.sensors_evicted.load(Ordering::Relaxed),
            active_sensors,
            known_sensors,
        }
    }
}

/// Periodic counters captured for one summary
struct PeriodWindow {
    messages: u64,
    latency_sum_us: u64,
    latency_max_us: u64,
    lat_buckets: [u64; NUM_BUCKETS],
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub messages_total: u64,
    pub messages_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Ingestion latency histogram
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    /// Same histogram since start; never reset
    pub lat_buckets_total: [u64; NUM_BUCKETS],
    pub latency_sum_total_us: u64,
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub telemetry_total: u64,
    pub heartbeats_total: u64,
    pub decode_dropped: u64,
    pub channel_dropped: u64,
    pub picked_up_total: u64,
    pub put_down_total: u64,
    pub play_total: u64,
    pub unknown_total: u64,
    pub timeout_total: u64,
    pub debounce_suppressed: u64,
    pub publish_sent: u64,
    pub publish_skipped: u64,
    pub sensors_evicted: u64,
    pub active_sensors: usize,
    pub known_sensors: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            messages_total = %self.messages_total,
            messages_per_sec = format!("{:.1}", self.messages_per_sec),
            avg_latency_us = %self.avg_latency_us,
            p99_us = %self.lat_p99_us,
            active_sensors = %self.active_sensors,
            known_sensors = %self.known_sensors,
            picked_up = %self.picked_up_total,
            plays = %self.play_total,
            unknown = %self.unknown_total,
            timeouts = %self.timeout_total,
            publish_skipped = %self.publish_skipped,
            decode_dropped = %self.decode_dropped,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.messages_total(), 0);
        assert_eq!(metrics.play_total(), 0);
    }

    #[test]
    fn test_record_message() {
        let metrics = Metrics::new();

        metrics.record_message_processed(100);
        assert_eq!(metrics.messages_total(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_message_processed(200);
        assert_eq!(metrics.messages_total(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_record_publish() {
        let metrics = Metrics::new();
        metrics.record_publish(true);
        metrics.record_publish(false);
        metrics.record_publish(false);

        let summary = metrics.report(0, 0);
        assert_eq!(summary.publish_sent, 1);
        assert_eq!(summary.publish_skipped, 2);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_message_processed(100);
        metrics.record_message_processed(200);
        metrics.record_message_processed(300);
        metrics.record_play();

        let summary = metrics.report(3, 7);

        assert_eq!(summary.messages_total, 3);
        assert_eq!(summary.avg_latency_us, 200);
        assert_eq!(summary.max_latency_us, 300);
        assert_eq!(summary.active_sensors, 3);
        assert_eq!(summary.known_sensors, 7);
        assert_eq!(summary.play_total, 1);

        // Periodic counters reset, monotonic ones don't
        assert_eq!(metrics.messages_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.messages_total(), 3);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_message_processed(100);
        metrics.record_message_processed(300);

        let snapshot = metrics.snapshot(0, 0);
        assert_eq!(snapshot.avg_latency_us, 200);
        assert_eq!(snapshot.lat_buckets.iter().sum::<u64>(), 2);

        let report = metrics.report(0, 0);
        assert_eq!(report.avg_latency_us, 200);
        assert_eq!(report.max_latency_us, 300);
    }

    #[test]
    fn test_total_histogram_survives_report() {
        let metrics = Metrics::new();
        metrics.record_message_processed(150);
        metrics.report(0, 0);
        metrics.record_message_processed(250);

        let summary = metrics.report(0, 0);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(summary.lat_buckets_total[1], 1);
        assert_eq!(summary.lat_buckets_total[2], 1);
        assert_eq!(summary.latency_sum_total_us, 400);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_message_processed(150);
        }

        let summary = metrics.report(0, 0);
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
        assert_eq!(summary.lat_buckets[1], 100);
    }
}
