//! Prometheus text exposition for pipeline metrics
//!
//! Served at `/metrics` by the status server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
///
/// Reads a non-resetting snapshot so scrapes don't disturb the periodic log.
pub fn format_prometheus_metrics(
    metrics: &Metrics,
    active_sensors: usize,
    known_sensors: usize,
    bus_connected: bool,
    site_id: &str,
) -> String {
    let summary = metrics.snapshot(active_sensors, known_sensors);
    let mut output = String::with_capacity(4096);

    write_ingest_metrics(&mut output, site_id, &summary);
    write_event_metrics(&mut output, site_id, &summary);
    write_bus_metrics(&mut output, site_id, &summary, bus_connected);
    write_sensor_metrics(&mut output, site_id, &summary);

    output
}

fn write_ingest_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "pickup_messages_total",
        "Inbound bus messages processed",
        MetricType::Counter,
        site,
        summary.messages_total,
    );
    let _ = writeln!(output, "# HELP pickup_messages_per_sec Messages processed per second");
    let _ = writeln!(output, "# TYPE pickup_messages_per_sec gauge");
    let _ = writeln!(
        output,
        "pickup_messages_per_sec{{site=\"{site}\"}} {:.2}",
        summary.messages_per_sec
    );
    write_metric(
        output,
        "pickup_telemetry_total",
        "Telemetry samples decoded",
        MetricType::Counter,
        site,
        summary.telemetry_total,
    );
    write_metric(
        output,
        "pickup_heartbeats_total",
        "Gateway heartbeats decoded",
        MetricType::Counter,
        site,
        summary.heartbeats_total,
    );
    write_metric(
        output,
        "pickup_decode_dropped_total",
        "Messages dropped for bad topic or payload",
        MetricType::Counter,
        site,
        summary.decode_dropped,
    );
    write_metric(
        output,
        "pickup_channel_dropped_total",
        "Messages dropped because the ingestion channel was full",
        MetricType::Counter,
        site,
        summary.channel_dropped,
    );

    write_histogram(
        output,
        "pickup_ingest_latency_us",
        "Receive to processed latency in microseconds",
        site,
        &summary.lat_buckets_total,
        summary.latency_sum_total_us,
    );
    write_metric(
        output,
        "pickup_ingest_latency_p99_us",
        "99th percentile ingest latency over the current report window",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_event_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP pickup_events_total Events logged by kind");
    let _ = writeln!(output, "# TYPE pickup_events_total counter");
    for (kind, count) in [
        ("picked_up", summary.picked_up_total),
        ("put_down", summary.put_down_total),
        ("play", summary.play_total),
        ("unknown", summary.unknown_total),
        ("timeout", summary.timeout_total),
    ] {
        let _ = writeln!(output, "pickup_events_total{{site=\"{site}\",kind=\"{kind}\"}} {count}");
    }
    write_metric(
        output,
        "pickup_debounce_suppressed_total",
        "Pickups suppressed by the debounce window",
        MetricType::Counter,
        site,
        summary.debounce_suppressed,
    );
}

fn write_bus_metrics(output: &mut String, site: &str, summary: &MetricsSummary, connected: bool) {
    write_metric(
        output,
        "pickup_bus_connected",
        "Bus connection state (1=connected)",
        MetricType::Gauge,
        site,
        u64::from(connected),
    );
    write_metric(
        output,
        "pickup_publish_sent_total",
        "Play commands handed to the bus client",
        MetricType::Counter,
        site,
        summary.publish_sent,
    );
    write_metric(
        output,
        "pickup_publish_skipped_total",
        "Play commands skipped (disconnected or client queue full)",
        MetricType::Counter,
        site,
        summary.publish_skipped,
    );
}

fn write_sensor_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "pickup_active_sensors",
        "Sensors currently active",
        MetricType::Gauge,
        site,
        summary.active_sensors as u64,
    );
    write_metric(
        output,
        "pickup_known_sensors",
        "Sensors with a state record",
        MetricType::Gauge,
        site,
        summary.known_sensors as u64,
    );
    write_metric(
        output,
        "pickup_sensors_evicted_total",
        "Idle sensors evicted",
        MetricType::Counter,
        site,
        summary.sensors_evicted,
    );
}
