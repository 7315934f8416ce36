//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "pickup".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Fixed delay between reconnect attempts
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_telemetry_topic")]
    pub telemetry_topic: String,
    #[serde(default = "default_gateway_topic")]
    pub gateway_topic: String,
    /// Capacity of the bus -> ingestion channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            telemetry_topic: default_telemetry_topic(),
            gateway_topic: default_gateway_topic(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "pickup-bridge".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_telemetry_topic() -> String {
    "bthome/+/state".to_string()
}

fn default_gateway_topic() -> String {
    "gateway/+/info".to_string()
}

fn default_channel_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// Minimum time between two playback triggers for one sensor
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    /// Active sensors with no motion report for this long are forced inactive
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_watchdog_tick_ms")]
    pub watchdog_tick_ms: u64,
    /// Drop inactive sensors not heard from for this long (0 = keep forever)
    #[serde(default)]
    pub idle_evict_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: default_dedup_window_ms(),
            timeout_ms: default_timeout_ms(),
            watchdog_tick_ms: default_watchdog_tick_ms(),
            idle_evict_secs: 0,
        }
    }
}

fn default_dedup_window_ms() -> u64 {
    2000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_watchdog_tick_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_product_map_file")]
    pub product_map_file: String,
    #[serde(default = "default_gateways_file")]
    pub gateways_file: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            product_map_file: default_product_map_file(),
            gateways_file: default_gateways_file(),
        }
    }
}

fn default_product_map_file() -> String {
    "data/products.toml".to_string()
}

fn default_gateways_file() -> String {
    "data/gateways.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Status server port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_keep_alive_secs: u64,
    mqtt_reconnect_delay_secs: u64,
    telemetry_topic: String,
    gateway_topic: String,
    channel_capacity: usize,
    dedup_window_ms: u64,
    sensor_timeout_ms: u64,
    watchdog_tick_ms: u64,
    idle_evict_secs: u64,
    product_map_file: String,
    gateways_file: String,
    http_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_keep_alive_secs: toml_config.mqtt.keep_alive_secs,
            mqtt_reconnect_delay_secs: toml_config.mqtt.reconnect_delay_secs,
            telemetry_topic: toml_config.mqtt.telemetry_topic,
            gateway_topic: toml_config.mqtt.gateway_topic,
            channel_capacity: toml_config.mqtt.channel_capacity.max(1),
            dedup_window_ms: toml_config.sensor.dedup_window_ms,
            sensor_timeout_ms: toml_config.sensor.timeout_ms,
            watchdog_tick_ms: toml_config.sensor.watchdog_tick_ms.max(1),
            idle_evict_secs: toml_config.sensor.idle_evict_secs,
            product_map_file: toml_config.data.product_map_file,
            gateways_file: toml_config.data.gateways_file,
            http_port: toml_config.http.port,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file: config_file.to_string(),
        }
    }

    /// Config file path: the CLI value, then `CONFIG_FILE`, then the default
    pub fn resolve_config_path(cli: Option<String>) -> String {
        cli.or_else(|| env::var("CONFIG_FILE").ok())
            .unwrap_or_else(|| "config/dev.toml".to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_defaults_used");
                Self { config_file: path.to_string(), ..Self::default() }
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }

    pub fn mqtt_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.mqtt_reconnect_delay_secs)
    }

    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    pub fn gateway_topic(&self) -> &str {
        &self.gateway_topic
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }

    pub fn watchdog_tick(&self) -> Duration {
        Duration::from_millis(self.watchdog_tick_ms)
    }

    /// Idle eviction threshold, None when disabled
    pub fn idle_evict_after(&self) -> Option<Duration> {
        (self.idle_evict_secs > 0).then(|| Duration::from_secs(self.idle_evict_secs))
    }

    pub fn product_map_file(&self) -> &str {
        &self.product_map_file
    }

    pub fn gateways_file(&self) -> &str {
        &self.gateways_file
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the debounce window
    #[cfg(test)]
    pub fn with_dedup_window_ms(mut self, ms: u64) -> Self {
        self.dedup_window_ms = ms;
        self
    }

    /// Builder method for tests to point the bus at a local broker
    #[cfg(test)]
    pub fn with_mqtt_endpoint(mut self, host: &str, port: u16) -> Self {
        self.mqtt_host = host.to_string();
        self.mqtt_port = port;
        self.mqtt_reconnect_delay_secs = 0;
        self
    }
}

/// Settings the control plane may change while the service runs
///
/// Read on every classification and sweep; stored as milliseconds.
#[derive(Debug)]
pub struct RuntimeSettings {
    dedup_window_ms: AtomicU64,
    sensor_timeout_ms: AtomicU64,
}

impl RuntimeSettings {
    pub fn new(dedup_window: Duration, sensor_timeout: Duration) -> Self {
        Self {
            dedup_window_ms: AtomicU64::new(dedup_window.as_millis() as u64),
            sensor_timeout_ms: AtomicU64::new(sensor_timeout.as_millis() as u64),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.dedup_window(), config.sensor_timeout())
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms.load(Ordering::Relaxed))
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_dedup_window(&self, window: Duration) {
        self.dedup_window_ms.store(window.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set_sensor_timeout(&self, timeout: Duration) {
        self.sensor_timeout_ms.store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Apply the reloadable subset of a freshly loaded config
    pub fn apply(&self, config: &Config) {
        self.set_dedup_window(config.dedup_window());
        self.set_sensor_timeout(config.sensor_timeout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.telemetry_topic(), "bthome/+/state");
        assert_eq!(config.gateway_topic(), "gateway/+/info");
        assert_eq!(config.mqtt_reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.dedup_window(), Duration::from_secs(2));
        assert_eq!(config.sensor_timeout(), Duration::from_secs(5));
        assert_eq!(config.watchdog_tick(), Duration::from_secs(1));
        assert_eq!(config.idle_evict_after(), None);
        assert_eq!(config.http_port(), 8080);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[sensor]
timeout_ms = 8000
idle_evict_secs = 3600
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline");
        assert_eq!(config.sensor_timeout(), Duration::from_secs(8));
        assert_eq!(config.dedup_window(), Duration::from_secs(2));
        assert_eq!(config.idle_evict_after(), Some(Duration::from_secs(3600)));
        assert_eq!(config.mqtt_host(), "localhost");
    }

    #[test]
    fn test_resolve_config_path_default() {
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(None), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_prefers_cli() {
        let path = Config::resolve_config_path(Some("config/store.toml".to_string()));
        assert_eq!(path, "config/store.toml");
    }

    #[test]
    fn test_runtime_settings_apply() {
        let settings = RuntimeSettings::from_config(&Config::default());
        assert_eq!(settings.dedup_window(), Duration::from_secs(2));

        settings.set_sensor_timeout(Duration::from_millis(1500));
        assert_eq!(settings.sensor_timeout(), Duration::from_millis(1500));

        settings.apply(&Config::default().with_dedup_window_ms(750));
        assert_eq!(settings.dedup_window(), Duration::from_millis(750));
        assert_eq!(settings.sensor_timeout(), Duration::from_secs(5));
    }
}
