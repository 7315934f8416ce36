//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT bus adapter (telemetry in, play commands out)
//! - `http_api` - Read-only status server
//! - `prometheus` - Prometheus text exposition for `/metrics`
//! - `catalog_file` - Product catalog TOML loader
//! - `gateway_store` - JSON file persistence for gateway records

pub mod catalog_file;
pub mod gateway_store;
pub mod http_api;
pub mod mqtt;
pub mod prometheus;

// Re-export commonly used types
pub use catalog_file::load_catalog;
pub use gateway_store::JsonGatewayStore;
pub use http_api::{start_status_server, ApiState};
pub use mqtt::{BusAdapter, BusHandle};
