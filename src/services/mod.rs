//! Services - correlation logic and shared state
//!
//! This module contains the core pipeline services:
//! - `pipeline` - Ingestion entry point, routing and read-only views
//! - `classifier` - Per-device pickup state machine
//! - `watchdog` - Forces stale active sensors back to inactive
//! - `sensor_table` - Per-device motion state with per-device locking
//! - `debounce` - Per-device trigger gate
//! - `event_log` - Bounded newest-first event log
//! - `catalog` - Product lookup by sensor MAC
//! - `gateway_registry` - Gateway records with a persistence sink
//! - `publisher` - Outbound bus seam

pub mod catalog;
pub mod classifier;
pub mod debounce;
pub mod event_log;
pub mod gateway_registry;
pub mod pipeline;
pub mod publisher;
pub mod sensor_table;
pub mod watchdog;

// Re-export commonly used types
pub use catalog::{Catalog, ProductCatalog};
pub use classifier::{Classification, EventClassifier, PlayDispatch, Trigger};
pub use debounce::DebounceController;
pub use event_log::EventLog;
pub use gateway_registry::{GatewayRegistry, GatewayStore};
pub use pipeline::{Pipeline, SensorView};
pub use publisher::{BusPublisher, DisconnectedPublisher};
pub use sensor_table::SensorStateTable;
pub use watchdog::TimeoutWatchdog;
