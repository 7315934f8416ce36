//! Domain models - sensor, product, gateway and event types
//!
//! - `DeviceId` - normalized sensor MAC, the key shared by every table
//! - `SensorRecord` - per-device motion state
//! - `Product` / `GatewayRecord` - catalog and registry entries
//! - `Event` / `EventKind` - event log entries

pub mod event;
pub mod types;

pub use event::{epoch_ms, Event, EventKind};
pub use types::{DeviceId, GatewayRecord, PlayCommand, Product, SensorRecord, SeenMeta, Telemetry};
