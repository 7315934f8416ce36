//! Pickup bridge library
//!
//! Turns BLE motion telemetry from MQTT into debounced pickup events and
//! screen play commands. Exposes modules for integration testing and the
//! service binary.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
