//! Infrastructure - configuration and metrics
//!
//! - `config` - Application configuration (TOML loading, defaults, runtime settings)
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod metrics;

pub use config::{Config, RuntimeSettings};
pub use metrics::Metrics;
