//! Per-device trigger debounce
//!
//! At most one trigger per window per device, however many motion pulses
//! arrive inside the window. The window is passed per call so products can
//! carry their own.

use crate::domain::types::DeviceId;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct DebounceController {
    /// Epoch ms of the last dispatched trigger per device
    last_triggered: Mutex<FxHashMap<DeviceId, u64>>,
}

impl DebounceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow a trigger at `at` if the last one was at least `window` ago
    ///
    /// On success `at` becomes the device's last trigger time. A device
    /// with no prior trigger is always allowed.
    pub fn should_trigger(&self, id: &DeviceId, at: u64, window: Duration) -> bool {
        let window_ms = window.as_millis() as u64;
        let mut last_triggered = self.last_triggered.lock();

        if let Some(&last) = last_triggered.get(id) {
            if at.saturating_sub(last) < window_ms {
                return false;
            }
        }
        last_triggered.insert(id.clone(), at);
        true
    }

    pub fn last_triggered(&self, id: &DeviceId) -> Option<u64> {
        self.last_triggered.lock().get(id).copied()
    }

    /// Drop the trigger record of an evicted device
    pub fn forget(&self, id: &DeviceId) {
        self.last_triggered.lock().remove(id);
    }
}
