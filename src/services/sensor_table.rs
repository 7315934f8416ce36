//! Per-device motion state
//!
//! Each device has its own slot mutex; the map lock is only held long enough
//! to find or create a slot. Callers that need a read-decide-write sequence
//! for one device run it inside `with_device` / `with_existing`, which holds
//! that device's lock for the whole closure.

use crate::domain::types::{DeviceId, SensorRecord, SeenMeta};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Slot {
    record: Option<SensorRecord>,
    /// Set when the slot was evicted from the map; holders must look up again
    retired: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

/// Table of sensor records keyed by device id
#[derive(Debug, Default)]
pub struct SensorStateTable {
    slots: RwLock<FxHashMap<DeviceId, SlotRef>>,
}

impl SensorStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_slot(&self, id: &DeviceId) -> Option<SlotRef> {
        self.slots.read().get(id).cloned()
    }

    fn slot(&self, id: &DeviceId) -> SlotRef {
        if let Some(slot) = self.existing_slot(id) {
            return slot;
        }
        self.slots.write().entry(id.clone()).or_default().clone()
    }

    /// Run `f` with exclusive access to the device's record, creating the slot if needed
    ///
    /// The record is None for a device never observed before.
    pub fn with_device<R>(
        &self,
        id: &DeviceId,
        f: impl FnOnce(&mut Option<SensorRecord>) -> R,
    ) -> R {
        loop {
            let slot = self.slot(id);
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            return f(&mut guard.record);
        }
    }

    /// Like `with_device`, but never creates a slot; returns None for unknown devices
    pub fn with_existing<R>(
        &self,
        id: &DeviceId,
        f: impl FnOnce(&mut SensorRecord) -> R,
    ) -> Option<R> {
        loop {
            let slot = self.existing_slot(id)?;
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            return guard.record.as_mut().map(f);
        }
    }

    /// Apply a telemetry observation, returning whether `active` changed
    pub fn observe(&self, id: &DeviceId, motion: bool, at: u64, meta: SeenMeta) -> bool {
        self.with_device(id, |slot| {
            let record = slot.get_or_insert_with(|| SensorRecord::new(meta.clone()));
            record.last_seen = meta;
            record.observe(motion, at)
        })
    }

    /// Force a device inactive; false if it was already inactive or unknown
    pub fn force_inactive(&self, id: &DeviceId, at: u64) -> bool {
        self.with_existing(id, |record| record.force_inactive(at)).unwrap_or(false)
    }

    pub fn get(&self, id: &DeviceId) -> Option<SensorRecord> {
        let slot = self.existing_slot(id)?;
        let guard = slot.lock();
        guard.record.clone()
    }

    /// Device ids currently marked active (snapshot)
    pub fn active_ids(&self) -> Vec<DeviceId> {
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.lock().record.as_ref().is_some_and(|r| r.active))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// All records, sorted by device id
    pub fn snapshot(&self) -> Vec<(DeviceId, SensorRecord)> {
        let mut records: Vec<(DeviceId, SensorRecord)> = self
            .slots
            .read()
            .iter()
            .filter_map(|(id, slot)| slot.lock().record.clone().map(|r| (id.clone(), r)))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }

    /// Number of devices with a record
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|slot| slot.lock().record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.lock().record.as_ref().is_some_and(|r| r.active))
            .count()
    }

    /// Remove inactive devices whose last telemetry is older than `max_idle`
    ///
    /// Active devices are never evicted. `on_evict` runs for each evicted id
    /// while its slot is still locked. Returns the evicted ids.
    pub fn evict_idle(
        &self,
        now: u64,
        max_idle: Duration,
        mut on_evict: impl FnMut(&DeviceId),
    ) -> Vec<DeviceId> {
        let max_idle_ms = max_idle.as_millis() as u64;
        let mut slots = self.slots.write();
        let mut evicted = Vec::new();

        slots.retain(|id, slot| {
            let mut guard = slot.lock();
            let idle = match guard.record.as_ref() {
                Some(record) => {
                    !record.active && now.saturating_sub(record.last_seen.updated_at) > max_idle_ms
                }
                None => true,
            };
            if idle {
                guard.retired = true;
                if guard.record.is_some() {
                    on_evict(id);
                    evicted.push(id.clone());
                }
            }
            !idle
        });

        evicted
    }
}
