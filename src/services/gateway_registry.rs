//! Gateway registry: upserted on every heartbeat, flushed to a store
//!
//! Flushes happen outside the record lock but under a separate flush lock,
//! so the store always receives snapshots in upsert order.

use crate::domain::types::{GatewayRecord, GatewayUpdate};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Persistence sink for gateway records
pub trait GatewayStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Vec<GatewayRecord>>;

    /// Persist the full table
    fn flush(&self, records: &[GatewayRecord]) -> anyhow::Result<()>;
}

pub struct GatewayRegistry {
    records: Mutex<FxHashMap<String, GatewayRecord>>,
    store: Option<Box<dyn GatewayStore>>,
    flush_lock: Mutex<()>,
}

impl GatewayRegistry {
    /// Registry without persistence
    pub fn in_memory() -> Self {
        Self { records: Mutex::new(FxHashMap::default()), store: None, flush_lock: Mutex::new(()) }
    }

    /// Registry backed by `store`, seeded with whatever it holds
    pub fn with_store(store: Box<dyn GatewayStore>) -> anyhow::Result<Self> {
        let records = store
            .load()?
            .into_iter()
            .map(|record| (record.gateway_id.clone(), record))
            .collect();
        Ok(Self { records: Mutex::new(records), store: Some(store), flush_lock: Mutex::new(()) })
    }

    /// Create or merge a gateway record and refresh `last_seen_at`
    ///
    /// Missing or empty fields in `update` never clear stored values, and
    /// `label` is left untouched.
    pub fn upsert(&self, gateway_id: &str, update: &GatewayUpdate, at: u64) -> GatewayRecord {
        let _flush = self.flush_lock.lock();

        let (record, snapshot) = {
            let mut records = self.records.lock();
            let record = records.entry(gateway_id.to_string()).or_insert_with(|| GatewayRecord {
                gateway_id: gateway_id.to_string(),
                mac: String::new(),
                ip: String::new(),
                board: String::new(),
                label: String::new(),
                last_seen_at: at,
            });
            merge_field(&mut record.mac, update.mac.as_deref());
            merge_field(&mut record.ip, update.ip.as_deref());
            merge_field(&mut record.board, update.board.as_deref());
            record.last_seen_at = at;
            let record = record.clone();
            (record, self.store.as_ref().map(|_| sorted(&records)))
        };

        if let (Some(store), Some(snapshot)) = (self.store.as_ref(), snapshot) {
            self.flush(store.as_ref(), &snapshot);
        }
        record
    }

    /// Set the operator label; returns false for unknown gateways
    ///
    /// Entry point for the control plane. Heartbeats never touch `label`.
    pub fn set_label(&self, gateway_id: &str, label: &str) -> bool {
        let _flush = self.flush_lock.lock();

        let snapshot = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(gateway_id) else {
                return false;
            };
            record.label = label.to_string();
            sorted(&records)
        };

        if let Some(store) = self.store.as_ref() {
            self.flush(store.as_ref(), &snapshot);
        }
        true
    }

    pub fn get(&self, gateway_id: &str) -> Option<GatewayRecord> {
        self.records.lock().get(gateway_id).cloned()
    }

    /// All gateways, sorted by id
    pub fn list(&self) -> Vec<GatewayRecord> {
        sorted(&self.records.lock())
    }

    fn flush(&self, store: &dyn GatewayStore, snapshot: &[GatewayRecord]) {
        match store.flush(snapshot) {
            Ok(()) => debug!(gateways = %snapshot.len(), "gateway_registry_flushed"),
            Err(e) => warn!(error = %format!("{:#}", e), "gateway_registry_flush_failed"),
        }
    }
}

fn merge_field(field: &mut String, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        *field = value.to_string();
    }
}

fn sorted(records: &FxHashMap<String, GatewayRecord>) -> Vec<GatewayRecord> {
    let mut list: Vec<GatewayRecord> = records.values().cloned().collect();
    list.sort_by(|a, b| a.gateway_id.cmp(&b.gateway_id));
    list
}
