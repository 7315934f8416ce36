//! JSON file persistence for gateway records
//!
//! The file holds one object keyed by gateway id. Writes go to a sibling
//! temp file and are renamed into place so readers never see a partial file.

use crate::domain::types::GatewayRecord;
use crate::services::gateway_registry::GatewayStore;
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct JsonGatewayStore {
    path: PathBuf,
}

impl JsonGatewayStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl GatewayStore for JsonGatewayStore {
    fn load(&self) -> anyhow::Result<Vec<GatewayRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read gateways file {}", self.path.display()))?;
        let by_id: BTreeMap<String, GatewayRecord> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse gateways file {}", self.path.display()))?;

        // The key is authoritative for the id
        Ok(by_id
            .into_iter()
            .map(|(id, mut record)| {
                record.gateway_id = id;
                record
            })
            .collect())
    }

    fn flush(&self, records: &[GatewayRecord]) -> anyhow::Result<()> {
        let by_id: BTreeMap<&str, &GatewayRecord> =
            records.iter().map(|r| (r.gateway_id.as_str(), r)).collect();
        let body = serde_json::to_vec_pretty(&by_id).context("failed to encode gateways")?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let tmp = self.tmp_path();
        std::fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
