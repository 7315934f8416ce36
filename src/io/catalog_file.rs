//! Product catalog file loader
//!
//! Reads a TOML file of `[[product]]` tables:
//!
//! ```toml
//! [[product]]
//! mac = "AA:BB:CC:DD:EE:FF"
//! sku = "SKU-1"
//! name = "Ceramic mug"
//! video = "mug.mp4"
//! screen = "screen-1"
//! timeout_ms = 8000        # optional
//! dedup_window_ms = 3000   # optional
//! ```

use crate::domain::types::{DeviceId, Product};
use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    product: Vec<ProductEntry>,
}

#[derive(Debug, Deserialize)]
struct ProductEntry {
    mac: String,
    sku: String,
    #[serde(default)]
    name: String,
    video: String,
    screen: String,
    timeout_ms: Option<u64>,
    dedup_window_ms: Option<u64>,
}

impl ProductEntry {
    fn into_product(self) -> anyhow::Result<Product> {
        let Some(mac) = DeviceId::parse(&self.mac) else {
            bail!("product {} has an empty mac", self.sku);
        };
        Ok(Product {
            mac,
            sku: self.sku,
            name: self.name,
            video: self.video,
            screen: self.screen,
            timeout_override: self.timeout_ms.map(Duration::from_millis),
            dedup_override: self.dedup_window_ms.map(Duration::from_millis),
        })
    }
}

/// Load products from a catalog file
///
/// A missing file yields an empty catalog; a file that exists but does not
/// parse is an error. Duplicate MACs keep the last entry.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Product>> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(path = %path.display(), "catalog_file_missing");
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file {}", path.display()))?;
    let file: CatalogFile = toml::from_str(&content)
        .with_context(|| format!("failed to parse catalog file {}", path.display()))?;

    let products = file
        .product
        .into_iter()
        .map(ProductEntry::into_product)
        .collect::<anyhow::Result<Vec<_>>>()
        .with_context(|| format!("invalid product in {}", path.display()))?;

    info!(path = %path.display(), products = %products.len(), "catalog_loaded");
    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_normalizes_mac_and_overrides() {
        let file = write_file(
            r#"
[[product]]
mac = "AA:BB:CC:DD:EE:FF"
sku = "SKU-1"
name = "Mug"
video = "mug.mp4"
screen = "s1"
timeout_ms = 8000

[[product]]
mac = "11-22-33-44-55-66"
sku = "SKU-2"
video = "plate.mp4"
screen = "s2"
dedup_window_ms = 500
"#,
        );

        let products = load_catalog(file.path()).unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].mac.as_str(), "aabbccddeeff");
        assert_eq!(products[0].timeout_override, Some(Duration::from_millis(8000)));
        assert_eq!(products[0].dedup_override, None);
        assert_eq!(products[1].mac.as_str(), "112233445566");
        assert_eq!(products[1].name, "");
        assert_eq!(products[1].dedup_override, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let products = load_catalog(dir.path().join("products.toml")).unwrap();
        assert!(products.is_empty());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let file = write_file("[[product]]\nsku = 12\n");
        assert!(load_catalog(file.path()).is_err());

        let file = write_file(
            "[[product]]\nmac = \"::\"\nsku = \"S\"\nvideo = \"v\"\nscreen = \"s\"\n",
        );
        assert!(load_catalog(file.path()).is_err());
    }
}
