//! Product catalog: sensor MAC -> product and display metadata

use crate::domain::types::{DeviceId, Product};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Read-only product lookup used by the classifier and watchdog
pub trait ProductCatalog: Send + Sync {
    fn lookup(&self, id: &DeviceId) -> Option<Product>;

    fn contains(&self, id: &DeviceId) -> bool {
        self.lookup(id).is_some()
    }
}

/// In-memory catalog, mutated by the control plane and file reloads
#[derive(Debug, Default)]
pub struct Catalog {
    products: RwLock<FxHashMap<DeviceId, Product>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_products(products: Vec<Product>) -> Self {
        let catalog = Self::new();
        catalog.replace_all(products);
        catalog
    }

    /// Insert or replace the product bound to `product.mac`
    pub fn upsert(&self, product: Product) {
        self.products.write().insert(product.mac.clone(), product);
    }

    pub fn remove(&self, id: &DeviceId) -> Option<Product> {
        self.products.write().remove(id)
    }

    /// Swap in a whole new product set in one step
    pub fn replace_all(&self, products: Vec<Product>) {
        let map: FxHashMap<DeviceId, Product> =
            products.into_iter().map(|p| (p.mac.clone(), p)).collect();
        *self.products.write() = map;
    }

    /// All products, sorted by MAC
    pub fn products(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self.products.read().values().cloned().collect();
        products.sort_by(|a, b| a.mac.cmp(&b.mac));
        products
    }

    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.read().is_empty()
    }
}

impl ProductCatalog for Catalog {
    fn lookup(&self, id: &DeviceId) -> Option<Product> {
        self.products.read().get(id).cloned()
    }

    fn contains(&self, id: &DeviceId) -> bool {
        self.products.read().contains_key(id)
    }
}
