use std::sync::Arc;

use lfs_s3_compression::{Catalog, Variant};
use lfs_s3_remote::{ObjectMetadata, ObjectStore, StoreError};
use tracing::debug;

/// Maps oids to remote keys and finds which variant an object is stored under.
#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn ObjectStore>,
    catalog: Arc<Catalog>,
    root_path: String,
}

impl Resolver {
    /// Creates a resolver. Leading and trailing `/` are trimmed from `root_path`.
    pub fn new(store: Arc<dyn ObjectStore>, catalog: Arc<Catalog>, root_path: &str) -> Self {
        Self {
            store,
            catalog,
            root_path: root_path.trim_matches('/').to_string(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Remote key for `oid` stored under `variant`.
    pub fn key(&self, oid: &str, variant: &dyn Variant) -> String {
        if self.root_path.is_empty() {
            format!("{oid}{}", variant.extension())
        } else {
            format!("{}/{oid}{}", self.root_path, variant.extension())
        }
    }

    /// Fetches metadata for `oid` under `variant`; `None` if absent.
    pub fn probe(
        &self,
        oid: &str,
        variant: &dyn Variant,
        with_checksum: bool,
    ) -> Result<Option<ObjectMetadata>, StoreError> {
        let key = self.key(oid, variant);
        let meta = self.store.head(&key, with_checksum)?;
        debug!(key = %key, found = meta.is_some(), "probed remote object");
        Ok(meta)
    }

    /// Finds the first variant, in catalog order, that holds `oid`.
    pub fn resolve(
        &self,
        oid: &str,
    ) -> Result<Option<(Arc<dyn Variant>, ObjectMetadata)>, StoreError> {
        for variant in self.catalog.iter() {
            if let Some(meta) = self.probe(oid, variant.as_ref(), false)? {
                return Ok(Some((Arc::clone(variant), meta)));
            }
        }
        Ok(None)
    }
}
