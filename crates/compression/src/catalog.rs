use std::sync::Arc;

use crate::variant::{Gzip, NoCompression, Variant, Zstd};
use crate::CompressionError;

/// Ordered, immutable set of compression variants.
///
/// The order is the download preference; the first entry is the default
/// choice for uploads. Build it once and share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Catalog {
    variants: Vec<Arc<dyn Variant>>,
}

impl Catalog {
    /// Creates a catalog, rejecting empty lists and duplicate names.
    pub fn new(variants: Vec<Arc<dyn Variant>>) -> Result<Self, CompressionError> {
        if variants.is_empty() {
            return Err(CompressionError::InvalidCatalog("no variants".into()));
        }
        for (i, variant) in variants.iter().enumerate() {
            if variants[..i].iter().any(|v| v.name() == variant.name()) {
                return Err(CompressionError::InvalidCatalog(format!(
                    "duplicate variant: {}",
                    variant.name()
                )));
            }
        }
        Ok(Self { variants })
    }

    /// zstd, then gzip, then uncompressed.
    pub fn standard() -> Self {
        Self {
            variants: vec![Arc::new(Zstd), Arc::new(Gzip), Arc::new(NoCompression)],
        }
    }

    /// Variants in preference order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Variant>> {
        self.variants.iter()
    }

    /// Looks a variant up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Variant>> {
        self.variants.iter().find(|v| v.name() == name)
    }

    /// The variant used for uploads when none is configured.
    pub fn default_variant(&self) -> &Arc<dyn Variant> {
        &self.variants[0]
    }

    /// Resolves the configured upload variant, falling back to the default.
    pub fn select(&self, name: Option<&str>) -> Result<Arc<dyn Variant>, CompressionError> {
        match name {
            None => Ok(Arc::clone(self.default_variant())),
            Some(name) => self
                .get(name)
                .cloned()
                .ok_or_else(|| CompressionError::UnknownVariant(name.to_string())),
        }
    }

    /// Variant names in preference order.
    pub fn names(&self) -> Vec<&'static str> {
        self.variants.iter().map(|v| v.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_prefers_zstd() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.names(), vec!["zstd", "gzip", "none"]);
        assert_eq!(catalog.default_variant().name(), "zstd");
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn get_by_name() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.get("gzip").unwrap().extension(), ".gz");
        assert!(catalog.get("brotli").is_none());
    }

    #[test]
    fn select_defaults_and_rejects_unknown() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.select(None).unwrap().name(), "zstd");
        assert_eq!(catalog.select(Some("none")).unwrap().name(), "none");
        assert!(matches!(
            catalog.select(Some("lz4")),
            Err(CompressionError::UnknownVariant(name)) if name == "lz4"
        ));
    }

    #[test]
    fn new_rejects_empty_and_duplicates() {
        assert!(Catalog::new(Vec::new()).is_err());
        let dup: Vec<Arc<dyn Variant>> = vec![Arc::new(Gzip), Arc::new(Gzip)];
        assert!(matches!(
            Catalog::new(dup),
            Err(CompressionError::InvalidCatalog(_))
        ));
    }

    #[test]
    fn custom_order_is_kept() {
        let catalog = Catalog::new(vec![Arc::new(Gzip), Arc::new(NoCompression)]).unwrap();
        assert_eq!(catalog.names(), vec!["gzip", "none"]);
        assert_eq!(catalog.default_variant().name(), "gzip");
    }
}
