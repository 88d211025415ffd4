//! Editor capability catalogs.
//!
//! Each editor variant ships its own set of named animations, effects,
//! masks and fonts. The sets are data, not code: they change with editor
//! releases, so they live in embedded JSON tables and are parsed once on
//! first access.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::error;

use crate::config::EditorVariant;

const CLASSIC_CATALOG: &str = include_str!("../data/catalog_classic.json");
const PRO_CATALOG: &str = include_str!("../data/catalog_pro.json");

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub resource_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Catalog {
    #[serde(default)]
    pub animations: HashMap<String, CatalogEntry>,
    #[serde(default)]
    pub effects: HashMap<String, CatalogEntry>,
    #[serde(default)]
    pub masks: HashMap<String, CatalogEntry>,
    #[serde(default)]
    pub fonts: HashMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn animation(&self, key: &str) -> Option<&CatalogEntry> {
        self.animations.get(key)
    }

    pub fn effect(&self, key: &str) -> Option<&CatalogEntry> {
        self.effects.get(key)
    }

    pub fn mask(&self, key: &str) -> Option<&CatalogEntry> {
        self.masks.get(key)
    }

    pub fn font(&self, key: &str) -> Option<&CatalogEntry> {
        self.fonts.get(key)
    }
}

/// Catalog for the given variant. An unparseable embedded table yields an
/// empty catalog; lookups then miss instead of the process refusing to
/// start.
pub fn catalog(variant: EditorVariant) -> &'static Catalog {
    static CLASSIC: OnceLock<Catalog> = OnceLock::new();
    static PRO: OnceLock<Catalog> = OnceLock::new();
    let (cell, raw, name) = match variant {
        EditorVariant::Classic => (&CLASSIC, CLASSIC_CATALOG, "classic"),
        EditorVariant::Pro => (&PRO, PRO_CATALOG, "pro"),
    };
    cell.get_or_init(|| match serde_json::from_str(raw) {
        Ok(catalog) => catalog,
        Err(err) => {
            error!(variant = name, error = %err, "embedded catalog unreadable");
            Catalog::default()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_variant_catalogs_parse() {
        for variant in [EditorVariant::Classic, EditorVariant::Pro] {
            let cat = catalog(variant);
            assert!(!cat.animations.is_empty());
            assert!(!cat.masks.is_empty());
        }
    }

    #[test]
    fn variants_carry_distinct_sets() {
        let classic = catalog(EditorVariant::Classic);
        let pro = catalog(EditorVariant::Pro);
        assert!(pro.effects.len() >= classic.effects.len());
        assert!(pro.fonts.contains_key("serif_display"));
    }

    #[test]
    fn lookups_resolve_resource_ids() {
        let cat = catalog(EditorVariant::Classic);
        let entry = cat.mask("circle").unwrap();
        assert!(!entry.resource_id.is_empty());
    }
}
