//! On-disk locations of everything the mirror stores.

use std::path::{Path, PathBuf};

use content_core::{CatalogLocator, CATALOG_SCHEMA_VERSION};

use crate::schema::{CATALOG_FILE_NAME, ITEM_PACKAGE_FILE_NAME};

/// Paths under one storage root.
///
/// ```text
/// <root>/Inventory.sqlite
/// <root>/Catalogs/<name>/<version>/Catalog.sqlite
/// <root>/MergedCatalogs/<digest>/Catalog.sqlite
/// <root>/Items/<item id>/<schema>.<version>/package.sqlite
/// <root>/tmp/
/// ```
#[derive(Debug, Clone)]
pub struct ContentLayout {
    root: PathBuf,
}

impl ContentLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.root.join("Inventory.sqlite")
    }

    /// Scratch space on the same filesystem as the final locations.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Directory holding every installed version of a named catalog.
    pub fn catalog_dir(&self, name: &str) -> PathBuf {
        self.root.join("Catalogs").join(sanitize(name))
    }

    pub fn merged_catalogs_dir(&self) -> PathBuf {
        self.root.join("MergedCatalogs")
    }

    /// Directory holding every installed version of an item package.
    pub fn item_dir(&self, item_id: i64) -> PathBuf {
        self.root.join("Items").join(item_id.to_string())
    }

    /// Directory of one item package version under the current schema.
    pub fn item_package_dir(&self, item_id: i64, version: i64) -> PathBuf {
        self.item_dir(item_id)
            .join(format!("{}.{}", CATALOG_SCHEMA_VERSION, version))
    }

    pub fn item_package_path(&self, item_id: i64, version: i64) -> PathBuf {
        self.item_package_dir(item_id, version)
            .join(ITEM_PACKAGE_FILE_NAME)
    }
}

impl CatalogLocator for ContentLayout {
    fn catalog_path(&self, name: &str, version: i64) -> PathBuf {
        self.catalog_dir(name)
            .join(version.to_string())
            .join(CATALOG_FILE_NAME)
    }

    fn merged_catalog_path(&self, fingerprint: &str) -> PathBuf {
        let digest = blake3::hash(fingerprint.as_bytes());
        self.merged_catalogs_dir()
            .join(hex::encode(digest.as_bytes()))
            .join(CATALOG_FILE_NAME)
    }
}

/// Keep a source name to one safe path component.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}
