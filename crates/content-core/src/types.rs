//! Core domain types for the content mirror.

use serde::{Deserialize, Serialize};

/// Name of the primary catalog source. It is always eligible for update.
pub const DEFAULT_CATALOG_NAME: &str = "default";

/// Schema version of catalogs and item packages this code understands.
///
/// An item package built under any other schema version is treated as
/// not installed.
pub const CATALOG_SCHEMA_VERSION: i64 = 3;

/// A named, independently versioned contributor to the merged catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogSource {
    /// Source name ("default" for the primary source).
    pub name: String,

    /// Base location that remote resources are resolved against.
    pub base_url: String,
}

impl CatalogSource {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    /// The primary source at `base_url`.
    pub fn default_source(base_url: impl Into<String>) -> Self {
        Self::new(DEFAULT_CATALOG_NAME, base_url)
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_CATALOG_NAME
    }

    /// Resolve `path` against this source's base location.
    pub fn resource_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// Join a base location and a relative path with exactly one separator.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Inventory record for one installed named catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    /// Catalog name, unique within the inventory.
    pub name: String,

    /// Base location, `None` for the default catalog.
    pub base_url: Option<String>,

    /// Installed catalog version.
    pub version: i64,
}

impl CatalogMetadata {
    pub fn new(name: impl Into<String>, base_url: Option<String>, version: i64) -> Self {
        Self {
            name: name.into(),
            base_url,
            version,
        }
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_CATALOG_NAME
    }
}

/// Inventory record for one installed item package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    /// Catalog schema version the package was built for.
    pub schema_version: i64,

    /// Item package version.
    pub item_package_version: i64,
}

impl InstalledVersion {
    pub fn new(schema_version: i64, item_package_version: i64) -> Self {
        Self {
            schema_version,
            item_package_version,
        }
    }
}

/// How urgently an item package should be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallPriority {
    /// Queued behind other downloads, subject to the concurrency cap.
    #[default]
    Default,

    /// User-initiated; starts immediately.
    High,
}

/// Origin of catalog rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub type_id: i64,
}

/// One document entry within a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Row id, stable across catalog versions.
    pub id: i64,

    /// Stable external identifier used to locate the item package remotely.
    pub external_id: String,

    pub language_id: i64,
    pub source_id: i64,
    pub platform_id: i64,
    pub uri: String,
    pub title: String,
    pub item_category_id: i64,

    /// Latest item package version published under the current schema.
    pub latest_version: i64,

    pub obsolete: bool,
}

/// A collection node in the library hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryCollection {
    pub id: i64,
    pub external_id: String,
    pub library_section_id: Option<i64>,
    pub library_section_external_id: Option<String>,
    pub position: i64,
    pub title: String,
    pub type_id: i64,
}

/// A titled grouping of nodes inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub id: i64,
    pub external_id: String,
    pub library_collection_id: i64,
    pub library_collection_external_id: String,
    pub position: i64,
    pub title: Option<String>,
    pub index_title: Option<String>,
}

/// An item leaf in the library hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: i64,
    pub external_id: String,
    pub library_section_id: i64,
    pub library_section_external_id: String,
    pub position: i64,
    pub title: String,
    pub obsolete: bool,
    pub item_id: i64,
    pub item_external_id: String,
}

/// A child of a library section: either a nested collection or an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LibraryNode {
    Collection(LibraryCollection),
    Item(LibraryItem),
}

impl LibraryNode {
    pub fn position(&self) -> i64 {
        match self {
            Self::Collection(collection) => collection.position,
            Self::Item(item) => item.position,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Collection(collection) => &collection.title,
            Self::Item(item) => &item.title,
        }
    }
}

/// One renderable document inside an item package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subitem {
    pub id: i64,
    pub uri: String,
    pub doc_id: String,
    pub doc_version: i64,
    pub position: i64,
    pub title_html: String,
    pub title: String,
    pub web_url: String,
}

/// A navigation collection inside an item package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavCollection {
    pub id: i64,
    pub nav_section_id: Option<i64>,
    pub position: i64,
    pub title_html: String,
    pub uri: String,
}

/// A grouping of navigation nodes inside a nav collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavSection {
    pub id: i64,
    pub nav_collection_id: i64,
    pub position: i64,
    pub title: Option<String>,
}

/// A navigation leaf pointing at a subitem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavItem {
    pub id: i64,
    pub nav_section_id: i64,
    pub position: i64,
    pub title_html: String,
    pub subitem_id: i64,
    pub uri: String,
}

/// A child of a navigation section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NavNode {
    Collection(NavCollection),
    Item(NavItem),
}

impl NavNode {
    pub fn position(&self) -> i64 {
        match self {
            Self::Collection(collection) => collection.position,
            Self::Item(item) => item.position,
        }
    }

    pub fn title_html(&self) -> &str {
        match self {
            Self::Collection(collection) => &collection.title_html,
            Self::Item(item) => &item.title_html,
        }
    }
}

/// A contiguous byte span within a subitem's raw content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchRange {
    /// Byte offset of the first matched byte.
    pub location: usize,

    /// Length in bytes.
    pub length: usize,
}

impl MatchRange {
    pub fn new(location: usize, length: usize) -> Self {
        Self { location, length }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.location + self.length
    }
}

/// A full-text search hit inside an item package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub subitem_id: i64,
    pub uri: String,
    pub title: String,

    /// Decoded match ranges into the subitem's raw content.
    pub match_ranges: Vec<MatchRange>,

    pub snippet: String,
}
