//! Database schema definitions.

/// Current inventory schema version, stored in `PRAGMA user_version`.
pub const INVENTORY_SCHEMA_VERSION: i64 = 1;

/// Inventory tables introduced in version 1.
pub const INVENTORY_SCHEMA_V1: &str = r#"
-- Installed item packages
CREATE TABLE IF NOT EXISTS installed_item (
    item_id INTEGER PRIMARY KEY,
    schema_version INTEGER NOT NULL,
    item_package_version INTEGER NOT NULL
);

-- Items queued for background install
CREATE TABLE IF NOT EXISTS install_queue (
    item_id INTEGER PRIMARY KEY
);

-- Items whose last install attempt failed
CREATE TABLE IF NOT EXISTS errored_install (
    item_id INTEGER PRIMARY KEY
);

-- Installed named catalogs
CREATE TABLE IF NOT EXISTS installed_catalog (
    name TEXT PRIMARY KEY,
    url TEXT,
    version INTEGER NOT NULL
);
"#;

/// Catalog schema. Every business table is keyed by `_id` so rows from
/// several catalogs can be merged with insert-or-replace.
pub const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value
);

CREATE TABLE IF NOT EXISTS source (
    _id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    type_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS item_category (
    _id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item (
    _id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL,
    language_id INTEGER NOT NULL,
    source_id INTEGER NOT NULL,
    platform_id INTEGER NOT NULL,
    uri TEXT NOT NULL,
    title TEXT NOT NULL,
    item_cover_renditions TEXT,
    item_category_id INTEGER NOT NULL,
    latest_version INTEGER NOT NULL,
    obsolete INTEGER NOT NULL DEFAULT 0,
    catalog_name TEXT
);

CREATE INDEX IF NOT EXISTS idx_item_external_id ON item(external_id);
CREATE INDEX IF NOT EXISTS idx_item_uri ON item(uri);

CREATE TABLE IF NOT EXISTS language (
    _id INTEGER PRIMARY KEY,
    lds_language_code TEXT NOT NULL,
    iso639_3 TEXT NOT NULL,
    bcp47 TEXT,
    root_library_collection_id INTEGER NOT NULL,
    root_library_collection_external_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS language_name (
    _id INTEGER PRIMARY KEY,
    language_id INTEGER NOT NULL,
    localization_language_id INTEGER NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS library_collection (
    _id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL,
    library_section_id INTEGER,
    library_section_external_id TEXT,
    position INTEGER NOT NULL,
    title TEXT NOT NULL,
    cover_renditions TEXT,
    type_id INTEGER NOT NULL,
    catalog_name TEXT
);

CREATE INDEX IF NOT EXISTS idx_library_collection_section ON library_collection(library_section_id);

CREATE TABLE IF NOT EXISTS library_section (
    _id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL,
    library_collection_id INTEGER NOT NULL,
    library_collection_external_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    title TEXT,
    index_title TEXT
);

CREATE INDEX IF NOT EXISTS idx_library_section_collection ON library_section(library_collection_id);

CREATE TABLE IF NOT EXISTS library_item (
    _id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL,
    library_section_id INTEGER NOT NULL,
    library_section_external_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    title TEXT NOT NULL,
    obsolete INTEGER NOT NULL DEFAULT 0,
    item_id INTEGER NOT NULL,
    item_external_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_library_item_section ON library_item(library_section_id);

CREATE TABLE IF NOT EXISTS subitem_metadata (
    _id INTEGER PRIMARY KEY,
    subitem_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL,
    doc_id TEXT NOT NULL,
    doc_version INTEGER NOT NULL
);
"#;

/// Item package schema.
pub const ITEM_PACKAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value
);

CREATE TABLE IF NOT EXISTS subitem (
    _id INTEGER PRIMARY KEY,
    uri TEXT NOT NULL UNIQUE,
    doc_id TEXT NOT NULL,
    doc_version INTEGER NOT NULL,
    position INTEGER NOT NULL,
    title_html TEXT NOT NULL,
    title TEXT NOT NULL,
    web_url TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subitem_position ON subitem(position);

CREATE TABLE IF NOT EXISTS subitem_content (
    _id INTEGER PRIMARY KEY,
    subitem_id INTEGER NOT NULL UNIQUE,
    content_html TEXT NOT NULL
);

-- FTS4 index over subitem content; docid is the subitem id
CREATE VIRTUAL TABLE IF NOT EXISTS subitem_content_fts USING fts4(content_html);

CREATE TABLE IF NOT EXISTS nav_collection (
    _id INTEGER PRIMARY KEY,
    nav_section_id INTEGER,
    position INTEGER NOT NULL,
    title_html TEXT NOT NULL,
    uri TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nav_section (
    _id INTEGER PRIMARY KEY,
    nav_collection_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    title TEXT
);

CREATE TABLE IF NOT EXISTS nav_item (
    _id INTEGER PRIMARY KEY,
    nav_section_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    title_html TEXT NOT NULL,
    subitem_id INTEGER NOT NULL,
    uri TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nav_collection_section ON nav_collection(nav_section_id);
CREATE INDEX IF NOT EXISTS idx_nav_item_section ON nav_item(nav_section_id);
"#;

/// Name of the catalog file inside a catalog archive and install directory.
pub const CATALOG_FILE_NAME: &str = "Catalog.sqlite";

/// Name of the package file inside an item package archive and install directory.
pub const ITEM_PACKAGE_FILE_NAME: &str = "package.sqlite";
