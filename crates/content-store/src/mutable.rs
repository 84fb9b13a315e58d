//! Writable builders for catalogs and item packages.
//!
//! Production content is published remotely; these builders produce the
//! same file formats for fixtures and packaging tools.

use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, Connection};

use content_core::{
    ContentError, Item, LibraryCollection, LibraryItem, LibrarySection, NavCollection, NavItem,
    NavSection, Result, Subitem, CATALOG_SCHEMA_VERSION,
};

use crate::connection::{open_read_write, set_metadata, ScopedConnection};
use crate::schema::{CATALOG_SCHEMA, ITEM_PACKAGE_SCHEMA};

fn create_with_schema(path: &Path, schema: &str) -> Result<Connection> {
    let conn = open_read_write(path)?;
    conn.execute_batch(schema)
        .map_err(|e| ContentError::database(format!("Failed to create schema: {}", e)))?;
    Ok(conn)
}

/// Run `f` in a transaction, joining one the caller already opened.
fn join_or_begin<R, F>(conn: &Connection, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    if !conn.is_autocommit() {
        return f();
    }
    ScopedConnection::new(conn).in_transaction(|_| f())
}

/// Builder for a catalog file.
pub struct MutableCatalog {
    conn: Connection,
}

impl MutableCatalog {
    /// Create (or open) a catalog at `path` stamped with the current schema
    /// version and `catalog_version`.
    pub fn create(path: impl AsRef<Path>, catalog_version: i64) -> Result<Self> {
        let conn = create_with_schema(path.as_ref(), CATALOG_SCHEMA)?;
        set_metadata(&conn, "schemaVersion", Value::Integer(CATALOG_SCHEMA_VERSION))?;
        set_metadata(&conn, "catalogVersion", Value::Integer(catalog_version))?;
        Ok(Self { conn })
    }

    /// Run several writes in one transaction.
    pub fn in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        join_or_begin(&self.conn, || f(self))
    }

    pub fn set_metadata(&self, key: &str, value: Value) -> Result<()> {
        set_metadata(&self.conn, key, value)
    }

    pub fn add_source(&self, id: i64, name: &str, type_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO source (_id, name, type_id) VALUES (?1, ?2, ?3)",
                params![id, name, type_id],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
        Ok(())
    }

    pub fn add_item(&self, item: &Item, catalog_name: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO item (
                    _id, external_id, language_id, source_id, platform_id, uri, title,
                    item_category_id, latest_version, obsolete, catalog_name
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    item.id,
                    item.external_id,
                    item.language_id,
                    item.source_id,
                    item.platform_id,
                    item.uri,
                    item.title,
                    item.item_category_id,
                    item.latest_version,
                    item.obsolete,
                    catalog_name,
                ],
            )
            .map_err(|e| ContentError::database(format!("Failed to insert item {}: {}", item.id, e)))?;
        Ok(())
    }

    pub fn add_library_collection(
        &self,
        collection: &LibraryCollection,
        catalog_name: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO library_collection (
                    _id, external_id, library_section_id, library_section_external_id,
                    position, title, type_id, catalog_name
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    collection.id,
                    collection.external_id,
                    collection.library_section_id,
                    collection.library_section_external_id,
                    collection.position,
                    collection.title,
                    collection.type_id,
                    catalog_name,
                ],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
        Ok(())
    }

    pub fn add_library_section(&self, section: &LibrarySection) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO library_section (
                    _id, external_id, library_collection_id, library_collection_external_id,
                    position, title, index_title
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    section.id,
                    section.external_id,
                    section.library_collection_id,
                    section.library_collection_external_id,
                    section.position,
                    section.title,
                    section.index_title,
                ],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
        Ok(())
    }

    pub fn add_library_item(&self, library_item: &LibraryItem) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO library_item (
                    _id, external_id, library_section_id, library_section_external_id,
                    position, title, obsolete, item_id, item_external_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    library_item.id,
                    library_item.external_id,
                    library_item.library_section_id,
                    library_item.library_section_external_id,
                    library_item.position,
                    library_item.title,
                    library_item.obsolete,
                    library_item.item_id,
                    library_item.item_external_id,
                ],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
        Ok(())
    }
}

/// Builder for an item package file.
pub struct MutableItemPackage {
    conn: Connection,
}

impl MutableItemPackage {
    pub fn create(
        path: impl AsRef<Path>,
        schema_version: i64,
        item_package_version: i64,
    ) -> Result<Self> {
        let conn = create_with_schema(path.as_ref(), ITEM_PACKAGE_SCHEMA)?;
        set_metadata(&conn, "schemaVersion", Value::Integer(schema_version))?;
        set_metadata(&conn, "itemPackageVersion", Value::Integer(item_package_version))?;
        Ok(Self { conn })
    }

    /// Run several writes in one transaction.
    pub fn in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        join_or_begin(&self.conn, || f(self))
    }

    /// Record which catalog item this package belongs to.
    pub fn set_item(&self, item_id: i64, external_id: &str, uri: &str) -> Result<()> {
        set_metadata(&self.conn, "item_id", Value::Integer(item_id))?;
        set_metadata(&self.conn, "item_external_id", Value::Text(external_id.to_string()))?;
        set_metadata(&self.conn, "uri", Value::Text(uri.to_string()))
    }

    pub fn set_iso639_3_code(&self, code: &str) -> Result<()> {
        set_metadata(&self.conn, "iso639_3", Value::Text(code.to_string()))
    }

    /// Insert a subitem together with its content and search index entry.
    pub fn add_subitem(&self, subitem: &Subitem, content_html: &str) -> Result<()> {
        self.in_transaction(|builder| {
            let conn = &builder.conn;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO subitem (
                    _id, uri, doc_id, doc_version, position, title_html, title, web_url
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    subitem.id,
                    subitem.uri,
                    subitem.doc_id,
                    subitem.doc_version,
                    subitem.position,
                    subitem.title_html,
                    subitem.title,
                    subitem.web_url,
                ],
            )
            .map_err(|e| ContentError::database(format!("Failed to insert subitem {}: {}", subitem.id, e)))?;

            conn.execute(
                "INSERT OR REPLACE INTO subitem_content (subitem_id, content_html) VALUES (?1, ?2)",
                params![subitem.id, content_html],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;

            // FTS tables ignore OR REPLACE conflicts on docid, so clear first
            conn.execute(
                "DELETE FROM subitem_content_fts WHERE docid = ?1",
                params![subitem.id],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
            conn.execute(
                "INSERT INTO subitem_content_fts (docid, content_html) VALUES (?1, ?2)",
                params![subitem.id, content_html],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;

            Ok(())
        })
    }

    pub fn add_nav_collection(&self, collection: &NavCollection) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO nav_collection (_id, nav_section_id, position, title_html, uri)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    collection.id,
                    collection.nav_section_id,
                    collection.position,
                    collection.title_html,
                    collection.uri,
                ],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
        Ok(())
    }

    pub fn add_nav_section(&self, section: &NavSection) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO nav_section (_id, nav_collection_id, position, title) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    section.id,
                    section.nav_collection_id,
                    section.position,
                    section.title,
                ],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
        Ok(())
    }

    pub fn add_nav_item(&self, item: &NavItem) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO nav_item (_id, nav_section_id, position, title_html, subitem_id, uri)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    item.id,
                    item.nav_section_id,
                    item.position,
                    item.title_html,
                    item.subitem_id,
                    item.uri,
                ],
            )
            .map_err(|e| ContentError::database(e.to_string()))?;
        Ok(())
    }
}
