//! Read-only access to a catalog database.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, Row};
use tracing::debug;

use content_core::{
    ContentError, Item, LibraryCollection, LibraryItem, LibraryNode, LibrarySection, Result,
    Source,
};

use crate::connection::{metadata_i64, open_read_only, query_all, query_one};

const ITEM_COLUMNS: &str = "_id, external_id, language_id, source_id, platform_id, uri, title, \
                            item_category_id, latest_version, obsolete";

const COLLECTION_COLUMNS: &str = "_id, external_id, library_section_id, \
                                  library_section_external_id, position, title, type_id";

const SECTION_COLUMNS: &str = "_id, external_id, library_collection_id, \
                               library_collection_external_id, position, title, index_title";

const LIBRARY_ITEM_COLUMNS: &str = "_id, external_id, library_section_id, \
                                    library_section_external_id, position, title, obsolete, \
                                    item_id, item_external_id";

/// A catalog opened read-only.
///
/// Opening fails unless the file exists and carries a readable schema
/// version, so a handle always refers to a usable catalog.
pub struct Catalog {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("path", &self.path).finish()
    }
}

impl Catalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = open_read_only(path)?;

        let catalog = Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        };

        // Validate up front
        let schema_version = catalog.schema_version()?;
        debug!("Opened catalog {:?} (schema {})", path, schema_version);

        Ok(catalog)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ContentError::database(e.to_string()))?;
        f(&conn)
    }

    /// Schema version recorded in the catalog metadata.
    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(|conn| {
            metadata_i64(conn, "schemaVersion")?.ok_or_else(|| {
                ContentError::decode(format!("Catalog {:?} has no schema version", self.path))
            })
        })
    }

    /// Catalog version recorded in the metadata, if any.
    pub fn catalog_version(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| metadata_i64(conn, "catalogVersion"))
    }

    pub fn sources(&self) -> Result<Vec<Source>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT _id, name, type_id FROM source ORDER BY _id",
                [],
                |row| {
                    Ok(Source {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        type_id: row.get(2)?,
                    })
                },
            )
        })
    }

    pub fn item(&self, id: i64) -> Result<Option<Item>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM item WHERE _id = ?1", ITEM_COLUMNS);
            query_one(conn, &sql, params![id], item_from_row)
        })
    }

    pub fn item_by_external_id(&self, external_id: &str) -> Result<Option<Item>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM item WHERE external_id = ?1", ITEM_COLUMNS);
            query_one(conn, &sql, params![external_id], item_from_row)
        })
    }

    pub fn item_by_uri(&self, uri: &str) -> Result<Option<Item>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM item WHERE uri = ?1", ITEM_COLUMNS);
            query_one(conn, &sql, params![uri], item_from_row)
        })
    }

    /// All items ordered by title.
    pub fn items(&self) -> Result<Vec<Item>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM item ORDER BY title, _id", ITEM_COLUMNS);
            query_all(conn, &sql, [], item_from_row)
        })
    }

    pub fn library_collection(&self, id: i64) -> Result<Option<LibraryCollection>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM library_collection WHERE _id = ?1",
                COLLECTION_COLUMNS
            );
            query_one(conn, &sql, params![id], collection_from_row)
        })
    }

    pub fn library_sections_for_collection(&self, collection_id: i64) -> Result<Vec<LibrarySection>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM library_section WHERE library_collection_id = ?1 ORDER BY position",
                SECTION_COLUMNS
            );
            query_all(conn, &sql, params![collection_id], section_from_row)
        })
    }

    /// Collections and items inside a section, ordered by position.
    pub fn library_nodes_for_section(&self, section_id: i64) -> Result<Vec<LibraryNode>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM library_collection WHERE library_section_id = ?1",
                COLLECTION_COLUMNS
            );
            let collections = query_all(conn, &sql, params![section_id], collection_from_row)?;

            let sql = format!(
                "SELECT {} FROM library_item WHERE library_section_id = ?1",
                LIBRARY_ITEM_COLUMNS
            );
            let items = query_all(conn, &sql, params![section_id], library_item_from_row)?;

            let mut nodes: Vec<LibraryNode> = collections
                .into_iter()
                .map(LibraryNode::Collection)
                .chain(items.into_iter().map(LibraryNode::Item))
                .collect();
            nodes.sort_by_key(|node| node.position());

            Ok(nodes)
        })
    }
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        external_id: row.get(1)?,
        language_id: row.get(2)?,
        source_id: row.get(3)?,
        platform_id: row.get(4)?,
        uri: row.get(5)?,
        title: row.get(6)?,
        item_category_id: row.get(7)?,
        latest_version: row.get(8)?,
        obsolete: row.get(9)?,
    })
}

fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<LibraryCollection> {
    Ok(LibraryCollection {
        id: row.get(0)?,
        external_id: row.get(1)?,
        library_section_id: row.get(2)?,
        library_section_external_id: row.get(3)?,
        position: row.get(4)?,
        title: row.get(5)?,
        type_id: row.get(6)?,
    })
}

fn section_from_row(row: &Row<'_>) -> rusqlite::Result<LibrarySection> {
    Ok(LibrarySection {
        id: row.get(0)?,
        external_id: row.get(1)?,
        library_collection_id: row.get(2)?,
        library_collection_external_id: row.get(3)?,
        position: row.get(4)?,
        title: row.get(5)?,
        index_title: row.get(6)?,
    })
}

fn library_item_from_row(row: &Row<'_>) -> rusqlite::Result<LibraryItem> {
    Ok(LibraryItem {
        id: row.get(0)?,
        external_id: row.get(1)?,
        library_section_id: row.get(2)?,
        library_section_external_id: row.get(3)?,
        position: row.get(4)?,
        title: row.get(5)?,
        obsolete: row.get(6)?,
        item_id: row.get(7)?,
        item_external_id: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutable::MutableCatalog;
    use tempfile::TempDir;

    fn sample_item(id: i64, title: &str) -> Item {
        Item {
            id,
            external_id: format!("item-{}", id),
            language_id: 1,
            source_id: 1,
            platform_id: 1,
            uri: format!("/scriptures/{}", id),
            title: title.to_string(),
            item_category_id: 1,
            latest_version: 5,
            obsolete: false,
        }
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Catalog::open(dir.path().join("Catalog.sqlite")).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_FILE");
    }

    #[test]
    fn test_open_requires_schema_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Catalog.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE metadata (key TEXT PRIMARY KEY, value);")
                .unwrap();
        }

        assert!(Catalog::open(&path).is_err());
    }

    #[test]
    fn test_items_and_library() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Catalog.sqlite");

        let builder = MutableCatalog::create(&path, 12).unwrap();
        builder.add_source(1, "default", 1).unwrap();
        builder.add_item(&sample_item(2, "Zephaniah"), None).unwrap();
        builder.add_item(&sample_item(1, "Amos"), None).unwrap();
        builder
            .add_library_collection(
                &LibraryCollection {
                    id: 10,
                    external_id: "root".to_string(),
                    library_section_id: None,
                    library_section_external_id: None,
                    position: 0,
                    title: "Library".to_string(),
                    type_id: 1,
                },
                None,
            )
            .unwrap();
        builder
            .add_library_section(&LibrarySection {
                id: 20,
                external_id: "sec".to_string(),
                library_collection_id: 10,
                library_collection_external_id: "root".to_string(),
                position: 0,
                title: Some("Scriptures".to_string()),
                index_title: None,
            })
            .unwrap();
        builder
            .add_library_collection(
                &LibraryCollection {
                    id: 11,
                    external_id: "nested".to_string(),
                    library_section_id: Some(20),
                    library_section_external_id: Some("sec".to_string()),
                    position: 2,
                    title: "Nested".to_string(),
                    type_id: 1,
                },
                None,
            )
            .unwrap();
        builder
            .add_library_item(&LibraryItem {
                id: 30,
                external_id: "li-30".to_string(),
                library_section_id: 20,
                library_section_external_id: "sec".to_string(),
                position: 1,
                title: "Amos".to_string(),
                obsolete: false,
                item_id: 1,
                item_external_id: "item-1".to_string(),
            })
            .unwrap();
        drop(builder);

        let catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.schema_version().unwrap(), 3);
        assert_eq!(catalog.catalog_version().unwrap(), Some(12));
        assert_eq!(catalog.sources().unwrap().len(), 1);

        let items = catalog.items().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Amos");

        let item = catalog.item_by_external_id("item-2").unwrap().unwrap();
        assert_eq!(item.id, 2);
        assert!(catalog.item(99).unwrap().is_none());
        assert_eq!(catalog.item_by_uri("/scriptures/1").unwrap().unwrap().id, 1);

        let root = catalog.library_collection(10).unwrap().unwrap();
        let sections = catalog.library_sections_for_collection(root.id).unwrap();
        assert_eq!(sections.len(), 1);

        let nodes = catalog.library_nodes_for_section(sections[0].id).unwrap();
        let titles: Vec<&str> = nodes.iter().map(|node| node.title()).collect();
        assert_eq!(titles, vec!["Amos", "Nested"]);
    }
}
