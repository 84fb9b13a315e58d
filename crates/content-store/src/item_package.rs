//! Read-only access to an installed item package.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, Row};
use tracing::debug;

use content_core::{
    ContentError, NavCollection, NavItem, NavNode, NavSection, Result, SearchResult, Subitem,
};
use content_query::{decode_match_ranges, SearchQuery};

use crate::connection::{metadata_i64, metadata_string, open_read_only, query_all, query_one};

const SUBITEM_COLUMNS: &str = "_id, uri, doc_id, doc_version, position, title_html, title, web_url";

const SEARCH_SQL: &str = r#"
    SELECT subitem._id, subitem.uri, subitem.title,
           offsets(subitem_content_fts), snippet(subitem_content_fts)
    FROM subitem_content_fts
    JOIN subitem ON subitem._id = subitem_content_fts.docid
    WHERE subitem_content_fts MATCH ?1
    ORDER BY subitem.position
    LIMIT ?2
"#;

/// One item's content, search index and navigation tree.
pub struct ItemPackage {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for ItemPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPackage").field("path", &self.path).finish()
    }
}

impl ItemPackage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = open_read_only(path)?;

        let package = Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
        };

        let version = package.item_package_version()?;
        debug!("Opened item package {:?} (version {})", path, version);

        Ok(package)
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

    // Metadata. Missing version keys read as 0.

    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(metadata_i64(conn, "schemaVersion")?.unwrap_or(0)))
    }

    pub fn item_package_version(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(metadata_i64(conn, "itemPackageVersion")?.unwrap_or(0)))
    }

    pub fn iso639_3_code(&self) -> Result<Option<String>> {
        self.with_conn(|conn| metadata_string(conn, "iso639_3"))
    }

    pub fn uri(&self) -> Result<Option<String>> {
        self.with_conn(|conn| metadata_string(conn, "uri"))
    }

    pub fn item_id(&self) -> Result<Option<i64>> {
        self.with_conn(|conn| metadata_i64(conn, "item_id"))
    }

    pub fn item_external_id(&self) -> Result<Option<String>> {
        self.with_conn(|conn| metadata_string(conn, "item_external_id"))
    }

    // Subitems

    pub fn subitems(&self) -> Result<Vec<Subitem>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM subitem ORDER BY position", SUBITEM_COLUMNS);
            query_all(conn, &sql, [], subitem_from_row)
        })
    }

    pub fn subitem(&self, id: i64) -> Result<Option<Subitem>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM subitem WHERE _id = ?1", SUBITEM_COLUMNS);
            query_one(conn, &sql, params![id], subitem_from_row)
        })
    }

    pub fn subitem_by_uri(&self, uri: &str) -> Result<Option<Subitem>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM subitem WHERE uri = ?1", SUBITEM_COLUMNS);
            query_one(conn, &sql, params![uri], subitem_from_row)
        })
    }

    /// Raw HTML content of a subitem.
    pub fn content_for_subitem(&self, subitem_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                "SELECT content_html FROM subitem_content WHERE subitem_id = ?1",
                params![subitem_id],
                |row| row.get(0),
            )
        })
    }

    // Navigation

    /// The top-level navigation collection.
    pub fn root_nav_collection(&self) -> Result<Option<NavCollection>> {
        self.with_conn(|conn| {
            query_one(
                conn,
                "SELECT _id, nav_section_id, position, title_html, uri FROM nav_collection \
                 WHERE nav_section_id IS NULL ORDER BY position LIMIT 1",
                [],
                nav_collection_from_row,
            )
        })
    }

    pub fn nav_sections_for_collection(&self, collection_id: i64) -> Result<Vec<NavSection>> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "SELECT _id, nav_collection_id, position, title FROM nav_section \
                 WHERE nav_collection_id = ?1 ORDER BY position",
                params![collection_id],
                |row| {
                    Ok(NavSection {
                        id: row.get(0)?,
                        nav_collection_id: row.get(1)?,
                        position: row.get(2)?,
                        title: row.get(3)?,
                    })
                },
            )
        })
    }

    /// Collections and items inside a navigation section, ordered by position.
    pub fn nav_nodes_for_section(&self, section_id: i64) -> Result<Vec<NavNode>> {
        self.with_conn(|conn| {
            let collections = query_all(
                conn,
                "SELECT _id, nav_section_id, position, title_html, uri FROM nav_collection \
                 WHERE nav_section_id = ?1",
                params![section_id],
                nav_collection_from_row,
            )?;

            let items = query_all(
                conn,
                "SELECT _id, nav_section_id, position, title_html, subitem_id, uri FROM nav_item \
                 WHERE nav_section_id = ?1",
                params![section_id],
                |row| {
                    Ok(NavItem {
                        id: row.get(0)?,
                        nav_section_id: row.get(1)?,
                        position: row.get(2)?,
                        title_html: row.get(3)?,
                        subitem_id: row.get(4)?,
                        uri: row.get(5)?,
                    })
                },
            )?;

            let mut nodes: Vec<NavNode> = collections
                .into_iter()
                .map(NavNode::Collection)
                .chain(items.into_iter().map(NavNode::Item))
                .collect();
            nodes.sort_by_key(|node| node.position());

            Ok(nodes)
        })
    }

    // Search

    /// Full-text search over subitem content.
    ///
    /// Quoted input is an exact phrase and each hit gets one range per
    /// phrase occurrence; anything else matches the words independently.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let Some(parsed) = SearchQuery::parse(query) else {
            return Ok(Vec::new());
        };
        let keyword_search = parsed.is_keyword_search();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let results = self.with_conn(|conn| {
            query_all(
                conn,
                SEARCH_SQL,
                params![parsed.match_expression(), limit],
                |row| {
                    let offsets: String = row.get(3)?;
                    Ok(SearchResult {
                        subitem_id: row.get(0)?,
                        uri: row.get(1)?,
                        title: row.get(2)?,
                        match_ranges: decode_match_ranges(&offsets, keyword_search),
                        snippet: row.get(4)?,
                    })
                },
            )
        })?;

        debug!(
            "Search {:?} in {:?} returned {} result(s)",
            parsed.match_expression(),
            self.path,
            results.len()
        );

        Ok(results)
    }
}

fn subitem_from_row(row: &Row<'_>) -> rusqlite::Result<Subitem> {
    Ok(Subitem {
        id: row.get(0)?,
        uri: row.get(1)?,
        doc_id: row.get(2)?,
        doc_version: row.get(3)?,
        position: row.get(4)?,
        title_html: row.get(5)?,
        title: row.get(6)?,
        web_url: row.get(7)?,
    })
}

fn nav_collection_from_row(row: &Row<'_>) -> rusqlite::Result<NavCollection> {
    Ok(NavCollection {
        id: row.get(0)?,
        nav_section_id: row.get(1)?,
        position: row.get(2)?,
        title_html: row.get(3)?,
        uri: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutable::MutableItemPackage;
    use content_core::MatchRange;
    use tempfile::TempDir;

    fn subitem(id: i64, position: i64, title: &str) -> Subitem {
        Subitem {
            id,
            uri: format!("/scriptures/bofm/{}", id),
            doc_id: format!("doc-{}", id),
            doc_version: 1,
            position,
            title_html: format!("<p>{}</p>", title),
            title: title.to_string(),
            web_url: format!("https://example.com/{}", id),
        }
    }

    fn fixture(dir: &TempDir) -> ItemPackage {
        let path = dir.path().join("package.sqlite");

        let builder = MutableItemPackage::create(&path, 3, 6).unwrap();
        builder.set_item(42, "item-42", "/scriptures/bofm").unwrap();
        builder.set_iso639_3_code("eng").unwrap();
        builder
            .add_subitem(&subitem(1, 0, "First"), "the quick brown fox jumps over the dog")
            .unwrap();
        builder
            .add_subitem(&subitem(2, 1, "Second"), "a fox that is brown")
            .unwrap();
        builder
            .add_nav_collection(&NavCollection {
                id: 1,
                nav_section_id: None,
                position: 0,
                title_html: "Root".to_string(),
                uri: "/scriptures/bofm".to_string(),
            })
            .unwrap();
        builder
            .add_nav_section(&NavSection {
                id: 5,
                nav_collection_id: 1,
                position: 0,
                title: None,
            })
            .unwrap();
        builder
            .add_nav_item(&NavItem {
                id: 7,
                nav_section_id: 5,
                position: 1,
                title_html: "Second".to_string(),
                subitem_id: 2,
                uri: "/scriptures/bofm/2".to_string(),
            })
            .unwrap();
        builder
            .add_nav_item(&NavItem {
                id: 6,
                nav_section_id: 5,
                position: 0,
                title_html: "First".to_string(),
                subitem_id: 1,
                uri: "/scriptures/bofm/1".to_string(),
            })
            .unwrap();
        drop(builder);

        ItemPackage::open(&path).unwrap()
    }

    #[test]
    fn test_metadata() {
        let dir = TempDir::new().unwrap();
        let package = fixture(&dir);

        assert_eq!(package.schema_version().unwrap(), 3);
        assert_eq!(package.item_package_version().unwrap(), 6);
        assert_eq!(package.item_id().unwrap(), Some(42));
        assert_eq!(package.item_external_id().unwrap().as_deref(), Some("item-42"));
        assert_eq!(package.uri().unwrap().as_deref(), Some("/scriptures/bofm"));
        assert_eq!(package.iso639_3_code().unwrap().as_deref(), Some("eng"));
    }

    #[test]
    fn test_subitems_and_content() {
        let dir = TempDir::new().unwrap();
        let package = fixture(&dir);

        let subitems = package.subitems().unwrap();
        assert_eq!(subitems.len(), 2);
        assert_eq!(subitems[0].title, "First");

        let second = package.subitem_by_uri("/scriptures/bofm/2").unwrap().unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(package.subitem(1).unwrap().unwrap().title, "First");
        assert!(package.subitem(99).unwrap().is_none());

        assert_eq!(
            package.content_for_subitem(2).unwrap().as_deref(),
            Some("a fox that is brown")
        );
        assert!(package.content_for_subitem(99).unwrap().is_none());
    }

    #[test]
    fn test_nav_nodes_ordered_by_position() {
        let dir = TempDir::new().unwrap();
        let package = fixture(&dir);

        let root = package.root_nav_collection().unwrap().unwrap();
        let sections = package.nav_sections_for_collection(root.id).unwrap();
        assert_eq!(sections.len(), 1);

        let nodes = package.nav_nodes_for_section(sections[0].id).unwrap();
        let titles: Vec<&str> = nodes.iter().map(|node| node.title_html()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[test]
    fn test_phrase_search_merges_ranges() {
        let dir = TempDir::new().unwrap();
        let package = fixture(&dir);

        let results = package.search("\"brown fox\"", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subitem_id, 1);
        // "brown" at 10, "fox" ends at 19
        assert_eq!(results[0].match_ranges, vec![MatchRange::new(10, 9)]);
        assert!(!results[0].snippet.is_empty());
    }

    #[test]
    fn test_keyword_search_keeps_ranges_separate() {
        let dir = TempDir::new().unwrap();
        let package = fixture(&dir);

        let results = package.search("brown fox", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].subitem_id, 1);
        assert_eq!(results[0].match_ranges.len(), 2);
        assert!(results[0].match_ranges.contains(&MatchRange::new(10, 5)));
        assert!(results[0].match_ranges.contains(&MatchRange::new(16, 3)));

        let limited = package.search("brown fox", 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_search_without_terms() {
        let dir = TempDir::new().unwrap();
        let package = fixture(&dir);

        assert!(package.search("  ", 10).unwrap().is_empty());
        assert!(package.search("zebra", 10).unwrap().is_empty());
    }
}
