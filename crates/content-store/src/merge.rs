//! Combining installed named catalogs into one queryable catalog.
//!
//! The merged file is a cache keyed by the set of installed
//! `(name, version)` pairs. A new set produces a new file; an existing file
//! for the current set is returned without touching any source catalog.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use content_core::{CatalogLocator, CatalogMetadata, ContentError, Result, SourceFailure};

use crate::connection::{metadata_i64, query_all, table_exists, ScopedConnection};

const ATTACH_ALIAS: &str = "secondary";

/// Column that records which named catalog a row came from.
const ATTRIBUTION_COLUMN: &str = "catalog_name";

/// Tables that describe a catalog file rather than its content.
const SKIPPED_TABLES: &[&str] = &["metadata"];

/// Cache key for a set of installed catalogs.
///
/// `name:version` pairs sorted by name and joined with `,`, so the result
/// depends only on the set, never on the order it was listed in.
pub fn merge_fingerprint(catalogs: &[CatalogMetadata]) -> String {
    let mut pairs: Vec<(&str, i64)> = catalogs
        .iter()
        .map(|catalog| (catalog.name.as_str(), catalog.version))
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(name, version)| format!("{}:{}", name, version))
        .collect::<Vec<_>>()
        .join(",")
}

/// Result of a merge pass.
#[derive(Debug)]
pub struct MergeOutcome {
    /// Location of the merged catalog file.
    pub path: PathBuf,

    /// Whether an existing merged file was reused.
    pub cache_hit: bool,

    /// Secondary catalogs that could not be merged in this pass.
    pub failures: Vec<SourceFailure>,
}

/// Builds merged catalogs from files resolved through a [`CatalogLocator`].
pub struct CatalogMerger<'a> {
    locator: &'a dyn CatalogLocator,
}

impl<'a> CatalogMerger<'a> {
    pub fn new(locator: &'a dyn CatalogLocator) -> Self {
        Self { locator }
    }

    /// Merge every installed catalog, reusing a cached result when present.
    ///
    /// The default catalog must be installed and readable. A secondary
    /// catalog that cannot be read or copied is left out of the result and
    /// reported in [`MergeOutcome::failures`]. Such a result is stored under
    /// the fingerprint of the catalogs it contains, never under the
    /// fingerprint of `installed`.
    pub fn merge(&self, installed: &[CatalogMetadata]) -> Result<MergeOutcome> {
        let default = installed
            .iter()
            .find(|catalog| catalog.is_default())
            .ok_or_else(|| ContentError::CatalogNotFound {
                name: content_core::DEFAULT_CATALOG_NAME.to_string(),
            })?;

        let fingerprint = merge_fingerprint(installed);
        let final_path = self.locator.merged_catalog_path(&fingerprint);

        if final_path.is_file() {
            debug!("Reusing merged catalog for [{}] at {:?}", fingerprint, final_path);
            return Ok(MergeOutcome {
                path: final_path,
                cache_hit: true,
                failures: Vec::new(),
            });
        }

        let default_path = self.locator.catalog_path(&default.name, default.version);
        if !default_path.is_file() {
            return Err(ContentError::missing_file(default_path));
        }

        let parent = final_path
            .parent()
            .ok_or_else(|| ContentError::internal(format!("No parent for {:?}", final_path)))?;
        std::fs::create_dir_all(parent)?;

        // Stage next to the final path so persisting is a rename
        let staged = tempfile::Builder::new()
            .prefix(".merge-")
            .suffix(".sqlite")
            .tempfile_in(parent)?;
        std::fs::copy(&default_path, staged.path())?;

        let conn = Connection::open(staged.path())
            .map_err(|e| ContentError::database(format!("Failed to open merge target: {}", e)))?;
        if metadata_i64(&conn, "schemaVersion")?.is_none() {
            return Err(ContentError::decode(format!(
                "Default catalog {:?} has no schema version",
                default_path
            )));
        }

        let mut secondaries: Vec<&CatalogMetadata> =
            installed.iter().filter(|catalog| !catalog.is_default()).collect();
        secondaries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut merged = vec![default.clone()];
        let mut failures = Vec::new();
        for secondary in secondaries {
            let path = self.locator.catalog_path(&secondary.name, secondary.version);
            match merge_secondary(&conn, &secondary.name, &path) {
                Ok(rows) => {
                    debug!(
                        "Merged {} row(s) from catalog {} version {}",
                        rows, secondary.name, secondary.version
                    );
                    merged.push(secondary.clone());
                }
                Err(e) => {
                    warn!(
                        "Skipping catalog {} version {} in merge: {}",
                        secondary.name, secondary.version, e
                    );
                    failures.push(SourceFailure::new(secondary.name.clone(), e));
                }
            }
        }

        conn.close()
            .map_err(|(_, e)| ContentError::database(format!("Failed to close merge target: {}", e)))?;

        // The file is keyed by what it actually holds, so a set with a
        // failed source never gets a cache entry and is retried next time
        let (fingerprint, final_path) = if failures.is_empty() {
            (fingerprint, final_path)
        } else {
            let partial = merge_fingerprint(&merged);
            let path = self.locator.merged_catalog_path(&partial);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            (partial, path)
        };

        staged
            .persist(&final_path)
            .map_err(|e| ContentError::Io(e.error))?;

        info!(
            "Merged catalog for [{}] written to {:?} ({} failure(s))",
            fingerprint,
            final_path,
            failures.len()
        );

        Ok(MergeOutcome {
            path: final_path,
            cache_hit: false,
            failures,
        })
    }
}

/// Copy every content row of the catalog at `path` into `conn`.
///
/// All tables of one source are copied in a single transaction, so a
/// failure leaves the target as it was before this source.
fn merge_secondary(conn: &Connection, name: &str, path: &Path) -> Result<usize> {
    if !path.is_file() {
        return Err(ContentError::missing_file(path));
    }

    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {}", ATTACH_ALIAS),
        params![path.to_string_lossy()],
    )
    .map_err(|e| ContentError::database(format!("Failed to attach {:?}: {}", path, e)))?;

    let result = ScopedConnection::new(conn).in_transaction(|scope| copy_tables(scope.conn(), name));

    if let Err(e) = conn.execute_batch(&format!("DETACH DATABASE {}", ATTACH_ALIAS)) {
        warn!("Failed to detach catalog {}: {}", name, e);
    }

    result
}

fn copy_tables(conn: &Connection, name: &str) -> Result<usize> {
    let tables: Vec<String> = query_all(
        conn,
        &format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' AND sql NOT LIKE 'CREATE VIRTUAL%' ORDER BY name",
            ATTACH_ALIAS
        ),
        [],
        |row| row.get(0),
    )?;

    if tables.is_empty() {
        return Err(ContentError::decode(format!("Catalog {} has no tables", name)));
    }

    let mut copied = 0;
    for table in tables {
        if SKIPPED_TABLES.contains(&table.as_str()) || !table_exists(conn, "main", &table)? {
            continue;
        }

        let target_columns = columns(conn, "main", &table)?;
        let shared: Vec<String> = columns(conn, ATTACH_ALIAS, &table)?
            .into_iter()
            .filter(|column| column != ATTRIBUTION_COLUMN && target_columns.contains(column))
            .collect();
        if shared.is_empty() {
            continue;
        }

        let column_list = shared
            .iter()
            .map(|column| quote(column))
            .collect::<Vec<_>>()
            .join(", ");

        let inserted = if target_columns.iter().any(|column| column == ATTRIBUTION_COLUMN) {
            let sql = format!(
                "INSERT OR REPLACE INTO main.{table} ({columns}, {attribution}) \
                 SELECT {columns}, ?1 FROM {alias}.{table}",
                table = quote(&table),
                columns = column_list,
                attribution = ATTRIBUTION_COLUMN,
                alias = ATTACH_ALIAS,
            );
            conn.execute(&sql, params![name])
        } else {
            let sql = format!(
                "INSERT OR REPLACE INTO main.{table} ({columns}) SELECT {columns} FROM {alias}.{table}",
                table = quote(&table),
                columns = column_list,
                alias = ATTACH_ALIAS,
            );
            conn.execute(&sql, [])
        };
        copied += inserted
            .map_err(|e| ContentError::database(format!("Failed to copy table {}: {}", table, e)))?;
    }

    Ok(copied)
}

fn columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<String>> {
    query_all(
        conn,
        &format!("PRAGMA {}.table_info({})", schema, quote(table)),
        [],
        |row| row.get(1),
    )
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
