//! Durable record of installed catalogs and item packages.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use content_core::{CatalogMetadata, ContentError, InstalledVersion, Result};

use crate::connection::{open_read_write, ScopedConnection};
use crate::schema::{INVENTORY_SCHEMA_V1, INVENTORY_SCHEMA_VERSION};

/// SQLite-backed content inventory.
///
/// The connection is shared process-wide behind a blocking Mutex. Every
/// mutating operation runs inside a transaction; callers that need several
/// operations to commit together use [`Inventory::in_transaction`], and
/// the individual operations join that transaction.
pub struct Inventory {
    conn: Mutex<Connection>,
}

impl Inventory {
    /// Open or create the inventory at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = open_read_write(path)?;
        let inventory = Self::init(conn)?;
        info!("Inventory opened at {:?}", path);
        Ok(inventory)
    }

    /// Open an in-memory inventory (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ContentError::database(format!("Failed to open in-memory database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(|e| ContentError::database(format!("Failed to configure connection: {}", e)))?;

        let inventory = Self {
            conn: Mutex::new(conn),
        };
        inventory.migrate()?;
        Ok(inventory)
    }

    /// Stored inventory schema version.
    pub fn schema_version(&self) -> Result<i64> {
        self.with_txn(|txn| txn.schema_version())
    }

    /// Bring the stored schema up to [`INVENTORY_SCHEMA_VERSION`].
    ///
    /// Steps only create what is missing, so re-running them is harmless.
    fn migrate(&self) -> Result<()> {
        self.in_transaction(|txn| {
            let from = txn.schema_version()?;
            if from >= INVENTORY_SCHEMA_VERSION {
                return Ok(());
            }

            if from < 1 {
                txn.conn()
                    .execute_batch(INVENTORY_SCHEMA_V1)
                    .map_err(|e| ContentError::database(format!("Failed to migrate inventory: {}", e)))?;
            }

            txn.conn()
                .pragma_update(None, "user_version", INVENTORY_SCHEMA_VERSION)
                .map_err(|e| ContentError::database(e.to_string()))?;

            info!(
                "Migrated inventory schema from version {} to {}",
                from, INVENTORY_SCHEMA_VERSION
            );
            Ok(())
        })
    }

    /// Run `f` with a transaction-aware handle, without opening a transaction.
    fn with_txn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&InventoryTxn<'_>) -> Result<R>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ContentError::database(e.to_string()))?;
        let txn = InventoryTxn {
            scope: ScopedConnection::new(&conn),
        };
        f(&txn)
    }

    /// Run `f` inside one inventory transaction.
    pub fn in_transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&InventoryTxn<'_>) -> Result<R>,
    {
        self.with_txn(|txn| txn.scope.in_transaction(|_| f(txn)))
    }

    // Installed items

    pub fn installed_item_ids(&self) -> Result<Vec<i64>> {
        self.with_txn(|txn| txn.installed_item_ids())
    }

    pub fn installed_version(&self, item_id: i64) -> Result<Option<InstalledVersion>> {
        self.with_txn(|txn| txn.installed_version(item_id))
    }

    pub fn is_item_installed(&self, item_id: i64) -> Result<bool> {
        self.with_txn(|txn| txn.is_item_installed(item_id))
    }

    pub fn set_installed_version(&self, item_id: i64, version: InstalledVersion) -> Result<()> {
        self.with_txn(|txn| txn.set_installed_version(item_id, version))
    }

    pub fn remove_installed_version(&self, item_id: i64) -> Result<()> {
        self.with_txn(|txn| txn.remove_installed_version(item_id))
    }

    // Install queue

    pub fn installing_item_ids(&self) -> Result<Vec<i64>> {
        self.with_txn(|txn| txn.installing_item_ids())
    }

    pub fn add_to_install_queue(&self, item_id: i64) -> Result<()> {
        self.with_txn(|txn| txn.add_to_install_queue(item_id))
    }

    pub fn remove_from_install_queue(&self, item_id: i64) -> Result<()> {
        self.with_txn(|txn| txn.remove_from_install_queue(item_id))
    }

    // Errored installs

    pub fn errored_item_ids(&self) -> Result<Vec<i64>> {
        self.with_txn(|txn| txn.errored_item_ids())
    }

    pub fn set_errored(&self, item_id: i64, errored: bool) -> Result<()> {
        self.with_txn(|txn| txn.set_errored(item_id, errored))
    }

    // Installed catalogs

    pub fn add_or_update_catalog(&self, catalog: &CatalogMetadata) -> Result<()> {
        self.with_txn(|txn| txn.add_or_update_catalog(catalog))
    }

    pub fn delete_catalogs_named(&self, names: &[String]) -> Result<usize> {
        self.with_txn(|txn| txn.delete_catalogs_named(names))
    }

    pub fn installed_catalogs(&self) -> Result<Vec<CatalogMetadata>> {
        self.with_txn(|txn| txn.installed_catalogs())
    }

    pub fn catalog_named(&self, name: &str) -> Result<Option<CatalogMetadata>> {
        self.with_txn(|txn| txn.catalog_named(name))
    }
}

/// Inventory operations bound to one locked connection.
pub struct InventoryTxn<'c> {
    scope: ScopedConnection<'c>,
}

impl<'c> InventoryTxn<'c> {
    fn conn(&self) -> &Connection {
        self.scope.conn()
    }

    fn schema_version(&self) -> Result<i64> {
        self.conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| ContentError::database(e.to_string()))
    }

    fn item_ids(&self, sql: &str) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn()
            .prepare(sql)
            .map_err(|e| ContentError::database(e.to_string()))?;

        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| ContentError::database(e.to_string()))?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(|e| ContentError::database(e.to_string()))?;

        Ok(ids)
    }

    pub fn installed_item_ids(&self) -> Result<Vec<i64>> {
        self.item_ids("SELECT item_id FROM installed_item ORDER BY item_id")
    }

    pub fn installed_version(&self, item_id: i64) -> Result<Option<InstalledVersion>> {
        self.conn()
            .query_row(
                "SELECT schema_version, item_package_version FROM installed_item WHERE item_id = ?1",
                params![item_id],
                |row| Ok(InstalledVersion::new(row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| ContentError::database(e.to_string()))
    }

    pub fn is_item_installed(&self, item_id: i64) -> Result<bool> {
        Ok(self.installed_version(item_id)?.is_some())
    }

    pub fn set_installed_version(&self, item_id: i64, version: InstalledVersion) -> Result<()> {
        self.scope.in_transaction(|scope| {
            scope
                .conn()
                .execute(
                    r#"
                    INSERT OR REPLACE INTO installed_item (item_id, schema_version, item_package_version)
                    VALUES (?1, ?2, ?3)
                    "#,
                    params![item_id, version.schema_version, version.item_package_version],
                )
                .map_err(|e| ContentError::database(format!("Failed to record installed item: {}", e)))?;

            debug!(
                "Recorded item {} at schema {} version {}",
                item_id, version.schema_version, version.item_package_version
            );
            Ok(())
        })
    }

    pub fn remove_installed_version(&self, item_id: i64) -> Result<()> {
        self.scope.in_transaction(|scope| {
            scope
                .conn()
                .execute("DELETE FROM installed_item WHERE item_id = ?1", params![item_id])
                .map_err(|e| ContentError::database(e.to_string()))?;

            debug!("Removed installed record for item {}", item_id);
            Ok(())
        })
    }

    pub fn installing_item_ids(&self) -> Result<Vec<i64>> {
        self.item_ids("SELECT item_id FROM install_queue ORDER BY item_id")
    }

    pub fn add_to_install_queue(&self, item_id: i64) -> Result<()> {
        self.scope.in_transaction(|scope| {
            scope
                .conn()
                .execute(
                    "INSERT OR REPLACE INTO install_queue (item_id) VALUES (?1)",
                    params![item_id],
                )
                .map_err(|e| ContentError::database(e.to_string()))?;
            Ok(())
        })
    }

    pub fn remove_from_install_queue(&self, item_id: i64) -> Result<()> {
        self.scope.in_transaction(|scope| {
            scope
                .conn()
                .execute("DELETE FROM install_queue WHERE item_id = ?1", params![item_id])
                .map_err(|e| ContentError::database(e.to_string()))?;
            Ok(())
        })
    }

    pub fn errored_item_ids(&self) -> Result<Vec<i64>> {
        self.item_ids("SELECT item_id FROM errored_install ORDER BY item_id")
    }

    pub fn set_errored(&self, item_id: i64, errored: bool) -> Result<()> {
        self.scope.in_transaction(|scope| {
            let sql = if errored {
                "INSERT OR REPLACE INTO errored_install (item_id) VALUES (?1)"
            } else {
                "DELETE FROM errored_install WHERE item_id = ?1"
            };
            scope
                .conn()
                .execute(sql, params![item_id])
                .map_err(|e| ContentError::database(e.to_string()))?;
            Ok(())
        })
    }

    pub fn add_or_update_catalog(&self, catalog: &CatalogMetadata) -> Result<()> {
        // The default catalog's location is implicit
        let url = if catalog.is_default() {
            None
        } else {
            catalog.base_url.clone()
        };

        self.scope.in_transaction(|scope| {
            scope
                .conn()
                .execute(
                    "INSERT OR REPLACE INTO installed_catalog (name, url, version) VALUES (?1, ?2, ?3)",
                    params![catalog.name, url, catalog.version],
                )
                .map_err(|e| ContentError::database(format!("Failed to record catalog: {}", e)))?;

            debug!("Recorded catalog {} at version {}", catalog.name, catalog.version);
            Ok(())
        })
    }

    pub fn delete_catalogs_named(&self, names: &[String]) -> Result<usize> {
        if names.is_empty() {
            return Ok(0);
        }

        self.scope.in_transaction(|scope| {
            let placeholders = vec!["?"; names.len()].join(", ");
            let sql = format!("DELETE FROM installed_catalog WHERE name IN ({})", placeholders);

            let deleted = scope
                .conn()
                .execute(&sql, params_from_iter(names.iter()))
                .map_err(|e| ContentError::database(e.to_string()))?;

            debug!("Deleted {} catalog record(s)", deleted);
            Ok(deleted)
        })
    }

    pub fn installed_catalogs(&self) -> Result<Vec<CatalogMetadata>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT name, url, version FROM installed_catalog ORDER BY name")
            .map_err(|e| ContentError::database(e.to_string()))?;

        let catalogs = stmt
            .query_map([], |row| {
                Ok(CatalogMetadata::new(
                    row.get::<_, String>(0)?,
                    row.get(1)?,
                    row.get(2)?,
                ))
            })
            .map_err(|e| ContentError::database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ContentError::database(e.to_string()))?;

        Ok(catalogs)
    }

    pub fn catalog_named(&self, name: &str) -> Result<Option<CatalogMetadata>> {
        self.conn()
            .query_row(
                "SELECT name, url, version FROM installed_catalog WHERE name = ?1",
                params![name],
                |row| {
                    Ok(CatalogMetadata::new(
                        row.get::<_, String>(0)?,
                        row.get(1)?,
                        row.get(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| ContentError::database(e.to_string()))
    }
}
