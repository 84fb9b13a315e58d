//! Connection helpers shared by the inventory, readers, and merge engine.

use std::cell::Cell;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::warn;

use content_core::{ContentError, Result};

/// A borrowed connection that knows whether it is already inside a
/// transaction.
///
/// `in_transaction` opened while another one is active on the same wrapper
/// runs the closure directly inside the outer transaction instead of
/// issuing a nested `BEGIN`. The flag lives on the wrapper, so reentrancy
/// follows the call chain rather than the thread.
pub struct ScopedConnection<'c> {
    conn: &'c Connection,
    in_transaction: Cell<bool>,
}

impl<'c> ScopedConnection<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            in_transaction: Cell::new(false),
        }
    }

    /// The underlying connection.
    pub fn conn(&self) -> &'c Connection {
        self.conn
    }

    /// Whether a transaction opened through this wrapper is active.
    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    /// Run `f` inside a transaction, joining the active one if any.
    ///
    /// The outermost call commits when `f` succeeds and rolls back when it
    /// fails.
    pub fn in_transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        if self.in_transaction.get() {
            return f(self);
        }

        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| ContentError::database(format!("Failed to begin transaction: {}", e)))?;
        self.in_transaction.set(true);

        let result = f(self);
        self.in_transaction.set(false);

        match result {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(|e| {
                    ContentError::database(format!("Failed to commit transaction: {}", e))
                })?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK") {
                    warn!("Failed to roll back transaction: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

/// Open an existing database file read-only.
pub(crate) fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        return Err(ContentError::missing_file(path));
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ContentError::database(format!("Failed to open {:?}: {}", path, e)))?;

    conn.execute_batch("PRAGMA temp_store = MEMORY;")
        .map_err(|e| ContentError::database(format!("Failed to configure connection: {}", e)))?;

    Ok(conn)
}

/// Open (or create) a database file for writing.
pub(crate) fn open_read_write(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| ContentError::database(format!("Failed to open {:?}: {}", path, e)))
}

/// Whether `table` exists in `schema` ("main" or an attached alias).
pub(crate) fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1)",
        schema
    );
    conn.query_row(&sql, params![table], |row| row.get(0))
        .map_err(|e| ContentError::database(e.to_string()))
}

/// Read a raw value from a `metadata(key, value)` table.
pub(crate) fn metadata_value(conn: &Connection, key: &str) -> Result<Option<Value>> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get::<_, Value>(0),
    )
    .optional()
    .map_err(|e| ContentError::database(e.to_string()))
}

/// Read an integer metadata value, accepting integers stored as text.
pub(crate) fn metadata_i64(conn: &Connection, key: &str) -> Result<Option<i64>> {
    Ok(match metadata_value(conn, key)? {
        Some(Value::Integer(value)) => Some(value),
        Some(Value::Text(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Read a string metadata value, accepting integers.
pub(crate) fn metadata_string(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(match metadata_value(conn, key)? {
        Some(Value::Text(text)) => Some(text),
        Some(Value::Integer(value)) => Some(value.to_string()),
        _ => None,
    })
}

/// Upsert a metadata value.
pub(crate) fn set_metadata(conn: &Connection, key: &str, value: Value) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(|e| ContentError::database(format!("Failed to set metadata {}: {}", key, e)))?;
    Ok(())
}

/// Collect every row of a query.
pub(crate) fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ContentError::database(e.to_string()))?;

    let rows = stmt
        .query_map(params, map)
        .map_err(|e| ContentError::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ContentError::database(e.to_string()))?;

    Ok(rows)
}

/// Fetch at most one row.
pub(crate) fn query_one<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Option<T>>
where
    P: rusqlite::Params,
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    conn.query_row(sql, params, map)
        .optional()
        .map_err(|e| ContentError::database(e.to_string()))
}
