//! Core traits defining the interfaces between components.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Byte-level progress callback: `(bytes_written, total_bytes_if_known)`.
pub type ByteProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Network transport used by the session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch a small resource fully into memory.
    async fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// Stream a resource to `dest`, reporting progress as bytes arrive.
    async fn download(&self, url: &str, dest: &Path, on_bytes: ByteProgress<'_>) -> Result<()>;
}

/// Resolves where installed and merged catalogs live on disk.
pub trait CatalogLocator: Send + Sync {
    /// Path of the installed catalog file for `name` at `version`.
    fn catalog_path(&self, name: &str, version: i64) -> PathBuf;

    /// Path of the merged catalog file for a merge fingerprint.
    fn merged_catalog_path(&self, fingerprint: &str) -> PathBuf;
}
