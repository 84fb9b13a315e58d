//! content-store - SQLite storage for the content mirror
//!
//! This crate owns every local database the mirror reads or writes: the
//! inventory of installed content, read-only catalog and item package
//! readers, builders for both file formats, and the engine that merges
//! named catalogs into one.

mod connection;
mod schema;

pub mod catalog;
pub mod inventory;
pub mod item_package;
pub mod layout;
pub mod merge;
pub mod mutable;

pub use catalog::Catalog;
pub use connection::ScopedConnection;
pub use inventory::{Inventory, InventoryTxn};
pub use item_package::ItemPackage;
pub use layout::ContentLayout;
pub use merge::{merge_fingerprint, CatalogMerger, MergeOutcome};
pub use mutable::{MutableCatalog, MutableItemPackage};

// Re-export file names for the download operations
pub use schema::{CATALOG_FILE_NAME, ITEM_PACKAGE_FILE_NAME};
