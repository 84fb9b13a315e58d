//! content-sync - Remote content acquisition for the content mirror
//!
//! This crate talks to content sources: it asks them which catalog version
//! is current, downloads catalog and item package archives, extracts them
//! into scratch space, and moves them into their installed locations.

pub mod extract;
pub mod operations;
pub mod session;
pub mod transport;

pub use extract::{archive_file, extract_archive};
pub use operations::{
    catalog_url, download_catalogs, item_package_url, CatalogDownload, DownloadCatalog,
    DownloadItemPackage, FetchVersion, ItemPackageDownload,
};
pub use session::{DownloadedArchive, Progress, Session, WorkGuard};
pub use transport::{HttpTransport, MemoryTransport};
