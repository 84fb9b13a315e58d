//! content-controller - Lifecycle of installed content
//!
//! The controller owns one storage root. It keeps the catalog current by
//! downloading the default and secondary catalogs and merging them, and it
//! installs and uninstalls item packages on request.
//!
//! # Observers
//!
//! - catalog updates deliver the merged [`content_store::Catalog`]
//! - installs deliver the new [`content_store::ItemPackage`]
//! - uninstalls deliver the item id

mod controller;
mod results;

pub use controller::ContentController;
pub use results::{InstallItemPackageResult, UpdateCatalogResult};
