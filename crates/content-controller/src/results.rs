//! Tagged outcomes of controller operations.

use std::sync::Arc;

use content_core::{ContentError, SourceFailure};
use content_store::{Catalog, ItemPackage};

/// Outcome of [`crate::ContentController::update_catalog`].
#[derive(Debug)]
pub enum UpdateCatalogResult {
    /// At least one catalog was downloaded and every source succeeded.
    Success { catalog: Arc<Catalog> },

    /// Nothing new was available.
    AlreadyCurrent { catalog: Arc<Catalog> },

    /// A merged catalog is available but some secondary sources failed.
    PartialSuccess {
        catalog: Arc<Catalog>,
        failures: Vec<SourceFailure>,
    },

    /// No catalog could be produced.
    Error { errors: Vec<ContentError> },
}

impl UpdateCatalogResult {
    /// The resulting catalog, unless the update failed outright.
    pub fn catalog(&self) -> Option<&Arc<Catalog>> {
        match self {
            Self::Success { catalog }
            | Self::AlreadyCurrent { catalog }
            | Self::PartialSuccess { catalog, .. } => Some(catalog),
            Self::Error { .. } => None,
        }
    }

    /// Per-source failures of a partial success.
    pub fn failures(&self) -> &[SourceFailure] {
        match self {
            Self::PartialSuccess { failures, .. } => failures,
            _ => &[],
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Outcome of [`crate::ContentController::install_item_package`].
#[derive(Debug)]
pub enum InstallItemPackageResult {
    /// The package was downloaded and installed.
    Success { package: Arc<ItemPackage> },

    /// The requested version was already installed.
    AlreadyInstalled { package: Arc<ItemPackage> },

    Error { errors: Vec<ContentError> },
}

impl InstallItemPackageResult {
    pub fn package(&self) -> Option<&Arc<ItemPackage>> {
        match self {
            Self::Success { package } | Self::AlreadyInstalled { package } => Some(package),
            Self::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
