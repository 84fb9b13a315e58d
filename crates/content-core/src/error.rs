//! Error types for the content mirror.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using ContentError.
pub type Result<T> = std::result::Result<T, ContentError>;

/// Errors that can occur while acquiring, installing, or reading content.
#[derive(Error, Debug)]
pub enum ContentError {
    /// Network request failed or timed out.
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// Server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// Payload did not have the expected shape.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Archive could not be decompressed.
    #[error("Extraction error: {message}")]
    Extraction { message: String },

    /// A file expected after extraction or installation is absent.
    #[error("Missing file: {}", path.display())]
    MissingFile { path: PathBuf },

    /// Installed content does not have the expected version.
    #[error("Version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: i64, actual: i64 },

    /// Named catalog is not installed.
    #[error("Catalog not found: {name}")]
    CatalogNotFound { name: String },

    /// No item package is installed for the item.
    #[error("Item package not found for item {item_id}")]
    ItemPackageNotFound { item_id: i64 },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Broad failure category, used when reporting outcomes to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Decode,
    Storage,
    Consistency,
    Lookup,
    Other,
}

/// A failure attributed to one named catalog source.
#[derive(Debug)]
pub struct SourceFailure {
    /// Name of the catalog source that failed.
    pub name: String,

    /// What went wrong.
    pub error: ContentError,
}

impl SourceFailure {
    pub fn new(name: impl Into<String>, error: ContentError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

impl ContentError {
    /// Create a transport error.
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create an extraction error.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    /// Create a missing file error.
    pub fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingFile { path: path.into() }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::HttpStatus { .. } => ErrorKind::Transport,
            Self::Decode { .. } | Self::Serialization(_) => ErrorKind::Decode,
            Self::Database { .. } | Self::Extraction { .. } | Self::Io(_) => ErrorKind::Storage,
            Self::MissingFile { .. } | Self::VersionMismatch { .. } => ErrorKind::Consistency,
            Self::CatalogNotFound { .. } | Self::ItemPackageNotFound { .. } => ErrorKind::Lookup,
            Self::InvalidArgument { .. } | Self::Config { .. } | Self::Internal { .. } => {
                ErrorKind::Other
            }
        }
    }

    /// Get a stable error code for logs and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::HttpStatus { .. } => "HTTP_STATUS",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Extraction { .. } => "EXTRACTION_ERROR",
            Self::MissingFile { .. } => "MISSING_FILE",
            Self::VersionMismatch { .. } => "VERSION_MISMATCH",
            Self::CatalogNotFound { .. } => "CATALOG_NOT_FOUND",
            Self::ItemPackageNotFound { .. } => "ITEM_PACKAGE_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
