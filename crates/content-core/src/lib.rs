//! content-core - Core types and traits for the content mirror
//!
//! This crate provides the foundational types, traits, and error handling
//! shared by the store, sync, and controller crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::{ContentError, ErrorKind, Result, SourceFailure};
pub use traits::*;
pub use types::*;
