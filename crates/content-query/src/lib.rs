//! content-query - Full-text query parsing and match decoding
//!
//! Turns user input into a full-text match expression and turns the search
//! engine's raw `offsets()` annotation back into byte ranges.
//!
//! # Example
//!
//! ```rust
//! use content_query::{decode_match_ranges, SearchQuery};
//!
//! let query = SearchQuery::parse("\"brown fox\"").unwrap();
//! assert!(!query.is_keyword_search());
//!
//! let ranges = decode_match_ranges("0 0 10 4 0 1 20 5", query.is_keyword_search());
//! assert_eq!(ranges.len(), 1);
//! assert_eq!(ranges[0].length, 15);
//! ```

mod offsets;
mod query;

pub use offsets::decode_match_ranges;
pub use query::SearchQuery;

// Re-export for convenience
pub use content_core::MatchRange;
