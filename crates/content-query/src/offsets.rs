//! Decoding of full-text `offsets()` annotations into match ranges.

use content_core::MatchRange;
use tracing::debug;

/// Fields per match tuple: column, term, byte offset, byte length.
const TUPLE_LEN: usize = 4;

/// Decode a raw offsets annotation into byte ranges.
///
/// The annotation is a whitespace-separated run of
/// `(column, term, offset, length)` tuples in match order. For a phrase
/// search (`keyword_search == false`), every tuple after the first term of
/// the phrase extends the preceding range so that one multi-word match
/// becomes one contiguous range. For a keyword search every tuple is its
/// own range.
///
/// Decoding is all-or-nothing: any field that is not an integer, or a
/// trailing partial tuple, yields an empty result.
pub fn decode_match_ranges(offsets: &str, keyword_search: bool) -> Vec<MatchRange> {
    let fields: Option<Vec<usize>> = offsets
        .split_whitespace()
        .map(|field| field.parse::<usize>().ok())
        .collect();

    let fields = match fields {
        Some(fields) if fields.len() % TUPLE_LEN == 0 => fields,
        _ => {
            debug!("Discarding malformed offsets annotation: {:?}", offsets);
            return Vec::new();
        }
    };

    let mut ranges: Vec<MatchRange> = Vec::with_capacity(fields.len() / TUPLE_LEN);

    for tuple in fields.chunks_exact(TUPLE_LEN) {
        let (term, offset, length) = (tuple[1], tuple[2], tuple[3]);

        if !keyword_search && term != 0 {
            if let Some(previous) = ranges.last_mut() {
                previous.length = (offset + length).saturating_sub(previous.location);
                continue;
            }
        }

        ranges.push(MatchRange::new(offset, length));
    }

    ranges
}
