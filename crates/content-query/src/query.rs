//! Parsing of user search input into full-text match expressions.

/// Characters with operator meaning in the full-text query syntax.
const SPECIAL_CHARS: &str = "\"*()+-:^{}";

/// A parsed search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    match_expression: String,
    keyword_search: bool,
}

impl SearchQuery {
    /// Parse user input.
    ///
    /// Input wrapped in double quotes is an exact phrase search; anything
    /// else is a bag-of-words keyword search. Returns `None` when no
    /// searchable terms remain.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();

        let is_phrase = trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"');
        let body = if is_phrase {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        };

        let terms: Vec<String> = body
            .split_whitespace()
            .map(|term| term.chars().filter(|c| !SPECIAL_CHARS.contains(*c)).collect::<String>())
            .filter(|term| !term.is_empty())
            .collect();

        if terms.is_empty() {
            return None;
        }

        let match_expression = if is_phrase {
            format!("\"{}\"", terms.join(" "))
        } else {
            // Quote each term so words like OR and NEAR stay literal
            terms
                .iter()
                .map(|term| format!("\"{}\"", term))
                .collect::<Vec<_>>()
                .join(" ")
        };

        Some(Self {
            match_expression,
            keyword_search: !is_phrase,
        })
    }

    /// Expression to bind to a `MATCH` clause.
    pub fn match_expression(&self) -> &str {
        &self.match_expression
    }

    /// True for bag-of-words searches, false for exact phrases.
    pub fn is_keyword_search(&self) -> bool {
        self.keyword_search
    }
}
