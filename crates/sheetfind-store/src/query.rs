//! Compiles free-text user input into an FTS5 prefix-search expression.
//!
//! This is a best-effort sanitizer, not a parser. Quote characters are the
//! only grammar metacharacters removed; other FTS5 syntax (`-`, `:`, `^`,
//! parentheses, `AND`/`OR`/`NOT`) passes through and may produce a query
//! error at search time, which the search path reports as a normal result.

/// Marker requesting prefix matching of the last term.
pub const WILDCARD: char = '*';

/// ASCII quotes and their typographic and full-width look-alikes.
/// Every other character, full-width punctuation included, is kept as typed.
const STRIPPED: &[char] = &[
    '"', '\'', '\u{FF02}', '\u{FF07}', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}',
];

/// A sanitized expression ready for `sheet_fts MATCH ?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchExpression(String);

impl MatchExpression {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for MatchExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Turns raw "as-you-type" input into a [`MatchExpression`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCompiler;

impl QueryCompiler {
    /// Compiles `raw`, returning `None` when there is nothing to search for.
    ///
    /// Rules, in order:
    /// 1. trim surrounding whitespace (empty result: no query);
    /// 2. input already ending in `*` is used unchanged;
    /// 3. otherwise drop every quote character (`"`, `'` and their
    ///    typographic or full-width forms);
    /// 4. append `*` so the final word matches as a prefix.
    pub fn compile(raw: &str) -> Option<MatchExpression> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.ends_with(WILDCARD) {
            return Some(MatchExpression(trimmed.to_string()));
        }

        let mut expression: String = trimmed.chars().filter(|c| !STRIPPED.contains(c)).collect();
        expression.push(WILDCARD);
        Some(MatchExpression(expression))
    }
}
