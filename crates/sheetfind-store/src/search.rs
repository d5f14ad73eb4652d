//! Ranked, owner-scoped full-text search with highlighted snippets.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::models::{FileId, RowId, UserId};
use crate::query::{MatchExpression, QueryCompiler};
use crate::{Connection, Result, SheetFindError};

/// Maximum number of hits returned for one query.
pub const DEFAULT_RESULT_LIMIT: u32 = 50;

/// FTS5 refuses snippet windows larger than this.
pub const MAX_SNIPPET_TOKENS: u32 = 64;

// Private-use code points handed to snippet() so the real markers can be
// substituted after the cell text has been escaped.
const MARK_START: char = '\u{E000}';
const MARK_END: char = '\u{E001}';
const MARK_ELLIPSIS: char = '\u{E002}';

const SEARCH_SQL: &str = "
    SELECT
        sheet_rows.id AS row_id,
        files.id AS file_id,
        files.file_name AS file_name,
        snippet(sheet_fts, 0, char(57344), char(57345), char(57346), ?1) AS snippet,
        sheet_rows.raw_content AS raw_content,
        bm25(sheet_fts) AS score
    FROM sheet_fts
    JOIN sheet_rows ON sheet_rows.id = sheet_fts.rowid
    JOIN files ON files.id = sheet_rows.file_id
    JOIN folders ON folders.id = files.folder_id
    WHERE folders.user_id = ?2 AND sheet_fts MATCH ?3
    ORDER BY rank, sheet_rows.id
    LIMIT ?4
";

/// Snippet rendering parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetConfig {
    /// Emitted before each matched term.
    pub start_marker: String,
    /// Emitted after each matched term.
    pub end_marker: String,
    /// Emitted where context was elided.
    pub ellipsis: String,
    /// Snippet window in tokens, clamped to `1..=64`.
    pub max_tokens: u32,
}

impl Default for SnippetConfig {
    fn default() -> Self {
        Self {
            start_marker: "<mark>".to_string(),
            end_marker: "</mark>".to_string(),
            ellipsis: "...".to_string(),
            max_tokens: MAX_SNIPPET_TOKENS,
        }
    }
}

impl SnippetConfig {
    fn token_budget(&self) -> u32 {
        self.max_tokens.clamp(1, MAX_SNIPPET_TOKENS)
    }

    /// HTML-escapes the snippet text and substitutes the configured markers.
    fn render(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + 16);
        for c in raw.chars() {
            match c {
                MARK_START => out.push_str(&self.start_marker),
                MARK_END => out.push_str(&self.end_marker),
                MARK_ELLIPSIS => out.push_str(&self.ellipsis),
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#39;"),
                other => out.push(other),
            }
        }
        out
    }
}

/// Messages SQLite gives when FTS5 rejects a MATCH expression.
fn is_query_rejection(message: &str) -> bool {
    message.starts_with("fts5:")
        || message.starts_with("no such column:")
        || message.starts_with("unknown special query:")
}

/// Engine rejections of the expression are [`SheetFindError::Query`]; storage
/// faults (busy, locked, I/O) keep their own classification.
fn search_error(err: sqlx::Error) -> SheetFindError {
    match &err {
        sqlx::Error::Database(db_err) if is_query_rejection(db_err.message()) => {
            SheetFindError::Query(db_err.message().to_string())
        }
        _ => SheetFindError::from(err),
    }
}

/// One matched row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub row_id: RowId,
    pub file_id: FileId,
    pub file_name: String,
    /// Highlighted excerpt of the row's searchable text.
    pub snippet: String,
    /// The row exactly as stored (JSON array of cells).
    pub raw_content: String,
    /// bm25 score; lower is more relevant.
    pub score: f64,
}

impl SearchHit {
    /// Decodes the stored row back into its ordered cells.
    pub fn cells(&self) -> Result<Vec<String>> {
        Ok(serde_json::from_str(&self.raw_content)?)
    }
}

#[derive(sqlx::FromRow)]
struct HitRow {
    row_id: RowId,
    file_id: FileId,
    file_name: String,
    snippet: String,
    raw_content: String,
    score: f64,
}

/// Executes compiled queries against the index, scoped to the querying user.
#[derive(Debug, Clone)]
pub struct SearchExecutor {
    conn: Connection,
    snippet: SnippetConfig,
    limit: u32,
}

impl SearchExecutor {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            snippet: SnippetConfig::default(),
            limit: DEFAULT_RESULT_LIMIT,
        }
    }

    pub fn with_snippet_config(mut self, snippet: SnippetConfig) -> Self {
        self.snippet = snippet;
        self
    }

    /// Overrides the result cap (at least 1).
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Compiles `raw` and searches; blank input returns no hits without touching the index.
    pub async fn search_text(&self, user: UserId, raw: &str) -> Result<Vec<SearchHit>> {
        let query = QueryCompiler::compile(raw);
        self.search(user, query.as_ref()).await
    }

    /// Returns the best matches for `query` among rows of files in `user`'s folders.
    ///
    /// # Errors
    ///
    /// Returns [`SheetFindError::Query`] when the index engine rejects the
    /// expression. An empty result is `Ok(vec![])`.
    #[instrument(skip(self, query), fields(user_id = %user, query = ?query))]
    pub async fn search(
        &self,
        user: UserId,
        query: Option<&MatchExpression>,
    ) -> Result<Vec<SearchHit>> {
        let Some(query) = query else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query_as::<_, HitRow>(SEARCH_SQL)
            .bind(self.snippet.token_budget())
            .bind(user)
            .bind(query.as_str())
            .bind(self.limit)
            .fetch_all(self.conn.pool())
            .await
            .map_err(search_error)?;

        debug!(hits = rows.len(), "Search finished");

        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                row_id: row.row_id,
                file_id: row.file_id,
                file_name: row.file_name,
                snippet: self.snippet.render(&row.snippet),
                raw_content: row.raw_content,
                score: row.score,
            })
            .collect())
    }
}
