//! Reconciliation of rows that were stored without an index entry.
//!
//! An index insert that fails inside a batch leaves its row committed but
//! unsearchable. [`Reconciler::missing_count`] exposes how many such rows
//! exist and [`Reconciler::sweep`] re-indexes them from their stored content.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::batch::{insert_index_entry, CELL_SEPARATOR, DEFAULT_BATCH_SIZE};
use crate::models::{FileId, RowId};
use crate::{Connection, Result, Transaction};

const MISSING_FILTER: &str = "(?1 IS NULL OR sheet_rows.file_id = ?1) \
     AND NOT EXISTS (SELECT 1 FROM sheet_fts WHERE sheet_fts.rowid = sheet_rows.id)";

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Rows found without an index entry.
    pub examined: u64,
    /// Rows indexed by this sweep.
    pub reindexed: u64,
    /// Rows that still could not be indexed.
    pub failed: u64,
}

#[derive(sqlx::FromRow)]
struct MissingRow {
    id: RowId,
    file_id: FileId,
    raw_content: String,
}

/// Finds and repairs rows lacking an index entry.
#[derive(Debug, Clone)]
pub struct Reconciler {
    conn: Connection,
    chunk_size: u32,
}

impl Reconciler {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            chunk_size: DEFAULT_BATCH_SIZE as u32,
        }
    }

    /// Rows examined per transaction during a sweep (at least 1).
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Counts stored rows that have no index entry, optionally for one file.
    pub async fn missing_count(&self, file: Option<FileId>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM sheet_rows WHERE {MISSING_FILTER}"
        ))
        .bind(file)
        .fetch_one(self.conn.pool())
        .await?;
        Ok(count as u64)
    }

    /// Re-indexes every stored row lacking an index entry, optionally for one file.
    #[instrument(skip(self), fields(file_id = ?file))]
    pub async fn sweep(&self, file: Option<FileId>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut after = RowId(0);

        loop {
            let chunk = sqlx::query_as::<_, MissingRow>(&format!(
                "SELECT sheet_rows.id, sheet_rows.file_id, sheet_rows.raw_content FROM sheet_rows \
                 WHERE {MISSING_FILTER} AND sheet_rows.id > ?2 \
                 ORDER BY sheet_rows.id LIMIT ?3"
            ))
            .bind(file)
            .bind(after)
            .bind(self.chunk_size)
            .fetch_all(self.conn.pool())
            .await?;

            let Some(last) = chunk.last() else {
                break;
            };
            after = last.id;
            let exhausted = chunk.len() < self.chunk_size as usize;

            let mut tx = Transaction::begin(&self.conn).await?;
            for row in &chunk {
                report.examined += 1;
                let text = match serde_json::from_str::<Vec<String>>(&row.raw_content) {
                    Ok(cells) => cells.join(CELL_SEPARATOR),
                    Err(e) => {
                        warn!(row_id = %row.id, error = %e, "Stored row is not a cell array");
                        report.failed += 1;
                        continue;
                    }
                };

                match insert_index_entry(tx.conn(), row.id, &text, row.file_id).await {
                    Ok(()) => report.reindexed += 1,
                    Err(e) => {
                        warn!(row_id = %row.id, error = %e, "Re-index failed");
                        report.failed += 1;
                    }
                }
            }
            tx.commit().await?;

            if exhausted {
                break;
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                reindexed = report.reindexed,
                failed = report.failed,
                "Reconciliation sweep finished"
            );
        }
        Ok(report)
    }
}
