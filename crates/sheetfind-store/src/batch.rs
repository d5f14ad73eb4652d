//! Batched dual-write of rows and their index entries.
//!
//! One batch is one unit of work:
//!
//! 1. every row payload is inserted into `sheet_rows`, collecting the ids
//!    SQLite assigns, in batch order;
//! 2. one `sheet_fts` entry is inserted per row, using the id obtained in
//!    step 1 as the entry's `rowid` and the file id as its filter column;
//! 3. the transaction commits.
//!
//! A row insert failure rolls back the whole batch. An index insert failure
//! only loses that statement: the row stays committed and the failure is
//! reported in [`BatchOutcome::index_failures`] so it can be reconciled later
//! (see [`crate::Reconciler`]).

use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};
use tracing::{error, info, instrument, warn};

use crate::models::{FileId, RowId};
use crate::{Connection, Result, RetryConfig, SheetFindError, Transaction};

/// Rows per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Separator used to build a row's searchable text from its cells.
pub const CELL_SEPARATOR: &str = " ";

/// Pending rows for one batch: the serialized payload for row storage and,
/// at the same position, the searchable text for the index.
///
/// The two collections are keyed by position because row identities do not
/// exist until the batch is committed. [`RowBatch::clear`] resets the length
/// to zero and keeps the allocations for the next batch.
#[derive(Debug, Clone)]
pub struct RowBatch {
    payloads: Vec<String>,
    texts: Vec<String>,
    capacity: usize,
}

impl Default for RowBatch {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BATCH_SIZE)
    }
}

impl RowBatch {
    /// Creates an empty batch that reports full at `capacity` rows (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            payloads: Vec::with_capacity(capacity),
            texts: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends one row: its JSON-encoded cells and its space-joined text.
    pub fn push<S: AsRef<str> + Serialize>(&mut self, cells: &[S]) -> Result<()> {
        let payload = serde_json::to_string(cells)?;
        let text = cells
            .iter()
            .map(|cell| cell.as_ref())
            .collect::<Vec<_>>()
            .join(CELL_SEPARATOR);

        self.payloads.push(payload);
        self.texts.push(text);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.payloads.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialized row contents, in insertion order.
    pub fn payloads(&self) -> &[String] {
        &self.payloads
    }

    /// Searchable texts, position-aligned with [`RowBatch::payloads`].
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    /// Empties the batch without releasing its buffers.
    pub fn clear(&mut self) {
        self.payloads.clear();
        self.texts.clear();
    }
}

/// An index entry that could not be written for a committed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub row_id: RowId,
    pub message: String,
}

impl From<IndexFailure> for SheetFindError {
    fn from(failure: IndexFailure) -> Self {
        SheetFindError::IndexInsert {
            row_id: failure.row_id.0,
            message: failure.message,
        }
    }
}

/// Result of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Ids assigned to the stored rows, in batch order.
    pub row_ids: Vec<RowId>,
    /// Rows that were stored but could not be indexed.
    pub index_failures: Vec<IndexFailure>,
}

impl BatchOutcome {
    pub fn stored(&self) -> usize {
        self.row_ids.len()
    }

    pub fn indexed(&self) -> usize {
        self.row_ids.len() - self.index_failures.len()
    }
}

/// Writes [`RowBatch`]es to row storage and the full-text index.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    conn: Connection,
    retry: RetryConfig,
}

impl BatchWriter {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            retry: RetryConfig {
                max_retries: 1,
                ..RetryConfig::default()
            },
        }
    }

    /// Sets how often a batch that failed on a busy or locked database is
    /// written again.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Commits one batch for `file`.
    ///
    /// A batch that fails with a retryable error (`SQLITE_BUSY`,
    /// `SQLITE_LOCKED`, pool timeout) has been rolled back and is written
    /// again, up to the configured number of retries.
    ///
    /// # Errors
    ///
    /// Returns [`SheetFindError::BatchTransaction`] when the transaction could
    /// not be started, a row insert failed, or the commit failed. In every
    /// case none of the batch's rows are stored.
    #[instrument(skip(self, batch), fields(file_id = %file, batch_len = batch.len()))]
    pub async fn write(&self, file: FileId, batch: &RowBatch) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut attempt = 0;
        loop {
            match self.write_once(file, batch).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch hit a busy database, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(SheetFindError::BatchTransaction(e.to_string())),
            }
        }
    }

    async fn write_once(&self, file: FileId, batch: &RowBatch) -> Result<BatchOutcome> {
        let mut tx = Transaction::begin(&self.conn).await?;

        let mut row_ids = Vec::with_capacity(batch.len());
        for payload in batch.payloads() {
            let inserted = sqlx::query_scalar::<_, RowId>(
                "INSERT INTO sheet_rows (file_id, raw_content) VALUES (?, ?) RETURNING id",
            )
            .bind(file)
            .bind(payload)
            .fetch_one(tx.conn())
            .await;

            match inserted {
                Ok(id) => row_ids.push(id),
                Err(e) => {
                    error!(error = %e, "Row insert failed, rolling back batch");
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed");
                    }
                    return Err(e.into());
                }
            }
        }

        let mut index_failures = Vec::new();
        for (row_id, text) in row_ids.iter().zip(batch.texts()) {
            if let Err(e) = insert_index_entry(tx.conn(), *row_id, text, file).await {
                warn!(row_id = %row_id, error = %e, "Index insert failed, row stays stored");
                index_failures.push(IndexFailure {
                    row_id: *row_id,
                    message: e.to_string(),
                });
            }
        }

        tx.commit().await?;

        info!(
            stored = row_ids.len(),
            index_failures = index_failures.len(),
            "Batch committed"
        );
        Ok(BatchOutcome {
            row_ids,
            index_failures,
        })
    }
}

/// Inserts the index entry for a stored row, keyed by the row's own id.
pub(crate) async fn insert_index_entry<'e, E>(
    executor: E,
    row_id: RowId,
    text: &str,
    file: FileId,
) -> std::result::Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO sheet_fts (rowid, content, file_id) VALUES (?, ?, ?)")
        .bind(row_id)
        .bind(text)
        .bind(file)
        .execute(executor)
        .await?;
    Ok(())
}
