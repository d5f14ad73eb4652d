//! Single-file ingestion: rows in, batches out, terminal status last.
//!
//! ```text
//!   processing ──(all batches committed)──────────────> indexed
//!        │
//!        ├──(open / parse failure, dropped batch)─────> error
//!        │
//!        └──(cancelled)──> processing (committed batches stay)
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use sheetfind_common::{Result, SheetFindError};
use sheetfind_store::{FileId, FileStatus, RowBatch, DEFAULT_BATCH_SIZE};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::sink::BatchSink;
use crate::source::RowSource;
use crate::xlsx::XlsxRowStream;

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Rows per batch transaction.
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// How an ingestion run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Every batch committed; the file is `indexed`.
    Indexed,
    /// The file is `error`.
    Failed { reason: String },
    /// Stopped before finishing; the file stays `processing`.
    Cancelled,
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub file_id: FileId,
    pub sheets: usize,
    pub rows_read: u64,
    pub rows_skipped_empty: u64,
    pub rows_stored: u64,
    pub rows_indexed: u64,
    pub index_failures: u64,
    /// Rows re-indexed by the reconciliation pass at the end of the run.
    pub reindexed: u64,
    /// Rows still lacking an index entry after reconciliation.
    pub still_unindexed: u64,
    pub batches_full: u64,
    pub batches_partial: u64,
    pub batches_failed: u64,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

impl IngestReport {
    pub(crate) fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            sheets: 0,
            rows_read: 0,
            rows_skipped_empty: 0,
            rows_stored: 0,
            rows_indexed: 0,
            index_failures: 0,
            reindexed: 0,
            still_unindexed: 0,
            batches_full: 0,
            batches_partial: 0,
            batches_failed: 0,
            outcome: IngestOutcome::Cancelled,
        }
    }

    /// Status the file was left in.
    pub fn status(&self) -> FileStatus {
        match self.outcome {
            IngestOutcome::Indexed => FileStatus::Indexed,
            IngestOutcome::Failed { .. } => FileStatus::Error,
            IngestOutcome::Cancelled => FileStatus::Processing,
        }
    }
}

/// A row carries nothing searchable when every cell is blank.
pub fn is_blank_row<S: AsRef<str>>(cells: &[S]) -> bool {
    cells.iter().all(|cell| cell.as_ref().trim().is_empty())
}

enum Progress {
    Finished,
    Cancelled,
}

/// Drives one file from its row source into a [`BatchSink`].
#[derive(Debug, Clone, Default)]
pub struct IngestionPipeline {
    config: IngestConfig,
}

impl IngestionPipeline {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Opens the `.xlsx` file at `path` and ingests it.
    ///
    /// A file that cannot be opened is marked `error`.
    pub fn run_path<K>(
        &self,
        file: FileId,
        path: &Path,
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> Result<IngestReport>
    where
        K: BatchSink + ?Sized,
    {
        match XlsxRowStream::open(path) {
            Ok(mut source) => self.run(file, &mut source, sink, cancel),
            Err(e) => {
                error!(file_id = %file, error = %e, "Failed to open workbook");
                let mut report = IngestReport::new(file);
                self.finish_failed(file, sink, &mut report, e)?;
                Ok(report)
            }
        }
    }

    /// Ingests every sheet of `source` into `sink`, then sets the file's
    /// terminal status.
    ///
    /// Parse failures, dropped batches and cancellation are reported in the
    /// returned [`IngestReport`]. `Err` means the sink could not record the
    /// terminal status.
    #[instrument(skip(self, source, sink, cancel), fields(file_id = %file))]
    pub fn run<S, K>(
        &self,
        file: FileId,
        source: &mut S,
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> Result<IngestReport>
    where
        S: RowSource + ?Sized,
        K: BatchSink + ?Sized,
    {
        info!(batch_size = self.config.batch_size, "Ingestion started");
        let mut report = IngestReport::new(file);

        match self.ingest(file, source, sink, cancel, &mut report) {
            Ok(Progress::Cancelled) => {
                warn!(
                    rows_stored = report.rows_stored,
                    "Ingestion cancelled, file stays in processing"
                );
                report.outcome = IngestOutcome::Cancelled;
                Ok(report)
            }
            Ok(Progress::Finished) => {
                self.reconcile(file, sink, &mut report);

                if report.batches_failed > 0 {
                    let reason = format!(
                        "{} batch(es) could not be stored",
                        report.batches_failed
                    );
                    self.finish_failed(
                        file,
                        sink,
                        &mut report,
                        SheetFindError::BatchTransaction(reason),
                    )?;
                } else {
                    sink.set_status(file, FileStatus::Indexed)?;
                    report.outcome = IngestOutcome::Indexed;
                }

                info!(
                    sheets = report.sheets,
                    rows_read = report.rows_read,
                    rows_stored = report.rows_stored,
                    rows_indexed = report.rows_indexed,
                    status = %report.status(),
                    "Ingestion finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, rows_stored = report.rows_stored, "Ingestion aborted");
                self.finish_failed(file, sink, &mut report, e)?;
                Ok(report)
            }
        }
    }

    fn ingest<S, K>(
        &self,
        file: FileId,
        source: &mut S,
        sink: &mut K,
        cancel: &CancellationToken,
        report: &mut IngestReport,
    ) -> Result<Progress>
    where
        S: RowSource + ?Sized,
        K: BatchSink + ?Sized,
    {
        let mut batch = RowBatch::with_capacity(self.config.batch_size);

        for sheet in source.sheet_names() {
            if cancel.is_cancelled() {
                return Ok(Progress::Cancelled);
            }
            report.sheets += 1;

            let rows = source.rows(&sheet)?;
            for row in rows {
                let cells = row?;
                report.rows_read += 1;

                if is_blank_row(cells.as_slice()) {
                    report.rows_skipped_empty += 1;
                    continue;
                }

                batch.push(cells.as_slice())?;
                if batch.is_full() {
                    if cancel.is_cancelled() {
                        return Ok(Progress::Cancelled);
                    }
                    self.flush(file, &mut batch, sink, report);
                }
            }
        }

        if !batch.is_empty() {
            if cancel.is_cancelled() {
                return Ok(Progress::Cancelled);
            }
            self.flush(file, &mut batch, sink, report);
        }

        Ok(Progress::Finished)
    }

    /// Hands `batch` to the sink and empties it whatever the result.
    fn flush<K>(&self, file: FileId, batch: &mut RowBatch, sink: &mut K, report: &mut IngestReport)
    where
        K: BatchSink + ?Sized,
    {
        let full = batch.is_full();

        match sink.flush(file, batch) {
            Ok(outcome) => {
                if full {
                    report.batches_full += 1;
                } else {
                    report.batches_partial += 1;
                }
                report.rows_stored += outcome.stored() as u64;
                report.rows_indexed += outcome.indexed() as u64;
                report.index_failures += outcome.index_failures.len() as u64;
            }
            Err(e) => {
                error!(error = %e, batch_len = batch.len(), "Batch dropped");
                report.batches_failed += 1;
            }
        }

        batch.clear();
    }

    fn reconcile<K>(&self, file: FileId, sink: &mut K, report: &mut IngestReport)
    where
        K: BatchSink + ?Sized,
    {
        if report.index_failures == 0 {
            return;
        }

        match sink.reconcile(file) {
            Ok(sweep) => {
                report.reindexed = sweep.reindexed;
                report.rows_indexed += sweep.reindexed;
                report.still_unindexed = sweep.failed;
                if sweep.failed > 0 {
                    warn!(
                        still_unindexed = sweep.failed,
                        "Rows remain stored without an index entry"
                    );
                }
            }
            Err(e) => {
                report.still_unindexed = report.index_failures;
                warn!(error = %e, "Reconciliation failed");
            }
        }
    }

    fn finish_failed<K>(
        &self,
        file: FileId,
        sink: &mut K,
        report: &mut IngestReport,
        cause: SheetFindError,
    ) -> Result<()>
    where
        K: BatchSink + ?Sized,
    {
        sink.set_status(file, FileStatus::Error)?;
        report.outcome = IngestOutcome::Failed {
            reason: cause.to_string(),
        };
        Ok(())
    }
}
