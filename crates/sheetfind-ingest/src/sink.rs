//! Where the pipeline sends its batches.
//!
//! The pipeline itself is synchronous and runs on a blocking thread. A
//! [`BatchSink`] is the seam to the async store: [`StoreSink`] drives the
//! store's futures to completion on a runtime handle, one call at a time.

use sheetfind_common::Result;
use sheetfind_store::{
    BatchOutcome, BatchWriter, Catalog, Connection, FileId, FileStatus, ReconcileReport,
    Reconciler, RowBatch,
};
use tokio::runtime::Handle;

/// Destination for one file's batches and its terminal status.
pub trait BatchSink {
    /// Commits one batch. Must not return before the batch is durable.
    fn flush(&mut self, file: FileId, batch: &RowBatch) -> Result<BatchOutcome>;

    /// Re-indexes rows of `file` that were stored without an index entry.
    fn reconcile(&mut self, file: FileId) -> Result<ReconcileReport>;

    /// Moves `file` out of `processing`. Returns `false` if it already had.
    fn set_status(&mut self, file: FileId, status: FileStatus) -> Result<bool>;
}

/// [`BatchSink`] backed by the SQLite store.
///
/// Blocks the calling thread on `handle`, so it must be used from outside
/// the runtime's worker threads (for example inside `spawn_blocking`).
#[derive(Debug, Clone)]
pub struct StoreSink {
    handle: Handle,
    writer: BatchWriter,
    catalog: Catalog,
    reconciler: Reconciler,
}

impl StoreSink {
    pub fn new(conn: Connection, handle: Handle) -> Self {
        Self {
            handle,
            writer: BatchWriter::new(conn.clone()),
            catalog: Catalog::new(conn.clone()),
            reconciler: Reconciler::new(conn),
        }
    }
}

impl BatchSink for StoreSink {
    fn flush(&mut self, file: FileId, batch: &RowBatch) -> Result<BatchOutcome> {
        self.handle.block_on(self.writer.write(file, batch))
    }

    fn reconcile(&mut self, file: FileId) -> Result<ReconcileReport> {
        self.handle.block_on(self.reconciler.sweep(Some(file)))
    }

    fn set_status(&mut self, file: FileId, status: FileStatus) -> Result<bool> {
        self.handle.block_on(self.catalog.set_status(file, status))
    }
}
