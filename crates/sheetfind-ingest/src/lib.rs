//! Streaming spreadsheet ingestion.
//!
//! An uploaded workbook is read sheet by sheet and row by row
//! ([`XlsxRowStream`]), blank rows are dropped, and the rest are written in
//! fixed-size batches through a [`BatchSink`]. Each upload runs as a
//! background task on an [`IngestPool`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sheetfind_ingest::{IngestConfig, IngestJob, IngestPool};
//!
//! let pool = IngestPool::new(conn.clone(), IngestConfig::default());
//! let handle = pool.submit(IngestJob::new(file.id, "uploads/norte.xlsx"));
//!
//! // The upload request can return now; or wait for the report:
//! let report = handle.join().await?;
//! println!("{} rows stored", report.rows_stored);
//! ```

pub mod pipeline;
pub mod pool;
pub mod sink;
pub mod source;
pub mod task;
pub mod xlsx;

pub use pipeline::{is_blank_row, IngestConfig, IngestOutcome, IngestReport, IngestionPipeline};
pub use pool::{join_all, IngestHandle, IngestJob, IngestPool};
pub use sink::{BatchSink, StoreSink};
pub use source::{MemoryWorkbook, RowIter, RowSource};
pub use task::{TaskId, TaskState};
pub use xlsx::XlsxRowStream;

pub use sheetfind_common::{Result, SheetFindError};
