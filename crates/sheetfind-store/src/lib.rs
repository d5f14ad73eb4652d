//! Row storage, full-text index and ranked search for uploaded spreadsheets.
//!
//! Every spreadsheet row is stored twice in one SQLite database: once as a
//! JSON array of cells in `sheet_rows`, and once as searchable text in the
//! FTS5 table `sheet_fts`, whose `rowid` is the stored row's id.
//!
//! # Architecture
//!
//! ```text
//!  IngestionPipeline (sheetfind-ingest)
//!           |
//!      BatchWriter ──────────────┐
//!           |                    |
//!     sheet_rows (id) ══ rowid ══ sheet_fts
//!           |                    |
//!   files -> folders -> users    |
//!           └──── SearchExecutor ┘ <── QueryCompiler <── raw input
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use sheetfind_store::{BatchWriter, Catalog, Connection, PoolConfig, RowBatch, SearchExecutor};
//!
//! let conn = Connection::open("sheetfind.db", PoolConfig::default()).await?;
//! sheetfind_store::schema::migrate(&conn).await?;
//!
//! let catalog = Catalog::new(conn.clone());
//! let user = catalog.create_user("ana@example.com").await?;
//! let folder = catalog.create_folder(user.id, "Relatorios").await?;
//! let file = catalog.register_file(folder.id, "norte.xlsx", "uploads/norte.xlsx").await?;
//!
//! let mut batch = RowBatch::default();
//! batch.push(&["Financeiro", "Norte"])?;
//! BatchWriter::new(conn.clone()).write(file.id, &batch).await?;
//!
//! let hits = SearchExecutor::new(conn).search_text(user.id, "fin").await?;
//! ```

pub mod batch;
pub mod catalog;
pub mod connection;
pub mod models;
pub mod query;
pub mod reconcile;
pub mod schema;
pub mod search;
pub mod transaction;

pub use batch::{BatchOutcome, BatchWriter, IndexFailure, RowBatch, CELL_SEPARATOR, DEFAULT_BATCH_SIZE};
pub use catalog::Catalog;
pub use connection::{Connection, PoolConfig, RetryConfig};
pub use models::{FileId, FileRecord, FileStatus, Folder, FolderId, FolderWithFiles, RowId, User, UserId};
pub use query::{MatchExpression, QueryCompiler, WILDCARD};
pub use reconcile::{ReconcileReport, Reconciler};
pub use search::{SearchExecutor, SearchHit, SnippetConfig, DEFAULT_RESULT_LIMIT};
pub use transaction::Transaction;

pub use sheetfind_common::{Result, SheetFindError};
