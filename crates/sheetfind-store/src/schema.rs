//! Database schema.
//!
//! `sheet_fts` is an FTS5 table whose `rowid` is the `sheet_rows.id` of the row
//! it indexes. The join between row storage and the index is done purely on
//! that identifier equality.

use tracing::{info, instrument};

use crate::{Connection, Result, Transaction};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS folders (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_folders_user_id ON folders(user_id)",
    "CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        folder_id INTEGER NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'processing'
            CHECK (status IN ('processing', 'indexed', 'error')),
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_files_folder_id ON files(folder_id)",
    "CREATE TABLE IF NOT EXISTS sheet_rows (
        id INTEGER PRIMARY KEY,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        raw_content TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sheet_rows_file_id ON sheet_rows(file_id)",
    "CREATE VIRTUAL TABLE IF NOT EXISTS sheet_fts USING fts5(content, file_id UNINDEXED)",
    // Cascading deletes of rows also drop their index entries.
    "CREATE TRIGGER IF NOT EXISTS sheet_rows_after_delete AFTER DELETE ON sheet_rows
     BEGIN
        DELETE FROM sheet_fts WHERE rowid = old.id;
     END",
];

/// Creates every table, index and trigger that does not exist yet.
///
/// Safe to run on every start.
#[instrument(skip(conn))]
pub async fn migrate(conn: &Connection) -> Result<()> {
    let mut tx = Transaction::begin(conn).await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(tx.conn()).await?;
    }
    tx.commit().await?;
    info!(statements = SCHEMA.len(), "Schema is up to date");
    Ok(())
}
