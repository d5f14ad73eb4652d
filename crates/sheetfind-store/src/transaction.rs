//! SQLite transaction management.
//!
//! A thin wrapper over `sqlx::Transaction` that logs its lifecycle. SQLite
//! serializes writers, so there is no isolation level to pick; the first
//! write statement takes the database write lock until commit or rollback.

use sqlx::{Sqlite, SqliteConnection};

use crate::{Connection, Result};

/// Represents an active database transaction.
///
/// Dropping a transaction that was neither committed nor rolled back rolls it
/// back (SQLx's `Drop` behaviour).
pub struct Transaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").finish_non_exhaustive()
    }
}

impl Transaction {
    /// Begins a new transaction on a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns error if no connection can be acquired or `BEGIN` fails.
    pub async fn begin(conn: &Connection) -> Result<Self> {
        let tx = conn.pool().begin().await?;
        tracing::trace!("Started transaction");
        Ok(Self { tx })
    }

    /// Returns the connection the transaction runs on, for executing statements.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commits the transaction.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        tracing::trace!("Committed transaction");
        Ok(())
    }

    /// Rolls back the transaction.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        tracing::debug!("Rolled back transaction");
        Ok(())
    }
}
