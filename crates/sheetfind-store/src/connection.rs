//! SQLite connection management with connection pooling.
//!
//! This module provides connection pooling using SQLx's built-in pool manager.
//! Every connection is opened in write-ahead-log mode so that searches never
//! block on an in-flight ingestion batch; concurrent writers still serialize
//! on SQLite's write lock (bounded by `busy_timeout`).

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Executor;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::{Result, SheetFindError};

/// Retry configuration for connection establishment.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries)
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Creates a retry config with no retries (immediate failure).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Calculates the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay_ms = (self.initial_delay_ms as f64)
            * self.backoff_multiplier.powi(attempt as i32);

        Duration::from_millis((delay_ms as u64).min(self.max_delay_ms))
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Pool acquire timeout in seconds.
    pub connect_timeout: u64,
    /// Maximum lifetime of a connection in seconds.
    pub max_lifetime: Option<u64>,
    /// Idle timeout in seconds.
    pub idle_timeout: Option<u64>,
    /// Retry configuration for connection establishment.
    pub retry: RetryConfig,
    /// Number of prepared statements to cache per connection.
    pub statement_cache_capacity: usize,
    /// How long a writer waits on SQLite's lock before failing with SQLITE_BUSY.
    pub busy_timeout_ms: u64,
    /// `PRAGMA mmap_size` in bytes.
    pub mmap_size: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 8,
            connect_timeout: 30,
            max_lifetime: Some(1800), // 30 minutes
            idle_timeout: Some(600),   // 10 minutes
            retry: RetryConfig::default(),
            statement_cache_capacity: 100, // SQLx default
            busy_timeout_ms: 5000,
            mmap_size: 30_000_000_000,
        }
    }
}

impl PoolConfig {
    fn apply(&self, options: SqliteConnectOptions) -> SqliteConnectOptions {
        options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .foreign_keys(true)
            .statement_cache_capacity(self.statement_cache_capacity)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let mmap_size = self.mmap_size;
        let mut pool_options = SqlitePoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute("PRAGMA temp_store = MEMORY").await?;
                    conn.execute(format!("PRAGMA mmap_size = {}", mmap_size).as_str())
                        .await?;
                    Ok(())
                })
            });

        if let Some(max_lifetime_secs) = self.max_lifetime {
            pool_options = pool_options.max_lifetime(Duration::from_secs(max_lifetime_secs));
        }

        if let Some(idle_timeout_secs) = self.idle_timeout {
            pool_options = pool_options.idle_timeout(Duration::from_secs(idle_timeout_secs));
        }

        pool_options
    }
}

/// SQLite connection wrapper with connection pooling.
///
/// This is the storage-engine handle every component receives in its
/// constructor; there is no process-wide database handle.
#[derive(Clone)]
pub struct Connection {
    pool: SqlitePool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

impl Connection {
    /// Opens (creating if needed) the database file at `path`.
    ///
    /// The parent directory is created when missing.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or connection fails after all retries.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SheetFindError::Connection(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let options = config.apply(SqliteConnectOptions::new().filename(path));
        Self::connect(options, config).await
    }

    /// Creates a new connection pool from a `sqlite:` URI.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails after all retries or URI is invalid.
    #[instrument(skip(uri, config), fields(
        max_connections = config.max_connections,
        max_retries = config.retry.max_retries
    ))]
    pub async fn new(uri: &str, config: PoolConfig) -> Result<Self> {
        if uri.is_empty() {
            return Err(SheetFindError::Connection(
                "Connection URI cannot be empty".to_string(),
            ));
        }

        let options = SqliteConnectOptions::from_str(uri)
            .map_err(|e| SheetFindError::Connection(format!("Invalid connection URI: {}", e)))?;
        Self::connect(config.apply(options), config).await
    }

    async fn connect(options: SqliteConnectOptions, config: PoolConfig) -> Result<Self> {
        info!("Initializing connection pool");

        let pool = Self::connect_with_retry(options, config.pool_options(), &config.retry).await?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| SheetFindError::Connection(format!("Failed to verify connection: {}", e)))?;

        info!("Connection pool initialized successfully");
        Ok(Self { pool })
    }

    /// Attempts to connect with exponential backoff retry.
    async fn connect_with_retry(
        connect_options: SqliteConnectOptions,
        pool_options: SqlitePoolOptions,
        retry_config: &RetryConfig,
    ) -> Result<SqlitePool> {
        let mut last_error = None;

        for attempt in 0..=retry_config.max_retries {
            match pool_options.clone().connect_with(connect_options.clone()).await {
                Ok(pool) => {
                    if attempt > 0 {
                        info!(attempt = attempt, "Connection established after retry");
                    }
                    return Ok(pool);
                }
                Err(e) => {
                    last_error = Some(e);

                    if attempt < retry_config.max_retries {
                        let delay = retry_config.delay_for_attempt(attempt);
                        warn!(
                            attempt = attempt,
                            max_retries = retry_config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                            "Connection failed, retrying after delay"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error
            .map(SheetFindError::from)
            .unwrap_or_else(|| SheetFindError::Connection("Connection failed".to_string())))
    }

    /// Gets a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes the connection pool.
    pub async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    /// Pings the database to verify connectivity.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Returns the journal mode the database is actually running in.
    pub async fn journal_mode(&self) -> Result<String> {
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode)
    }
}
