//! sheetfind CLI
//!
//! Usage:
//!   sf init                                   Create the database and upload directory
//!   sf user add <email>                       Register a user
//!   sf folder add --user <id> <name>          Create a folder
//!   sf folder list --user <id>                List folders and their files
//!   sf folder rm --user <id> <folder>         Delete a folder, its files and rows
//!   sf upload --folder <id> <path>            Copy, register and ingest a workbook
//!   sf search --user <id> <query...>          Prefix search over the user's rows
//!   sf status <file>                          Show a file's ingestion status
//!   sf reconcile [--file <id>] [--dry-run]    Re-index rows missing from the index

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use config::SheetFindConfig;
use sheetfind_ingest::{IngestConfig, IngestJob, IngestPool};
use sheetfind_store::schema::migrate;
use sheetfind_store::{
    Catalog, Connection, FileId, FileStatus, FolderId, Reconciler, SearchExecutor, SearchHit,
    SheetFindError, UserId,
};

/// Shown when the index engine rejects a query.
const SEARCH_FAILED: &str = "Search failed, try simpler terms";

#[derive(Parser)]
#[command(name = "sf")]
#[command(about = "Spreadsheet full-text search", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to sheetfind.toml (default: ./sheetfind.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and upload directory
    Init,
    /// User accounts
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Folders
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
    /// Upload a workbook into a folder and ingest it
    Upload {
        /// Destination folder id
        #[arg(long)]
        folder: i64,

        /// Path to the .xlsx file
        path: PathBuf,
    },
    /// Search the rows of a user's files
    Search {
        /// Querying user id
        #[arg(long)]
        user: i64,

        /// Print hits as JSON
        #[arg(long)]
        json: bool,

        /// Query text; the last word is matched as a prefix
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Show a file record
    Status {
        /// File id
        file: i64,
    },
    /// Re-index stored rows that have no index entry
    Reconcile {
        /// Limit to one file
        #[arg(long)]
        file: Option<i64>,

        /// Only count the missing rows
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a user
    Add {
        email: String,
    },
}

#[derive(Subcommand)]
enum FolderAction {
    /// Create a folder
    Add {
        #[arg(long)]
        user: i64,
        name: String,
    },
    /// List a user's folders with their files
    List {
        #[arg(long)]
        user: i64,
    },
    /// Delete a folder with everything in it
    #[command(alias = "delete")]
    Rm {
        #[arg(long)]
        user: i64,
        folder: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = SheetFindConfig::resolve(cli.config.as_deref())?;
    let conn = Connection::open(&config.database.path, config.database.pool_config())
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;
    migrate(&conn).await.context("Failed to create schema")?;

    let result = run(cli.command, &config, &conn).await;
    conn.close().await?;
    result
}

async fn run(command: Commands, config: &SheetFindConfig, conn: &Connection) -> Result<()> {
    let catalog = Catalog::new(conn.clone());

    match command {
        Commands::Init => {
            std::fs::create_dir_all(&config.upload_dir).with_context(|| {
                format!("Failed to create {}", config.upload_dir.display())
            })?;
            println!(
                "Initialized {} (journal mode: {})",
                config.database.path.display(),
                conn.journal_mode().await?
            );
        }

        Commands::User { action } => match action {
            UserAction::Add { email } => {
                let user = catalog.create_user(&email).await?;
                print_json(&user)?;
            }
        },

        Commands::Folder { action } => match action {
            FolderAction::Add { user, name } => {
                let folder = catalog.create_folder(UserId(user), &name).await?;
                print_json(&folder)?;
            }
            FolderAction::List { user } => {
                let folders = catalog.list_folders(UserId(user)).await?;
                print_json(&folders)?;
            }
            FolderAction::Rm { user, folder } => {
                catalog.delete_folder(UserId(user), FolderId(folder)).await?;
                println!("Deleted folder {}", folder);
            }
        },

        Commands::Upload { folder, path } => {
            upload(config, conn, &catalog, FolderId(folder), &path).await?;
        }

        Commands::Search { user, json, query } => {
            let query = query.join(" ");
            let executor = SearchExecutor::new(conn.clone())
                .with_snippet_config(config.search.snippet_config());
            let result = executor.search_text(UserId(user), &query).await;
            println!("{}", render_search(&query, result, json)?);
        }

        Commands::Status { file } => {
            let record = catalog.get_file(FileId(file)).await?;
            print_json(&record)?;
        }

        Commands::Reconcile { file, dry_run } => {
            let reconciler = Reconciler::new(conn.clone());
            let file = file.map(FileId);
            if dry_run {
                let missing = reconciler.missing_count(file).await?;
                println!("{} row(s) missing from the index", missing);
            } else {
                let report = reconciler.sweep(file).await?;
                print_json(&report)?;
            }
        }
    }

    Ok(())
}

/// Copies `source` into the upload directory, registers it and waits for
/// its ingestion to finish.
async fn upload(
    config: &SheetFindConfig,
    conn: &Connection,
    catalog: &Catalog,
    folder: FolderId,
    source: &Path,
) -> Result<()> {
    let file_name = source
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Not a file path: {}", source.display()))?
        .to_string();

    let target_dir = config.upload_dir.join(folder.to_string());
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("Failed to create {}", target_dir.display()))?;
    let target = target_dir.join(&file_name);
    std::fs::copy(source, &target)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), target.display()))?;

    let record = catalog
        .register_file(folder, &file_name, &target.to_string_lossy())
        .await?;
    info!(file_id = %record.id, path = %target.display(), "Upload registered");

    let mut pool = IngestPool::new(conn.clone(), IngestConfig::default());
    if let Some(max) = config.ingest.max_concurrent {
        pool = pool.with_max_concurrent(max);
    }

    let handle = pool.submit(IngestJob::new(record.id, target));
    let report = handle.join().await?;
    print_json(&report)?;

    if report.status() != FileStatus::Indexed {
        bail!("File {} finished with status '{}'", record.id, report.status());
    }
    Ok(())
}

/// Formats a search result for the terminal.
///
/// A rejected query is a normal outcome with its own message, distinct from
/// an empty result; only storage faults are errors.
fn render_search(
    query: &str,
    result: sheetfind_store::Result<Vec<SearchHit>>,
    json: bool,
) -> Result<String> {
    let hits = match result {
        Ok(hits) => hits,
        Err(SheetFindError::Query(reason)) => {
            warn!(query = %query, reason = %reason, "Search query rejected");
            return Ok(if json {
                serde_json::json!({ "error": SEARCH_FAILED }).to_string()
            } else {
                SEARCH_FAILED.to_string()
            });
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return Ok(serde_json::to_string_pretty(&hits)?);
    }
    if hits.is_empty() {
        return Ok(format!("No results for '{}'", query));
    }
    Ok(hits
        .iter()
        .map(|hit| format!("{}\t{}", hit.file_name, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging based on log level
fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_joins_query_words() {
        let cli = Cli::try_parse_from(["sf", "search", "--user", "3", "relatorio", "fin"]).unwrap();
        match cli.command {
            Commands::Search { user, json, query } => {
                assert_eq!(user, 3);
                assert!(!json);
                assert_eq!(query, vec!["relatorio", "fin"]);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn test_search_requires_query() {
        assert!(Cli::try_parse_from(["sf", "search", "--user", "3"]).is_err());
    }

    #[test]
    fn test_reconcile_flags() {
        let cli = Cli::try_parse_from(["sf", "reconcile", "--file", "9", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Reconcile { file, dry_run } => {
                assert_eq!(file, Some(9));
                assert!(dry_run);
            }
            _ => panic!("expected reconcile"),
        }
    }

    fn hit(file_name: &str, snippet: &str) -> SearchHit {
        SearchHit {
            row_id: sheetfind_store::RowId(1),
            file_id: FileId(1),
            file_name: file_name.to_string(),
            snippet: snippet.to_string(),
            raw_content: "[]".to_string(),
            score: -1.0,
        }
    }

    #[test]
    fn test_rejected_query_is_reported_not_raised() {
        let rejected = Err(SheetFindError::Query("fts5: syntax error near \"*\"".to_string()));
        assert_eq!(render_search("\"\"", rejected, false).unwrap(), SEARCH_FAILED);

        let rejected = Err(SheetFindError::Query("no such column: regiao".to_string()));
        let json: serde_json::Value =
            serde_json::from_str(&render_search("regiao:nor", rejected, true).unwrap()).unwrap();
        assert_eq!(json["error"], SEARCH_FAILED);
    }

    #[test]
    fn test_empty_result_differs_from_rejected_query() {
        let output = render_search("xyz", Ok(Vec::new()), false).unwrap();
        assert_eq!(output, "No results for 'xyz'");
        assert_ne!(output, SEARCH_FAILED);
    }

    #[test]
    fn test_hits_are_listed_one_per_line() {
        let hits = vec![
            hit("norte.xlsx", "<mark>Financeiro</mark> Norte"),
            hit("sul.xlsx", "<mark>Financeiro</mark> Sul"),
        ];
        assert_eq!(
            render_search("fin", Ok(hits), false).unwrap(),
            "norte.xlsx\t<mark>Financeiro</mark> Norte\nsul.xlsx\t<mark>Financeiro</mark> Sul"
        );
    }

    #[test]
    fn test_storage_faults_still_fail() {
        let busy = Err(SheetFindError::Busy("database is locked".to_string()));
        assert!(render_search("fin", busy, false).is_err());
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["sf", "status", "4", "--config", "alt.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert_eq!(cli.log_level, "info");
    }
}
