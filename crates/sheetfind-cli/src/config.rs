//! sheetfind.toml configuration handling for sf
//!
//! Values come from, in increasing precedence: built-in defaults, the TOML
//! file, then environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sheetfind_store::{PoolConfig, SnippetConfig};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "sheetfind.toml";

/// Database location and pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub min_connections: u32,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            path: PathBuf::from("sheetfind.db"),
            min_connections: pool.min_connections,
            max_connections: pool.max_connections,
            busy_timeout_ms: pool.busy_timeout_ms,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_connections: self.min_connections,
            max_connections: self.max_connections.max(1),
            busy_timeout_ms: self.busy_timeout_ms,
            ..PoolConfig::default()
        }
    }
}

/// Background ingestion settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    /// Maximum ingestions running at once; unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

/// Snippet markers for search output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub start_marker: String,
    pub end_marker: String,
    pub ellipsis: String,
    pub max_tokens: u32,
}

impl Default for SearchSection {
    fn default() -> Self {
        let snippet = SnippetConfig::default();
        Self {
            start_marker: snippet.start_marker,
            end_marker: snippet.end_marker,
            ellipsis: snippet.ellipsis,
            max_tokens: snippet.max_tokens,
        }
    }
}

impl SearchSection {
    pub fn snippet_config(&self) -> SnippetConfig {
        SnippetConfig {
            start_marker: self.start_marker.clone(),
            end_marker: self.end_marker.clone(),
            ellipsis: self.ellipsis.clone(),
            max_tokens: self.max_tokens,
        }
    }
}

/// Main sheetfind configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetFindConfig {
    pub database: DatabaseConfig,
    /// Directory uploaded workbooks are copied into.
    pub upload_dir: PathBuf,
    pub ingest: IngestSection,
    pub search: SearchSection,
}

impl Default for SheetFindConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            upload_dir: PathBuf::from("./uploads"),
            ingest: IngestSection::default(),
            search: SearchSection::default(),
        }
    }
}

impl SheetFindConfig {
    /// Load from a sheetfind.toml file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Resolves the effective configuration.
    ///
    /// An explicit `path` must exist. Without one, `sheetfind.toml` in the
    /// working directory is used when present. Environment overrides apply
    /// last.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `DB_PATH`, `SHEETFIND_UPLOAD_DIR` and `SHEETFIND_MAX_INGESTIONS`
    /// as looked up by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("DB_PATH").filter(|v| !v.trim().is_empty()) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("SHEETFIND_UPLOAD_DIR").filter(|v| !v.trim().is_empty()) {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(max) = lookup("SHEETFIND_MAX_INGESTIONS") {
            let max: usize = max
                .trim()
                .parse()
                .with_context(|| format!("SHEETFIND_MAX_INGESTIONS is not a number: {}", max))?;
            self.ingest.max_concurrent = (max > 0).then_some(max);
        }
        Ok(())
    }
}
