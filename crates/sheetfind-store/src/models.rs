//! Persisted records and strongly typed identifiers.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::SheetFindError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    /// Identifier of an authenticated user (issued by the auth collaborator).
    UserId
);
define_id!(FolderId);
define_id!(FileId);
define_id!(
    /// Identifier shared by a stored row and its full-text index entry.
    RowId
);

/// Ingestion status of an uploaded file.
///
/// `Processing` is the only non-terminal state; a file never moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Processing,
    Indexed,
    Error,
}

impl FileStatus {
    /// Value persisted in `files.status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processing => "processing",
            FileStatus::Indexed => "indexed",
            FileStatus::Error => "error",
        }
    }

    /// Check if this is a terminal state for the ingestion run
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Indexed | FileStatus::Error)
    }

    /// Valid state transitions
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (FileStatus::Processing, FileStatus::Indexed)
                | (FileStatus::Processing, FileStatus::Error)
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileStatus {
    type Err = SheetFindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(FileStatus::Processing),
            "indexed" => Ok(FileStatus::Indexed),
            "error" => Ok(FileStatus::Error),
            other => Err(SheetFindError::Deserialization(format!(
                "Unknown file status: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for FileStatus {
    type Error = SheetFindError;

    fn try_from(value: String) -> Result<Self, SheetFindError> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Folder {
    pub id: FolderId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: NaiveDateTime,
}

/// An uploaded spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FileRecord {
    pub id: FileId,
    pub folder_id: FolderId,
    pub file_name: String,
    pub file_path: String,
    #[sqlx(try_from = "String")]
    pub status: FileStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A folder listing entry: the folder and the files it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderWithFiles {
    #[serde(flatten)]
    pub folder: Folder,
    pub files: Vec<FileRecord>,
}
