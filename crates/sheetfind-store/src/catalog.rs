//! Ownership catalog: users, folders and file records.
//!
//! The catalog is the minimal surface of the upload/ownership collaborators
//! the ingestion and search paths depend on. It is also the only writer of
//! `files.status`, and it only ever moves a file forward out of
//! `processing`.

use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use crate::models::{FileId, FileRecord, FileStatus, Folder, FolderId, FolderWithFiles, User, UserId};
use crate::{Connection, Result, SheetFindError};

const FILE_COLUMNS: &str =
    "files.id, files.folder_id, files.file_name, files.file_path, files.status, files.created_at, files.updated_at";

/// Repository for the User -> Folder -> File ownership chain.
#[derive(Debug, Clone)]
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Registers a user. Emails are unique.
    #[instrument(skip(self))]
    pub async fn create_user(&self, email: &str) -> Result<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SheetFindError::Validation("Email cannot be empty".to_string()));
        }

        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (email) VALUES (?) RETURNING id, email, created_at",
        )
        .bind(email)
        .fetch_one(self.conn.pool())
        .await?;

        info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    /// Creates a folder owned by `user`.
    #[instrument(skip(self))]
    pub async fn create_folder(&self, user: UserId, name: &str) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SheetFindError::Validation(
                "Folder name cannot be empty".to_string(),
            ));
        }

        let folder = sqlx::query_as::<_, Folder>(
            "INSERT INTO folders (user_id, name) VALUES (?, ?) RETURNING id, user_id, name, created_at",
        )
        .bind(user)
        .bind(name)
        .fetch_one(self.conn.pool())
        .await?;

        info!(folder_id = %folder.id, "Created folder");
        Ok(folder)
    }

    /// Lists the folders owned by `user`, each with its files.
    pub async fn list_folders(&self, user: UserId) -> Result<Vec<FolderWithFiles>> {
        let folders = sqlx::query_as::<_, Folder>(
            "SELECT id, user_id, name, created_at FROM folders WHERE user_id = ? ORDER BY id",
        )
        .bind(user)
        .fetch_all(self.conn.pool())
        .await?;

        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files \
             JOIN folders ON folders.id = files.folder_id \
             WHERE folders.user_id = ? ORDER BY files.id"
        ))
        .bind(user)
        .fetch_all(self.conn.pool())
        .await?;

        let mut by_folder: HashMap<FolderId, Vec<FileRecord>> = HashMap::new();
        for file in files {
            by_folder.entry(file.folder_id).or_default().push(file);
        }

        Ok(folders
            .into_iter()
            .map(|folder| {
                let files = by_folder.remove(&folder.id).unwrap_or_default();
                FolderWithFiles { folder, files }
            })
            .collect())
    }

    /// Deletes a folder owned by `user`, cascading to its files, rows and index entries.
    #[instrument(skip(self))]
    pub async fn delete_folder(&self, user: UserId, folder: FolderId) -> Result<()> {
        let result = sqlx::query("DELETE FROM folders WHERE id = ? AND user_id = ?")
            .bind(folder)
            .bind(user)
            .execute(self.conn.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(SheetFindError::NotFound(format!("Folder {}", folder)));
        }

        info!("Deleted folder");
        Ok(())
    }

    /// Records a completed upload. The file starts in `processing`.
    #[instrument(skip(self, path))]
    pub async fn register_file(
        &self,
        folder: FolderId,
        file_name: &str,
        path: &str,
    ) -> Result<FileRecord> {
        let file = sqlx::query_as::<_, FileRecord>(
            "INSERT INTO files (folder_id, file_name, file_path, status) VALUES (?, ?, ?, ?) \
             RETURNING id, folder_id, file_name, file_path, status, created_at, updated_at",
        )
        .bind(folder)
        .bind(file_name)
        .bind(path)
        .bind(FileStatus::Processing.as_str())
        .fetch_one(self.conn.pool())
        .await?;

        info!(file_id = %file.id, "Registered file");
        Ok(file)
    }

    pub async fn get_file(&self, file: FileId) -> Result<FileRecord> {
        sqlx::query_as::<_, FileRecord>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
            .bind(file)
            .fetch_optional(self.conn.pool())
            .await?
            .ok_or_else(|| SheetFindError::NotFound(format!("File {}", file)))
    }

    /// Fetches a file, checking it belongs to one of `user`'s folders.
    pub async fn file_for_user(&self, user: UserId, file: FileId) -> Result<FileRecord> {
        let owner: Option<UserId> = sqlx::query_scalar(
            "SELECT folders.user_id FROM files JOIN folders ON folders.id = files.folder_id \
             WHERE files.id = ?",
        )
        .bind(file)
        .fetch_optional(self.conn.pool())
        .await?;

        match owner {
            None => Err(SheetFindError::NotFound(format!("File {}", file))),
            Some(owner) if owner != user => {
                Err(SheetFindError::Forbidden(format!("File {}", file)))
            }
            Some(_) => self.get_file(file).await,
        }
    }

    /// Moves a file out of `processing`.
    ///
    /// Returns `false` when the file had already reached a terminal status, in
    /// which case nothing changes.
    #[instrument(skip(self))]
    pub async fn set_status(&self, file: FileId, status: FileStatus) -> Result<bool> {
        if !FileStatus::Processing.can_transition_to(status) {
            return Err(SheetFindError::Validation(format!(
                "Cannot move a file to status '{}'",
                status
            )));
        }

        let result = sqlx::query(
            "UPDATE files SET status = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE id = ? AND status = ?",
        )
        .bind(status.as_str())
        .bind(file)
        .bind(FileStatus::Processing.as_str())
        .execute(self.conn.pool())
        .await?;

        if result.rows_affected() == 1 {
            debug!("File status updated");
            return Ok(true);
        }

        let current = self.get_file(file).await?;
        warn!(current = %current.status, "File already left processing, status unchanged");
        Ok(false)
    }
}
