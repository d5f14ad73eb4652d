//! Ingestion task identity and state machine

use serde::{Deserialize, Serialize};

/// Unique ingestion task identifier (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub uuid::Uuid);

impl TaskId {
    /// Create a new task ID
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Parse from string
    pub fn parse(s: &str) -> sheetfind_common::Result<Self> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| sheetfind_common::SheetFindError::Validation(format!("Invalid task id: {}", e)))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ingestion task state in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for a concurrency slot
    #[default]
    Pending,
    /// Pipeline is running
    Started,
    /// File reached `indexed`
    Succeeded,
    /// File reached `error`, or its status could not be recorded
    Failed,
    /// Stopped by its handle; the file stays `processing`
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Valid state transitions
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Started) => true,
            (Self::Pending, Self::Cancelled) => true,
            (Self::Pending, Self::Failed) => true,

            (Self::Started, Self::Succeeded) => true,
            (Self::Started, Self::Failed) => true,
            (Self::Started, Self::Cancelled) => true,

            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
