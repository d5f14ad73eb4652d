//! Background ingestion tasks.
//!
//! Every submitted upload runs as its own task: the async side waits for an
//! optional concurrency slot, then the pipeline runs on the blocking thread
//! pool and drives the store through a [`StoreSink`]. Submission returns
//! immediately with an [`IngestHandle`]; dropping the handle detaches the
//! task, it keeps running.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use sheetfind_common::{Result, SheetFindError};
use sheetfind_store::{Connection, FileId};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{IngestConfig, IngestOutcome, IngestReport, IngestionPipeline};
use crate::sink::StoreSink;
use crate::task::{TaskId, TaskState};

/// One file to ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestJob {
    pub file: FileId,
    pub path: PathBuf,
}

impl IngestJob {
    pub fn new(file: FileId, path: impl Into<PathBuf>) -> Self {
        Self {
            file,
            path: path.into(),
        }
    }
}

type StateMap = Arc<DashMap<TaskId, watch::Receiver<TaskState>>>;

/// Bookkeeping for one running task. The task stops being tracked by its
/// pool when the slot is dropped, whichever way the task ends.
struct TaskSlot {
    task_id: TaskId,
    state: watch::Sender<TaskState>,
    states: StateMap,
}

impl TaskSlot {
    /// Moves the task to `next` if the transition is valid.
    fn transition(&self, next: TaskState) {
        let task_id = self.task_id;
        self.state.send_if_modified(|state| {
            let from = *state;
            if from.can_transition_to(next) {
                debug!(task_id = %task_id, from = %from, to = %next, "Task state changed");
                *state = next;
                true
            } else {
                warn!(task_id = %task_id, from = %from, to = %next, "Ignoring invalid task transition");
                false
            }
        });
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.states.remove(&self.task_id);
    }
}

/// Spawns and tracks ingestion tasks.
///
/// Concurrency is unbounded unless [`IngestPool::with_max_concurrent`] is set.
/// The pool only tracks tasks that have not finished; a finished task's
/// state stays readable through its [`IngestHandle`].
#[derive(Clone)]
pub struct IngestPool {
    conn: Connection,
    pipeline: Arc<IngestionPipeline>,
    limit: Option<Arc<Semaphore>>,
    states: StateMap,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for IngestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPool")
            .field("pipeline", &self.pipeline)
            .field("limit", &self.limit.as_ref().map(|s| s.available_permits()))
            .field("tasks", &self.states.len())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl IngestPool {
    pub fn new(conn: Connection, config: IngestConfig) -> Self {
        Self {
            conn,
            pipeline: Arc::new(IngestionPipeline::new(config)),
            limit: None,
            states: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Caps the number of pipelines running at once (at least 1).
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Starts ingesting `job` in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, job: IngestJob) -> IngestHandle {
        let task_id = TaskId::new();
        let cancel = self.shutdown.child_token();
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        // Tracked before spawning so the slot's removal can never precede the insert.
        self.states.insert(task_id, state_rx.clone());
        info!(task_id = %task_id, file_id = %job.file, path = %job.path.display(), "Ingestion submitted");

        let slot = TaskSlot {
            task_id,
            state: state_tx,
            states: self.states.clone(),
        };
        let join = tokio::spawn(Self::execute(
            slot,
            job.clone(),
            self.conn.clone(),
            self.pipeline.clone(),
            self.limit.clone(),
            cancel.clone(),
        ));

        IngestHandle {
            task_id,
            file_id: job.file,
            cancel,
            state: state_rx,
            join,
        }
    }

    async fn execute(
        slot: TaskSlot,
        job: IngestJob,
        conn: Connection,
        pipeline: Arc<IngestionPipeline>,
        limit: Option<Arc<Semaphore>>,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        let task_id = slot.task_id;
        let _permit = match limit {
            Some(semaphore) => {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit,
                    _ = cancel.cancelled() => {
                        slot.transition(TaskState::Cancelled);
                        return Ok(cancelled_report(job.file));
                    }
                };
                Some(permit.map_err(|e| {
                    slot.transition(TaskState::Failed);
                    SheetFindError::Internal(format!("Ingestion limit closed: {}", e))
                })?)
            }
            None => None,
        };

        if cancel.is_cancelled() {
            slot.transition(TaskState::Cancelled);
            return Ok(cancelled_report(job.file));
        }
        slot.transition(TaskState::Started);

        let handle = Handle::current();
        let file = job.file;
        let result = tokio::task::spawn_blocking(move || {
            let mut sink = StoreSink::new(conn, handle);
            pipeline.run_path(job.file, &job.path, &mut sink, &cancel)
        })
        .await
        .map_err(|e| SheetFindError::Internal(format!("Ingestion task panicked: {}", e)))
        .and_then(|result| result);

        let next = match &result {
            Ok(report) => match report.outcome {
                IngestOutcome::Indexed => TaskState::Succeeded,
                IngestOutcome::Failed { .. } => TaskState::Failed,
                IngestOutcome::Cancelled => TaskState::Cancelled,
            },
            Err(e) => {
                warn!(task_id = %task_id, file_id = %file, error = %e, "Ingestion task failed");
                TaskState::Failed
            }
        };
        slot.transition(next);
        result
    }

    /// Cancels every task of this pool, running or not yet submitted.
    ///
    /// Running pipelines stop before their next batch flush and leave their
    /// files in `processing`.
    pub fn shutdown(&self) {
        info!(active = self.active(), "Shutting down ingestion pool");
        self.shutdown.cancel();
    }

    /// Current state of an unfinished task of this pool; `None` once it has
    /// finished (or was never submitted here).
    pub fn state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.states.get(task_id).map(|state| *state.borrow())
    }

    /// Number of tasks not yet in a terminal state.
    pub fn active(&self) -> usize {
        self.states
            .iter()
            .filter(|entry| !entry.value().borrow().is_terminal())
            .count()
    }

    /// Number of tasks the pool is holding bookkeeping for.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

fn cancelled_report(file: FileId) -> IngestReport {
    let mut report = IngestReport::new(file);
    report.outcome = IngestOutcome::Cancelled;
    report
}

/// Handle to one submitted ingestion task.
#[derive(Debug)]
pub struct IngestHandle {
    task_id: TaskId,
    file_id: FileId,
    cancel: CancellationToken,
    state: watch::Receiver<TaskState>,
    join: JoinHandle<Result<IngestReport>>,
}

impl IngestHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// A receiver that observes this task's state changes, usable after the
    /// handle has been joined or dropped.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    /// Requests cancellation. The pipeline stops before its next batch
    /// flush; batches already committed stay.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the task and returns its report.
    pub async fn join(self) -> Result<IngestReport> {
        self.join
            .await
            .map_err(|e| SheetFindError::Internal(format!("Ingestion task panicked: {}", e)))?
    }
}

/// Waits for every handle, in order.
pub async fn join_all(handles: Vec<IngestHandle>) -> Vec<Result<IngestReport>> {
    futures::future::join_all(handles.into_iter().map(IngestHandle::join)).await
}
