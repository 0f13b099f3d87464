//! Kanban column moves with dense renumbering, shared by the server and the
//! client-side board.
//!
//! A move removes a task from one bucket and inserts it into another (or the
//! same) bucket, then renumbers every affected bucket to `0..n`. The server
//! persists the returned write set; the client applies the same move
//! tentatively and settles it once the server answers (see [`KanbanBoard`]).

use db::models::task::{PositionUpdate, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReorderError {
    #[error(
        "task {task_id} is not at index {source_index} of {source_status}; refetch the board and retry"
    )]
    TaskNotAtExpectedPosition {
        task_id: Uuid,
        source_status: TaskStatus,
        source_index: usize,
    },
    #[error("failed to persist reorder: {0}")]
    PersistenceFailed(#[from] sqlx::Error),
}

/// Anything that can sit in a kanban bucket
pub trait BoardItem {
    fn id(&self) -> Uuid;
    fn status(&self) -> TaskStatus;
    fn position(&self) -> i64;
    fn place(&mut self, status: TaskStatus, position: i64);
}

impl BoardItem for Task {
    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> TaskStatus {
        self.status
    }

    fn position(&self) -> i64 {
        self.position
    }

    fn place(&mut self, status: TaskStatus, position: i64) {
        self.status = status;
        self.position = position;
    }
}

/// Body of a move request; the task id travels in the route
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
pub struct MoveTaskRequest {
    pub source_status: TaskStatus,
    pub destination_status: TaskStatus,
    pub source_index: usize,
    pub destination_index: usize,
}

impl MoveTaskRequest {
    pub fn into_move(self, task_id: Uuid) -> TaskMove {
        TaskMove {
            task_id,
            source_status: self.source_status,
            destination_status: self.destination_status,
            source_index: self.source_index,
            destination_index: self.destination_index,
        }
    }
}

/// Move of one task from `(source_status, source_index)` to `(destination_status, destination_index)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
pub struct TaskMove {
    pub task_id: Uuid,
    pub source_status: TaskStatus,
    pub destination_status: TaskStatus,
    pub source_index: usize,
    pub destination_index: usize,
}

impl TaskMove {
    pub fn changes_status(&self) -> bool {
        self.source_status != self.destination_status
    }

    /// Same bucket, same slot: nothing to write
    pub fn is_noop(&self) -> bool {
        !self.changes_status() && self.source_index == self.destination_index
    }
}

/// The four buckets of one project's board, each ordered by position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct KanbanColumns<T> {
    #[serde(rename = "TODO")]
    pub todo: Vec<T>,
    #[serde(rename = "IN_PROGRESS")]
    pub in_progress: Vec<T>,
    #[serde(rename = "IN_REVIEW")]
    pub in_review: Vec<T>,
    #[serde(rename = "DONE")]
    pub done: Vec<T>,
}

impl<T> Default for KanbanColumns<T> {
    fn default() -> Self {
        Self {
            todo: Vec::new(),
            in_progress: Vec::new(),
            in_review: Vec::new(),
            done: Vec::new(),
        }
    }
}

impl<T: BoardItem> KanbanColumns<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group items by status, each bucket sorted by position (stable, so
    /// equal positions keep their input order)
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let mut columns = Self::new();
        for item in items {
            columns.bucket_mut(item.status()).push(item);
        }
        for status in TaskStatus::ALL {
            columns.bucket_mut(status).sort_by_key(|item| item.position());
        }
        columns
    }

    pub fn bucket(&self, status: TaskStatus) -> &[T] {
        match status {
            TaskStatus::Todo => &self.todo,
            TaskStatus::InProgress => &self.in_progress,
            TaskStatus::InReview => &self.in_review,
            TaskStatus::Done => &self.done,
        }
    }

    fn bucket_mut(&mut self, status: TaskStatus) -> &mut Vec<T> {
        match status {
            TaskStatus::Todo => &mut self.todo,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::InReview => &mut self.in_review,
            TaskStatus::Done => &mut self.done,
        }
    }

    /// Replace a bucket with an already ordered list
    pub fn set_bucket(&mut self, status: TaskStatus, items: Vec<T>) {
        *self.bucket_mut(status) = items;
    }

    pub fn len(&self) -> usize {
        TaskStatus::ALL
            .iter()
            .map(|status| self.bucket(*status).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locate a task: its status and index within that bucket
    pub fn find(&self, task_id: Uuid) -> Option<(TaskStatus, usize)> {
        TaskStatus::ALL.iter().find_map(|status| {
            self.bucket(*status)
                .iter()
                .position(|item| item.id() == task_id)
                .map(|index| (*status, index))
        })
    }

    /// Apply `task_move` and return every status/position that changed.
    ///
    /// The destination bucket is renumbered densely, and so is the source
    /// bucket when the move crosses columns. A destination index past the end
    /// of the bucket appends. On error the columns are left untouched.
    pub fn apply_move(&mut self, task_move: &TaskMove) -> Result<Vec<PositionUpdate>, ReorderError> {
        let at_expected = self
            .bucket(task_move.source_status)
            .get(task_move.source_index)
            .is_some_and(|item| item.id() == task_move.task_id);
        if !at_expected {
            return Err(ReorderError::TaskNotAtExpectedPosition {
                task_id: task_move.task_id,
                source_status: task_move.source_status,
                source_index: task_move.source_index,
            });
        }

        if task_move.is_noop() {
            return Ok(Vec::new());
        }

        let moved = self
            .bucket_mut(task_move.source_status)
            .remove(task_move.source_index);
        let destination = self.bucket_mut(task_move.destination_status);
        let destination_index = task_move.destination_index.min(destination.len());
        destination.insert(destination_index, moved);

        let mut updates = Vec::new();
        renumber(destination, task_move.destination_status, &mut updates);
        if task_move.changes_status() {
            renumber(
                self.bucket_mut(task_move.source_status),
                task_move.source_status,
                &mut updates,
            );
        }

        debug!(
            task_id = %task_move.task_id,
            from = %task_move.source_status,
            to = %task_move.destination_status,
            destination_index,
            writes = updates.len(),
            "Kanban move applied"
        );
        Ok(updates)
    }
}

fn renumber<T: BoardItem>(bucket: &mut [T], status: TaskStatus, updates: &mut Vec<PositionUpdate>) {
    for (index, item) in bucket.iter_mut().enumerate() {
        let position = index as i64;
        if item.position() != position || item.status() != status {
            item.place(status, position);
            updates.push(PositionUpdate {
                task_id: item.id(),
                status,
                position,
            });
        }
    }
}

/// Identifies the tentative move a server answer settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingMoveId(u64);

/// Server answer to a proposed move
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome<T> {
    /// Accepted; carries the authoritative columns when the server sent them
    Confirmed(Option<KanbanColumns<T>>),
    Rejected(String),
}

impl<T> From<ApiResponse<KanbanColumns<T>>> for MoveOutcome<T> {
    fn from(response: ApiResponse<KanbanColumns<T>>) -> Self {
        if response.is_success() {
            MoveOutcome::Confirmed(response.into_data())
        } else {
            let reason = response.message().unwrap_or("Failed to move task").to_string();
            MoveOutcome::Rejected(reason)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("another move is still waiting for the server")]
    MovePending,
    #[error("no pending move {0:?}")]
    UnknownMove(PendingMoveId),
    #[error("task {0} is not at the expected position on this board")]
    Stale(Uuid),
}

#[derive(Debug, Clone)]
struct PendingMove<T> {
    id: PendingMoveId,
    task_move: TaskMove,
    snapshot: KanbanColumns<T>,
}

/// Client-side board with optimistic moves.
///
/// Phase one, [`propose`](Self::propose), applies the move locally and keeps
/// a snapshot. Phase two, [`resolve`](Self::resolve), either adopts the
/// server's columns or restores the snapshot. One move is in flight at a time.
#[derive(Debug, Clone)]
pub struct KanbanBoard<T> {
    columns: KanbanColumns<T>,
    pending: Option<PendingMove<T>>,
    next_id: u64,
}

impl<T: BoardItem + Clone> KanbanBoard<T> {
    pub fn new(columns: KanbanColumns<T>) -> Self {
        Self {
            columns,
            pending: None,
            next_id: 0,
        }
    }

    pub fn columns(&self) -> &KanbanColumns<T> {
        &self.columns
    }

    pub fn pending_move(&self) -> Option<&TaskMove> {
        self.pending.as_ref().map(|pending| &pending.task_move)
    }

    /// Apply `task_move` tentatively
    pub fn propose(&mut self, task_move: TaskMove) -> Result<PendingMoveId, BoardError> {
        if self.pending.is_some() {
            return Err(BoardError::MovePending);
        }

        let snapshot = self.columns.clone();
        self.columns
            .apply_move(&task_move)
            .map_err(|_| BoardError::Stale(task_move.task_id))?;

        self.next_id += 1;
        let id = PendingMoveId(self.next_id);
        self.pending = Some(PendingMove {
            id,
            task_move,
            snapshot,
        });
        Ok(id)
    }

    /// Settle the pending move with the server's answer
    pub fn resolve(
        &mut self,
        id: PendingMoveId,
        outcome: MoveOutcome<T>,
    ) -> Result<&KanbanColumns<T>, BoardError> {
        let pending = match self.pending.take() {
            Some(pending) if pending.id == id => pending,
            other => {
                self.pending = other;
                return Err(BoardError::UnknownMove(id));
            }
        };

        match outcome {
            MoveOutcome::Confirmed(Some(columns)) => self.columns = columns,
            MoveOutcome::Confirmed(None) => {}
            MoveOutcome::Rejected(reason) => {
                warn!(
                    task_id = %pending.task_move.task_id,
                    reason = %reason,
                    "Kanban move rejected, rolling back"
                );
                self.columns = pending.snapshot;
            }
        }
        Ok(&self.columns)
    }

    /// Replace the columns wholesale (e.g. after a refetch), dropping any pending move
    pub fn replace(&mut self, columns: KanbanColumns<T>) {
        self.pending = None;
        self.columns = columns;
    }
}
