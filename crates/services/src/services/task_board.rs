//! Service for kanban task mutations: creation, moves, status changes and deletion.

use std::sync::Arc;

use dashmap::DashMap;
use db::{
    DBService,
    models::{
        project::{CreateProject, Project},
        task::{CreateTask, PositionUpdate, Task, TaskStatus, UpdateTask},
        task_activity::{ActivityAction, ActivityMetadata, TaskActivity, TaskSnapshot},
    },
};
use sqlx::SqliteConnection;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::kanban::{KanbanColumns, MoveTaskRequest, ReorderError, TaskMove};

/// Default number of activity entries returned
pub const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
const MAX_ACTIVITY_LIMIT: i64 = 200;

#[derive(Debug, Error)]
pub enum TaskBoardError {
    #[error("project not found")]
    ProjectNotFound,
    #[error("task not found")]
    TaskNotFound,
    #[error("insufficient permissions")]
    Forbidden,
    #[error(transparent)]
    Reorder(#[from] ReorderError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Writer transactions take the database write lock up front, so a
/// transaction that reads before writing waits on `busy_timeout` instead of
/// failing when another project's writer commits first.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

type ProjectLocks = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

/// Held while a project's positions are read and rewritten. Dropping it
/// releases the lock and forgets the project once nobody else is waiting.
struct ProjectGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: ProjectLocks,
    project_id: Uuid,
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map's own reference is the only one left when nobody waits
        self.locks
            .remove_if(&self.project_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Board operations over one database.
///
/// Every read-recompute-write of a project's positions runs under that
/// project's lock and inside a single transaction, so concurrent moves can
/// neither interleave nor leave a partial batch behind.
#[derive(Clone)]
pub struct TaskBoardService {
    db: DBService,
    project_locks: ProjectLocks,
}

impl TaskBoardService {
    pub fn new(db: DBService) -> Self {
        Self {
            db,
            project_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    async fn lock_project(&self, project_id: Uuid) -> ProjectGuard {
        let lock = self
            .project_locks
            .entry(project_id)
            .or_default()
            .value()
            .clone();
        ProjectGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.project_locks.clone(),
            project_id,
        }
    }

    pub async fn create_project(
        &self,
        owner_id: Uuid,
        data: &CreateProject,
    ) -> Result<Project, TaskBoardError> {
        let project = Project::create(&self.db.pool, data, Uuid::new_v4(), owner_id).await?;
        info!(project_id = %project.id, owner_id = %owner_id, "Project created");
        Ok(project)
    }

    async fn find_project(&self, project_id: Uuid) -> Result<Project, TaskBoardError> {
        Project::find_by_id(&self.db.pool, project_id)
            .await?
            .ok_or(TaskBoardError::ProjectNotFound)
    }

    async fn find_task_with_project(
        &self,
        task_id: Uuid,
    ) -> Result<(Task, Project), TaskBoardError> {
        let task = Task::find_by_id(&self.db.pool, task_id)
            .await?
            .ok_or(TaskBoardError::TaskNotFound)?;
        let project = self.find_project(task.project_id).await?;
        Ok((task, project))
    }

    /// Create a task at the end of its bucket
    pub async fn create_task(&self, actor: Uuid, data: &CreateTask) -> Result<Task, TaskBoardError> {
        let project = self.find_project(data.project_id).await?;
        let status = data.status.unwrap_or_default();

        let _guard = self.lock_project(project.id).await;
        let mut tx = self.db.pool.begin_with(BEGIN_WRITE).await?;
        let position = Task::next_position(&mut *tx, project.id, status).await?;
        let task = Task::create(&mut *tx, data, Uuid::new_v4(), actor, position).await?;
        TaskActivity::create(
            &mut *tx,
            project.id,
            Some(task.id),
            actor,
            ActivityAction::Created,
            &ActivityMetadata {
                task_title: Some(task.title.clone()),
                task_status: Some(task.status),
                ..Default::default()
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            task_id = %task.id,
            project_id = %project.id,
            status = %task.status,
            position,
            "Task created"
        );
        Ok(task)
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task, TaskBoardError> {
        Task::find_by_id(&self.db.pool, task_id)
            .await?
            .ok_or(TaskBoardError::TaskNotFound)
    }

    /// Edit title, description or assignee. Same permission as a move; an
    /// `UPDATED` activity lists the changed fields and their previous values.
    pub async fn update_task(
        &self,
        actor: Uuid,
        task_id: Uuid,
        data: &UpdateTask,
    ) -> Result<Task, TaskBoardError> {
        let (task, project) = self.find_task_with_project(task_id).await?;
        if !task.can_be_moved_by(actor, project.owner_id) {
            warn!(task_id = %task_id, actor = %actor, "Update rejected: insufficient permissions");
            return Err(TaskBoardError::Forbidden);
        }

        let title = data.title.clone().unwrap_or_else(|| task.title.clone());
        let description = data.description.clone().or_else(|| task.description.clone());
        let assignee_id = data.assignee_id.or(task.assignee_id);

        let mut changes = Vec::new();
        if title != task.title {
            changes.push("title".to_string());
        }
        if description != task.description {
            changes.push("description".to_string());
        }
        if assignee_id != task.assignee_id {
            changes.push("assignee_id".to_string());
        }
        if changes.is_empty() {
            return Ok(task);
        }

        let mut tx = self.db.pool.begin_with(BEGIN_WRITE).await?;
        let updated =
            Task::update(&mut *tx, task.id, &title, description.as_deref(), assignee_id).await?;
        TaskActivity::create(
            &mut *tx,
            project.id,
            Some(task.id),
            actor,
            ActivityAction::Updated,
            &ActivityMetadata {
                task_title: Some(updated.title.clone()),
                changes: Some(changes.clone()),
                previous: Some(TaskSnapshot {
                    title: task.title,
                    description: task.description,
                    assignee_id: task.assignee_id,
                }),
                ..Default::default()
            },
        )
        .await?;
        tx.commit().await?;

        info!(task_id = %updated.id, changes = ?changes, "Task updated");
        Ok(updated)
    }

    pub async fn kanban_columns(
        &self,
        project_id: Uuid,
    ) -> Result<KanbanColumns<Task>, TaskBoardError> {
        self.find_project(project_id).await?;
        let tasks = Task::find_by_project_id(&self.db.pool, project_id).await?;
        Ok(KanbanColumns::from_items(tasks))
    }

    /// Move a task on the board on behalf of `actor`, returning the updated columns.
    ///
    /// The caller must be the project owner, the task's assignee or its
    /// creator. A `MOVED` activity is appended when the status changes.
    pub async fn move_task(
        &self,
        actor: Uuid,
        task_id: Uuid,
        request: MoveTaskRequest,
    ) -> Result<KanbanColumns<Task>, TaskBoardError> {
        let (task, project) = self.find_task_with_project(task_id).await?;
        if !task.can_be_moved_by(actor, project.owner_id) {
            warn!(task_id = %task_id, actor = %actor, "Move rejected: insufficient permissions");
            return Err(TaskBoardError::Forbidden);
        }

        let task_move = request.into_move(task_id);
        self.reorder(project.id, &task_move).await?;

        if task_move.changes_status() {
            self.record_move(&task, actor, task_move.source_status, task_move.destination_status)
                .await;
        }

        self.kanban_columns(project.id).await
    }

    /// Status toggle: move the task to the end of `status`
    pub async fn update_status(
        &self,
        actor: Uuid,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<Task, TaskBoardError> {
        let (task, project) = self.find_task_with_project(task_id).await?;
        if !task.can_be_moved_by(actor, project.owner_id) {
            warn!(task_id = %task_id, actor = %actor, "Status change rejected: insufficient permissions");
            return Err(TaskBoardError::Forbidden);
        }

        let previous = {
            let _guard = self.lock_project(project.id).await;
            let mut tx = self
                .db
                .pool
                .begin_with(BEGIN_WRITE)
                .await
                .map_err(ReorderError::from)?;

            // Re-read under the lock: the task may have moved since the permission check
            let current = Task::find_by_id(&mut *tx, task_id)
                .await
                .map_err(ReorderError::from)?
                .ok_or(TaskBoardError::TaskNotFound)?;
            if current.status == status {
                return Ok(current);
            }

            let source = Task::find_bucket(&mut *tx, project.id, current.status)
                .await
                .map_err(ReorderError::from)?;
            let source_index = source
                .iter()
                .position(|candidate| candidate.id == task_id)
                .ok_or(TaskBoardError::TaskNotFound)?;
            let task_move = TaskMove {
                task_id,
                source_status: current.status,
                destination_status: status,
                source_index,
                destination_index: usize::MAX,
            };

            Self::reorder_in(&mut *tx, project.id, &task_move).await?;
            tx.commit().await.map_err(ReorderError::from)?;
            current.status
        };

        self.record_move(&task, actor, previous, status).await;

        Task::find_by_id(&self.db.pool, task_id)
            .await?
            .ok_or(TaskBoardError::TaskNotFound)
    }

    /// Delete a task. Only the project owner or the task's creator may do so.
    ///
    /// Siblings keep their positions; the next move in the bucket closes the gap.
    pub async fn delete_task(&self, actor: Uuid, task_id: Uuid) -> Result<(), TaskBoardError> {
        let (task, project) = self.find_task_with_project(task_id).await?;
        if !task.can_be_deleted_by(actor, project.owner_id) {
            warn!(task_id = %task_id, actor = %actor, "Delete rejected: insufficient permissions");
            return Err(TaskBoardError::Forbidden);
        }

        let mut tx = self.db.pool.begin_with(BEGIN_WRITE).await?;
        TaskActivity::create(
            &mut *tx,
            project.id,
            Some(task.id),
            actor,
            ActivityAction::Deleted,
            &ActivityMetadata {
                task_title: Some(task.title.clone()),
                task_status: Some(task.status),
                ..Default::default()
            },
        )
        .await?;
        Task::delete(&mut *tx, task.id).await?;
        tx.commit().await?;

        info!(task_id = %task.id, project_id = %project.id, "Task deleted");
        Ok(())
    }

    pub async fn activities(
        &self,
        project_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<TaskActivity>, TaskBoardError> {
        self.find_project(project_id).await?;
        let limit = limit
            .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
            .clamp(1, MAX_ACTIVITY_LIMIT);
        Ok(TaskActivity::find_by_project_id(&self.db.pool, project_id, limit).await?)
    }

    /// Apply `task_move` to the project's stored buckets and persist the new
    /// positions atomically, returning the writes that were made.
    pub async fn reorder(
        &self,
        project_id: Uuid,
        task_move: &TaskMove,
    ) -> Result<Vec<PositionUpdate>, ReorderError> {
        let _guard = self.lock_project(project_id).await;
        let mut tx = self.db.pool.begin_with(BEGIN_WRITE).await?;
        let updates = Self::reorder_in(&mut *tx, project_id, task_move).await?;
        if !updates.is_empty() {
            tx.commit().await.inspect_err(|e| {
                error!(project_id = %project_id, error = %e, "Reorder commit failed");
            })?;
        }
        Ok(updates)
    }

    /// Load, recompute and write within an open transaction. The caller holds
    /// the project lock and commits.
    async fn reorder_in(
        conn: &mut SqliteConnection,
        project_id: Uuid,
        task_move: &TaskMove,
    ) -> Result<Vec<PositionUpdate>, ReorderError> {
        let mut columns = KanbanColumns::new();
        columns.set_bucket(
            task_move.source_status,
            Task::find_bucket(&mut *conn, project_id, task_move.source_status).await?,
        );
        if task_move.changes_status() {
            columns.set_bucket(
                task_move.destination_status,
                Task::find_bucket(&mut *conn, project_id, task_move.destination_status).await?,
            );
        }

        let updates = columns.apply_move(task_move).inspect_err(|e| {
            info!(project_id = %project_id, error = %e, "Reorder conflict");
        })?;
        if updates.is_empty() {
            return Ok(updates);
        }

        Task::apply_position_updates(conn, &updates)
            .await
            .inspect_err(|e| {
                error!(
                    project_id = %project_id,
                    task_id = %task_move.task_id,
                    error = %e,
                    "Reorder persistence failed"
                );
            })?;

        info!(
            project_id = %project_id,
            task_id = %task_move.task_id,
            from = %task_move.source_status,
            to = %task_move.destination_status,
            writes = updates.len(),
            "Task reordered"
        );
        Ok(updates)
    }

    /// Append a `MOVED` entry. The move itself is already committed, so a
    /// failure here is logged rather than returned.
    async fn record_move(&self, task: &Task, actor: Uuid, from: TaskStatus, to: TaskStatus) {
        let metadata = ActivityMetadata {
            task_title: Some(task.title.clone()),
            from: Some(from),
            to: Some(to),
            ..Default::default()
        };
        if let Err(e) = TaskActivity::create(
            &self.db.pool,
            task.project_id,
            Some(task.id),
            actor,
            ActivityAction::Moved,
            &metadata,
        )
        .await
        {
            warn!(task_id = %task.id, error = %e, "Failed to record move activity");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        service: TaskBoardService,
        project: Project,
        owner: Uuid,
    }

    async fn setup() -> Fixture {
        let db = DBService::new_in_memory().await.unwrap();
        let service = TaskBoardService::new(db);
        let owner = Uuid::new_v4();
        let project = service
            .create_project(
                owner,
                &CreateProject {
                    title: "Website Redesign".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap();
        Fixture {
            service,
            project,
            owner,
        }
    }

    impl Fixture {
        async fn seed(&self, status: TaskStatus, titles: &[&str]) -> Vec<Task> {
            let mut tasks = Vec::new();
            for title in titles {
                let data = CreateTask {
                    status: Some(status),
                    ..CreateTask::from_title_description(self.project.id, title.to_string(), None)
                };
                tasks.push(self.service.create_task(self.owner, &data).await.unwrap());
            }
            tasks
        }

        async fn bucket(&self, status: TaskStatus) -> Vec<(String, i64)> {
            Task::find_bucket(&self.service.db().pool, self.project.id, status)
                .await
                .unwrap()
                .into_iter()
                .map(|task| (task.title, task.position))
                .collect()
        }

        async fn actions(&self) -> Vec<ActivityAction> {
            self.service
                .activities(self.project.id, None)
                .await
                .unwrap()
                .into_iter()
                .map(|activity| activity.action)
                .collect()
        }
    }

    fn entries(pairs: &[(&str, i64)]) -> Vec<(String, i64)> {
        pairs
            .iter()
            .map(|(title, position)| (title.to_string(), *position))
            .collect()
    }

    fn move_request(
        source_status: TaskStatus,
        destination_status: TaskStatus,
        source_index: usize,
        destination_index: usize,
    ) -> MoveTaskRequest {
        MoveTaskRequest {
            source_status,
            destination_status,
            source_index,
            destination_index,
        }
    }

    #[tokio::test]
    async fn test_create_task_takes_next_position() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B", "C"]).await;

        assert_eq!(
            tasks.iter().map(|task| task.position).collect::<Vec<_>>(),
            [0, 1, 2]
        );
        assert_eq!(tasks[0].creator_id, fx.owner);

        let review = fx.seed(TaskStatus::InReview, &["R"]).await;
        assert_eq!(review[0].position, 0);
    }

    #[tokio::test]
    async fn test_create_task_requires_project() {
        let fx = setup().await;
        let data = CreateTask::from_title_description(Uuid::new_v4(), "Orphan".to_string(), None);

        let result = fx.service.create_task(fx.owner, &data).await;
        assert!(matches!(result, Err(TaskBoardError::ProjectNotFound)));
    }

    #[tokio::test]
    async fn test_move_within_bucket() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B", "C"]).await;

        let columns = fx
            .service
            .move_task(
                fx.owner,
                tasks[1].id,
                move_request(TaskStatus::Todo, TaskStatus::Todo, 1, 0),
            )
            .await
            .unwrap();

        let expected = entries(&[("B", 0), ("A", 1), ("C", 2)]);
        assert_eq!(fx.bucket(TaskStatus::Todo).await, expected);
        let returned: Vec<&str> = columns.todo.iter().map(|task| task.title.as_str()).collect();
        assert_eq!(returned, ["B", "A", "C"]);
    }

    #[tokio::test]
    async fn test_move_to_empty_bucket() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B"]).await;

        fx.service
            .move_task(
                fx.owner,
                tasks[0].id,
                move_request(TaskStatus::Todo, TaskStatus::Done, 0, 0),
            )
            .await
            .unwrap();

        assert_eq!(fx.bucket(TaskStatus::Todo).await, entries(&[("B", 0)]));
        assert_eq!(fx.bucket(TaskStatus::Done).await, entries(&[("A", 0)]));
        let moved = Task::find_by_id(&fx.service.db().pool, tasks[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_same_slot_move_writes_nothing() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::InProgress, &["A", "B"]).await;
        let before = Task::find_by_id(&fx.service.db().pool, tasks[1].id)
            .await
            .unwrap()
            .unwrap();

        let task_move = move_request(TaskStatus::InProgress, TaskStatus::InProgress, 1, 1)
            .into_move(tasks[1].id);
        let updates = fx.service.reorder(fx.project.id, &task_move).await.unwrap();

        assert!(updates.is_empty());
        let after = Task::find_by_id(&fx.service.db().pool, tasks[1].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_stale_source_index_is_rejected() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B"]).await;

        let result = fx
            .service
            .move_task(
                fx.owner,
                tasks[0].id,
                move_request(TaskStatus::Todo, TaskStatus::Done, 1, 0),
            )
            .await;

        assert!(matches!(
            result,
            Err(TaskBoardError::Reorder(
                ReorderError::TaskNotAtExpectedPosition { source_index: 1, .. }
            ))
        ));
        assert_eq!(
            fx.bucket(TaskStatus::Todo).await,
            entries(&[("A", 0), ("B", 1)])
        );
    }

    #[tokio::test]
    async fn test_move_permissions() {
        let fx = setup().await;
        let assignee = Uuid::new_v4();
        let data = CreateTask {
            assignee_id: Some(assignee),
            ..CreateTask::from_title_description(fx.project.id, "Assigned".to_string(), None)
        };
        let task = fx.service.create_task(fx.owner, &data).await.unwrap();

        let stranger = Uuid::new_v4();
        let request = move_request(TaskStatus::Todo, TaskStatus::InProgress, 0, 0);
        let result = fx.service.move_task(stranger, task.id, request).await;
        assert!(matches!(result, Err(TaskBoardError::Forbidden)));

        fx.service.move_task(assignee, task.id, request).await.unwrap();
        assert_eq!(
            fx.bucket(TaskStatus::InProgress).await,
            entries(&[("Assigned", 0)])
        );
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back_whole_batch() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B", "C"]).await;
        sqlx::query(
            r#"CREATE TRIGGER fail_on_c BEFORE UPDATE OF position ON tasks
               WHEN NEW.title = 'C'
               BEGIN SELECT RAISE(ABORT, 'write refused'); END"#,
        )
        .execute(&fx.service.db().pool)
        .await
        .unwrap();

        // B is written before C fails, and must not survive
        let result = fx
            .service
            .move_task(
                fx.owner,
                tasks[0].id,
                move_request(TaskStatus::Todo, TaskStatus::Todo, 0, 2),
            )
            .await;

        assert!(matches!(
            result,
            Err(TaskBoardError::Reorder(ReorderError::PersistenceFailed(_)))
        ));
        assert_eq!(
            fx.bucket(TaskStatus::Todo).await,
            entries(&[("A", 0), ("B", 1), ("C", 2)])
        );
        assert_eq!(fx.actions().await, [ActivityAction::Created; 3]);
    }

    #[tokio::test]
    async fn test_closed_pool_is_persistence_failure() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B"]).await;
        fx.service.db().pool.close().await;

        let task_move =
            move_request(TaskStatus::Todo, TaskStatus::Todo, 0, 1).into_move(tasks[0].id);
        let result = fx.service.reorder(fx.project.id, &task_move).await;
        assert!(matches!(result, Err(ReorderError::PersistenceFailed(_))));
    }

    #[tokio::test]
    async fn test_concurrent_moves_keep_buckets_dense() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B", "C", "D"]).await;

        // Both clients saw the same board, so whichever runs second conflicts
        let first = fx.service.move_task(
            fx.owner,
            tasks[0].id,
            move_request(TaskStatus::Todo, TaskStatus::Done, 0, 0),
        );
        let second = fx.service.move_task(
            fx.owner,
            tasks[3].id,
            move_request(TaskStatus::Todo, TaskStatus::Todo, 3, 0),
        );
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok() != second.is_ok());
        let loser = if first.is_ok() { second } else { first };
        assert!(matches!(
            loser,
            Err(TaskBoardError::Reorder(ReorderError::TaskNotAtExpectedPosition { .. }))
        ));

        let mut total = 0;
        for status in [TaskStatus::Todo, TaskStatus::Done] {
            let bucket = fx.bucket(status).await;
            let positions: Vec<i64> = bucket.iter().map(|(_, position)| *position).collect();
            assert_eq!(positions, (0..bucket.len() as i64).collect::<Vec<_>>());
            total += bucket.len();
        }
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn test_project_lock_is_forgotten_when_idle() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B"]).await;
        assert!(fx.service.project_locks.is_empty());

        let guard = fx.service.lock_project(fx.project.id).await;
        assert_eq!(fx.service.project_locks.len(), 1);
        drop(guard);
        assert!(fx.service.project_locks.is_empty());

        fx.service
            .move_task(
                fx.owner,
                tasks[0].id,
                move_request(TaskStatus::Todo, TaskStatus::Todo, 0, 1),
            )
            .await
            .unwrap();
        assert!(fx.service.project_locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_moves_in_different_projects_do_not_fail_each_other() {
        let path = std::env::temp_dir().join(format!("kanban-board-{}.db", Uuid::new_v4()));
        let db = DBService::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        let service = TaskBoardService::new(db);
        let owner = Uuid::new_v4();

        let mut workers = Vec::new();
        for name in ["Alpha", "Beta", "Gamma"] {
            let project = service
                .create_project(
                    owner,
                    &CreateProject {
                        title: name.to_string(),
                        description: None,
                    },
                )
                .await
                .unwrap();
            for title in ["A", "B", "C", "D"] {
                let data =
                    CreateTask::from_title_description(project.id, title.to_string(), None);
                service.create_task(owner, &data).await.unwrap();
            }

            let service = service.clone();
            workers.push(tokio::spawn(async move {
                // Rotate the first task to the end, reading the board fresh each time
                for _ in 0..15 {
                    let columns = service.kanban_columns(project.id).await?;
                    let first = columns.todo[0].id;
                    let request = MoveTaskRequest {
                        source_status: TaskStatus::Todo,
                        destination_status: TaskStatus::Todo,
                        source_index: 0,
                        destination_index: 3,
                    };
                    service.move_task(owner, first, request).await?;
                }
                service.kanban_columns(project.id).await
            }));
        }

        for worker in workers {
            let columns = worker.await.unwrap().unwrap();
            let positions: Vec<i64> = columns.todo.iter().map(|task| task.position).collect();
            assert_eq!(positions, [0, 1, 2, 3]);
        }

        service.db().pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_update_task_records_changes() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["Draft"]).await;
        let assignee = Uuid::new_v4();

        let stranger = Uuid::new_v4();
        let edit = UpdateTask {
            title: Some("Write release notes".to_string()),
            assignee_id: Some(assignee),
            ..Default::default()
        };
        let result = fx.service.update_task(stranger, tasks[0].id, &edit).await;
        assert!(matches!(result, Err(TaskBoardError::Forbidden)));

        let updated = fx.service.update_task(fx.owner, tasks[0].id, &edit).await.unwrap();
        assert_eq!(updated.title, "Write release notes");
        assert_eq!(updated.assignee_id, Some(assignee));
        assert_eq!(updated.position, 0);
        assert_eq!(fx.service.get_task(tasks[0].id).await.unwrap(), updated);

        let activities = fx.service.activities(fx.project.id, Some(1)).await.unwrap();
        assert_eq!(activities[0].action, ActivityAction::Updated);
        let metadata = activities[0].parsed_metadata().unwrap();
        assert_eq!(
            metadata.changes,
            Some(vec!["title".to_string(), "assignee_id".to_string()])
        );
        assert_eq!(metadata.previous.unwrap().title, "Draft");

        // The new assignee may now move it
        fx.service
            .move_task(
                assignee,
                tasks[0].id,
                move_request(TaskStatus::Todo, TaskStatus::InProgress, 0, 0),
            )
            .await
            .unwrap();

        // Re-sending the same values changes nothing and logs nothing
        let before = fx.actions().await.len();
        fx.service.update_task(assignee, tasks[0].id, &edit).await.unwrap();
        assert_eq!(fx.actions().await.len(), before);
    }

    #[tokio::test]
    async fn test_get_task_unknown_id() {
        let fx = setup().await;
        let result = fx.service.get_task(Uuid::new_v4()).await;
        assert!(matches!(result, Err(TaskBoardError::TaskNotFound)));
    }

    #[tokio::test]
    async fn test_update_status_appends_to_destination() {
        let fx = setup().await;
        let todo = fx.seed(TaskStatus::Todo, &["A", "B", "C"]).await;
        fx.seed(TaskStatus::Done, &["X"]).await;

        let task = fx
            .service
            .update_status(fx.owner, todo[1].id, TaskStatus::Done)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(task.position, 1);
        assert_eq!(
            fx.bucket(TaskStatus::Todo).await,
            entries(&[("A", 0), ("C", 1)])
        );

        // Unchanged status is a no-op
        let same = fx
            .service
            .update_status(fx.owner, todo[1].id, TaskStatus::Done)
            .await
            .unwrap();
        assert_eq!(same.position, 1);
        assert_eq!(
            fx.actions().await.iter().filter(|a| **a == ActivityAction::Moved).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_keeps_sibling_positions() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["A", "B", "C"]).await;
        let stranger = Uuid::new_v4();

        let result = fx.service.delete_task(stranger, tasks[1].id).await;
        assert!(matches!(result, Err(TaskBoardError::Forbidden)));

        fx.service.delete_task(fx.owner, tasks[1].id).await.unwrap();
        assert_eq!(
            fx.bucket(TaskStatus::Todo).await,
            entries(&[("A", 0), ("C", 2)])
        );

        // A later move closes the gap
        fx.service
            .move_task(
                fx.owner,
                tasks[2].id,
                move_request(TaskStatus::Todo, TaskStatus::Todo, 1, 0),
            )
            .await
            .unwrap();
        assert_eq!(
            fx.bucket(TaskStatus::Todo).await,
            entries(&[("C", 0), ("A", 1)])
        );

        let result = fx.service.delete_task(fx.owner, tasks[1].id).await;
        assert!(matches!(result, Err(TaskBoardError::TaskNotFound)));
    }

    #[tokio::test]
    async fn test_activity_log_records_lifecycle() {
        let fx = setup().await;
        let tasks = fx.seed(TaskStatus::Todo, &["Implement authentication"]).await;

        fx.service
            .move_task(
                fx.owner,
                tasks[0].id,
                move_request(TaskStatus::Todo, TaskStatus::InReview, 0, 0),
            )
            .await
            .unwrap();
        fx.service.delete_task(fx.owner, tasks[0].id).await.unwrap();

        let activities = fx.service.activities(fx.project.id, None).await.unwrap();
        let actions: Vec<ActivityAction> = activities.iter().map(|a| a.action).collect();
        assert_eq!(
            actions,
            [
                ActivityAction::Deleted,
                ActivityAction::Moved,
                ActivityAction::Created
            ]
        );

        let moved = activities[1].parsed_metadata().unwrap();
        assert_eq!(moved.from, Some(TaskStatus::Todo));
        assert_eq!(moved.to, Some(TaskStatus::InReview));
        assert_eq!(moved.task_title.as_deref(), Some("Implement authentication"));
        assert!(activities.iter().all(|a| a.user_id == fx.owner));

        let limited = fx.service.activities(fx.project.id, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
