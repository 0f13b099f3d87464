use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Kanban column a task sits in. Any status may move to any other.
#[derive(
    Debug,
    Clone,
    Copy,
    Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    TS,
    EnumString,
    Display,
    Default,
)]
#[sqlx(type_name = "task_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
}

impl TaskStatus {
    /// Every status in board (column) order
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::InReview,
        TaskStatus::Done,
    ];
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, TS)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid, // Foreign key to Project
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub position: i64, // Order within the (project_id, status) bucket
    pub assignee_id: Option<Uuid>,
    pub creator_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTask {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
}

impl CreateTask {
    pub fn from_title_description(
        project_id: Uuid,
        title: String,
        description: Option<String>,
    ) -> Self {
        Self {
            project_id,
            title,
            description,
            status: Some(TaskStatus::Todo),
            assignee_id: None,
        }
    }
}

/// Editable task fields; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
}

/// New status and position for one task, produced by a board move
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
pub struct PositionUpdate {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub position: i64,
}

impl Task {
    /// Whether `user_id` may move this task: its creator, its assignee or the project owner
    pub fn can_be_moved_by(&self, user_id: Uuid, project_owner_id: Uuid) -> bool {
        project_owner_id == user_id
            || self.creator_id == user_id
            || self.assignee_id == Some(user_id)
    }

    /// Whether `user_id` may delete this task: its creator or the project owner
    pub fn can_be_deleted_by(&self, user_id: Uuid, project_owner_id: Uuid) -> bool {
        project_owner_id == user_id || self.creator_id == user_id
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(
            r#"SELECT id, project_id, title, description, status, position, assignee_id, creator_id, created_at, updated_at
               FROM tasks
               WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// All tasks of a project, grouped by status and ordered by position within each status
    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Task>(
            r#"SELECT id, project_id, title, description, status, position, assignee_id, creator_id, created_at, updated_at
               FROM tasks
               WHERE project_id = $1
               ORDER BY status ASC, position ASC, created_at ASC"#,
        )
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    /// Ordered contents of one bucket.
    ///
    /// Ties on `position` (only possible for rows written outside a reorder)
    /// fall back to creation order so the result is still a total order.
    pub async fn find_bucket<'e, E>(
        executor: E,
        project_id: Uuid,
        status: TaskStatus,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(
            r#"SELECT id, project_id, title, description, status, position, assignee_id, creator_id, created_at, updated_at
               FROM tasks
               WHERE project_id = $1 AND status = $2
               ORDER BY position ASC, created_at ASC, rowid ASC"#,
        )
        .bind(project_id)
        .bind(status)
        .fetch_all(executor)
        .await
    }

    /// First free position at the end of a bucket (0 for an empty bucket)
    pub async fn next_position<'e, E>(
        executor: E,
        project_id: Uuid,
        status: TaskStatus,
    ) -> Result<i64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM tasks WHERE project_id = $1 AND status = $2",
        )
        .bind(project_id)
        .bind(status)
        .fetch_one(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateTask,
        task_id: Uuid,
        creator_id: Uuid,
        position: i64,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let status = data.status.unwrap_or_default();
        let now = Utc::now();
        sqlx::query_as::<_, Task>(
            r#"INSERT INTO tasks (id, project_id, title, description, status, position, assignee_id, creator_id, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING id, project_id, title, description, status, position, assignee_id, creator_id, created_at, updated_at"#,
        )
        .bind(task_id)
        .bind(data.project_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(status)
        .bind(position)
        .bind(data.assignee_id)
        .bind(creator_id)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        title: &str,
        description: Option<&str>,
        assignee_id: Option<Uuid>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(
            r#"UPDATE tasks
               SET title = $2, description = $3, assignee_id = $4, updated_at = $5
               WHERE id = $1
               RETURNING id, project_id, title, description, status, position, assignee_id, creator_id, created_at, updated_at"#,
        )
        .bind(id)
        .bind(title)
        .bind(description)
        .bind(assignee_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Write a batch of status/position changes on an open connection.
    ///
    /// Callers pass a transaction so the batch lands all-or-nothing.
    pub async fn apply_position_updates(
        conn: &mut SqliteConnection,
        updates: &[PositionUpdate],
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        for update in updates {
            let result = sqlx::query(
                "UPDATE tasks SET status = $2, position = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(update.task_id)
            .bind(update.status)
            .bind(update.position)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(sqlx::Error::RowNotFound);
            }
        }
        Ok(())
    }

    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}
