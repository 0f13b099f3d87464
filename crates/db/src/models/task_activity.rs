use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::task::TaskStatus;

/// What happened to a task
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "activity_action", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    Created,
    Updated,
    Moved,
    Deleted,
}

/// Editable fields of a task before an update
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
pub struct TaskSnapshot {
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
}

/// Structured details stored alongside an activity entry
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
pub struct ActivityMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<TaskStatus>,
    /// Names of the fields an update changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<TaskSnapshot>,
}

/// Append-only audit entry for a project's tasks
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct TaskActivity {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_id: Option<Uuid>, // Not a foreign key: deleted tasks keep their history
    pub user_id: Uuid,
    pub action: ActivityAction,
    pub metadata: Option<String>, // JSON-serialized ActivityMetadata
    pub created_at: DateTime<Utc>,
}

impl TaskActivity {
    /// Parse the metadata JSON into an ActivityMetadata struct
    pub fn parsed_metadata(&self) -> Option<ActivityMetadata> {
        self.metadata
            .as_ref()
            .and_then(|json| serde_json::from_str(json).ok())
    }

    pub async fn create<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Option<Uuid>,
        user_id: Uuid,
        action: ActivityAction,
        metadata: &ActivityMetadata,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let id = Uuid::new_v4();
        let metadata = serde_json::to_string(metadata).ok();
        sqlx::query_as::<_, TaskActivity>(
            r#"INSERT INTO task_activities (id, project_id, task_id, user_id, action, metadata, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, project_id, task_id, user_id, action, metadata, created_at"#,
        )
        .bind(id)
        .bind(project_id)
        .bind(task_id)
        .bind(user_id)
        .bind(action)
        .bind(metadata)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Most recent entries first
    pub async fn find_by_project_id(
        pool: &SqlitePool,
        project_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskActivity>(
            r#"SELECT id, project_id, task_id, user_id, action, metadata, created_at
               FROM task_activities
               WHERE project_id = $1
               ORDER BY created_at DESC, rowid DESC
               LIMIT $2"#,
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
