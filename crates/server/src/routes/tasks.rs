use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::task::{CreateTask, Task, TaskStatus, UpdateTask};
use serde::{Deserialize, Serialize};
use services::services::kanban::{KanbanColumns, MoveTaskRequest};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::auth::ActingUser};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateTaskStatus {
    pub status: TaskStatus,
}

pub async fn create_task(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    payload: Result<ResponseJson<CreateTask>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let ResponseJson(payload) = payload?;
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Task title is required".to_string()));
    }
    let task = state.board.create_task(user_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = state.board.get_task(task_id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn update_task(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(task_id): Path<Uuid>,
    payload: Result<ResponseJson<UpdateTask>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let ResponseJson(payload) = payload?;
    if payload.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
        return Err(ApiError::BadRequest("Task title is required".to_string()));
    }
    let task = state.board.update_task(user_id, task_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

/// Move a task within or across columns; answers with the refreshed board
pub async fn move_task(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(task_id): Path<Uuid>,
    payload: Result<ResponseJson<MoveTaskRequest>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<KanbanColumns<Task>>>, ApiError> {
    let ResponseJson(request) = payload?;
    let columns = state.board.move_task(user_id, task_id, request).await?;
    Ok(ResponseJson(ApiResponse::success(columns)))
}

pub async fn update_task_status(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(task_id): Path<Uuid>,
    payload: Result<ResponseJson<UpdateTaskStatus>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let ResponseJson(payload) = payload?;
    let task = state
        .board
        .update_status(user_id, task_id, payload.status)
        .await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn delete_task(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    Path(task_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.board.delete_task(user_id, task_id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/tasks", post(create_task))
        .route(
            "/tasks/{task_id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/tasks/{task_id}/move", post(move_task))
        .route("/tasks/{task_id}/status", put(update_task_status))
}
