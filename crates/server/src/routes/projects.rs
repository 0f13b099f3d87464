use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    project::{CreateProject, Project},
    task::Task,
    task_activity::TaskActivity,
};
use serde::Deserialize;
use services::services::kanban::KanbanColumns;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::auth::ActingUser};

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

pub async fn create_project(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    payload: Result<ResponseJson<CreateProject>, JsonRejection>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let ResponseJson(payload) = payload?;
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Project title is required".to_string()));
    }
    let project = state.board.create_project(user_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn get_kanban(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<KanbanColumns<Task>>>, ApiError> {
    let columns = state.board.kanban_columns(project_id).await?;
    Ok(ResponseJson(ApiResponse::success(columns)))
}

pub async fn get_activities(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    query: Result<Query<ActivityQuery>, QueryRejection>,
) -> Result<ResponseJson<ApiResponse<Vec<TaskActivity>>>, ApiError> {
    let Query(query) = query?;
    let activities = state.board.activities(project_id, query.limit).await?;
    Ok(ResponseJson(ApiResponse::success(activities)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/projects", post(create_project)).nest(
        "/projects/{project_id}",
        Router::new()
            .route("/kanban", get(get_kanban))
            .route("/activities", get(get_activities)),
    )
}
