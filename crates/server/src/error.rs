use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{kanban::ReorderError, task_board::TaskBoardError};
use thiserror::Error;
use tracing::error;
use utils::response::ApiResponse;

const RETRY_MESSAGE: &str = "Failed to update the board. Please try again.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    TaskBoard(#[from] TaskBoardError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Missing or invalid X-User-Id header")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::TaskBoard(err) => match err {
                TaskBoardError::ProjectNotFound => (StatusCode::NOT_FOUND, "Project not found".into()),
                TaskBoardError::TaskNotFound => (StatusCode::NOT_FOUND, "Task not found".into()),
                TaskBoardError::Forbidden => {
                    (StatusCode::FORBIDDEN, "Insufficient permissions".into())
                }
                TaskBoardError::Reorder(conflict @ ReorderError::TaskNotAtExpectedPosition { .. }) => {
                    (StatusCode::CONFLICT, conflict.to_string())
                }
                TaskBoardError::Reorder(ReorderError::PersistenceFailed(_))
                | TaskBoardError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, RETRY_MESSAGE.into())
                }
            },
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, RETRY_MESSAGE.into()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(ApiResponse::<()>::error(&message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use db::models::task::TaskStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(TaskBoardError::TaskNotFound), StatusCode::NOT_FOUND),
            (ApiError::from(TaskBoardError::Forbidden), StatusCode::FORBIDDEN),
            (
                ApiError::from(TaskBoardError::Reorder(
                    ReorderError::TaskNotAtExpectedPosition {
                        task_id: Uuid::new_v4(),
                        source_status: TaskStatus::Todo,
                        source_index: 3,
                    },
                )),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(TaskBoardError::Reorder(ReorderError::PersistenceFailed(
                    sqlx::Error::PoolClosed,
                ))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::BadRequest("Title is required".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_persistence_cause_is_not_exposed() {
        let err = ApiError::from(TaskBoardError::Database(sqlx::Error::PoolTimedOut));
        let (_, message) = err.status_and_message();
        assert_eq!(message, RETRY_MESSAGE);
    }
}
