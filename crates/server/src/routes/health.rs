use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// Liveness check that also confirms the database answers
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<String>>, ApiError> {
    sqlx::query("SELECT 1").execute(&state.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success("OK".to_string())))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
