use axum::{Router, middleware::from_fn_with_state};
use tower_http::trace::TraceLayer;

use crate::{AppState, middleware::rate_limit};

pub mod health;
pub mod projects;
pub mod tasks;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(health::router(&state))
        .merge(projects::router(&state))
        .merge(tasks::router(&state));

    Router::new()
        .nest("/api", api)
        .layer(from_fn_with_state(state.clone(), rate_limit::enforce))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
