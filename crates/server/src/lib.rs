use db::DBService;
use services::services::{rate_limit::RateLimiter, task_board::TaskBoardService};

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub board: TaskBoardService,
    pub general_limiter: RateLimiter,
    pub api_limiter: RateLimiter,
}

impl AppState {
    pub fn new(db: DBService, general_limiter: RateLimiter, api_limiter: RateLimiter) -> Self {
        Self {
            board: TaskBoardService::new(db),
            general_limiter,
            api_limiter,
        }
    }

    pub fn db(&self) -> &DBService {
        self.board.db()
    }
}
