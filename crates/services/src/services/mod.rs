pub mod kanban;
pub mod rate_limit;
pub mod task_board;
