pub mod project;
pub mod task;
pub mod task_activity;
