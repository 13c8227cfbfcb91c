pub mod config;
pub mod error;
pub mod notifier;
pub mod storage;
pub mod task_repository;
