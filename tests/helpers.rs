//! Shared helpers for integration tests.

#[path = "helpers_polling.rs"]
pub mod polling;

#[path = "helpers_scheduler.rs"]
pub mod scheduler;
