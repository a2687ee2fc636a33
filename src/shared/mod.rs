//! Small utilities shared across components

pub mod clock;
pub mod retry;
pub mod task;
