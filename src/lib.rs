//! Board Monitor: polls task-board lists and notifies destinations.

pub mod board;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
