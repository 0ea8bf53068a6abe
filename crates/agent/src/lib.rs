//! Mirror boost agent
//!
//! Local service that persists samples posted by pages, answers mirror
//! lookups and sweeps stale records on a timer.

pub mod api;
pub mod config;
