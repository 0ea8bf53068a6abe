//! Subcommand implementations

pub mod mirrors;
pub mod stats;
pub mod sweep;
