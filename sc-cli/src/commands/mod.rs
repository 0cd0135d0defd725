//! CLI command implementations.

pub mod config;
pub mod start;
pub mod tokens;
pub mod version;
