//! Logging setup for the `space-cloud` binary.
//!
//! Output format is controlled via `SC_LOG_FORMAT`:
//! - `json` - Structured JSON output (for ELK/Loki)
//! - `pretty` - Human-readable output (default for TTY)
//! - `compact` - Compact single-line format (default for non-TTY)
//!
//! The filter comes from `SC_LOG_LEVEL` or `RUST_LOG`.

mod config;
mod tracing_setup;

pub use config::{LogFormat, TracingConfig, TracingConfigBuilder};
pub use tracing_setup::{TracingGuard, init_tracing};
