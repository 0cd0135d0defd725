//! Error types for configuration handling.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading, writing or editing the configuration document.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Filesystem failure while reading or writing a config file.
    #[error("Config I/O error at {path}: {source}")]
    Io {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// JSON encode/decode failure.
    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML encode/decode failure.
    #[error("Invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The file extension does not map to a known format.
    #[error("Unsupported config format for {0} (expected .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),

    /// A project-scoped edit targeted a project that does not exist.
    #[error("Project {0} is not present in state")]
    ProjectNotFound(String),

    /// A database-scoped edit targeted a database alias the project lacks.
    #[error("Database {db_alias} is not configured in project {project}")]
    DatabaseNotFound {
        /// Project that was being edited.
        project: String,
        /// Missing database alias.
        db_alias: String,
    },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
