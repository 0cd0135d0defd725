//! Storage contract behind [`ClusterManager`](crate::ClusterManager).
//!
//! A backend turns [`Command`]s into changes of the shared [`Config`] and
//! lets callers watch the document. Two implementations ship:
//!
//! - [`RaftBackend`]: commands go through the replicated consensus log
//! - [`MemoryBackend`]: a single-process store, the shape an external
//!   consistent key/value store takes

mod memory;
mod raft;

pub use memory::MemoryBackend;
pub use raft::RaftBackend;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use sc_core::{Config, Project, StaticRoute};
use tokio::sync::watch;

use crate::command::{Command, CommandResponse};
use crate::error::ClusterResult;

/// Type alias for async backend futures.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = ClusterResult<T>> + Send + 'a>>;

/// Trait for config storage backends.
///
/// Writes resolve once the change is visible through [`config`](Self::config)
/// on this node. Errors are returned unchanged; backends never retry.
pub trait ConfigBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Make one change durable.
    fn execute(&self, command: Command) -> BackendFuture<'_, CommandResponse>;

    /// The current document.
    fn config(&self) -> Arc<Config>;

    /// Watch the document. The receiver starts at the current value.
    fn subscribe(&self) -> watch::Receiver<Arc<Config>>;

    /// Insert or replace a project.
    fn set_project(&self, project: Project) -> BackendFuture<'_, CommandResponse> {
        self.execute(Command::SetProject(project))
    }

    /// Remove a project. Absent projects are not an error.
    fn delete_project(&self, id: String) -> BackendFuture<'_, CommandResponse> {
        self.execute(Command::DeleteProject { id })
    }

    /// Replace the operator static routes.
    fn set_static_routes(&self, routes: Vec<StaticRoute>) -> BackendFuture<'_, CommandResponse> {
        self.execute(Command::SetStaticRoutes(routes))
    }

    /// Upsert platform-registered routes.
    fn add_internal_routes(&self, routes: Vec<StaticRoute>) -> BackendFuture<'_, CommandResponse> {
        self.execute(Command::AddInternalRoutes(routes))
    }
}
