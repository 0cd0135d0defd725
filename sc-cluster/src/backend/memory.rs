//! In-memory config backend for single-process deployments.
//!
//! Useful for:
//! - Development and testing
//! - Running without a consensus group
//!
//! All state is lost on restart.

use std::sync::Arc;

use parking_lot::Mutex;
use sc_core::Config;
use tokio::sync::watch;

use super::{BackendFuture, ConfigBackend};
use crate::command::{Command, CommandResponse};
use crate::error::ClusterResult;
use crate::state::ChangeCallback;

/// In-memory config backend.
///
/// Changes are applied in call order under one lock and numbered from 1.
pub struct MemoryBackend {
    applied: Mutex<(Arc<Config>, u64)>,
    config_tx: watch::Sender<Arc<Config>>,
    on_change: ChangeCallback,
}

impl MemoryBackend {
    /// Create a backend holding `initial`.
    pub fn new(initial: Config, on_change: ChangeCallback) -> Self {
        let initial = Arc::new(initial);
        let (config_tx, _) = watch::channel(Arc::clone(&initial));
        Self {
            applied: Mutex::new((initial, 0)),
            config_tx,
            on_change,
        }
    }

    /// Number of changes applied so far.
    pub fn last_index(&self) -> u64 {
        self.applied.lock().1
    }

    fn apply(&self, command: Command) -> ClusterResult<CommandResponse> {
        let name = command.name();
        let (config, response) = {
            let mut applied = self.applied.lock();
            let mut next = Config::clone(&applied.0);
            let changed = command.apply_to(&mut next);
            applied.1 += 1;
            applied.0 = Arc::new(next);
            (
                Arc::clone(&applied.0),
                CommandResponse {
                    index: applied.1,
                    changed,
                },
            )
        };
        tracing::debug!(command = name, index = response.index, "Applied command in memory");

        self.config_tx.send_replace(Arc::clone(&config));
        (self.on_change)(&config);
        Ok(response)
    }
}

impl ConfigBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn execute(&self, command: Command) -> BackendFuture<'_, CommandResponse> {
        Box::pin(async move { self.apply(command) })
    }

    fn config(&self) -> Arc<Config> {
        Arc::clone(&self.applied.lock().0)
    }

    fn subscribe(&self) -> watch::Receiver<Arc<Config>> {
        self.config_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_core::{Project, StaticRoute};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_backend() -> (MemoryBackend, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backend = MemoryBackend::new(
            Config::default(),
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (backend, calls)
    }

    fn route(id: &str) -> StaticRoute {
        StaticRoute {
            id: id.to_string(),
            url_prefix: format!("/{}", id),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn memory_backend_applies_in_order() {
        let (backend, calls) = counting_backend();

        let first = backend.set_project(Project::new("p1")).await.unwrap();
        let second = backend.set_project(Project::new("p2")).await.unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(second.index, 2);
        assert_eq!(backend.last_index(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let ids: Vec<_> = backend.config().projects.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn memory_backend_delete_absent_is_unchanged() {
        let (backend, calls) = counting_backend();

        let response = backend.delete_project("missing".to_string()).await.unwrap();
        assert!(!response.changed);
        assert!(backend.config().projects.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn memory_backend_notifies_watchers() {
        let (backend, _) = counting_backend();
        let mut rx = backend.subscribe();

        backend.set_static_routes(vec![route("a"), route("b")]).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().static_config.routes.len(), 2);

        backend.add_internal_routes(vec![route("i")]).await.unwrap();
        rx.changed().await.unwrap();
        let config = rx.borrow().clone();
        assert_eq!(config.static_config.routes.len(), 2);
        assert_eq!(config.static_config.internal_routes, vec![route("i")]);
    }
}
