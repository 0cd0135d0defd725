//! The cluster-wide configuration document.
//!
//! A [`Config`] is treated as a value: edits produce a new document rather
//! than mutating a shared one in place. The helpers on [`Config`] and
//! [`Project`] are the pure building blocks the replicated state machine and
//! the admin facade use to derive the next document.

mod file;
mod project;

pub use file::{load_config, store_config};
pub use project::{
    AuthStub, CrudStub, Endpoint, Eventing, EventingRule, FileRule, FileStore, Modules, Project,
    Rule, Service, ServicesModule, TableRule,
};

use serde::{Deserialize, Serialize};

/// The authoritative cluster configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registered tenant projects, in insertion order.
    pub projects: Vec<Project>,
    /// Global static routes.
    #[serde(rename = "static")]
    pub static_config: StaticConfig,
}

/// Global static routing table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StaticConfig {
    /// Operator-managed routes.
    pub routes: Vec<StaticRoute>,
    /// Routes registered by platform components.
    pub internal_routes: Vec<StaticRoute>,
}

/// A single static route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticRoute {
    /// Route identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Filesystem path or upstream path served by this route.
    pub path: String,
    /// URL prefix matched by the route.
    #[serde(rename = "prefix")]
    pub url_prefix: String,
    /// Host the route is bound to.
    pub host: String,
    /// Upstream to proxy to.
    pub proxy: String,
    /// Protocol used for the upstream.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

impl Config {
    /// Look up a project by ID.
    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Replace the project with the same ID, or append it if absent.
    pub fn upsert_project(&mut self, project: Project) {
        match self.projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project,
            None => self.projects.push(project),
        }
    }

    /// Remove the project with the given ID.
    ///
    /// Returns `false` if no such project existed.
    pub fn remove_project(&mut self, id: &str) -> bool {
        let before = self.projects.len();
        self.projects.retain(|p| p.id != id);
        self.projects.len() != before
    }

    /// Replace the operator static routes wholesale.
    pub fn set_static_routes(&mut self, routes: Vec<StaticRoute>) {
        self.static_config.routes = routes;
    }

    /// Upsert internal routes by route ID, appending unknown ones.
    pub fn add_internal_routes(&mut self, routes: Vec<StaticRoute>) {
        for route in routes {
            let existing = self
                .static_config
                .internal_routes
                .iter_mut()
                .find(|r| !route.id.is_empty() && r.id == route.id);
            match existing {
                Some(slot) => *slot = route,
                None => self.static_config.internal_routes.push(route),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, prefix: &str) -> StaticRoute {
        StaticRoute {
            id: id.to_string(),
            url_prefix: prefix.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut config = Config::default();
        config.upsert_project(Project::new("a"));
        config.upsert_project(Project::new("b"));

        let mut replacement = Project::new("a");
        replacement.name = "renamed".to_string();
        config.upsert_project(replacement);

        assert_eq!(config.projects.len(), 2);
        assert_eq!(config.projects[0].name, "renamed");
        assert_eq!(config.projects[1].id, "b");
    }

    #[test]
    fn test_remove_missing_project() {
        let mut config = Config::default();
        config.upsert_project(Project::new("a"));

        assert!(!config.remove_project("missing"));
        assert_eq!(config.projects.len(), 1);
        assert!(config.remove_project("a"));
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_internal_routes_upsert_by_id() {
        let mut config = Config::default();
        config.add_internal_routes(vec![route("r1", "/a"), route("r2", "/b")]);
        config.add_internal_routes(vec![route("r1", "/c"), route("", "/d"), route("", "/e")]);

        let prefixes: Vec<_> = config
            .static_config
            .internal_routes
            .iter()
            .map(|r| r.url_prefix.as_str())
            .collect();
        assert_eq!(prefixes, vec!["/c", "/b", "/d", "/e"]);
    }

    #[test]
    fn test_static_routes_replaced_wholesale() {
        let mut config = Config::default();
        config.set_static_routes(vec![route("r1", "/a"), route("r2", "/b")]);
        config.set_static_routes(vec![route("r3", "/z")]);

        assert_eq!(config.static_config.routes, vec![route("r3", "/z")]);
    }

    #[test]
    fn test_wire_names() {
        let mut config = Config::default();
        config.set_static_routes(vec![route("r1", "/a")]);

        let json = serde_json::to_value(&config).expect("serialize");
        assert_eq!(json["static"]["routes"][0]["prefix"], "/a");
        assert!(json["static"]["internalRoutes"].is_array());
    }
}
