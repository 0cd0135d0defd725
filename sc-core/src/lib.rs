//! Space Cloud core library.
//!
//! This crate holds the configuration document that the cluster layer
//! replicates: the set of tenant projects with their database, auth,
//! eventing, file-store and service rules, plus the global static routes.
//!
//! # Key Components
//!
//! - **Config**: The cluster-wide document (`Config`, `Project`, `Modules`, ...)
//! - **File store**: Loading and storing the document as JSON or YAML
//! - **Errors**: [`ConfigError`] for everything above
//!
//! # Example
//!
//! ```ignore
//! use sc_core::{Config, Project, load_config, store_config};
//!
//! let mut config = Config::default();
//! config.upsert_project(Project::new("todo-app"));
//! store_config(&config, "config.yaml")?;
//!
//! let restored = load_config("config.yaml")?;
//! assert_eq!(restored, config);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;

pub use config::{
    AuthStub, Config, CrudStub, Endpoint, Eventing, EventingRule, FileRule, FileStore, Modules,
    Project, Rule, Service, ServicesModule, StaticConfig, StaticRoute, TableRule, load_config,
    store_config,
};
pub use error::{ConfigError, Result};
