//! Project (tenant) records and their module configuration.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A tenant project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    /// Unique project identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Signing secret for project tokens.
    pub secret: String,
    /// Per-module configuration.
    pub modules: Modules,
}

/// Module configuration of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Modules {
    /// Databases keyed by alias.
    pub crud: BTreeMap<String, CrudStub>,
    /// Sign-in methods keyed by provider.
    pub auth: BTreeMap<String, AuthStub>,
    /// Remote services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesModule>,
    /// File storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_store: Option<FileStore>,
    /// Eventing module.
    pub eventing: Eventing,
}

/// A database connection and its collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CrudStub {
    /// Connection string.
    pub conn: String,
    /// Collection rules keyed by collection name.
    pub collections: BTreeMap<String, TableRule>,
    /// Whether this is the primary database.
    pub is_primary: bool,
    /// Whether the database is enabled.
    pub enabled: bool,
}

/// Rules and schema of a single collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRule {
    /// Whether realtime updates are enabled.
    #[serde(rename = "isRealtimeEnabled")]
    pub is_realtime_enabled: bool,
    /// Rules keyed by operation (`read`, `create`, `update`, `delete`).
    pub rules: BTreeMap<String, Rule>,
    /// GraphQL schema of the collection.
    pub schema: String,
}

/// An authorization rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// Rule kind (`allow`, `deny`, `authenticated`, `match`, `and`, `or`, ...).
    pub rule: String,
    /// Comparison operator for `match` rules.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub eval: String,
    /// Operand type for `match` rules.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Left operand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f1: Option<Value>,
    /// Right operand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub f2: Option<Value>,
    /// Nested rules for `and`/`or`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clauses: Vec<Rule>,
    /// Database for `query` rules.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub db: String,
    /// Collection for `query` rules.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub col: String,
    /// Filter for `query` rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub find: Option<BTreeMap<String, Value>>,
    /// Webhook for `webhook` rules.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// Sign-in method configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthStub {
    /// Whether the method is enabled.
    pub enabled: bool,
    /// Client ID for OAuth providers.
    pub id: String,
    /// Client secret for OAuth providers.
    pub secret: String,
}

/// Remote service registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesModule {
    /// Services exposed to clients.
    #[serde(rename = "externalServices")]
    pub services: BTreeMap<String, Service>,
    /// Services used by the platform itself.
    #[serde(rename = "internalServices")]
    pub internal_services: BTreeMap<String, Service>,
}

/// A remote service and its endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    /// Base URL, e.g. `http://localhost:8080`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Endpoints keyed by name.
    pub endpoints: BTreeMap<String, Endpoint>,
}

/// A single remote endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    /// HTTP method.
    pub method: String,
    /// Path relative to the service URL.
    pub path: String,
    /// Access rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<Rule>,
}

/// File storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileStore {
    /// Whether file storage is enabled.
    pub enabled: bool,
    /// Backend kind (`local`, `amazon-s3`, `gcp-storage`).
    pub store_type: String,
    /// Connection string.
    pub conn: String,
    /// Backend endpoint.
    pub endpoint: String,
    /// Bucket name.
    pub bucket: String,
    /// Access rules.
    pub rules: Vec<FileRule>,
}

/// File access rule for a path prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRule {
    /// Rule name.
    pub name: String,
    /// Path prefix the rule applies to.
    pub prefix: String,
    /// Rules keyed by operation (`create`, `read`, `delete`).
    pub rule: BTreeMap<String, Rule>,
}

/// Eventing module configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Eventing {
    /// Whether eventing is enabled.
    pub enabled: bool,
    /// Database holding the event log.
    pub db_type: String,
    /// Collection holding the event log.
    pub col: String,
    /// Operator-defined triggers keyed by rule name.
    pub rules: BTreeMap<String, EventingRule>,
    /// Platform-defined triggers keyed by rule name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub internal_rules: BTreeMap<String, EventingRule>,
}

/// An event trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventingRule {
    /// Event type, e.g. `DB_INSERT`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Delivery attempts before giving up.
    pub retries: u32,
    /// Webhook invoked for each event.
    pub url: String,
    /// Event-type specific options (`db`, `col`, ...).
    pub options: BTreeMap<String, String>,
}

impl Project {
    /// Create an empty project with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            ..Default::default()
        }
    }

    fn database_mut(&mut self, db_alias: &str) -> Result<&mut CrudStub> {
        let project = &self.id;
        self.modules
            .crud
            .get_mut(db_alias)
            .ok_or_else(|| ConfigError::DatabaseNotFound {
                project: project.clone(),
                db_alias: db_alias.to_string(),
            })
    }

    /// Add or update a database connection.
    pub fn set_database_connection(&mut self, db_alias: &str, conn: &str, enabled: bool) {
        let stub = self.modules.crud.entry(db_alias.to_string()).or_default();
        stub.conn = conn.to_string();
        stub.enabled = enabled;
    }

    /// Remove a database and all its collection rules.
    pub fn remove_database_config(&mut self, db_alias: &str) -> bool {
        self.modules.crud.remove(db_alias).is_some()
    }

    /// Set the rules of a collection, keeping any existing schema.
    pub fn set_collection_rules(&mut self, db_alias: &str, col: &str, rule: TableRule) -> Result<()> {
        let database = self.database_mut(db_alias)?;
        match database.collections.get_mut(col) {
            Some(existing) => {
                existing.is_realtime_enabled = rule.is_realtime_enabled;
                existing.rules = rule.rules;
            }
            None => {
                database.collections.insert(col.to_string(), rule);
            }
        }
        Ok(())
    }

    /// Set the schema of a collection, creating the collection if needed.
    pub fn set_collection_schema(&mut self, db_alias: &str, col: &str, schema: &str) -> Result<()> {
        let database = self.database_mut(db_alias)?;
        database
            .collections
            .entry(col.to_string())
            .or_default()
            .schema = schema.to_string();
        Ok(())
    }

    /// Delete a collection and its rules.
    pub fn delete_collection(&mut self, db_alias: &str, col: &str) -> Result<()> {
        self.database_mut(db_alias)?.collections.remove(col);
        Ok(())
    }

    /// Add or replace an eventing rule.
    pub fn set_eventing_rule(&mut self, name: &str, rule: EventingRule) {
        self.modules.eventing.rules.insert(name.to_string(), rule);
    }

    /// Delete an eventing rule. Missing rules are ignored.
    pub fn delete_eventing_rule(&mut self, name: &str) {
        self.modules.eventing.rules.remove(name);
    }

    /// Point the eventing module at an event-log collection.
    pub fn set_eventing_config(&mut self, db_type: &str, col: &str, enabled: bool) {
        let eventing = &mut self.modules.eventing;
        eventing.db_type = db_type.to_string();
        eventing.col = col.to_string();
        eventing.enabled = enabled;
    }

    /// Replace the file-store connection settings, keeping existing rules.
    pub fn set_file_store(&mut self, store: FileStore) {
        let rules = self
            .modules
            .file_store
            .take()
            .map(|existing| existing.rules)
            .unwrap_or_default();
        self.modules.file_store = Some(FileStore { rules, ..store });
    }

    /// Add or replace a file rule by name.
    pub fn set_file_rule(&mut self, rule: FileRule) {
        let store = self.modules.file_store.get_or_insert_with(FileStore::default);
        match store.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => store.rules.push(rule),
        }
    }

    /// Delete a file rule by name. Missing rules are ignored.
    pub fn delete_file_rule(&mut self, name: &str) {
        if let Some(store) = self.modules.file_store.as_mut() {
            store.rules.retain(|r| r.name != name);
        }
    }

    /// Add or replace a remote service.
    pub fn set_service(&mut self, name: &str, service: Service) {
        self.modules
            .services
            .get_or_insert_with(ServicesModule::default)
            .services
            .insert(name.to_string(), service);
    }

    /// Delete a remote service. Missing services are ignored.
    pub fn delete_service(&mut self, name: &str) {
        if let Some(services) = self.modules.services.as_mut() {
            services.services.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: &str) -> Rule {
        Rule {
            rule: kind.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_collection_rules_require_database() {
        let mut project = Project::new("p1");
        let err = project
            .set_collection_rules("db", "todos", TableRule::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::DatabaseNotFound { .. }));
    }

    #[test]
    fn test_collection_rules_keep_schema() {
        let mut project = Project::new("p1");
        project.set_database_connection("db", "postgres://localhost", true);
        project
            .set_collection_schema("db", "todos", "type todos { id: ID! }")
            .unwrap();

        let mut rules = BTreeMap::new();
        rules.insert("read".to_string(), rule("allow"));
        project
            .set_collection_rules(
                "db",
                "todos",
                TableRule {
                    is_realtime_enabled: true,
                    rules,
                    schema: String::new(),
                },
            )
            .unwrap();

        let table = &project.modules.crud["db"].collections["todos"];
        assert!(table.is_realtime_enabled);
        assert_eq!(table.schema, "type todos { id: ID! }");
        assert_eq!(table.rules["read"].rule, "allow");
    }

    #[test]
    fn test_new_collection_does_not_drop_siblings() {
        let mut project = Project::new("p1");
        project.set_database_connection("db", "conn", true);
        project
            .set_collection_rules("db", "a", TableRule::default())
            .unwrap();
        project
            .set_collection_rules("db", "b", TableRule::default())
            .unwrap();

        assert_eq!(project.modules.crud["db"].collections.len(), 2);
    }

    #[test]
    fn test_database_connection_update_keeps_collections() {
        let mut project = Project::new("p1");
        project.set_database_connection("db", "old", false);
        project
            .set_collection_rules("db", "todos", TableRule::default())
            .unwrap();
        project.set_database_connection("db", "new", true);

        let db = &project.modules.crud["db"];
        assert_eq!(db.conn, "new");
        assert!(db.enabled);
        assert!(db.collections.contains_key("todos"));
    }

    #[test]
    fn test_eventing_rules() {
        let mut project = Project::new("p1");
        project.set_eventing_rule(
            "on-insert",
            EventingRule {
                kind: "DB_INSERT".to_string(),
                retries: 3,
                url: "http://localhost:9000/hook".to_string(),
                options: BTreeMap::new(),
            },
        );
        assert_eq!(project.modules.eventing.rules["on-insert"].retries, 3);

        project.delete_eventing_rule("on-insert");
        project.delete_eventing_rule("on-insert");
        assert!(project.modules.eventing.rules.is_empty());
    }

    #[test]
    fn test_file_store_keeps_rules() {
        let mut project = Project::new("p1");
        project.set_file_rule(FileRule {
            name: "public".to_string(),
            prefix: "/public".to_string(),
            rule: BTreeMap::new(),
        });
        project.set_file_store(FileStore {
            enabled: true,
            store_type: "local".to_string(),
            ..Default::default()
        });

        let store = project.modules.file_store.as_ref().unwrap();
        assert!(store.enabled);
        assert_eq!(store.rules.len(), 1);

        project.delete_file_rule("public");
        assert!(project.modules.file_store.unwrap().rules.is_empty());
    }

    #[test]
    fn test_rule_operands_survive_json() {
        let json = r#"{"rule":"match","eval":"==","type":"string","f1":"args.auth.id","f2":["a",1]}"#;
        let parsed: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, "string");
        assert_eq!(parsed.f2, Some(serde_json::json!(["a", 1])));
    }
}
