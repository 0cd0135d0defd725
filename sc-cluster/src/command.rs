//! Commands replicated through the consensus log.
//!
//! Every mutation of the cluster [`Config`] is expressed as a [`Command`],
//! appended to the Raft log and applied in log order on every node.

use sc_core::{Config, Project, StaticRoute};
use serde::{Deserialize, Serialize};

/// A configuration mutation carried by one log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Insert the project, or replace the one with the same ID.
    SetProject(Project),

    /// Remove a project. Absent projects are ignored.
    DeleteProject {
        /// Project to remove.
        id: String,
    },

    /// Replace the operator static routes.
    SetStaticRoutes(Vec<StaticRoute>),

    /// Upsert platform-registered routes by route ID.
    AddInternalRoutes(Vec<StaticRoute>),
}

/// Result of applying a command on the state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Log index the command was applied at.
    pub index: u64,
    /// Whether the command changed the document.
    pub changed: bool,
}

impl Command {
    /// Get a human-readable name for this command type.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetProject(_) => "SetProject",
            Command::DeleteProject { .. } => "DeleteProject",
            Command::SetStaticRoutes(_) => "SetStaticRoutes",
            Command::AddInternalRoutes(_) => "AddInternalRoutes",
        }
    }

    /// Project targeted by this command, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Command::SetProject(project) => Some(&project.id),
            Command::DeleteProject { id } => Some(id),
            _ => None,
        }
    }

    /// Apply the command to a config document.
    ///
    /// Returns `false` when the document was left untouched (deleting a
    /// project that does not exist).
    pub fn apply_to(self, config: &mut Config) -> bool {
        match self {
            Command::SetProject(project) => {
                config.upsert_project(project);
                true
            }
            Command::DeleteProject { id } => config.remove_project(&id),
            Command::SetStaticRoutes(routes) => {
                config.set_static_routes(routes);
                true
            }
            Command::AddInternalRoutes(routes) => {
                config.add_internal_routes(routes);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn project_strategy() -> impl Strategy<Value = Project> {
        ("p[0-4]", "[a-z]{0,6}").prop_map(|(id, name)| {
            let mut project = Project::new(id);
            project.name = name;
            project
        })
    }

    fn route_strategy() -> impl Strategy<Value = StaticRoute> {
        ("r[0-3]", "/[a-z]{1,4}").prop_map(|(id, prefix)| StaticRoute {
            id,
            url_prefix: prefix,
            ..Default::default()
        })
    }

    fn command_strategy() -> impl Strategy<Value = Command> {
        prop_oneof![
            project_strategy().prop_map(Command::SetProject),
            "p[0-4]".prop_map(|id| Command::DeleteProject { id }),
            prop::collection::vec(route_strategy(), 0..3).prop_map(Command::SetStaticRoutes),
            prop::collection::vec(route_strategy(), 0..3).prop_map(Command::AddInternalRoutes),
        ]
    }

    fn replay(commands: &[Command]) -> Config {
        let mut config = Config::default();
        for cmd in commands {
            cmd.clone().apply_to(&mut config);
        }
        config
    }

    proptest! {
        #[test]
        fn same_log_prefix_same_config(commands in prop::collection::vec(command_strategy(), 0..40)) {
            let a = replay(&commands);
            let b = replay(&commands);
            prop_assert_eq!(
                serde_json::to_vec(&a).unwrap(),
                serde_json::to_vec(&b).unwrap()
            );
        }

        #[test]
        fn project_ids_stay_unique(commands in prop::collection::vec(command_strategy(), 0..40)) {
            let config = replay(&commands);
            let mut ids: Vec<_> = config.projects.iter().map(|p| p.id.clone()).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
        }

        #[test]
        fn second_set_project_wins(first in project_strategy(), mut second in project_strategy()) {
            second.id = first.id.clone();
            let config = replay(&[
                Command::SetProject(first),
                Command::SetProject(second.clone()),
            ]);
            prop_assert_eq!(config.projects, vec![second]);
        }

        #[test]
        fn delete_of_absent_project_is_noop(commands in prop::collection::vec(command_strategy(), 0..20)) {
            let mut config = replay(&commands);
            config.remove_project("absent");
            let before = config.clone();

            let changed = Command::DeleteProject { id: "absent".to_string() }.apply_to(&mut config);
            prop_assert!(!changed);
            prop_assert_eq!(config, before);
        }
    }

    #[test]
    fn test_command_names() {
        let cmd = Command::DeleteProject {
            id: "p1".to_string(),
        };
        assert_eq!(cmd.name(), "DeleteProject");
        assert_eq!(cmd.project_id(), Some("p1"));
        assert_eq!(Command::SetStaticRoutes(Vec::new()).project_id(), None);
    }

    #[test]
    fn test_command_wire_format() {
        let cmd = Command::SetProject(Project::new("p1"));
        let bytes = serde_json::to_vec(&cmd).unwrap();
        let decoded: Command = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, cmd);
    }
}
