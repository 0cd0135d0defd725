//! Cluster coordination for space-cloud.
//!
//! Every node keeps a full replica of the cluster [`sc_core::Config`].
//! Changes are replicated through a Raft log via OpenRaft; which nodes exist
//! is tracked with SWIM gossip, and the voter set follows gossip membership.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        ClusterManager                         │
//! │        set_project / delete_project / ... / get_config        │
//! └──────────────┬───────────────────────────────────┬────────────┘
//!                │ Command                           │ reads
//!        ┌───────▼────────┐   committed entries  ┌───▼──────────┐
//!        │  ConsensusLog  ├─────────────────────►│  ConfigFsm   │
//!        │ (Raft + gRPC)  │                      │ mirror file  │
//!        └───────▲────────┘                      │ snapshots    │
//!                │ add / remove voter            │ on_change    │
//!        ┌───────┴─────────────┐                 └──────────────┘
//!        │ ReconciliationLoop  │
//!        └───────▲─────────────┘
//!                │ member joined / failed / left
//!        ┌───────┴─────────────┐      ┌──────────────┐
//!        │ MembershipService   ├─────►│ TokenAssigner│
//!        │ (SWIM over UDP)     │      └──────────────┘
//!        └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sc_cluster::{ClusterConfig, ClusterManager};
//! use sc_core::Project;
//! use std::sync::Arc;
//!
//! let config = ClusterConfig::builder()
//!     .gossip_addr("10.0.0.1:4234")
//!     .raft_addr("10.0.0.1:4235")
//!     .seed("10.0.0.2:4234")
//!     .data_dir("/var/lib/space-cloud")
//!     .build()?;
//!
//! let manager = ClusterManager::start(config, Arc::new(|config| {
//!     println!("{} projects", config.projects.len());
//! })).await?;
//!
//! // Routed to the leader, returns once applied on this node
//! manager.set_project(Project::new("todo-app")).await?;
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod manager;
pub mod membership;
pub mod network;
pub mod node;
pub mod raft;
pub mod reconcile;
pub mod service;
pub mod state;
pub mod tokens;
pub mod types;

// Re-export main types
pub use backend::{BackendFuture, ConfigBackend, MemoryBackend, RaftBackend};
pub use command::{Command, CommandResponse};
pub use config::ClusterConfig;
pub use error::{ClusterError, ClusterResult};
pub use manager::ClusterManager;
pub use membership::{MemberState, MembershipService};
pub use node::ClusterNode;
pub use raft::{BootstrapOutcome, ConsensusLog};
pub use reconcile::{ReconcileReport, ReconciliationLoop, reconcile_once};
pub use state::{ChangeCallback, ConfigFsm};
pub use tokens::{TokenRange, assign_tokens, token_layout};
pub use types::{RaftNodeId, TypeConfig};

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("spacecloud.cluster");
}
