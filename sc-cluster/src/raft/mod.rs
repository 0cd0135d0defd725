//! Raft integration.
//!
//! - [`LogStore`]: segmented on-disk log (`RaftLogStorage`)
//! - [`ConsensusLog`]: the Raft instance, its RPC server, propose and
//!   voter management
//! - [`bootstrap_cluster`]: first-start protocol over gossip

mod bootstrap;
mod log;
mod log_store;

pub use bootstrap::{
    BOOTSTRAP_DONE_EVENT, BOOTSTRAP_STATUS_QUERY, BootstrapOutcome, bootstrap_cluster,
    register_status_handler,
};
pub use log::ConsensusLog;
pub use log_store::{LogStore, SEGMENT_MAX_ENTRIES};
