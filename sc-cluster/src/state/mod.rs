//! Replicated config state.
//!
//! [`ConfigFsm`] receives committed log entries and applies them to the
//! cluster [`sc_core::Config`]. All nodes apply the same commands in the same
//! order, so every replica that applied the same log prefix holds the same
//! document. Snapshots of the document live in a [`SnapshotStore`].

mod fsm;
mod raft_impl;
mod snapshot_store;

pub use fsm::{ChangeCallback, ConfigFsm};
pub use snapshot_store::{SnapshotStore, StoredSnapshot};
