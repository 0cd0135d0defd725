//! gRPC transport between cluster nodes.
//!
//! Raft messages are JSON-encoded into `bytes` fields of the protobuf
//! messages in `proto/cluster.proto`.

mod client;
mod pool;
mod server;

pub use client::{NetworkClient, PeerConnection};
pub use pool::ChannelPool;
pub use server::RaftServer;
