//! gRPC services exposed to other cluster nodes.

mod cluster;

pub use cluster::ClusterServiceImpl;
