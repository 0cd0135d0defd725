//! Shared cache of gRPC channels keyed by peer address.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tonic::transport::{Channel, Endpoint};

use crate::error::{ClusterError, ClusterResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Lazily connected channels to cluster peers.
#[derive(Debug, Default)]
pub struct ChannelPool {
    channels: RwLock<HashMap<String, Channel>>,
}

impl ChannelPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached channel to `addr` or connect a new one.
    pub async fn get(&self, addr: &str) -> ClusterResult<Channel> {
        if let Some(channel) = self.channels.read().get(addr) {
            return Ok(channel.clone());
        }

        let channel = Endpoint::from_shared(format!("http://{}", addr))
            .map_err(|e| ClusterError::Config(e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await?;
        self.channels
            .write()
            .insert(addr.to_string(), channel.clone());
        tracing::debug!(%addr, "Connected to peer");
        Ok(channel)
    }

    /// Forget the channel to `addr` so the next call reconnects.
    pub fn evict(&self, addr: &str) {
        self.channels.write().remove(addr);
    }
}
