use std::net::SocketAddr;
use std::sync::Arc;

use bincode::{deserialize, serialize};
use tokio::net::UdpSocket;

use super::message::GossipMessage;
use crate::error::{ClusterError, ClusterResult};

const MAX_PACKET_SIZE: usize = 1_400;

/// Encode `message`, shedding piggybacked rumors and events until it fits
/// in one datagram.
fn encode_within_limit(message: &GossipMessage) -> ClusterResult<Vec<u8>> {
    let payload = serialize(message)?;
    if payload.len() <= MAX_PACKET_SIZE {
        return Ok(payload);
    }

    let mut trimmed = message.clone();
    while trimmed.shed_piggyback() {
        let shorter = serialize(&trimmed)?;
        if shorter.len() <= MAX_PACKET_SIZE {
            tracing::trace!(full = payload.len(), sent = shorter.len(), "Trimmed gossip piggyback");
            return Ok(shorter);
        }
    }
    Err(ClusterError::MessageTooLarge(payload.len()))
}

/// UDP transport for gossip traffic.
pub struct GossipTransport {
    socket: Arc<UdpSocket>,
}

impl GossipTransport {
    /// Bind a UDP socket for gossip.
    pub async fn bind(bind_addr: SocketAddr) -> ClusterResult<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> ClusterResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one message to `addr`.
    pub async fn send(&self, message: &GossipMessage, addr: SocketAddr) -> ClusterResult<()> {
        let payload = encode_within_limit(message)?;
        self.socket.send_to(&payload, addr).await?;
        Ok(())
    }

    /// Receive the next message.
    pub async fn recv(&self) -> ClusterResult<(GossipMessage, SocketAddr)> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (len, addr) = self.socket.recv_from(&mut buf).await?;
        let message = deserialize(&buf[..len])?;
        Ok((message, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::state::{MemberState, MembershipUpdate, UserEvent};
    use crate::node::ClusterNode;

    fn dns_node(idx: usize) -> ClusterNode {
        let id = format!("space-cloud-gateway-{idx}.space-cloud-gateway.space-cloud.svc.cluster.local:4235");
        ClusterNode::new(id.clone(), "10.0.0.1:4234".parse().unwrap(), id)
    }

    fn ping_with_members(count: usize) -> GossipMessage {
        GossipMessage::Ping {
            from: dns_node(0),
            incarnation: 3,
            rumors: (0..count)
                .map(|idx| MembershipUpdate {
                    node: dns_node(idx),
                    state: MemberState::Alive,
                    incarnation: 1,
                })
                .collect(),
            events: vec![UserEvent {
                name: "bootstrap-done".to_string(),
                payload: b"space-cloud-gateway-0".to_vec(),
                ltime: 1,
            }],
        }
    }

    #[test]
    fn long_member_ids_still_fit_one_datagram() {
        let message = ping_with_members(8);
        assert!(serialize(&message).unwrap().len() > MAX_PACKET_SIZE);

        let payload = encode_within_limit(&message).unwrap();
        assert!(payload.len() <= MAX_PACKET_SIZE);

        let GossipMessage::Ping { from, rumors, events, .. } = deserialize(&payload).unwrap() else {
            panic!("expected a ping");
        };
        assert_eq!(from, dns_node(0));
        assert!(!rumors.is_empty() && rumors.len() < 8);
        assert_eq!(rumors[0].node, dns_node(0));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn small_messages_are_sent_unchanged() {
        let message = ping_with_members(2);
        assert_eq!(encode_within_limit(&message).unwrap(), serialize(&message).unwrap());
    }

    #[test]
    fn oversized_query_is_rejected() {
        let message = GossipMessage::Query {
            id: 1,
            name: "bootstrap-status".to_string(),
            from: dns_node(0),
            payload: vec![0; MAX_PACKET_SIZE * 2],
        };
        assert!(matches!(
            encode_within_limit(&message),
            Err(ClusterError::MessageTooLarge(_))
        ));
    }
}
