use crate::codec::{self, Envelope};
use crate::error::RaftError;
use little_raft::{Cluster, Message, ReplicaID, BROADCAST_ID};
use std::net::UdpSocket;
use std::time::Duration;

/// `Cluster` over a real datagram socket. All traffic — peer and client —
/// flows through the simulator's address on localhost; inbound datagrams are
/// demultiplexed by the envelope `dst` field against this replica's own id
/// and the broadcast id.
pub struct UdpCluster {
    id: ReplicaID,
    peers: Vec<ReplicaID>,
    socket: UdpSocket,
    simulator: std::net::SocketAddr,
}

impl UdpCluster {
    pub fn bind(simulator_port: u16, id: ReplicaID, peers: Vec<ReplicaID>) -> Result<Self, RaftError> {
        let socket = UdpSocket::bind("127.0.0.1:0").map_err(RaftError::Bind)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .map_err(RaftError::Bind)?;
        let simulator = format!("127.0.0.1:{}", simulator_port)
            .parse()
            .expect("localhost address always parses");
        let cluster = UdpCluster {
            id,
            peers,
            socket,
            simulator,
        };
        cluster.send_datagram(&codec::hello(&cluster.id))?;
        Ok(cluster)
    }

    fn send_datagram(&self, envelope: &Envelope) -> Result<(), RaftError> {
        let json = serde_json::to_vec(envelope).map_err(RaftError::Decode)?;
        self.socket
            .send_to(&json, self.simulator)
            .map_err(RaftError::Send)?;
        Ok(())
    }

    /// Drains every datagram currently queued, up to the socket's 10 ms read
    /// timeout for the first read. Subsequent reads within the same poll use
    /// a non-blocking probe so a burst of datagrams is drained in one call
    /// without each one individually paying the ceiling.
    pub fn poll_with_errors(&mut self) -> Result<Vec<Message>, RaftError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _)) => {
                    let envelope: Envelope =
                        serde_json::from_slice(&buf[..n]).map_err(RaftError::Decode)?;
                    if envelope.dst == self.id || envelope.dst == BROADCAST_ID {
                        if let Some((_, message)) = codec::decode(envelope) {
                            out.push(message);
                        }
                    }
                    self.socket
                        .set_read_timeout(Some(Duration::from_millis(0)))
                        .map_err(RaftError::Recv)?;
                }
                Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                    break;
                }
                Err(e) => return Err(RaftError::Recv(e)),
            }
        }
        self.socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .map_err(RaftError::Recv)?;
        Ok(out)
    }
}

impl Cluster for UdpCluster {
    fn send(&mut self, dst: &ReplicaID, leader: Option<&ReplicaID>, message: Message) {
        let envelope = codec::encode(&message, &self.id, dst, leader);
        if let Err(e) = self.send_datagram(&envelope) {
            log::warn!("{} failed to send to {}: {}", self.id, dst, e);
        }
    }

    fn broadcast(&mut self, leader: Option<&ReplicaID>, message: Message) {
        for peer in self.peers.clone() {
            self.send(&peer, leader, message.clone());
        }
    }

    fn poll(&mut self) -> Vec<Message> {
        match self.poll_with_errors() {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("{} poll error: {}", self.id, e);
                Vec::new()
            }
        }
    }
}
