use crate::message::{Message, ReplicaID};

/// Cluster abstracts the replica away from how messages actually reach its
/// peers and clients. A production implementation sends over a socket; a
/// test implementation can shuttle messages through an in-process queue, as
/// the engine is oblivious to the difference.
///
/// `leader` is the sending replica's current best-known leader (spec.md §6's
/// universal envelope field of that name); the engine is the only party that
/// knows it, so it is passed down rather than inferred by the transport.
pub trait Cluster {
    /// Send `message` to a single destination.
    fn send(&mut self, dst: &ReplicaID, leader: Option<&ReplicaID>, message: Message);

    /// Send `message` to every peer.
    fn broadcast(&mut self, leader: Option<&ReplicaID>, message: Message);

    /// Drain every message currently available without blocking.
    fn poll(&mut self) -> Vec<Message>;
}
