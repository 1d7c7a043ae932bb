//! A small Raft replication engine: leader election, log replication, commit
//! advancement, and application of committed entries to an in-memory
//! key/value map. Transport is abstracted behind the `Cluster` trait so the
//! engine can be driven over a real socket or an in-process mock bus.

pub mod cluster;
pub mod kv;
pub mod message;
pub mod replica;
mod timer;

pub use cluster::Cluster;
pub use message::{Entry, Message, ReplicaID, BROADCAST_ID};
pub use replica::{Replica, Role};
