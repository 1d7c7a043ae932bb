use thiserror::Error;

/// The small enumerable error surface of the message loop: socket setup,
/// transport I/O, and malformed datagrams. Engine-internal invariants
/// (log indexing, role transitions) are not represented here — a violation
/// of those is a programming bug, not a recoverable condition (spec.md §7
/// "nothing is fatal" describes protocol-level conditions, not corruption).
#[derive(Error, Debug)]
pub enum RaftError {
    #[error("failed to bind replica socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to send datagram: {0}")]
    Send(#[source] std::io::Error),

    #[error("failed to receive datagram: {0}")]
    Recv(#[source] std::io::Error),

    #[error("malformed datagram from simulator: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("invalid command line arguments: {0}")]
    Args(String),
}
