/// ReplicaID is the opaque string identity a replica is known by to its
/// peers and to clients. `BROADCAST_ID` addresses every replica at once.
pub type ReplicaID = String;

pub const BROADCAST_ID: &str = "FFFF";

/// Entry describes one record in a replica's log. Entries are append-only
/// once committed; an uncommitted suffix may be truncated and replaced
/// during log reconciliation (see `Message::AppendEntries`).
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub term: u64,
    pub index: u64,
    pub key: String,
    pub value: String,
    /// Replica the client request arrived on; `Ok` is routed back there.
    pub client: ReplicaID,
    pub mid: String,
    /// Leader-only tally of replicas (including the leader itself) known to
    /// hold this entry. Initialized to 1 when the leader appends it.
    pub ack_count: u32,
}

/// Message describes every record that crosses the wire between replicas,
/// and between a replica and the clients it serves. A Cluster implementation
/// is responsible for addressing (src/dst/leader envelope fields) and wire
/// encoding; this type is the payload contract the replication engine
/// reasons about.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Candidate -> peers. Carries the candidate's term and its log's
    /// length so peers can apply the up-to-date predicate.
    RequestVote {
        from_id: ReplicaID,
        term: u64,
        last_log_index: i64,
        last_log_term: i64,
    },
    /// Peer -> candidate, in reply to RequestVote.
    Vote {
        from_id: ReplicaID,
        term: u64,
        should_vote: bool,
    },
    /// Leader -> follower. An empty `entries` with `prev_log_index == -1`
    /// is a pure heartbeat.
    AppendEntries {
        from_id: ReplicaID,
        term: u64,
        prev_log_index: i64,
        prev_log_term: i64,
        entries: Vec<Entry>,
        commit_index: i64,
    },
    /// Follower -> leader, in reply to AppendEntries. Echoes the indices
    /// the leader sent so it can attribute acknowledgements; on failure
    /// carries a term-aware back-off hint (`idx_diff`/`term_diff`).
    AppendResponse {
        from_id: ReplicaID,
        term: u64,
        success: bool,
        echoed_indices: Vec<u64>,
        idx_diff: i64,
        term_diff: i64,
    },
    /// Client -> replica.
    Get {
        from_id: ReplicaID,
        mid: String,
        key: String,
    },
    /// Client -> replica.
    Put {
        from_id: ReplicaID,
        mid: String,
        key: String,
        value: String,
    },
    /// Replica -> client: success, with a value for `get` responses.
    Ok { mid: String, value: Option<String> },
    /// Non-leader -> client: here is who to ask instead.
    Redirect {
        mid: String,
        leader: Option<ReplicaID>,
    },
    /// Replica -> client: the request could not be served.
    Fail { mid: String },
}
