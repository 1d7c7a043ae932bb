use crate::cluster::Cluster;
use crate::kv::KvStore;
use crate::message::{Entry, Message, ReplicaID};
use crate::timer::{random_between, Deadline};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(200);
const ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(400);
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Replica runs the Raft replication engine described in spec.md: leader
/// election, log replication, commit advancement, and application of
/// committed entries to an in-memory key/value map. It is transport-
/// agnostic; `C: Cluster` supplies message delivery.
pub struct Replica<C: Cluster> {
    id: ReplicaID,
    peers: Vec<ReplicaID>,
    cluster: C,

    role: Role,
    current_term: u64,
    voted_for: Option<ReplicaID>,
    leader: Option<ReplicaID>,

    log: Vec<Entry>,
    commit_index: i64,
    last_applied: i64,
    kv: KvStore,

    /// Leader-only: next log slot each peer is believed to need.
    next_index: HashMap<ReplicaID, u64>,

    /// Candidate-only: who has granted a vote this election, and who we're
    /// still waiting to hear back from.
    votes: HashSet<ReplicaID>,
    not_replied: HashSet<ReplicaID>,

    election_deadline: Deadline,
    /// Fixed heartbeat pacing while Leader; repurposed to pace vote-request
    /// re-sends while Candidate (spec.md §4.2 step 2).
    heartbeat_deadline: Deadline,
}

impl<C: Cluster> Replica<C> {
    pub fn new(id: ReplicaID, peers: Vec<ReplicaID>, cluster: C) -> Replica<C> {
        Replica {
            id,
            peers,
            cluster,
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            leader: None,
            log: Vec::new(),
            commit_index: -1,
            last_applied: -1,
            kv: KvStore::new(),
            next_index: HashMap::new(),
            votes: HashSet::new(),
            not_replied: HashSet::new(),
            election_deadline: Deadline::new(random_between(ELECTION_TIMEOUT_MIN, ELECTION_TIMEOUT_MAX)),
            heartbeat_deadline: Deadline::new(HEARTBEAT_INTERVAL),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn current_leader(&self) -> Option<&ReplicaID> {
        self.leader.as_ref()
    }

    pub fn commit_index(&self) -> i64 {
        self.commit_index
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    fn total_replicas(&self) -> usize {
        self.peers.len() + 1
    }

    fn majority(&self) -> usize {
        self.total_replicas() / 2 + 1
    }

    fn last_log_term_index(&self) -> (i64, i64) {
        match self.log.last() {
            Some(e) => (e.term as i64, e.index as i64),
            None => (-1, -1),
        }
    }

    /// Dispatch one inbound message. Called by the event loop for every
    /// datagram decoded off the socket (spec.md §4.1).
    pub fn on_message(&mut self, msg: Message) {
        match msg {
            Message::RequestVote {
                from_id,
                term,
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(from_id, term, last_log_index, last_log_term),
            Message::Vote {
                from_id,
                term,
                should_vote,
            } => self.handle_vote(from_id, term, should_vote),
            Message::AppendEntries {
                from_id,
                term,
                prev_log_index,
                prev_log_term,
                entries,
                commit_index,
            } => self.handle_append_entries(
                from_id,
                term,
                prev_log_index,
                prev_log_term,
                entries,
                commit_index,
            ),
            Message::AppendResponse {
                from_id,
                term,
                success,
                echoed_indices,
                idx_diff,
                term_diff,
            } => self.handle_append_response(from_id, term, success, echoed_indices, idx_diff, term_diff),
            Message::Get { from_id, mid, key } => self.handle_get(from_id, mid, key),
            Message::Put {
                from_id,
                mid,
                key,
                value,
            } => self.handle_put(from_id, mid, key, value),
            // Client-bound replies never arrive at a replica.
            Message::Ok { .. } | Message::Redirect { .. } | Message::Fail { .. } => {}
        }
    }

    /// Fire deadline-driven work, then advance the state machine. Called
    /// once per event loop iteration after the inbound batch is drained
    /// (spec.md §4.1).
    pub fn tick(&mut self) {
        for msg in self.cluster.poll() {
            self.on_message(msg);
        }
        match self.role {
            Role::Leader => {
                if self.heartbeat_deadline.fired() {
                    self.send_append_entries_to_all();
                    self.heartbeat_deadline.renew(HEARTBEAT_INTERVAL);
                }
            }
            Role::Follower => {
                if self.election_deadline.fired() {
                    self.start_election();
                }
            }
            Role::Candidate => {
                if self.election_deadline.fired() {
                    self.start_election();
                } else if self.heartbeat_deadline.fired() {
                    self.resend_vote_requests();
                    self.heartbeat_deadline.renew(HEARTBEAT_INTERVAL);
                }
            }
        }
        self.apply_ready_entries();
    }

    fn start_election(&mut self) {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id.clone());
        self.votes = HashSet::new();
        self.votes.insert(self.id.clone());
        self.not_replied = self.peers.iter().cloned().collect();
        self.leader = None;
        self.election_deadline
            .renew(random_between(ELECTION_TIMEOUT_MIN, ELECTION_TIMEOUT_MAX));
        self.heartbeat_deadline.renew(HEARTBEAT_INTERVAL);

        let (last_log_term, last_log_index) = self.last_log_term_index();
        log::info!(
            "{} starting election for term {}",
            self.id, self.current_term
        );
        self.cluster.broadcast(
            None,
            Message::RequestVote {
                from_id: self.id.clone(),
                term: self.current_term,
                last_log_index,
                last_log_term,
            },
        );
    }

    fn resend_vote_requests(&mut self) {
        let (last_log_term, last_log_index) = self.last_log_term_index();
        for peer in self.not_replied.clone() {
            self.cluster.send(
                &peer,
                None,
                Message::RequestVote {
                    from_id: self.id.clone(),
                    term: self.current_term,
                    last_log_index,
                    last_log_term,
                },
            );
        }
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader = Some(self.id.clone());
        self.next_index = self
            .peers
            .iter()
            .map(|p| (p.clone(), self.log.len() as u64))
            .collect();
        log::info!("{} became leader for term {}", self.id, self.current_term);
        if self.heartbeat_deadline.fired() {
            self.send_append_entries_to_all();
            self.heartbeat_deadline.renew(HEARTBEAT_INTERVAL);
        }
    }

    fn send_append_entries_to_all(&mut self) {
        let leader = self.leader.clone();
        for peer in self.peers.clone() {
            let next = *self.next_index.get(&peer).unwrap_or(&(self.log.len() as u64));
            let (prev_log_index, prev_log_term, entries) = if next as usize == self.log.len() {
                (-1, -1, Vec::new())
            } else {
                let start = next as usize;
                let entries = self.log[start..].to_vec();
                let (prev_log_index, prev_log_term) = if start == 0 {
                    (-1, -1)
                } else {
                    (start as i64 - 1, self.log[start - 1].term as i64)
                };
                (prev_log_index, prev_log_term, entries)
            };
            self.cluster.send(
                &peer,
                leader.as_ref(),
                Message::AppendEntries {
                    from_id: self.id.clone(),
                    term: self.current_term,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    commit_index: self.commit_index,
                },
            );
        }
    }

    fn handle_request_vote(
        &mut self,
        from_id: ReplicaID,
        term: u64,
        last_log_index: i64,
        last_log_term: i64,
    ) {
        if term < self.current_term {
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::Vote {
                    from_id: self.id.clone(),
                    term: self.current_term,
                    should_vote: false,
                },
            );
            return;
        }

        if term == self.current_term {
            self.election_deadline
                .renew(random_between(ELECTION_TIMEOUT_MIN, ELECTION_TIMEOUT_MAX));
            let should_vote = self.voted_for == Some(from_id.clone());
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::Vote {
                    from_id: self.id.clone(),
                    term: self.current_term,
                    should_vote,
                },
            );
            return;
        }

        // term > self.current_term: adopt it.
        self.current_term = term;
        self.voted_for = None;
        if self.role != Role::Candidate {
            self.role = Role::Follower;
        }

        let (local_last_term, local_last_index) = self.last_log_term_index();
        let candidate_up_to_date = (last_log_term, last_log_index) >= (local_last_term, local_last_index);
        let should_vote = candidate_up_to_date;
        if should_vote {
            self.voted_for = Some(from_id.clone());
            self.election_deadline
                .renew(random_between(ELECTION_TIMEOUT_MIN, ELECTION_TIMEOUT_MAX));
        }
        self.cluster.send(
            &from_id,
            self.leader.clone().as_ref(),
            Message::Vote {
                from_id: self.id.clone(),
                term: self.current_term,
                should_vote,
            },
        );
    }

    fn handle_vote(&mut self, from_id: ReplicaID, term: u64, should_vote: bool) {
        if self.role != Role::Candidate || !self.not_replied.contains(&from_id) {
            return;
        }
        self.not_replied.remove(&from_id);

        if should_vote {
            self.votes.insert(from_id);
            if self.votes.len() >= self.majority() {
                self.become_leader();
            }
        } else if term > self.current_term {
            self.current_term = term;
        }
    }

    fn handle_append_entries(
        &mut self,
        from_id: ReplicaID,
        term: u64,
        prev_log_index: i64,
        prev_log_term: i64,
        entries: Vec<Entry>,
        leader_commit_index: i64,
    ) {
        if term < self.current_term {
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::AppendResponse {
                    from_id: self.id.clone(),
                    term: self.current_term,
                    success: false,
                    echoed_indices: Vec::new(),
                    idx_diff: -1,
                    term_diff: -1,
                },
            );
            return;
        }

        self.election_deadline
            .renew(random_between(ELECTION_TIMEOUT_MIN, ELECTION_TIMEOUT_MAX));
        self.current_term = term;
        self.leader = Some(from_id.clone());
        self.role = Role::Follower;

        // A pure heartbeat (no entries) never mutates the log. Design note
        // §9.4 requires the match check to still run when prev_log_index is
        // present, even on a heartbeat, but with nothing to append there is
        // nothing to truncate either way.
        let matches_at = |replica: &Self, prev_log_index: i64, prev_log_term: i64| -> (bool, i64, i64) {
            if prev_log_index == -1 {
                return (true, -1, -1);
            }
            let prev = prev_log_index as usize;
            if (replica.log.len() as i64) <= prev_log_index {
                let idx_diff = replica.log.len() as i64 - 1;
                let term_diff = replica.log.last().map(|e| e.term as i64).unwrap_or(-1);
                (false, idx_diff, term_diff)
            } else if replica.log[prev].term as i64 == prev_log_term {
                (true, -1, -1)
            } else {
                let hint = replica
                    .log
                    .iter()
                    .position(|e| e.term as i64 == prev_log_term)
                    .map(|i| i as i64)
                    .unwrap_or(-1);
                (false, hint, prev_log_term)
            }
        };

        let (success, idx_diff, term_diff) = if entries.is_empty() {
            matches_at(self, prev_log_index, prev_log_term)
        } else {
            let (matched, idx_diff, term_diff) = matches_at(self, prev_log_index, prev_log_term);
            if matched {
                self.log.truncate((prev_log_index + 1).max(0) as usize);
                self.log.extend(entries.iter().cloned());
                (true, -1, -1)
            } else {
                (false, idx_diff, term_diff)
            }
        };

        if success {
            if leader_commit_index > self.commit_index {
                self.commit_index = std::cmp::min(leader_commit_index, self.log.len() as i64 - 1);
            }
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::AppendResponse {
                    from_id: self.id.clone(),
                    term: self.current_term,
                    success: true,
                    echoed_indices: entries.iter().map(|e| e.index).collect(),
                    idx_diff: -1,
                    term_diff: -1,
                },
            );
        } else {
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::AppendResponse {
                    from_id: self.id.clone(),
                    term: self.current_term,
                    success: false,
                    echoed_indices: Vec::new(),
                    idx_diff,
                    term_diff,
                },
            );
        }
    }

    fn handle_append_response(
        &mut self,
        from_id: ReplicaID,
        term: u64,
        success: bool,
        echoed_indices: Vec<u64>,
        idx_diff: i64,
        term_diff: i64,
    ) {
        if self.role != Role::Leader {
            return;
        }
        if term > self.current_term {
            self.current_term = term;
            self.role = Role::Follower;
            self.voted_for = None;
            return;
        }

        if success {
            let majority = self.majority();
            let current_term = self.current_term;
            for idx in &echoed_indices {
                if let Some(entry) = self.log.get_mut(*idx as usize) {
                    entry.ack_count += 1;
                    if entry.term == current_term
                        && entry.ack_count as usize >= majority
                        && (*idx as i64) > self.commit_index
                    {
                        self.commit_index = *idx as i64;
                    }
                }
            }
            if let Some(&last) = echoed_indices.iter().max() {
                self.next_index.insert(from_id, last + 1);
            }
        } else if idx_diff >= 0 && term_diff >= 0 {
            let matches_hint = self
                .log
                .get(idx_diff as usize)
                .map(|e| e.term as i64 == term_diff)
                .unwrap_or(false);
            let next = if matches_hint {
                idx_diff as u64
            } else {
                self.log
                    .iter()
                    .rev()
                    .find(|e| e.term as i64 == term_diff - 1)
                    .map(|e| e.index)
                    .unwrap_or(0)
            };
            self.next_index.insert(from_id, next);
        }
    }

    fn handle_get(&mut self, from_id: ReplicaID, mid: String, key: String) {
        if self.role == Role::Leader {
            let value = self.kv.get(&key);
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::Ok {
                    mid,
                    value: Some(value),
                },
            );
        } else {
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::Redirect {
                    mid,
                    leader: self.leader.clone(),
                },
            );
        }
    }

    fn handle_put(&mut self, from_id: ReplicaID, mid: String, key: String, value: String) {
        if self.role == Role::Leader {
            let index = self.log.len() as u64;
            self.log.push(Entry {
                term: self.current_term,
                index,
                key,
                value,
                client: from_id,
                mid,
                ack_count: 1,
            });
        } else {
            self.cluster.send(
                &from_id,
                self.leader.clone().as_ref(),
                Message::Redirect {
                    mid,
                    leader: self.leader.clone(),
                },
            );
        }
    }

    fn apply_ready_entries(&mut self) {
        while self.last_applied < self.commit_index {
            let idx = (self.last_applied + 1) as usize;
            let entry = self.log[idx].clone();
            self.kv.apply(entry.key.clone(), entry.value.clone());
            if self.role == Role::Leader {
                self.cluster.send(
                    &entry.client,
                    self.leader.clone().as_ref(),
                    Message::Ok {
                        mid: entry.mid.clone(),
                        value: None,
                    },
                );
            }
            self.last_applied += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// A mock transport that shuttles messages through in-process queues
    /// keyed by destination id, per spec.md §9's note that "testing benefits
    /// from constructing multiple replicas in one process with a mock
    /// message bus".
    #[derive(Clone)]
    struct MockCluster {
        id: ReplicaID,
        peers: Vec<ReplicaID>,
        inboxes: Rc<RefCell<HashMap<ReplicaID, VecDeque<Message>>>>,
    }

    impl Cluster for MockCluster {
        fn send(&mut self, dst: &ReplicaID, _leader: Option<&ReplicaID>, message: Message) {
            self.inboxes
                .borrow_mut()
                .entry(dst.clone())
                .or_default()
                .push_back(message);
        }

        fn broadcast(&mut self, leader: Option<&ReplicaID>, message: Message) {
            for peer in self.peers.clone() {
                self.send(&peer, leader, message.clone());
            }
        }

        fn poll(&mut self) -> Vec<Message> {
            self.inboxes
                .borrow_mut()
                .entry(self.id.clone())
                .or_default()
                .drain(..)
                .collect()
        }
    }

    fn build_cluster(ids: &[&str]) -> (HashMap<ReplicaID, VecDeque<Message>>, Vec<ReplicaID>) {
        let ids: Vec<ReplicaID> = ids.iter().map(|s| s.to_string()).collect();
        (HashMap::new(), ids)
    }

    fn make_replicas(ids: &[&str]) -> Vec<Replica<MockCluster>> {
        let (inboxes, all_ids) = build_cluster(ids);
        let shared = Rc::new(RefCell::new(inboxes));
        all_ids
            .iter()
            .map(|id| {
                let peers = all_ids.iter().filter(|p| *p != id).cloned().collect();
                let cluster = MockCluster {
                    id: id.clone(),
                    peers,
                    inboxes: shared.clone(),
                };
                Replica::new(id.clone(), all_ids.iter().filter(|p| *p != id).cloned().collect(), cluster)
            })
            .collect()
    }

    fn drain_and_dispatch(replicas: &mut [Replica<MockCluster>]) {
        // Repeatedly poll every replica's inbox and dispatch until quiescent.
        for _ in 0..8 {
            let mut any = false;
            for r in replicas.iter_mut() {
                let msgs = r.cluster.poll();
                if !msgs.is_empty() {
                    any = true;
                }
                for m in msgs {
                    r.on_message(m);
                }
            }
            if !any {
                break;
            }
        }
    }

    #[test]
    fn election_elects_exactly_one_leader() {
        let mut replicas = make_replicas(&["A", "B", "C"]);
        replicas[0].start_election();
        drain_and_dispatch(&mut replicas);

        let leaders: Vec<_> = replicas.iter().filter(|r| r.role() == Role::Leader).collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].current_term(), 1);
    }

    #[test]
    fn vote_granted_at_most_once_per_term() {
        let mut replicas = make_replicas(&["A", "B", "C"]);
        // A and B both campaign in the same term.
        replicas[0].start_election();
        let term = replicas[0].current_term;
        replicas[1].current_term = term - 1;
        replicas[1].start_election();
        drain_and_dispatch(&mut replicas);

        // C, the non-candidate, must not have voted for both in one term.
        assert!(replicas[2].voted_for.is_some());
    }

    #[test]
    fn log_matching_truncates_divergent_suffix() {
        let mut replicas = make_replicas(&["A", "B"]);
        replicas[0].role = Role::Leader;
        replicas[0].current_term = 2;
        replicas[0].log = vec![
            Entry {
                term: 1,
                index: 0,
                key: "x".into(),
                value: "1".into(),
                client: "A".into(),
                mid: "m1".into(),
                ack_count: 1,
            },
            Entry {
                term: 2,
                index: 1,
                key: "x".into(),
                value: "correct".into(),
                client: "A".into(),
                mid: "m2".into(),
                ack_count: 1,
            },
        ];
        // B shares entry 0 but has a divergent, never-committed entry 1 from
        // a prior (abandoned) leader's term.
        replicas[1].log = vec![
            Entry {
                term: 1,
                index: 0,
                key: "x".into(),
                value: "1".into(),
                client: "A".into(),
                mid: "m1".into(),
                ack_count: 1,
            },
            Entry {
                term: 1,
                index: 1,
                key: "y".into(),
                value: "garbage".into(),
                client: "A".into(),
                mid: "m9".into(),
                ack_count: 1,
            },
        ];
        replicas[0].next_index.insert("B".into(), 1);
        replicas[0].send_append_entries_to_all();
        drain_and_dispatch(&mut replicas);

        assert_eq!(replicas[1].log.len(), 2);
        assert_eq!(replicas[1].log[1].term, 2);
        assert_eq!(replicas[1].log[1].value, "correct");
    }

    #[test]
    fn commit_index_only_advances_for_current_term_entries() {
        let mut r = make_replicas(&["A", "B", "C"]).remove(0);
        r.role = Role::Leader;
        r.current_term = 2;
        r.log = vec![Entry {
            term: 1, // stale term, should not advance commit_index even with quorum acks
            index: 0,
            key: "x".into(),
            value: "1".into(),
            client: "A".into(),
            mid: "m1".into(),
            ack_count: 1,
        }];
        r.handle_append_response("B".into(), 2, true, vec![0], -1, -1);
        assert_eq!(r.commit_index, -1);

        r.log[0].term = 2;
        r.handle_append_response("C".into(), 2, true, vec![0], -1, -1);
        assert_eq!(r.commit_index, 0);
    }

    #[test]
    fn apply_loop_applies_every_committed_entry() {
        let mut r = make_replicas(&["A", "B"]).remove(0);
        r.role = Role::Leader;
        r.current_term = 1;
        r.log = vec![
            Entry {
                term: 1,
                index: 0,
                key: "x".into(),
                value: "1".into(),
                client: "A".into(),
                mid: "m1".into(),
                ack_count: 2,
            },
            Entry {
                term: 1,
                index: 1,
                key: "x".into(),
                value: "2".into(),
                client: "A".into(),
                mid: "m2".into(),
                ack_count: 2,
            },
        ];
        r.commit_index = 1;
        r.apply_ready_entries();
        assert_eq!(r.last_applied, 1);
        assert_eq!(r.kv.get("x"), "2");
    }

    #[test]
    fn put_then_get_round_trips_through_leader() {
        let mut replicas = make_replicas(&["A", "B", "C"]);
        let inboxes = replicas[0].cluster.inboxes.clone();
        replicas[0].role = Role::Leader;
        replicas[0].current_term = 1;
        replicas[0].next_index = replicas[0]
            .peers
            .iter()
            .map(|p| (p.clone(), 0))
            .collect();

        replicas[0].handle_put("client".into(), "m1".into(), "x".into(), "1".into());
        replicas[0].send_append_entries_to_all();
        drain_and_dispatch(&mut replicas);
        replicas[0].tick();

        assert_eq!(replicas[0].commit_index, 0);
        assert_eq!(replicas[0].kv.get("x"), "1");
        let put_ack = inboxes.borrow_mut().entry("client".into()).or_default().pop_front();
        assert!(matches!(put_ack, Some(Message::Ok { mid, value: None }) if mid == "m1"));

        replicas[0].handle_get("client".into(), "m2".into(), "x".into());
        let get_reply = inboxes.borrow_mut().entry("client".into()).or_default().pop_front();
        match get_reply {
            Some(Message::Ok { mid, value: Some(v) }) => {
                assert_eq!(mid, "m2");
                assert_eq!(v, "1");
            }
            other => panic!("expected ok{{value}} reply, got {:?}", other),
        }
    }
}
