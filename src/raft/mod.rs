//! Component I: the Raft consensus module (`spec.md` §4.I).
//!
//! Entirely new relative to the teacher (a single-node server has no
//! consensus layer); grounded directly on `spec.md` §4.I's role machine,
//! log-agreement algorithm and conflict-backoff hints, implemented the way
//! the rest of this crate structures a "shared state behind a mutex, driven
//! by a timer thread and message channels" subsystem (mirroring
//! `replication.rs` and `aof.rs`'s own shape) rather than the futures-based
//! approach `spec.md` §9 attributes to the unseen original.

pub mod log;
pub mod state_machine;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::bytes::RedisBytes;
use crate::config::RaftPeerConfig;
use crate::error::RaftError;
use crate::resp::{Decoder, Frame};
use crate::value::rand_range_ms;

use self::log::{LogEntry, RaftLog, TermState};
use self::state_machine::AppliedCursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Election timeout range (`spec.md` §4.I: "random 3000-6000 ms").
const ELECTION_TIMEOUT_MIN_MS: u64 = 3000;
const ELECTION_TIMEOUT_MAX_MS: u64 = 6000;
/// Leader heartbeat interval (`spec.md` §4.I: "500 ms").
const HEARTBEAT_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: u64,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

/// Conflict hints enabling the leader's fast back-off (`spec.md` §4.I step
/// 2: "xTerm ... xIndex ... xLen").
#[derive(Debug, Clone)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    pub x_term: i64,
    pub x_index: u64,
    pub x_len: u64,
}

struct LeaderState {
    next_index: HashMap<u64, u64>,
    match_index: HashMap<u64, u64>,
}

/// One Raft participant. `peers` is the fixed, known cluster membership
/// (`spec.md` §4.I: "a fixed known cluster of peers").
pub struct RaftNode {
    pub node_id: u64,
    pub peers: Vec<RaftPeerConfig>,
    term_state: Mutex<TermState>,
    log: Mutex<RaftLog>,
    role: Mutex<Role>,
    commit_index: AtomicU64,
    pub applied: AppliedCursor,
    leader_state: Mutex<Option<LeaderState>>,
    last_heartbeat_seen: Mutex<Instant>,
    election_timeout: Mutex<Duration>,
    commit_tx: Sender<(u64, Vec<u8>)>,
}

impl RaftNode {
    pub fn new(
        node_id: u64,
        peers: Vec<RaftPeerConfig>,
        log_path: &std::path::Path,
        commit_tx: Sender<(u64, Vec<u8>)>,
    ) -> Result<Self, RaftError> {
        let term_path = log_path.with_extension("term");
        Ok(Self {
            node_id,
            peers,
            term_state: Mutex::new(TermState::open(&term_path)?),
            log: Mutex::new(RaftLog::open(log_path)?),
            role: Mutex::new(Role::Follower),
            commit_index: AtomicU64::new(0),
            applied: AppliedCursor::default(),
            leader_state: Mutex::new(None),
            last_heartbeat_seen: Mutex::new(Instant::now()),
            election_timeout: Mutex::new(Duration::from_millis(rand_range_ms(
                ELECTION_TIMEOUT_MIN_MS,
                ELECTION_TIMEOUT_MAX_MS,
            ))),
            commit_tx,
        })
    }

    pub fn role(&self) -> Role {
        *self.role.lock()
    }

    pub fn current_term(&self) -> u64 {
        self.term_state.lock().current_term
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index.load(Ordering::SeqCst)
    }

    fn reset_election_timer(&self) {
        *self.last_heartbeat_seen.lock() = Instant::now();
        *self.election_timeout.lock() =
            Duration::from_millis(rand_range_ms(ELECTION_TIMEOUT_MIN_MS, ELECTION_TIMEOUT_MAX_MS));
    }

    /// "On observing a higher term in any RPC -> revert to FOLLOWER, set
    /// currentTerm, clear votedFor" (`spec.md` §4.I).
    fn step_down_if_stale(&self, other_term: u64) {
        let mut term_state = self.term_state.lock();
        if other_term > term_state.current_term {
            term_state.current_term = other_term;
            term_state.voted_for = None;
            let _ = term_state.persist();
            *self.role.lock() = Role::Follower;
            *self.leader_state.lock() = None;
        }
    }

    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        self.step_down_if_stale(args.term);
        let mut term_state = self.term_state.lock();
        if args.term < term_state.current_term {
            return RequestVoteReply { term: term_state.current_term, vote_granted: false };
        }
        let log = self.log.lock();
        let log_ok = args.last_log_term > log.last_term()
            || (args.last_log_term == log.last_term() && args.last_log_index >= log.last_index());
        let can_vote = term_state.voted_for.is_none() || term_state.voted_for == Some(args.candidate_id);
        let grant = log_ok && can_vote;
        if grant {
            term_state.voted_for = Some(args.candidate_id);
            let _ = term_state.persist();
            drop(log);
            self.reset_election_timer();
        }
        RequestVoteReply { term: term_state.current_term, vote_granted: grant }
    }

    pub fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        self.step_down_if_stale(args.term);
        let current_term = self.current_term();
        if args.term < current_term {
            let log = self.log.lock();
            return AppendEntriesReply { term: current_term, success: false, x_term: -1, x_index: 0, x_len: log.len() };
        }
        self.reset_election_timer();
        if *self.role.lock() == Role::Candidate {
            *self.role.lock() = Role::Follower;
        }

        let mut log = self.log.lock();
        if args.prev_log_index > 0 {
            let local_term = log.term_at(args.prev_log_index);
            if local_term != args.prev_log_term {
                let (x_term, x_index) = if local_term == 0 {
                    (-1, 0)
                } else {
                    let mut first = args.prev_log_index;
                    while first > 1 && log.term_at(first - 1) == local_term {
                        first -= 1;
                    }
                    (local_term as i64, first)
                };
                return AppendEntriesReply {
                    term: current_term,
                    success: false,
                    x_term,
                    x_index,
                    x_len: log.len(),
                };
            }
        }

        if let Err(e) = log.append_entries_replacing_conflicts(&args.entries) {
            warn!(error = %e, "rejecting append_entries: log mismatch");
            return AppendEntriesReply { term: current_term, success: false, x_term: -1, x_index: 0, x_len: log.len() };
        }

        let last_new_index = args.entries.last().map(|e| e.index).unwrap_or(args.prev_log_index);
        if args.leader_commit > self.commit_index() {
            let new_commit = args.leader_commit.min(last_new_index);
            self.advance_commit_and_apply(&log, new_commit);
        }
        AppendEntriesReply { term: current_term, success: true, x_term: -1, x_index: 0, x_len: log.len() }
    }

    fn advance_commit_and_apply(&self, log: &RaftLog, new_commit: u64) {
        let prev = self.commit_index.swap(new_commit, Ordering::SeqCst);
        for idx in (prev + 1)..=new_commit {
            if let Some(entry) = log.get(idx) {
                let _ = self.commit_tx.send((idx, entry.command.clone()));
            }
        }
    }

    /// `Start(command)` (`spec.md` §4.I "Client entry"): leader-only.
    pub fn start(&self, command: Vec<u8>) -> Result<(u64, u64), RaftError> {
        if self.role() != Role::Leader {
            return Err(RaftError::NotLeader);
        }
        let term = self.current_term();
        let mut log = self.log.lock();
        let index = log.append(term, command)?;
        if let Some(leader) = self.leader_state.lock().as_mut() {
            leader.match_index.insert(self.node_id, index);
        }
        Ok((index, term))
    }

    /// Election timeout firing in FOLLOWER/CANDIDATE (`spec.md` §4.I):
    /// become CANDIDATE, increment term, vote for self. Returns the
    /// `RequestVoteArgs` to broadcast; the caller (owning the transport)
    /// drives the actual RPCs and calls `complete_election` with the
    /// tally.
    pub fn begin_election(&self) -> RequestVoteArgs {
        let mut term_state = self.term_state.lock();
        term_state.current_term += 1;
        term_state.voted_for = Some(self.node_id);
        let _ = term_state.persist();
        *self.role.lock() = Role::Candidate;
        self.reset_election_timer();
        let log = self.log.lock();
        RequestVoteArgs {
            term: term_state.current_term,
            candidate_id: self.node_id,
            last_log_index: log.last_index(),
            last_log_term: log.last_term(),
        }
    }

    /// `votes_for_me` includes the candidate's own vote.
    pub fn complete_election(&self, election_term: u64, votes_for_me: usize, cluster_size: usize) {
        if self.current_term() != election_term || self.role() != Role::Candidate {
            return;
        }
        let majority = cluster_size / 2 + 1;
        if votes_for_me >= majority {
            info!(term = election_term, "won election, becoming leader");
            *self.role.lock() = Role::Leader;
            let log = self.log.lock();
            let next = log.last_index() + 1;
            let mut next_index = HashMap::new();
            let mut match_index = HashMap::new();
            for peer in &self.peers {
                next_index.insert(peer.id, next);
                match_index.insert(peer.id, 0);
            }
            match_index.insert(self.node_id, log.last_index());
            *self.leader_state.lock() = Some(LeaderState { next_index, match_index });
        }
    }

    /// Builds the `AppendEntries` payload for `peer`, empty (heartbeat) if
    /// `nextIndex[p] > lastLogIndex` (`spec.md` §4.I leader heartbeat rule).
    pub fn append_entries_for_peer(&self, peer_id: u64) -> Option<AppendEntriesArgs> {
        let leader_state = self.leader_state.lock();
        let leader_state = leader_state.as_ref()?;
        let next = *leader_state.next_index.get(&peer_id)?;
        let log = self.log.lock();
        let prev_log_index = next.saturating_sub(1);
        let prev_log_term = log.term_at(prev_log_index);
        let entries = if next <= log.last_index() {
            (next..=log.last_index()).filter_map(|i| log.get(i).cloned()).collect()
        } else {
            Vec::new()
        };
        Some(AppendEntriesArgs {
            term: self.current_term(),
            leader_id: self.node_id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index(),
        })
    }

    /// Applies the reply from `peer` to leader bookkeeping, per `spec.md`
    /// §4.I: "after a successful reply, update matchIndex[p]; set
    /// commitIndex to the highest index replicated on a majority and whose
    /// term equals currentTerm".
    pub fn handle_append_entries_reply(&self, peer_id: u64, sent_up_to: u64, reply: AppendEntriesReply) {
        self.step_down_if_stale(reply.term);
        if self.role() != Role::Leader {
            return;
        }
        let mut leader_state = self.leader_state.lock();
        let Some(leader_state) = leader_state.as_mut() else { return };
        if reply.success {
            leader_state.match_index.insert(peer_id, sent_up_to);
            leader_state.next_index.insert(peer_id, sent_up_to + 1);
        } else {
            // Fast back-off using the conflict hints (`spec.md` §4.I step 2).
            let log = self.log.lock();
            let retry_from = if reply.x_term >= 0 {
                let mut idx = log.last_index();
                while idx > 0 && log.term_at(idx) > reply.x_term as u64 {
                    idx -= 1;
                }
                if log.term_at(idx) == reply.x_term as u64 { idx + 1 } else { reply.x_index }
            } else {
                reply.x_len + 1
            };
            leader_state.next_index.insert(peer_id, retry_from.max(1));
            return;
        }
        drop(leader_state);
        self.recompute_commit_index();
    }

    fn recompute_commit_index(&self) {
        let leader_state = self.leader_state.lock();
        let Some(leader_state) = leader_state.as_ref() else { return };
        let log = self.log.lock();
        let current_term = self.current_term();
        let highest_match = leader_state.match_index.values().copied().max().unwrap_or(0);
        let majority = leader_state.match_index.len() / 2 + 1;
        for candidate in (self.commit_index() + 1..=highest_match).rev() {
            let replicated = leader_state.match_index.values().filter(|&&m| m >= candidate).count();
            if replicated >= majority && log.term_at(candidate) == current_term {
                self.advance_commit_and_apply(&log, candidate);
                break;
            }
        }
    }

    /// True when the election timer has expired; drives the timer thread
    /// in `server.rs`.
    pub fn election_timed_out(&self) -> bool {
        self.role() != Role::Leader && self.last_heartbeat_seen.lock().elapsed() > *self.election_timeout.lock()
    }
}

/// RESP-framed peer RPC wire encoding (SPEC_FULL §11: "Raft-internal
/// RequestVote/AppendEntries RPCs over RESP-encoded peer channel"), so
/// Raft traffic reuses the same codec as client traffic instead of a
/// bespoke binary protocol.
pub fn encode_request_vote(args: &RequestVoteArgs) -> Vec<u8> {
    let frame = Frame::Array(vec![
        Frame::bulk("RAFT_REQUEST_VOTE"),
        Frame::bulk(args.term.to_string()),
        Frame::bulk(args.candidate_id.to_string()),
        Frame::bulk(args.last_log_index.to_string()),
        Frame::bulk(args.last_log_term.to_string()),
    ]);
    frame.to_bytes()
}

/// Reply frames are encoded as bulk-string arrays too, like requests —
/// `Decoder` only understands the multibulk-of-bulk-strings shape client
/// commands use, so peer RPCs reuse that same shape rather than RESP's
/// full value grammar (`:`-integers, etc.).
pub fn encode_request_vote_reply(reply: &RequestVoteReply) -> Vec<u8> {
    let frame = Frame::Array(vec![
        Frame::bulk(reply.term.to_string()),
        Frame::bulk(if reply.vote_granted { "1" } else { "0" }),
    ]);
    frame.to_bytes()
}

pub fn decode_request_vote_reply(fields: &[RedisBytes]) -> Option<RequestVoteReply> {
    if fields.len() != 2 {
        return None;
    }
    Some(RequestVoteReply {
        term: parse_u64(&fields[0]),
        vote_granted: fields[1].as_bytes() == b"1",
    })
}

/// Entries are packed `index,term,command` triples after the five fixed
/// header fields, so an empty `entries` (a plain heartbeat) round-trips
/// through the exact same shape as a real append.
pub fn encode_append_entries(args: &AppendEntriesArgs) -> Vec<u8> {
    let mut fields = vec![
        Frame::bulk("RAFT_APPEND_ENTRIES"),
        Frame::bulk(args.term.to_string()),
        Frame::bulk(args.leader_id.to_string()),
        Frame::bulk(args.prev_log_index.to_string()),
        Frame::bulk(args.prev_log_term.to_string()),
        Frame::bulk(args.leader_commit.to_string()),
        Frame::bulk(args.entries.len().to_string()),
    ];
    for entry in &args.entries {
        fields.push(Frame::bulk(entry.index.to_string()));
        fields.push(Frame::bulk(entry.term.to_string()));
        fields.push(Frame::bulk(entry.command.clone()));
    }
    Frame::Array(fields).to_bytes()
}

pub fn encode_append_entries_reply(reply: &AppendEntriesReply) -> Vec<u8> {
    let frame = Frame::Array(vec![
        Frame::bulk(reply.term.to_string()),
        Frame::bulk(if reply.success { "1" } else { "0" }),
        Frame::bulk(reply.x_term.to_string()),
        Frame::bulk(reply.x_index.to_string()),
        Frame::bulk(reply.x_len.to_string()),
    ]);
    frame.to_bytes()
}

pub fn decode_append_entries_reply(fields: &[RedisBytes]) -> Option<AppendEntriesReply> {
    if fields.len() != 5 {
        return None;
    }
    Some(AppendEntriesReply {
        term: parse_u64(&fields[0]),
        success: fields[1].as_bytes() == b"1",
        x_term: fields[2].as_str().and_then(|s| s.parse().ok()).unwrap_or(-1),
        x_index: parse_u64(&fields[3]),
        x_len: parse_u64(&fields[4]),
    })
}

fn decode_append_entries_args(cmd: &[RedisBytes]) -> Option<AppendEntriesArgs> {
    if cmd.len() < 7 {
        return None;
    }
    let term = parse_u64(&cmd[1]);
    let leader_id = parse_u64(&cmd[2]);
    let prev_log_index = parse_u64(&cmd[3]);
    let prev_log_term = parse_u64(&cmd[4]);
    let leader_commit = parse_u64(&cmd[5]);
    let count: usize = cmd[6].as_str()?.parse().ok()?;
    let mut entries = Vec::with_capacity(count);
    let mut i = 7;
    for _ in 0..count {
        if i + 2 >= cmd.len() {
            return None;
        }
        entries.push(LogEntry {
            index: parse_u64(&cmd[i]),
            term: parse_u64(&cmd[i + 1]),
            command: cmd[i + 2].as_bytes().to_vec(),
        });
        i += 3;
    }
    Some(AppendEntriesArgs { term, leader_id, prev_log_index, prev_log_term, entries, leader_commit })
}

/// A minimal blocking client used by the Raft timer thread to contact one
/// peer for one RPC round-trip; connection-per-call keeps this simple at
/// the modest call volume a 500ms-heartbeat cluster produces.
pub fn send_rpc(host: &str, port: u16, payload: &[u8]) -> Result<Vec<RedisBytes>, RaftError> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.set_read_timeout(Some(Duration::from_millis(1500)))?;
    stream.write_all(payload)?;
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RaftError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed")));
        }
        decoder.feed(&buf[..n]);
        if let Ok(Some(cmd)) = decoder.next_command() {
            return Ok(cmd);
        }
    }
}

/// Listener side for incoming peer RPCs; `server.rs` spawns one thread
/// running this per Raft-enabled node.
pub fn serve_peer_rpcs(listener: TcpListener, node: std::sync::Arc<RaftNode>) {
    for incoming in listener.incoming() {
        let Ok(mut stream) = incoming else { continue };
        let node = node.clone();
        std::thread::spawn(move || {
            let mut decoder = Decoder::new();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => decoder.feed(&buf[..n]),
                }
                while let Ok(Some(cmd)) = decoder.next_command() {
                    if cmd.is_empty() {
                        continue;
                    }
                    let name = cmd[0].to_ascii_uppercase();
                    let reply = match name.as_slice() {
                        b"RAFT_REQUEST_VOTE" if cmd.len() == 5 => {
                            let args = RequestVoteArgs {
                                term: parse_u64(&cmd[1]),
                                candidate_id: parse_u64(&cmd[2]),
                                last_log_index: parse_u64(&cmd[3]),
                                last_log_term: parse_u64(&cmd[4]),
                            };
                            let reply = node.handle_request_vote(args);
                            encode_request_vote_reply(&reply)
                        }
                        b"RAFT_APPEND_ENTRIES" => match decode_append_entries_args(&cmd) {
                            Some(args) => encode_append_entries_reply(&node.handle_append_entries(args)),
                            None => Frame::Error("ERR malformed append_entries".to_string()).to_bytes(),
                        },
                        _ => Frame::Error("ERR unknown raft rpc".to_string()).to_bytes(),
                    };
                    if stream.write_all(&reply).is_err() {
                        return;
                    }
                }
            }
        });
    }
}

fn parse_u64(b: &RedisBytes) -> u64 {
    b.as_str().and_then(|s| s.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> RaftNode {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded();
        RaftNode::new(id, Vec::new(), &dir.into_path().join("raft.log"), tx).unwrap()
    }

    #[test]
    fn starts_as_follower() {
        let n = node(1);
        assert_eq!(n.role(), Role::Follower);
    }

    #[test]
    fn election_grants_vote_to_up_to_date_candidate() {
        let n = node(1);
        let reply = n.handle_request_vote(RequestVoteArgs {
            term: 1,
            candidate_id: 2,
            last_log_index: 0,
            last_log_term: 0,
        });
        assert!(reply.vote_granted);
    }

    #[test]
    fn non_leader_start_rejected() {
        let n = node(1);
        assert!(matches!(n.start(b"cmd".to_vec()), Err(RaftError::NotLeader)));
    }

    #[test]
    fn becoming_leader_requires_majority() {
        let n = node(1);
        let args = n.begin_election();
        n.complete_election(args.term, 1, 3);
        assert_eq!(n.role(), Role::Candidate); // 1 vote of 3 isn't a majority
        n.complete_election(args.term, 2, 3);
        assert_eq!(n.role(), Role::Leader);
    }
}
