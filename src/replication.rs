//! Component H: master-slave replication.
//!
//! The teacher repo has no replication code at all (it's a single-node
//! clone); this module is grounded on `spec.md` §4.H directly, shaped the
//! way the teacher structures its other "pipeline with a background worker
//! and a shared, lock-protected state struct" subsystems (`aof.rs`,
//! `rdb.rs`'s background-save path) — a central `ReplicationState` guarded
//! by `parking_lot`, with per-follower outbound queues instead of direct
//! socket writes so a slow follower never blocks command processing
//! (`spec.md` §4.H: "fire-and-forget; per-follower back-pressure queue").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rand::RngCore;
use tracing::{info, warn};

use crate::bytes::RedisBytes;
use crate::error::ReplicationError;
use crate::resp::encode_command;

/// How many bytes of propagated commands the backlog ring retains for
/// partial resync (`spec.md` §4.H: "a small backlog window").
const BACKLOG_CAPACITY: usize = 1 << 20;

/// Seconds of missed heartbeats before the primary prunes a follower
/// (`spec.md` §4.H: "absence of heartbeats for T seconds").
const FOLLOWER_TIMEOUT_SECS: u64 = 10;

fn random_replid() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A bounded ring of recently-propagated bytes, indexed by the primary's
/// monotonic offset at the start of the buffer.
struct Backlog {
    data: Vec<u8>,
    /// Offset corresponding to `data[0]`.
    start_offset: u64,
}

impl Backlog {
    fn new() -> Self {
        Self { data: Vec::new(), start_offset: 0 }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > BACKLOG_CAPACITY {
            let overflow = self.data.len() - BACKLOG_CAPACITY;
            self.data.drain(..overflow);
            self.start_offset += overflow as u64;
        }
    }

    fn end_offset(&self) -> u64 {
        self.start_offset + self.data.len() as u64
    }

    /// Returns the tail of the backlog starting at `offset`, or `None` if
    /// `offset` has already fallen out of the window.
    fn slice_from(&self, offset: u64) -> Option<&[u8]> {
        if offset < self.start_offset || offset > self.end_offset() {
            return None;
        }
        Some(&self.data[(offset - self.start_offset) as usize..])
    }
}

struct FollowerHandle {
    tx: Sender<Vec<u8>>,
    last_ack_at: Instant,
    acked_offset: u64,
}

/// What a `PSYNC` request resolves to (`spec.md` §4.H handshake table).
pub enum PsyncDecision {
    Full { replid: String, offset: u64 },
    Partial { backlog_tail: Vec<u8> },
}

/// Shared replication state on the primary side. One instance lives on the
/// `Server` (`spec.md` §3: "replication identifier ... and a monotonically
/// increasing replication offset").
pub struct ReplicationState {
    replid: Mutex<String>,
    offset: AtomicU64,
    backlog: Mutex<Backlog>,
    followers: Mutex<HashMap<u64, FollowerHandle>>,
    next_follower_id: AtomicU64,
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationState {
    pub fn new() -> Self {
        Self {
            replid: Mutex::new(random_replid()),
            offset: AtomicU64::new(0),
            backlog: Mutex::new(Backlog::new()),
            followers: Mutex::new(HashMap::new()),
            next_follower_id: AtomicU64::new(1),
        }
    }

    pub fn replid(&self) -> String {
        self.replid.lock().clone()
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    /// Resolves a `PSYNC <replid> <offset>` request per the handshake table
    /// in `spec.md` §4.H. Does not itself produce the snapshot bytes — the
    /// caller streams those via `rdb::snapshot_bytes_for_replication` before
    /// switching the connection to live-tail mode.
    pub fn decide_psync(&self, requested_replid: &str, requested_offset: i64) -> PsyncDecision {
        let my_replid = self.replid();
        if requested_replid == "?" || requested_offset < 0 || requested_replid != my_replid {
            return PsyncDecision::Full {
                replid: my_replid,
                offset: self.offset(),
            };
        }
        let backlog = self.backlog.lock();
        match backlog.slice_from(requested_offset as u64) {
            Some(tail) => PsyncDecision::Partial { backlog_tail: tail.to_vec() },
            None => PsyncDecision::Full {
                replid: my_replid,
                offset: self.offset(),
            },
        }
    }

    /// Registers a newly synced follower's outbound channel, returning its
    /// id (used to prune it later) and the receiving half for the
    /// connection's writer loop.
    pub fn register_follower(&self) -> (u64, Receiver<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = self.next_follower_id.fetch_add(1, Ordering::SeqCst);
        self.followers.lock().insert(
            id,
            FollowerHandle {
                tx,
                last_ack_at: Instant::now(),
                acked_offset: self.offset(),
            },
        );
        (id, rx)
    }

    pub fn unregister_follower(&self, id: u64) {
        self.followers.lock().remove(&id);
    }

    /// `REPLCONF ACK <offset>` from a follower.
    pub fn record_ack(&self, id: u64, offset: u64) {
        if let Some(f) = self.followers.lock().get_mut(&id) {
            f.last_ack_at = Instant::now();
            f.acked_offset = offset;
        }
    }

    /// Drops followers that haven't acked in `FOLLOWER_TIMEOUT_SECS`
    /// (`spec.md` §4.H: "prunes the follower"). Their unacknowledged tail
    /// stays in the backlog for a future partial resync.
    pub fn prune_stale_followers(&self) {
        let mut followers = self.followers.lock();
        followers.retain(|id, f| {
            let alive = f.last_ack_at.elapsed() < Duration::from_secs(FOLLOWER_TIMEOUT_SECS);
            if !alive {
                warn!(follower = id, "pruning replication follower: heartbeat timeout");
            }
            alive
        });
    }

    /// Propagates one write command to every connected follower and the
    /// backlog, advancing the primary's offset (`spec.md` §4.H "Live tail",
    /// steps 1-4).
    pub fn propagate(&self, args: &[RedisBytes]) {
        let bytes = encode_command(args);
        self.offset.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        self.backlog.lock().push(&bytes);
        let followers = self.followers.lock();
        for handle in followers.values() {
            let _ = handle.tx.send(bytes.clone());
        }
    }

    pub fn follower_count(&self) -> usize {
        self.followers.lock().len()
    }
}

/// Follower-side state: tracks this node's own applied offset while
/// catching up from a primary (`spec.md` §4.H "Follower apply": "maintains
/// its own offset advancing by command encoded length").
pub struct FollowerState {
    pub master_replid: Mutex<String>,
    pub offset: AtomicU64,
}

impl FollowerState {
    pub fn new() -> Self {
        Self {
            master_replid: Mutex::new("?".to_string()),
            offset: AtomicU64::new(0),
        }
    }

    /// Called once the snapshot has been applied: "the follower sets its
    /// offset to the primary's offset at snapshot time; snapshot bytes
    /// themselves do not count" (`spec.md` §4.H "Post-snapshot offset").
    pub fn adopt_post_snapshot(&self, replid: String, offset: u64) {
        *self.master_replid.lock() = replid;
        self.offset.store(offset, Ordering::SeqCst);
    }

    pub fn advance(&self, by_bytes: u64) -> u64 {
        self.offset.fetch_add(by_bytes, Ordering::SeqCst)
    }
}

impl Default for FollowerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates a raw `PSYNC` request line's offset argument ("?" or -1 means
/// "no prior state", per `spec.md` §4.H).
pub fn parse_psync_offset(raw: &str) -> Result<i64, ReplicationError> {
    if raw == "?" {
        return Ok(-1);
    }
    raw.parse()
        .map_err(|_| ReplicationError::BadHandshake(format!("bad PSYNC offset '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_windows_and_evicts() {
        let mut b = Backlog::new();
        b.push(b"hello");
        assert_eq!(b.slice_from(0).unwrap(), b"hello");
        assert_eq!(b.slice_from(2).unwrap(), b"llo");
        assert!(b.slice_from(100).is_none());
    }

    #[test]
    fn unknown_replid_forces_full_sync() {
        let state = ReplicationState::new();
        match state.decide_psync("?", -1) {
            PsyncDecision::Full { .. } => {}
            PsyncDecision::Partial { .. } => panic!("expected full sync"),
        }
    }

    #[test]
    fn matching_replid_within_window_is_partial() {
        let state = ReplicationState::new();
        let args = [RedisBytes::from("SET"), RedisBytes::from("k"), RedisBytes::from("v")];
        state.propagate(&args);
        let replid = state.replid();
        match state.decide_psync(&replid, 0) {
            PsyncDecision::Partial { backlog_tail } => assert!(!backlog_tail.is_empty()),
            PsyncDecision::Full { .. } => panic!("expected partial sync"),
        }
    }

    #[test]
    fn follower_registration_and_ack() {
        let state = ReplicationState::new();
        let (id, _rx) = state.register_follower();
        state.record_ack(id, 42);
        assert_eq!(state.followers.lock().get(&id).unwrap().acked_offset, 42);
    }
}
