//! The `Server` context: replaces the teacher's global `SERVER`/`server_read`/
//! `server_write` statics (`examples/yijun-tang-rudis/src/server.rs`) with an
//! explicit struct threaded through every subsystem (`spec.md` §9 "Global
//! state ... become fields on a single Server context passed explicitly").
//!
//! Owns the keyspace, the live config, and the optional AOF/replication/Raft
//! subsystems, and is the single `AdminOps` implementation `command::Ctx`
//! reaches through. Background concurrency is plain OS threads plus
//! `crossbeam-channel`, per `spec.md` §9's "task-based concurrency" directive
//! — the teacher's own model is a `fork()`'d child process per background
//! job, which has no equivalent once this is a portable library.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::aof::AofState;
use crate::bytes::RedisBytes;
use crate::client::Client;
use crate::command::{self, AdminOps, PsyncReply};
use crate::config::Config;
use crate::db::Keyspace;
use crate::error::CommandError;
use crate::raft::state_machine::run_apply_loop;
use crate::raft::RaftNode;
use crate::replication::{FollowerState, PsyncDecision, ReplicationState};
use crate::resp::{encode_command, Decoder, Frame};
use crate::util::now_ms;

/// How long a client blocks waiting for its write to clear `lastApplied`
/// before giving up (`spec.md` §4.I "Client entry" doesn't bound this; a
/// server can't block a connection thread forever on a stalled cluster).
const RAFT_APPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Server {
    pub config: RwLock<Config>,
    pub keyspace: Keyspace,
    pub aof: Option<Arc<AofState>>,
    pub replication: Arc<ReplicationState>,
    pub follower: Option<Arc<FollowerState>>,
    pub raft: Option<Arc<RaftNode>>,
    /// Indexed by the Raft log index a leader-side write is waiting on;
    /// resolved by the apply loop once that entry is actually applied
    /// (`spec.md` §4.I: "Success ... signalled when lastApplied >=
    /// assignedIndex").
    pending_replies: Mutex<HashMap<u64, Sender<Frame>>>,
    /// Handed off once, from `AdminOps::psync` to the connection thread that
    /// is about to start forwarding this follower's live tail.
    follower_receivers: Mutex<HashMap<u64, Receiver<Vec<u8>>>>,
    last_save_ms: AtomicI64,
    shutting_down: AtomicBool,
    stop_senders: Mutex<Vec<Sender<()>>>,
    start_ms: i64,
}

impl Server {
    /// Builds a `Server` from `config`, replaying whatever persisted state
    /// exists and starting every background thread the enabled subsystems
    /// need. Raft/replication are left entirely off when the config doesn't
    /// enable them, so a bare single-node run pays for neither.
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let keyspace = Keyspace::new(config.databases);

        let aof = if config.appendonly {
            Some(Arc::new(AofState::open(
                &config.appendfilename,
                config.appendfsync,
                config.smart_fsync_interval_ms,
                config.smart_fsync_batch_bytes,
            )?))
        } else {
            None
        };

        let raft = if config.raft.enabled {
            let (commit_tx, commit_rx) = crossbeam_channel::unbounded();
            let node = Arc::new(RaftNode::new(
                config.raft.node_id,
                config.raft.peers.clone(),
                &config.raft.log_path,
                commit_tx,
            )?);
            Some((node, commit_rx))
        } else {
            None
        };

        let follower = config.replicaof.as_ref().map(|_| Arc::new(FollowerState::default()));
        let replicaof = config.replicaof.clone();

        let server = Arc::new(Self {
            config: RwLock::new(config),
            keyspace,
            aof,
            replication: Arc::new(ReplicationState::new()),
            follower,
            raft: raft.as_ref().map(|(n, _)| n.clone()),
            pending_replies: Mutex::new(HashMap::new()),
            follower_receivers: Mutex::new(HashMap::new()),
            last_save_ms: AtomicI64::new(0),
            shutting_down: AtomicBool::new(false),
            stop_senders: Mutex::new(Vec::new()),
            start_ms: now_ms(),
        });

        server.load_startup_state()?;

        if let Some(aof) = &server.aof {
            let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
            server.stop_senders.lock().push(stop_tx);
            let aof = aof.clone();
            std::thread::spawn(move || AofState::run_sync_loop(aof, stop_rx));
        }

        if let Some((node, commit_rx)) = raft {
            server.clone().spawn_raft_threads(node, commit_rx);
        }

        {
            let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
            server.stop_senders.lock().push(stop_tx);
            let replication = server.replication.clone();
            std::thread::spawn(move || loop {
                let timeout = crossbeam_channel::after(Duration::from_secs(1));
                crossbeam_channel::select! {
                    recv(timeout) -> _ => {}
                    recv(stop_rx) -> _ => return,
                }
                replication.prune_stale_followers();
            });
        }

        if let Some(peer) = replicaof {
            let server = server.clone();
            std::thread::spawn(move || server.run_as_follower(peer.host, peer.port));
        }

        Ok(server)
    }

    /// `spec.md` §4.F/§4.G "Load": the AOF (if enabled) is authoritative
    /// over the RDB snapshot, matching the teacher's own startup order
    /// (`main.rs`: append-only file wins when both are present).
    fn load_startup_state(&self) -> anyhow::Result<()> {
        let config = self.config.read().clone();
        if config.appendonly {
            let mut client = Client::new("127.0.0.1:0".parse().unwrap());
            crate::aof::load(&config.appendfilename, |cmd| {
                if cmd.is_empty() {
                    return;
                }
                if let Some(spec) = command::lookup(&cmd[0]) {
                    let mut ctx = command::Ctx {
                        keyspace: &self.keyspace,
                        config: &config,
                        client: &mut client,
                        args: &cmd,
                        now_ms: now_ms(),
                        admin: None,
                    };
                    let _ = command::run(spec, &mut ctx);
                }
            })?;
            info!("loaded state from append-only file");
        } else if config.snapshot_path.exists() {
            let dbs: Vec<&crate::db::HashDb> = (0..self.keyspace.len()).map(|i| self.keyspace.db(i)).collect();
            crate::rdb::load(&config.snapshot_path, &dbs)?;
            info!("loaded state from snapshot");
        }
        Ok(())
    }

    fn spawn_raft_threads(self: Arc<Self>, node: Arc<RaftNode>, commit_rx: Receiver<(u64, Vec<u8>)>) {
        // Apply loop: turns committed log entries into actual keyspace
        // mutations and wakes up whichever client is blocked on that index.
        {
            let server = self.clone();
            let node_for_apply = node.clone();
            let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
            self.stop_senders.lock().push(stop_tx);
            std::thread::spawn(move || {
                let mut client = Client::new("127.0.0.1:0".parse().unwrap());
                run_apply_loop(&node_for_apply.applied, &commit_rx, &stop_rx, |index, cmd| {
                    if cmd.is_empty() {
                        return;
                    }
                    let frame = match command::lookup(&cmd[0]) {
                        Some(spec) => server
                            .execute_local(&mut client, spec, &cmd, now_ms())
                            .unwrap_or_else(Frame::from_error),
                        None => Frame::from_error(CommandError::UnknownCommand(
                            String::from_utf8_lossy(cmd[0].as_bytes()).to_string(),
                        )),
                    };
                    if let Some(tx) = server.pending_replies.lock().remove(&index) {
                        let _ = tx.send(frame);
                    }
                });
            });
        }

        // Election/heartbeat timer, driving RequestVote/AppendEntries RPCs
        // over the blocking peer transport in `raft::mod`.
        {
            let node = node.clone();
            let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
            self.stop_senders.lock().push(stop_tx);
            std::thread::spawn(move || raft_timer_loop(node, stop_rx));
        }

        // Listener for incoming peer RPCs, bound on this node's own entry
        // in `raft.peers`.
        let config = self.config.read();
        if let Some(me) = config.raft.peers.iter().find(|p| p.id == config.raft.node_id) {
            match std::net::TcpListener::bind((me.host.as_str(), me.port)) {
                Ok(listener) => {
                    let node = node.clone();
                    std::thread::spawn(move || crate::raft::serve_peer_rpcs(listener, node));
                }
                Err(e) => warn!(host = %me.host, port = me.port, error = %e, "failed to bind raft peer listener"),
            }
        }
    }

    /// Dispatches one already-decoded client command: lookup, arity check,
    /// execute, and — for write commands — propagate (`spec.md` §4.E step
    /// 4: AOL append, replication fan-out, Raft log append before reply).
    pub fn dispatch(&self, client: &mut Client, args: &[RedisBytes], now_ms: i64) -> Frame {
        let Some(spec) = command::lookup(&args[0]) else {
            return Frame::from_error(CommandError::UnknownCommand(
                String::from_utf8_lossy(args[0].as_bytes()).to_string(),
            ));
        };
        if !command::check_arity(spec, args.len()) {
            return Frame::from_error(CommandError::WrongArity(spec.name.to_string()));
        }

        if spec.is_write {
            if let Some(raft) = &self.raft {
                return self.dispatch_via_raft(raft, args);
            }
        }

        match self.execute_local(client, spec, args, now_ms) {
            Ok(frame) => {
                if spec.is_write {
                    self.propagate(client.db_index, args);
                }
                frame
            }
            Err(e) => Frame::from_error(e),
        }
    }

    /// Runs a resolved command's handler directly against the keyspace, with
    /// no propagation side effect. Used both by the ordinary client path
    /// (which propagates afterward itself) and by AOF replay / the Raft
    /// apply loop / the replica-stream loop (which must never re-propagate
    /// what they're replaying).
    fn execute_local(
        &self,
        client: &mut Client,
        spec: &command::CommandSpec,
        args: &[RedisBytes],
        now_ms: i64,
    ) -> Result<Frame, CommandError> {
        let config_snapshot = self.config.read().clone();
        let mut ctx = command::Ctx {
            keyspace: &self.keyspace,
            config: &config_snapshot,
            client,
            args,
            now_ms,
            admin: Some(self as &dyn AdminOps),
        };
        command::run(spec, &mut ctx)
    }

    fn propagate(&self, db_index: usize, args: &[RedisBytes]) {
        if let Some(aof) = &self.aof {
            aof.feed(db_index, args);
        }
        self.replication.propagate(args);
    }

    /// `spec.md` §4.I: a write command under Raft is not applied inline.
    /// It's appended to the leader's log, and only takes effect (and gets a
    /// reply) once the apply loop has actually run it past `lastApplied`.
    /// Raft entries don't carry a database index (`DESIGN.md`): every
    /// Raft-backed write is scoped to database 0.
    fn dispatch_via_raft(&self, raft: &Arc<RaftNode>, args: &[RedisBytes]) -> Frame {
        let encoded = encode_command(args);
        let (index, _term) = match raft.start(encoded) {
            Ok(v) => v,
            Err(e) => return Frame::from_error(CommandError::Other(e.to_string())),
        };
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.pending_replies.lock().insert(index, tx);
        match rx.recv_timeout(RAFT_APPLY_TIMEOUT) {
            Ok(frame) => frame,
            Err(_) => {
                self.pending_replies.lock().remove(&index);
                Frame::from_error(CommandError::Other("timed out waiting for raft commit".into()))
            }
        }
    }

    /// Connects out to a configured primary and performs the `PSYNC`
    /// handshake, then blocks applying the live tail (`spec.md` §4.H
    /// "Follower apply"), reconnecting on any drop.
    fn run_as_follower(self: Arc<Self>, host: String, port: u16) {
        loop {
            if let Err(e) = self.replicate_once(&host, port) {
                warn!(error = %e, "replication link to primary dropped, retrying");
            }
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    fn replicate_once(&self, host: &str, port: u16) -> std::io::Result<()> {
        use std::io::{Read, Write};
        let mut stream = TcpStream::connect((host, port))?;
        let follower = self.follower.clone().unwrap_or_default();
        let master_replid = follower.master_replid.lock().clone();
        let offset = follower.offset.load(Ordering::SeqCst);
        let psync_args = [
            RedisBytes::from("PSYNC"),
            RedisBytes::from(master_replid),
            RedisBytes::from(offset.to_string()),
        ];
        stream.write_all(&encode_command(&psync_args))?;

        let (status, payload, leftover) = read_psync_handshake(&mut stream)?;

        let mut decoder = Decoder::new();
        if status.starts_with("FULLRESYNC") {
            let parts: Vec<&str> = status.split(' ').collect();
            let replid = parts.get(1).unwrap_or(&"?").to_string();
            let new_offset: u64 = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
            let tmp = std::env::temp_dir().join(format!("redcore-follower-{}.rdb", std::process::id()));
            std::fs::write(&tmp, &payload)?;
            self.keyspace.flush_all();
            let dbs: Vec<&crate::db::HashDb> = (0..self.keyspace.len()).map(|i| self.keyspace.db(i)).collect();
            crate::rdb::load(&tmp, &dbs)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            let _ = std::fs::remove_file(&tmp);
            follower.adopt_post_snapshot(replid, new_offset);
        } else {
            // A partial ("CONTINUE") resync's backlog tail is itself a
            // stream of encoded commands; feed it into the same decoder the
            // live tail uses below so it replays and advances the offset
            // exactly like any other propagated command.
            decoder.feed(&payload);
        }
        // Bytes read ahead of the handshake boundary belong to the live
        // tail, whichever branch ran above.
        decoder.feed(&leftover);

        let mut client = Client::new("127.0.0.1:0".parse().unwrap());
        let mut buf = [0u8; 16 * 1024];
        loop {
            while let Ok(Some(cmd)) = decoder.next_command() {
                if cmd.is_empty() {
                    continue;
                }
                let consumed = encode_command(&cmd).len() as u64;
                if let Some(spec) = command::lookup(&cmd[0]) {
                    let _ = self.execute_local(&mut client, spec, &cmd, now_ms());
                }
                follower.advance(consumed);
            }
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            decoder.feed(&buf[..n]);
        }
    }

    pub fn stop(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for tx in self.stop_senders.lock().drain(..) {
            let _ = tx.send(());
        }
        info!("server stopped");
    }

    pub fn uptime_secs(&self) -> i64 {
        (now_ms() - self.start_ms) / 1000
    }

    /// Consumed once by `net.rs` right after a `PSYNC` handshake sets
    /// `client.is_replica`, handing the connection thread the receiving
    /// half of that follower's outbound queue.
    pub fn take_follower_receiver(&self, follower_id: u64) -> Option<Receiver<Vec<u8>>> {
        self.follower_receivers.lock().remove(&follower_id)
    }
}

/// Drives `RaftNode`'s election/heartbeat timers from a single background
/// thread (`spec.md` §4.I: 500ms heartbeats, 3000-6000ms randomized election
/// timeout), issuing RPCs over the blocking peer transport in `raft::mod`.
fn raft_timer_loop(node: Arc<RaftNode>, stop: Receiver<()>) {
    use crate::raft::{
        decode_append_entries_reply, decode_request_vote_reply, encode_append_entries, encode_request_vote,
        send_rpc, Role,
    };

    let tick = crossbeam_channel::tick(Duration::from_millis(100));
    loop {
        crossbeam_channel::select! {
            recv(tick) -> _ => {}
            recv(stop) -> _ => return,
        }

        match node.role() {
            Role::Leader => {
                for peer in node.peers.clone() {
                    if let Some(args) = node.append_entries_for_peer(peer.id) {
                        let sent_up_to = args.entries.last().map(|e| e.index).unwrap_or(args.prev_log_index);
                        let payload = encode_append_entries(&args);
                        if let Ok(fields) = send_rpc(&peer.host, peer.port, &payload) {
                            if let Some(reply) = decode_append_entries_reply(&fields) {
                                node.handle_append_entries_reply(peer.id, sent_up_to, reply);
                            }
                        }
                    }
                }
            }
            Role::Follower | Role::Candidate => {
                if node.election_timed_out() {
                    let args = node.begin_election();
                    let payload = encode_request_vote(&args);
                    let mut votes = 1usize;
                    for peer in node.peers.clone() {
                        if let Ok(fields) = send_rpc(&peer.host, peer.port, &payload) {
                            if let Some(reply) = decode_request_vote_reply(&fields) {
                                if reply.vote_granted {
                                    votes += 1;
                                }
                            }
                        }
                    }
                    node.complete_election(args.term, votes, node.peers.len() + 1);
                }
            }
        }
    }
}

/// Reads a `PSYNC` handshake reply off the wire (`spec.md` §4.H): a status
/// line (`+FULLRESYNC <replid> <offset>` or `+CONTINUE`) immediately
/// followed by a raw bulk payload, with no enclosing array — the request
/// `Decoder` can't parse this shape, since it requires every multibulk
/// element to be a bulk string. Returns the status line, the payload, and
/// any bytes read past the handshake boundary (already-arrived live-tail
/// bytes) for the caller to feed into its own decoder.
fn read_psync_handshake(stream: &mut TcpStream) -> std::io::Result<(String, Vec<u8>, Vec<u8>)> {
    use std::io::{Error, ErrorKind, Read};

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    fn fill_until(stream: &mut TcpStream, buf: &mut Vec<u8>, chunk: &mut [u8], pred: impl Fn(&[u8]) -> bool) -> std::io::Result<()> {
        while !pred(buf) {
            let n = stream.read(chunk)?;
            if n == 0 {
                return Err(Error::new(ErrorKind::UnexpectedEof, "primary closed during PSYNC handshake"));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];

    fill_until(stream, &mut buf, &mut chunk, |b| find_crlf(b).is_some())?;
    if buf.first() != Some(&b'+') {
        return Err(Error::new(ErrorKind::InvalidData, "expected a PSYNC status line"));
    }
    let status_end = find_crlf(&buf).unwrap();
    let status = String::from_utf8_lossy(&buf[1..status_end]).into_owned();
    buf.drain(..status_end + 2);

    fill_until(stream, &mut buf, &mut chunk, |b| find_crlf(b).is_some())?;
    if buf.first() != Some(&b'$') {
        return Err(Error::new(ErrorKind::InvalidData, "expected a PSYNC bulk payload"));
    }
    let header_end = find_crlf(&buf).unwrap();
    let len: usize = std::str::from_utf8(&buf[1..header_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "bad PSYNC bulk length"))?;
    buf.drain(..header_end + 2);

    fill_until(stream, &mut buf, &mut chunk, |b| b.len() >= len + 2)?;
    let payload = buf[..len].to_vec();
    let leftover = buf[len + 2..].to_vec();
    Ok((status, payload, leftover))
}

impl AdminOps for Server {
    fn trigger_save(&self) -> Result<(), CommandError> {
        let config = self.config.read();
        let dbs: Vec<&crate::db::HashDb> = (0..self.keyspace.len()).map(|i| self.keyspace.db(i)).collect();
        crate::rdb::save(&config.snapshot_path, &dbs).map_err(|e| CommandError::Other(e.to_string()))?;
        self.last_save_ms.store(now_ms(), Ordering::SeqCst);
        Ok(())
    }

    fn trigger_bgsave(&self) -> Result<bool, CommandError> {
        // No separate save-lock subsystem exists yet to run this off-thread
        // without racing a concurrent BGREWRITEAOF's own snapshot read; for
        // now BGSAVE runs synchronously on the calling connection's thread
        // (still non-blocking for every *other* client).
        self.trigger_save()?;
        Ok(true)
    }

    fn last_save_unix_secs(&self) -> i64 {
        self.last_save_ms.load(Ordering::SeqCst) / 1000
    }

    fn trigger_bgrewriteaof(&self) -> Result<bool, CommandError> {
        let Some(aof) = &self.aof else {
            return Err(CommandError::Other("append only file not enabled".into()));
        };
        if !aof.try_begin_rewrite() {
            return Ok(false);
        }
        let dbs: Vec<&crate::db::HashDb> = (0..self.keyspace.len()).map(|i| self.keyspace.db(i)).collect();
        aof.finish_rewrite(&dbs).map_err(|e| CommandError::Other(e.to_string()))?;
        Ok(true)
    }

    fn info_text(&self) -> String {
        let config = self.config.read();
        let role = match &self.raft {
            Some(node) => format!("{:?}", node.role()).to_lowercase(),
            None if self.follower.is_some() => "slave".to_string(),
            None => "master".to_string(),
        };
        format!(
            "# Server\r\nuptime_in_seconds:{}\r\n# Replication\r\nrole:{}\r\nconnected_slaves:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:{}\r\n# Persistence\r\naof_enabled:{}\r\n",
            self.uptime_secs(),
            role,
            self.replication.follower_count(),
            self.replication.replid(),
            self.replication.offset(),
            config.appendonly,
        )
    }

    fn config_set(&self, key: &str, value: &str) -> Result<(), CommandError> {
        self.config.write().set(key, value)
    }

    fn request_shutdown(&self, save_first: bool) {
        if save_first {
            let _ = self.trigger_save();
        }
        self.stop();
        std::process::exit(0);
    }

    fn psync(&self, requested_replid: &str, requested_offset: i64) -> Result<PsyncReply, CommandError> {
        match self.replication.decide_psync(requested_replid, requested_offset) {
            PsyncDecision::Full { replid, offset } => {
                let dbs: Vec<&crate::db::HashDb> = (0..self.keyspace.len()).map(|i| self.keyspace.db(i)).collect();
                let rdb = crate::rdb::snapshot_bytes_for_replication(&dbs)
                    .map_err(|e| CommandError::Other(e.to_string()))?;
                let (id, rx) = self.replication.register_follower();
                self.follower_receivers.lock().insert(id, rx);
                Ok(PsyncReply::Full { replid, offset, rdb, follower_id: id })
            }
            PsyncDecision::Partial { backlog_tail } => {
                let (id, rx) = self.replication.register_follower();
                self.follower_receivers.lock().insert(id, rx);
                Ok(PsyncReply::Partial { tail: backlog_tail, follower_id: id })
            }
        }
    }

    fn replconf_ack(&self, follower_id: u64, offset: u64) {
        self.replication.record_ack(follower_id, offset);
    }
}
