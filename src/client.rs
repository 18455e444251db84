//! Per-connection client state.
//!
//! Grounded on `examples/yijun-tang-rudis/src/redis/client.rs`'s
//! `RedisClient` (fd, current db, query buffer, argv, reply queue, flags),
//! stripped of the fields this spec drops (`MultiState` for `MULTI`/`EXEC`,
//! which `spec.md` §1 lists as a non-goal) and of the raw fd handle, which
//! the channel-based connection loop in `net.rs` owns instead.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::resp::Decoder;

/// Monotonically increasing id assigned to each accepted connection, used
/// in logging and in `CLIENT LIST`-style introspection.
static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// State carried for the lifetime of one client connection. Lives on the
/// connection's own thread (`net.rs`); the keyspace it reads/writes is
/// reached through the shared `Server` handle, not stored here.
pub struct Client {
    pub id: usize,
    pub addr: SocketAddr,
    pub db_index: usize,
    pub decoder: Decoder,
    /// Set once a `REPLCONF LISTENING-PORT` / `PSYNC` has promoted this
    /// connection to a replication stream; after that point its main loop
    /// stops reading client commands and starts forwarding propagated
    /// writes (`spec.md` §4.H).
    pub is_replica: bool,
    pub last_heartbeat_offset: u64,
    /// The id `ReplicationState::register_follower` handed back when this
    /// connection completed a `PSYNC`; `REPLCONF ACK` routes through it to
    /// update the right follower handle.
    pub replica_follower_id: Option<u64>,
}

impl Client {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            db_index: 0,
            decoder: Decoder::new(),
            is_replica: false,
            last_heartbeat_offset: 0,
            replica_follower_id: None,
        }
    }

    /// `SELECT n`; bounds-checking is the caller's job (`spec.md` §4.D:
    /// "validates 0 <= n < N").
    pub fn select(&mut self, index: usize) {
        self.db_index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_client() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = Client::new(addr);
        let b = Client::new(addr);
        assert_ne!(a.id, b.id);
    }
}
