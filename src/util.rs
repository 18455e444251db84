//! Small free-standing helpers shared across modules.
//!
//! The teacher's `util.rs` held a `LogLevel` enum and a `timestamp()` helper
//! feeding its hand-rolled `redis/log.rs`; logging now goes through
//! `tracing` (see `logging.rs`), so what's left here is genuinely
//! cross-cutting: wall-clock milliseconds and the glob matcher `SCAN`/`KEYS`
//! need.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, used for expiration timestamps and
/// Raft election-timer bookkeeping.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// `spec.md` §4.E: "the pattern is glob-like (`*` only, mapped to regex
/// `.*`)". A single `*` wildcard is the whole grammar `KEYS`/`SCAN` support
/// here, so a hand-rolled matcher avoids pulling in a full glob crate for
/// one metacharacter.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    fn go(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => go(&p[1..], t) || (!t.is_empty() && go(p, &t[1..])),
            Some(&c) => !t.is_empty() && t[0] == c && go(&p[1..], &t[1..]),
        }
    }
    go(pattern, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_anything() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"foo*", b"foobar"));
        assert!(glob_match(b"*bar", b"foobar"));
        assert!(!glob_match(b"foo", b"foobar"));
    }
}
