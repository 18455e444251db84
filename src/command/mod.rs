//! Component E: the command dispatcher.
//!
//! Grounded on `examples/yijun-tang-rudis/src/cmd.rs`'s `CMD_TABLE`: a
//! `once_cell::sync::Lazy` static map from lower-cased command name to a
//! `RedisCommand{name, proc, arity, flags}` record, looked up once per
//! invocation (`lookup_command`/`call`). We keep the same shape — a
//! `CommandSpec` with a function-pointer handler and the teacher's signed
//! arity convention (positive = exact argument count including the command
//! name, negative = "at least" that many) — but the handler signature takes
//! an explicit `Ctx` instead of reading/writing a global `server_write()`
//! singleton (`spec.md` §9 "Global state").
//!
//! `spec.md` §4.E's dispatcher contract (upper-case lookup, arity/type
//! checks, then on a successful write command: AOL append, replication
//! fan-out, and — if Raft is enabled — log append before reply) is split
//! across two layers: this module resolves a command name to a
//! `CommandSpec` and type-checks/executes it; `server.rs` owns the
//! propagation decision, since that's where the AOF/replication/Raft handles
//! actually live.

mod admin;
pub use admin::{AdminOps, PsyncReply};
mod hashes;
mod keyspace_cmds;
mod lists;
mod sets;
mod strings;
mod zsets;

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::bytes::RedisBytes;
use crate::client::Client;
use crate::config::Config;
use crate::db::Keyspace;
use crate::error::CommandError;
use crate::resp::Frame;

/// Everything a handler needs to read/mutate the keyspace and answer a
/// request. Borrowed for the lifetime of one dispatch call; handlers never
/// stash it.
pub struct Ctx<'a> {
    pub keyspace: &'a Keyspace,
    pub config: &'a Config,
    pub client: &'a mut Client,
    pub args: &'a [RedisBytes],
    pub now_ms: i64,
    /// Populated only for admin commands that touch subsystems outside the
    /// keyspace (`BGSAVE`, `BGREWRITEAOF`, `INFO`, `CONFIG`, `PSYNC`,
    /// `REPLCONF`, `SHUTDOWN`). Every other handler ignores it.
    pub admin: Option<&'a dyn admin::AdminOps>,
}

impl<'a> Ctx<'a> {
    /// The key argument at `args[idx]`, or a dispatch-time arity error if
    /// the arity check already let through a short argv (shouldn't happen
    /// once `CommandSpec::check_arity` has run, but handlers index
    /// defensively rather than panicking on a future arity-table edit).
    pub fn arg(&self, idx: usize) -> Result<&RedisBytes, CommandError> {
        self.args.get(idx).ok_or(CommandError::Syntax)
    }

    pub fn db(&self) -> &'a crate::db::HashDb {
        self.keyspace.db(self.client.db_index)
    }
}

type Handler = fn(&mut Ctx) -> Result<Frame, CommandError>;

/// One entry in the dispatch table (`examples/yijun-tang-rudis/src/cmd.rs`'s
/// `RedisCommand`).
pub struct CommandSpec {
    pub name: &'static str,
    pub handler: Handler,
    /// Redis arity convention: `>= 0` means exactly that many argv entries
    /// (command name included); `< 0` means "at least" `-arity`.
    pub arity: i64,
    /// Whether a success reply should be appended to the AOL / propagated to
    /// replicas / Raft-logged (`spec.md` §4.E step 4).
    pub is_write: bool,
}

impl CommandSpec {
    fn check_arity(&self, argc: usize) -> bool {
        if self.arity >= 0 {
            argc as i64 == self.arity
        } else {
            argc as i64 >= -self.arity
        }
    }
}

macro_rules! cmd {
    ($name:literal, $handler:path, $arity:expr, $write:expr) => {
        (
            $name,
            CommandSpec {
                name: $name,
                handler: $handler,
                arity: $arity,
                is_write: $write,
            },
        )
    };
}

static CMD_TABLE: Lazy<HashMap<&'static str, CommandSpec>> = Lazy::new(|| {
    HashMap::from([
        // Strings (`spec.md` §4.E + SPEC_FULL.md §11).
        cmd!("GET", strings::get, 2, false),
        cmd!("SET", strings::set, 3, true),
        cmd!("GETSET", strings::getset, 3, true),
        cmd!("SETNX", strings::setnx, 3, true),
        cmd!("APPEND", strings::append, 3, true),
        cmd!("STRLEN", strings::strlen, 2, false),
        cmd!("GETRANGE", strings::getrange, 4, false),
        cmd!("INCR", strings::incr, 2, true),
        cmd!("INCRBY", strings::incrby, 3, true),
        cmd!("DECR", strings::decr, 2, true),
        cmd!("DECRBY", strings::decrby, 3, true),
        cmd!("MSET", strings::mset, -3, true),
        cmd!("MSETNX", strings::msetnx, -3, true),
        // Lists.
        cmd!("LPUSH", lists::lpush, -3, true),
        cmd!("RPUSH", lists::rpush, -3, true),
        cmd!("LPOP", lists::lpop, 2, true),
        cmd!("RPOP", lists::rpop, 2, true),
        cmd!("LRANGE", lists::lrange, 4, false),
        cmd!("LLEN", lists::llen, 2, false),
        cmd!("LTRIM", lists::ltrim, 4, true),
        cmd!("LINDEX", lists::lindex, 3, false),
        cmd!("LSET", lists::lset, 4, true),
        cmd!("LREM", lists::lrem, 4, true),
        cmd!("RPOPLPUSH", lists::rpoplpush, 3, true),
        // Hashes.
        cmd!("HSET", hashes::hset, -4, true),
        cmd!("HGET", hashes::hget, 3, false),
        cmd!("HDEL", hashes::hdel, -3, true),
        cmd!("HGETALL", hashes::hgetall, 2, false),
        cmd!("HLEN", hashes::hlen, 2, false),
        cmd!("HEXISTS", hashes::hexists, 3, false),
        // Sets.
        cmd!("SADD", sets::sadd, -3, true),
        cmd!("SPOP", sets::spop, -2, true),
        cmd!("SREM", sets::srem, -3, true),
        cmd!("SCARD", sets::scard, 2, false),
        cmd!("SISMEMBER", sets::sismember, 3, false),
        cmd!("SMEMBERS", sets::smembers, 2, false),
        cmd!("SRANDMEMBER", sets::srandmember, -2, false),
        cmd!("SMOVE", sets::smove, 4, true),
        cmd!("SINTER", sets::sinter, -2, false),
        cmd!("SINTERSTORE", sets::sinterstore, -3, true),
        cmd!("SUNION", sets::sunion, -2, false),
        cmd!("SUNIONSTORE", sets::sunionstore, -3, true),
        cmd!("SDIFF", sets::sdiff, -2, false),
        cmd!("SDIFFSTORE", sets::sdiffstore, -3, true),
        // Sorted sets.
        cmd!("ZADD", zsets::zadd, -4, true),
        cmd!("ZRANGE", zsets::zrange, -4, false),
        cmd!("ZREVRANGE", zsets::zrevrange, -4, false),
        cmd!("ZRANGEBYSCORE", zsets::zrangebyscore, -4, false),
        cmd!("ZCARD", zsets::zcard, 2, false),
        cmd!("ZSCORE", zsets::zscore, 3, false),
        cmd!("ZREM", zsets::zrem, -3, true),
        cmd!("ZINCRBY", zsets::zincrby, 4, true),
        cmd!("ZREMRANGEBYSCORE", zsets::zremrangebyscore, 4, true),
        // Keyspace maintenance.
        cmd!("KEYS", keyspace_cmds::keys, 2, false),
        cmd!("SCAN", keyspace_cmds::scan, -2, false),
        cmd!("SELECT", keyspace_cmds::select, 2, false),
        cmd!("DBSIZE", keyspace_cmds::dbsize, 1, false),
        cmd!("TYPE", keyspace_cmds::type_cmd, 2, false),
        cmd!("TTL", keyspace_cmds::ttl, 2, false),
        cmd!("EXISTS", keyspace_cmds::exists, -2, false),
        cmd!("DEL", keyspace_cmds::del, -2, true),
        cmd!("RENAME", keyspace_cmds::rename, 3, true),
        cmd!("RENAMENX", keyspace_cmds::renamenx, 3, true),
        cmd!("RANDOMKEY", keyspace_cmds::randomkey, 1, false),
        cmd!("FLUSHDB", keyspace_cmds::flushdb, 1, true),
        cmd!("FLUSHALL", keyspace_cmds::flushall, 1, true),
        cmd!("MOVE", keyspace_cmds::move_cmd, 3, true),
        cmd!("EXPIRE", keyspace_cmds::expire, 3, true),
        cmd!("EXPIREAT", keyspace_cmds::expireat, 3, true),
        cmd!("PERSIST", keyspace_cmds::persist, 2, true),
        // Admin / cluster.
        cmd!("PING", admin::ping, -1, false),
        cmd!("BGSAVE", admin::bgsave, 1, false),
        cmd!("SAVE", admin::save, 1, false),
        cmd!("LASTSAVE", admin::lastsave, 1, false),
        cmd!("BGREWRITEAOF", admin::bgrewriteaof, 1, false),
        cmd!("INFO", admin::info, -1, false),
        cmd!("CONFIG", admin::config, -2, false),
        cmd!("SHUTDOWN", admin::shutdown, -1, false),
        cmd!("PSYNC", admin::psync, 3, false),
        cmd!("REPLCONF", admin::replconf, -2, false),
    ])
});

/// Looks up a command by name, case-insensitively (`spec.md` §4.E step 1:
/// "upper-case the command name bytes").
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    let upper = String::from_utf8(name.to_ascii_uppercase()).ok()?;
    CMD_TABLE.get(upper.as_str())
}

/// Runs a resolved, arity-checked command's handler. `server.rs::execute`
/// does the lookup/arity step and the write-propagation decision around
/// this call; this function is the synchronous "step 3: invoke the handler"
/// of `spec.md` §4.E.
pub fn run(spec: &CommandSpec, ctx: &mut Ctx) -> Result<Frame, CommandError> {
    (spec.handler)(ctx)
}

/// `spec.md` §4.E step 2, arity half.
pub fn check_arity(spec: &CommandSpec, argc: usize) -> bool {
    spec.check_arity(argc)
}

/// Parses a command argument as a `i64`, mapping failure the way every
/// handler in this crate needs to (`spec.md` §7: "non-numeric input ...
/// `ERR value is not an integer or out of range`").
pub(crate) fn parse_i64(b: &RedisBytes) -> Result<i64, CommandError> {
    b.as_str().and_then(|s| s.parse().ok()).ok_or(CommandError::NotAnInteger)
}

pub(crate) fn parse_f64(b: &RedisBytes) -> Result<f64, CommandError> {
    b.as_str().and_then(|s| s.parse().ok()).ok_or(CommandError::NotAFloat)
}

pub(crate) fn parse_usize(b: &RedisBytes) -> Result<usize, CommandError> {
    let v = parse_i64(b)?;
    if v < 0 {
        Err(CommandError::OutOfRange)
    } else {
        Ok(v as usize)
    }
}

/// Mutates `key`'s value via `f`, creating it from `default()` first if
/// absent *or expired* (`now_ms` is the same clock the read path's
/// `get_live` checks against, so a write never resurrects a stale value).
/// Threads a `CommandError` (e.g. `WRONGTYPE`) back out of the closure,
/// since `HashDb::with_entry_or_insert` itself has no notion of a fallible
/// mutation.
pub(crate) fn mutate_or_insert<R>(
    db: &crate::db::HashDb,
    key: &RedisBytes,
    now_ms: i64,
    default: impl FnOnce() -> crate::value::Value,
    f: impl FnOnce(&mut crate::value::Value) -> Result<R, CommandError>,
) -> Result<R, CommandError> {
    let mut result = None;
    db.with_entry_or_insert(key, now_ms, default, |entry| {
        result = Some(f(&mut entry.value));
    });
    result.expect("closure always runs for a just-inserted-or-found entry")
}

/// Mutates an existing, live key's value via `f`; `Ok(None)` if the key is
/// absent or expired (callers map that to whatever "no such key" reply the
/// command needs).
pub(crate) fn mutate_existing<R>(
    db: &crate::db::HashDb,
    key: &[u8],
    now_ms: i64,
    f: impl FnOnce(&mut crate::value::Value) -> Result<R, CommandError>,
) -> Result<Option<R>, CommandError> {
    let mut result = None;
    let found = db.with_entry(key, now_ms, |entry| {
        result = Some(f(&mut entry.value));
    });
    match found {
        Some(_) => result.expect("set whenever with_entry found the key").map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup(b"get").is_some());
        assert!(lookup(b"GeT").is_some());
        assert!(lookup(b"nosuchcommand").is_none());
    }

    #[test]
    fn arity_convention_matches_redis() {
        let exact = CommandSpec { name: "x", handler: admin::ping, arity: 2, is_write: false };
        assert!(exact.check_arity(2));
        assert!(!exact.check_arity(3));
        let at_least = CommandSpec { name: "y", handler: admin::ping, arity: -2, is_write: false };
        assert!(at_least.check_arity(2));
        assert!(at_least.check_arity(5));
        assert!(!at_least.check_arity(1));
    }
}
