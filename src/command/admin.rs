//! Admin/introspection/replication-handshake handlers (`spec.md` §4.E
//! "Admin & cluster" row + §4.F/§4.H handshakes).
//!
//! Grounded on `examples/yijun-tang-rudis/src/cmd.rs`'s `ping_command` /
//! `save_command` / `bgsave_command` / `config_command` family. Those
//! handlers reach straight into the global `server_write()`/`server_read()`
//! singleton (`spec.md` §9 "Global state"); here every subsystem-crossing
//! effect (triggering a snapshot, rewriting the AOF, completing a PSYNC
//! handshake, stopping the process) goes through the `AdminOps` trait object
//! on `Ctx`, implemented by the `Server` struct that owns those handles.

use super::Ctx;
use crate::error::CommandError;
use crate::resp::{encode_psync_handshake, Frame};

/// What a successful `PSYNC` resolves to, mirroring
/// `replication::PsyncDecision` plus the RDB/backlog payload bytes and the
/// follower id the caller should remember for `REPLCONF ACK` routing.
pub enum PsyncReply {
    Full { replid: String, offset: u64, rdb: Vec<u8>, follower_id: u64 },
    Partial { tail: Vec<u8>, follower_id: u64 },
}

/// The subsystem-crossing effects `Ctx`'s handlers can't reach directly
/// because they live on the not-yet-dispatched-through `Server` (AOF
/// rewriting, RDB snapshotting, replication handshakes, process shutdown).
/// A handler with no live `Ctx.admin` (e.g. a unit test constructing `Ctx`
/// by hand) gets `CommandError::Other` instead of a panic.
pub trait AdminOps: Send + Sync {
    fn trigger_save(&self) -> Result<(), CommandError>;
    fn trigger_bgsave(&self) -> Result<bool, CommandError>;
    fn last_save_unix_secs(&self) -> i64;
    fn trigger_bgrewriteaof(&self) -> Result<bool, CommandError>;
    fn info_text(&self) -> String;
    fn config_set(&self, key: &str, value: &str) -> Result<(), CommandError>;
    fn request_shutdown(&self, save_first: bool);
    fn psync(&self, requested_replid: &str, requested_offset: i64) -> Result<PsyncReply, CommandError>;
    fn replconf_ack(&self, follower_id: u64, offset: u64);
}

fn admin_ops<'a>(ctx: &'a Ctx) -> Result<&'a dyn AdminOps, CommandError> {
    ctx.admin.ok_or_else(|| CommandError::Other("admin subsystem unavailable".into()))
}

pub fn ping(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    match ctx.args.get(1) {
        Some(msg) => Ok(Frame::bulk(msg.clone())),
        None => Ok(Frame::Simple("PONG".to_string())),
    }
}

pub fn save(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    admin_ops(ctx)?.trigger_save()?;
    Ok(Frame::ok())
}

pub fn bgsave(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let started = admin_ops(ctx)?.trigger_bgsave()?;
    if started {
        Ok(Frame::Simple("Background saving started".to_string()))
    } else {
        Err(CommandError::AlreadyInProgress)
    }
}

pub fn lastsave(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    Ok(Frame::Integer(admin_ops(ctx)?.last_save_unix_secs()))
}

pub fn bgrewriteaof(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let started = admin_ops(ctx)?.trigger_bgrewriteaof()?;
    if started {
        Ok(Frame::Simple("Background append only file rewriting started".to_string()))
    } else {
        Err(CommandError::AlreadyInProgress)
    }
}

pub fn info(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    Ok(Frame::bulk(admin_ops(ctx)?.info_text()))
}

/// `CONFIG GET pattern` / `CONFIG SET key value`. `GET` reads straight off
/// `ctx.config` (a plain snapshot, no subsystem crossing); `SET` goes
/// through `AdminOps` since the live `Config` it mutates is owned by
/// `Server`, not this borrowed snapshot.
pub fn config(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let sub = ctx.arg(1)?;
    if sub.eq_ignore_ascii_case(b"GET") {
        let pattern = ctx.arg(2)?.as_bytes().to_vec();
        let mut out = Vec::new();
        for (k, v) in ctx.config.as_map() {
            if crate::util::glob_match(&pattern, k.as_bytes()) {
                out.push(Frame::bulk(k));
                out.push(Frame::bulk(v));
            }
        }
        Ok(Frame::Array(out))
    } else if sub.eq_ignore_ascii_case(b"SET") {
        let key = ctx.arg(2)?.as_str().ok_or(CommandError::Syntax)?.to_string();
        let value = ctx.arg(3)?.as_str().ok_or(CommandError::Syntax)?.to_string();
        admin_ops(ctx)?.config_set(&key, &value)?;
        Ok(Frame::ok())
    } else {
        Err(CommandError::Syntax)
    }
}

pub fn shutdown(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let save_first = !ctx.args[1..].iter().any(|a| a.eq_ignore_ascii_case(b"NOSAVE"));
    admin_ops(ctx)?.request_shutdown(save_first);
    Ok(Frame::ok())
}

/// `PSYNC replid offset`. Promotes this connection to a replica stream on
/// success (`spec.md` §4.H): the dispatcher must stop treating subsequent
/// bytes on this socket as ordinary commands once `ctx.client.is_replica`
/// is set.
pub fn psync(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let replid = ctx.arg(1)?.as_str().ok_or(CommandError::Syntax)?.to_string();
    let offset_raw = ctx.arg(2)?.as_str().ok_or(CommandError::Syntax)?;
    let offset = crate::replication::parse_psync_offset(offset_raw)
        .map_err(|e| CommandError::Other(e.to_string()))?;
    let reply = admin_ops(ctx)?.psync(&replid, offset)?;
    ctx.client.is_replica = true;
    match reply {
        PsyncReply::Full { replid, offset, rdb, follower_id } => {
            ctx.client.replica_follower_id = Some(follower_id);
            let status = format!("FULLRESYNC {replid} {offset}");
            Ok(Frame::Raw(encode_psync_handshake(&status, &rdb)))
        }
        PsyncReply::Partial { tail, follower_id } => {
            ctx.client.replica_follower_id = Some(follower_id);
            Ok(Frame::Raw(encode_psync_handshake("CONTINUE", &tail)))
        }
    }
}

/// `REPLCONF LISTENING-PORT p` / `REPLCONF CAPA ...` (acknowledged but
/// otherwise unused, matching what real Redis does with them) / `REPLCONF
/// ACK offset` (routed to the follower handle this connection registered
/// during `PSYNC`).
pub fn replconf(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let sub = ctx.arg(1)?;
    if sub.eq_ignore_ascii_case(b"ACK") {
        let offset: u64 = ctx
            .arg(2)?
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or(CommandError::NotAnInteger)?;
        if let Some(id) = ctx.client.replica_follower_id {
            admin_ops(ctx)?.replconf_ack(id, offset);
        }
        // REPLCONF ACK gets no reply at all in the real protocol; an empty
        // simple string here is swallowed by a caller that never reads it
        // once the connection is replica-streamed.
        return Ok(Frame::ok());
    }
    Ok(Frame::ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_without_message_replies_pong() {
        let args = vec![crate::bytes::RedisBytes::from("PING")];
        let cfg = crate::config::Config::default();
        let keyspace = crate::db::Keyspace::new(1);
        let mut client = crate::client::Client::new("127.0.0.1:0".parse().unwrap());
        let mut ctx = Ctx {
            keyspace: &keyspace,
            config: &cfg,
            client: &mut client,
            args: &args,
            now_ms: 0,
            admin: None,
        };
        assert_eq!(ping(&mut ctx).unwrap(), Frame::Simple("PONG".to_string()));
    }

    #[test]
    fn ping_with_message_echoes_it() {
        let args = vec![crate::bytes::RedisBytes::from("PING"), crate::bytes::RedisBytes::from("hi")];
        let cfg = crate::config::Config::default();
        let keyspace = crate::db::Keyspace::new(1);
        let mut client = crate::client::Client::new("127.0.0.1:0".parse().unwrap());
        let mut ctx = Ctx {
            keyspace: &keyspace,
            config: &cfg,
            client: &mut client,
            args: &args,
            now_ms: 0,
            admin: None,
        };
        assert_eq!(ping(&mut ctx).unwrap(), Frame::bulk("hi"));
    }
}
