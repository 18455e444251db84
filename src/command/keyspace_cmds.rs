//! Keyspace maintenance handlers (`spec.md` §4.D/§4.E + SPEC_FULL.md §11).
//!
//! Grounded on `examples/yijun-tang-rudis/src/cmd.rs`'s `keys_command` /
//! `expire_command` / `select_command` / `move_command` family. `KEYS`/`SCAN`
//! use `util::glob_match` instead of the teacher's "only `*` is supported"
//! early-return (`spec.md` §4.E: "pattern is glob-like (`*` only, mapped to
//! regex `.*`)" — i.e. full `*`-wildcard matching, not a literal-only check).

use super::{parse_i64, parse_usize, Ctx};
use crate::bytes::RedisBytes;
use crate::error::CommandError;
use crate::resp::Frame;
use crate::util::glob_match;
use crate::value::NO_EXPIRE;

pub fn keys(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let pattern = ctx.arg(1)?.as_bytes().to_vec();
    let snapshot = ctx.db().snapshot();
    let out: Vec<Frame> = snapshot
        .iter()
        .filter(|(_, e)| !e.is_expired(ctx.now_ms))
        .filter(|(k, _)| glob_match(&pattern, k))
        .map(|(k, _)| Frame::bulk(k.clone()))
        .collect();
    Ok(Frame::Array(out))
}

/// `SCAN cursor [MATCH pat] [COUNT n]` (`spec.md` §4.E): the cursor is an
/// index into a sorted-by-bytes snapshot of the current database, so the
/// same cursor value always resumes at the same logical position even as
/// concurrent writers swap in fresh backing maps underneath (`spec.md` §9
/// "Versioned-snapshot map").
pub fn scan(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let cursor = parse_usize(ctx.arg(1)?)?;
    let mut pattern: Option<Vec<u8>> = None;
    let mut count: usize = 10;
    let mut i = 2;
    while i < ctx.args.len() {
        let opt = ctx.arg(i)?;
        if opt.eq_ignore_ascii_case(b"MATCH") {
            pattern = Some(ctx.arg(i + 1)?.as_bytes().to_vec());
            i += 2;
        } else if opt.eq_ignore_ascii_case(b"COUNT") {
            count = parse_usize(ctx.arg(i + 1)?)?;
            i += 2;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let snapshot = ctx.db().snapshot();
    let mut keys: Vec<RedisBytes> = snapshot.keys().cloned().collect();
    keys.sort();

    let mut matched = Vec::new();
    let mut idx = cursor;
    while idx < keys.len() && matched.len() < count.max(1) {
        let k = &keys[idx];
        idx += 1;
        let Some(entry) = snapshot.get(k) else { continue };
        if entry.is_expired(ctx.now_ms) {
            continue;
        }
        if pattern.as_ref().map(|p| glob_match(p, k)).unwrap_or(true) {
            matched.push(k.clone());
        }
    }
    let next_cursor = if idx >= keys.len() { 0 } else { idx };
    Ok(Frame::Array(vec![
        Frame::bulk(next_cursor.to_string()),
        Frame::Array(matched.into_iter().map(Frame::bulk).collect()),
    ]))
}

pub fn select(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let index = parse_usize(ctx.arg(1)?)?;
    if index >= ctx.keyspace.len() {
        return Err(CommandError::BadDbIndex);
    }
    ctx.client.select(index);
    Ok(Frame::ok())
}

pub fn dbsize(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    Ok(Frame::Integer(ctx.db().len() as i64))
}

pub fn type_cmd(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::Simple(entry.value.type_name().to_string())),
        None => Ok(Frame::Simple("none".to_string())),
    }
}

/// `-1` no expiry, `-2` no such key (Redis convention).
pub fn ttl(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) if entry.expire_at == NO_EXPIRE => Ok(Frame::Integer(-1)),
        Some(entry) => {
            let remaining_ms = (entry.expire_at - ctx.now_ms).max(0);
            Ok(Frame::Integer((remaining_ms + 999) / 1000))
        }
        None => Ok(Frame::Integer(-2)),
    }
}

pub fn exists(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let count = ctx.args[1..].iter().filter(|k| ctx.db().get_live(k, ctx.now_ms).is_some()).count();
    Ok(Frame::Integer(count as i64))
}

pub fn del(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let mut removed = 0;
    for key in &ctx.args[1..] {
        if ctx.db().remove(key).is_some() {
            removed += 1;
        }
    }
    Ok(Frame::Integer(removed))
}

fn rename_generic(ctx: &mut Ctx, nx: bool) -> Result<Frame, CommandError> {
    let src = ctx.arg(1)?.clone();
    let dst = ctx.arg(2)?.clone();
    let Some(entry) = ctx.db().remove(&src) else {
        return Err(CommandError::NoSuchKey);
    };
    if nx && ctx.db().get_live(&dst, ctx.now_ms).is_some() {
        // Put the source back: a failed RENAMENX must not lose data.
        ctx.db().insert(src, entry);
        return Ok(Frame::Integer(0));
    }
    ctx.db().insert(dst, entry);
    if nx {
        Ok(Frame::Integer(1))
    } else {
        Ok(Frame::ok())
    }
}

pub fn rename(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    rename_generic(ctx, false)
}

pub fn renamenx(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    rename_generic(ctx, true)
}

pub fn randomkey(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    use rand::seq::IteratorRandom;
    let snapshot = ctx.db().snapshot();
    let mut rng = rand::thread_rng();
    let live: Vec<&RedisBytes> = snapshot
        .iter()
        .filter(|(_, e)| !e.is_expired(ctx.now_ms))
        .map(|(k, _)| k)
        .collect();
    match live.into_iter().choose(&mut rng) {
        Some(k) => Ok(Frame::bulk(k.clone())),
        None => Ok(Frame::NullBulk),
    }
}

pub fn flushdb(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    ctx.keyspace.flush_one(ctx.client.db_index);
    Ok(Frame::ok())
}

pub fn flushall(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    ctx.keyspace.flush_all();
    Ok(Frame::ok())
}

pub fn move_cmd(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let dst_index = parse_usize(ctx.arg(2)?)?;
    if dst_index >= ctx.keyspace.len() {
        return Err(CommandError::BadDbIndex);
    }
    if dst_index == ctx.client.db_index {
        return Err(CommandError::Other("source and destination objects are the same".into()));
    }
    let dst = ctx.keyspace.db(dst_index);
    if dst.get_live(&key, ctx.now_ms).is_some() {
        return Ok(Frame::Integer(0));
    }
    match ctx.db().remove(&key) {
        Some(entry) => {
            dst.insert(key, entry);
            Ok(Frame::Integer(1))
        }
        None => Ok(Frame::Integer(0)),
    }
}

fn set_expire_from_now(ctx: &mut Ctx, delta_ms: i64) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    if ctx.db().get_live(&key, ctx.now_ms).is_none() {
        return Ok(Frame::Integer(0));
    }
    if delta_ms < 0 {
        ctx.db().remove(&key);
        return Ok(Frame::Integer(1));
    }
    let when = ctx.now_ms + delta_ms;
    Ok(Frame::Integer(ctx.db().set_expire(&key, ctx.now_ms, when) as i64))
}

pub fn expire(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let seconds = parse_i64(ctx.arg(2)?)?;
    set_expire_from_now(ctx, seconds.saturating_mul(1000))
}

/// `EXPIREAT key unix-time-seconds`.
pub fn expireat(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let at_seconds = parse_i64(ctx.arg(2)?)?;
    let at_ms = at_seconds.saturating_mul(1000);
    if ctx.db().get_live(&key, ctx.now_ms).is_none() {
        return Ok(Frame::Integer(0));
    }
    if at_ms <= ctx.now_ms {
        ctx.db().remove(&key);
        return Ok(Frame::Integer(1));
    }
    Ok(Frame::Integer(ctx.db().set_expire(&key, ctx.now_ms, at_ms) as i64))
}

pub fn persist(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    Ok(Frame::Integer(ctx.db().persist(key, ctx.now_ms) as i64))
}

