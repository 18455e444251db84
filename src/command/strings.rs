//! String command handlers (`spec.md` §4.E + SPEC_FULL.md §11).
//!
//! Grounded on `examples/yijun-tang-rudis/src/cmd.rs`'s `get_command` /
//! `set_command` / `incr_command` family — same read-modify-write shape,
//! retargeted from `RedisClient::lookup_key_write`/`insert` onto `HashDb`.

use super::{mutate_or_insert, parse_i64, Ctx};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::value::{Entry, RString, Value};

pub fn get(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::bulk(entry.value.as_string()?.as_bytes().to_vec())),
        None => Ok(Frame::NullBulk),
    }
}

pub fn set(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let value = ctx.arg(2)?.as_bytes().to_vec();
    ctx.db().insert(key, Entry::new(Value::Str(RString::new(value))));
    Ok(Frame::ok())
}

pub fn getset(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let value = ctx.arg(2)?.as_bytes().to_vec();
    let prior = ctx.db().get_live(&key, ctx.now_ms);
    let reply = match &prior {
        Some(entry) => Frame::bulk(entry.value.as_string()?.as_bytes().to_vec()),
        None => Frame::NullBulk,
    };
    ctx.db().insert(key, Entry::new(Value::Str(RString::new(value))));
    Ok(reply)
}

pub fn setnx(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let value = ctx.arg(2)?.as_bytes().to_vec();
    if ctx.db().get_live(&key, ctx.now_ms).is_some() {
        return Ok(Frame::Integer(0));
    }
    ctx.db().insert(key, Entry::new(Value::Str(RString::new(value))));
    Ok(Frame::Integer(1))
}

pub fn append(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let suffix = ctx.arg(2)?.as_bytes().to_vec();
    let new_len = mutate_or_insert(
        ctx.db(),
        &key,
        ctx.now_ms,
        || Value::Str(RString::default()),
        |value| {
            let s = value.as_string_mut()?;
            s.append(&suffix);
            Ok(s.len())
        },
    )?;
    Ok(Frame::Integer(new_len as i64))
}

pub fn strlen(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::Integer(entry.value.as_string()?.len() as i64)),
        None => Ok(Frame::Integer(0)),
    }
}

pub fn getrange(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let start = parse_i64(ctx.arg(2)?)?;
    let end = parse_i64(ctx.arg(3)?)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::bulk(entry.value.as_string()?.getrange(start, end))),
        None => Ok(Frame::bulk(Vec::new())),
    }
}

fn incr_generic(ctx: &mut Ctx, key_idx: usize, delta: i64) -> Result<Frame, CommandError> {
    let key = ctx.arg(key_idx)?.clone();
    let next = mutate_or_insert(
        ctx.db(),
        &key,
        ctx.now_ms,
        || Value::Str(RString::default()),
        |value| value.as_string_mut()?.incr_by(delta),
    )?;
    Ok(Frame::Integer(next))
}

pub fn incr(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    incr_generic(ctx, 1, 1)
}

pub fn decr(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    incr_generic(ctx, 1, -1)
}

pub fn incrby(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let delta = parse_i64(ctx.arg(2)?)?;
    incr_generic(ctx, 1, delta)
}

pub fn decrby(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let delta = parse_i64(ctx.arg(2)?)?;
    incr_generic(ctx, 1, -delta)
}

/// `MSET k v [k v ...]` (`spec.md` §4.E: "MSET k v ..."). Arity is enforced
/// positionally: an odd remaining argument count is a syntax error, the same
/// way the teacher's `mset_command` rejects it before writing anything.
pub fn mset(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let rest = &ctx.args[1..];
    if rest.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    for pair in rest.chunks_exact(2) {
        ctx.db().insert(
            pair[0].clone(),
            Entry::new(Value::Str(RString::new(pair[1].as_bytes().to_vec()))),
        );
    }
    Ok(Frame::ok())
}

/// `MSETNX`: all-or-nothing — if any key already exists, no key is set.
pub fn msetnx(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let rest = &ctx.args[1..];
    if rest.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    for pair in rest.chunks_exact(2) {
        if ctx.db().get_live(&pair[0], ctx.now_ms).is_some() {
            return Ok(Frame::Integer(0));
        }
    }
    for pair in rest.chunks_exact(2) {
        ctx.db().insert(
            pair[0].clone(),
            Entry::new(Value::Str(RString::new(pair[1].as_bytes().to_vec()))),
        );
    }
    Ok(Frame::Integer(1))
}
