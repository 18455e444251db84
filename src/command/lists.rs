//! List command handlers (`spec.md` §4.E + SPEC_FULL.md §11).
//!
//! Grounded on `examples/yijun-tang-rudis/src/cmd.rs`'s `lpush_command` /
//! `lrange_command` / `lrem_command` family, retargeted onto `RList`.

use super::{mutate_existing, mutate_or_insert, parse_i64, Ctx};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::value::{RList, Value};

fn push(ctx: &mut Ctx, front: bool) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let values: Vec<_> = ctx.args[2..].to_vec();
    let len = mutate_or_insert(
        ctx.db(),
        &key,
        ctx.now_ms,
        || Value::List(RList::new()),
        |value| {
            let list = value.as_list_mut()?;
            for v in values {
                if front {
                    list.push_front(v);
                } else {
                    list.push_back(v);
                }
            }
            Ok(list.len())
        },
    )?;
    Ok(Frame::Integer(len as i64))
}

pub fn lpush(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    push(ctx, true)
}

pub fn rpush(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    push(ctx, false)
}

fn pop(ctx: &mut Ctx, front: bool) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let popped = mutate_existing(ctx.db(), &key, ctx.now_ms, |value| {
        let list = value.as_list_mut()?;
        Ok(if front { list.pop_front() } else { list.pop_back() })
    })?
    .flatten();
    // An emptied list is removed outright, matching Redis's "a list with no
    // elements does not exist" contract.
    if ctx.db().get(&key).map(|e| matches!(e.value, Value::List(ref l) if l.is_empty())).unwrap_or(false) {
        ctx.db().remove(&key);
    }
    match popped {
        Some(v) => Ok(Frame::bulk(v)),
        None => Ok(Frame::NullBulk),
    }
}

pub fn lpop(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    pop(ctx, true)
}

pub fn rpop(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    pop(ctx, false)
}

pub fn lrange(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let start = parse_i64(ctx.arg(2)?)?;
    let stop = parse_i64(ctx.arg(3)?)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => {
            let items = entry.value.as_list()?.range(start, stop);
            Ok(Frame::Array(items.into_iter().map(Frame::bulk).collect()))
        }
        None => Ok(Frame::Array(Vec::new())),
    }
}

pub fn llen(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::Integer(entry.value.as_list()?.len() as i64)),
        None => Ok(Frame::Integer(0)),
    }
}

pub fn ltrim(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let start = parse_i64(ctx.arg(2)?)?;
    let stop = parse_i64(ctx.arg(3)?)?;
    mutate_existing(ctx.db(), &key, ctx.now_ms, |value| {
        value.as_list_mut()?.trim(start, stop);
        Ok(())
    })?;
    if ctx.db().get(&key).map(|e| matches!(e.value, Value::List(ref l) if l.is_empty())).unwrap_or(false) {
        ctx.db().remove(&key);
    }
    Ok(Frame::ok())
}

pub fn lindex(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let index = parse_i64(ctx.arg(2)?)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => match entry.value.as_list()?.index(index) {
            Some(v) => Ok(Frame::bulk(v.clone())),
            None => Ok(Frame::NullBulk),
        },
        None => Ok(Frame::NullBulk),
    }
}

pub fn lset(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let index = parse_i64(ctx.arg(2)?)?;
    let value_arg = ctx.arg(3)?.clone();
    let result = mutate_existing(ctx.db(), &key, ctx.now_ms, |value| value.as_list_mut()?.set(index, value_arg))?;
    match result {
        Some(_) => Ok(Frame::ok()),
        None => Err(CommandError::NoSuchKey),
    }
}

pub fn lrem(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let count = parse_i64(ctx.arg(2)?)?;
    let target = ctx.arg(3)?.clone();
    let removed = mutate_existing(ctx.db(), &key, ctx.now_ms, |value| Ok(value.as_list_mut()?.remove(count, &target)))?
        .unwrap_or(0);
    if ctx.db().get(&key).map(|e| matches!(e.value, Value::List(ref l) if l.is_empty())).unwrap_or(false) {
        ctx.db().remove(&key);
    }
    Ok(Frame::Integer(removed as i64))
}

/// `RPOPLPUSH src dst`: pop the tail of `src`, push it onto the head of
/// `dst`. Same key for both arguments rotates the list in place.
pub fn rpoplpush(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let src = ctx.arg(1)?.clone();
    let dst = ctx.arg(2)?.clone();
    let popped = mutate_existing(ctx.db(), &src, ctx.now_ms, |value| Ok(value.as_list_mut()?.pop_back()))?.flatten();
    if ctx.db().get(&src).map(|e| matches!(e.value, Value::List(ref l) if l.is_empty())).unwrap_or(false) {
        ctx.db().remove(&src);
    }
    match popped {
        Some(v) => {
            mutate_or_insert(
                ctx.db(),
                &dst,
                ctx.now_ms,
                || Value::List(RList::new()),
                |value| {
                    value.as_list_mut()?.push_front(v.clone());
                    Ok(())
                },
            )?;
            Ok(Frame::bulk(v))
        }
        None => Ok(Frame::NullBulk),
    }
}
