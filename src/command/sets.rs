//! Set command handlers (`spec.md` §4.E + SPEC_FULL.md §11's set algebra).
//!
//! Grounded on `examples/yijun-tang-rudis/src/cmd.rs`'s `sadd_command` /
//! `sinter_command` / `spop_command` family, retargeted onto `RSet`.

use super::{mutate_existing, mutate_or_insert, parse_usize, Ctx};
use crate::bytes::RedisBytes;
use crate::error::CommandError;
use crate::resp::Frame;
use crate::value::{RSet, Value};

pub fn sadd(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let members: Vec<_> = ctx.args[2..].to_vec();
    let added = mutate_or_insert(
        ctx.db(),
        &key,
        ctx.now_ms,
        || Value::Set(RSet::new()),
        |value| {
            let set = value.as_set_mut()?;
            Ok(members.into_iter().filter(|m| set.insert(m.clone())).count())
        },
    )?;
    Ok(Frame::Integer(added as i64))
}

/// `SPOP key [count]` — the teacher's `spop_command` only ever removes one
/// member; SPEC_FULL.md §11 carries the count form since it costs nothing
/// once `RSet::pop_random` already takes a count.
pub fn spop(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let count = match ctx.args.get(2) {
        Some(c) => parse_usize(c)?,
        None => 1,
    };
    let popped = mutate_existing(ctx.db(), &key, ctx.now_ms, |value| Ok(value.as_set_mut()?.pop_random(count)))?
        .unwrap_or_default();
    if ctx.db().get(&key).map(|e| matches!(e.value, Value::Set(ref s) if s.is_empty())).unwrap_or(false) {
        ctx.db().remove(&key);
    }
    if ctx.args.len() == 2 {
        // No explicit count: Redis replies with a single bulk string (or
        // nil), not a one-element array.
        return Ok(popped.into_iter().next().map(Frame::bulk).unwrap_or(Frame::NullBulk));
    }
    Ok(Frame::Array(popped.into_iter().map(Frame::bulk).collect()))
}

pub fn srem(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let members: Vec<_> = ctx.args[2..].to_vec();
    let removed = mutate_existing(ctx.db(), &key, ctx.now_ms, |value| {
        let set = value.as_set_mut()?;
        Ok(members.iter().filter(|m| set.remove(m)).count())
    })?
    .unwrap_or(0);
    if ctx.db().get(&key).map(|e| matches!(e.value, Value::Set(ref s) if s.is_empty())).unwrap_or(false) {
        ctx.db().remove(&key);
    }
    Ok(Frame::Integer(removed as i64))
}

pub fn scard(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::Integer(entry.value.as_set()?.len() as i64)),
        None => Ok(Frame::Integer(0)),
    }
}

pub fn sismember(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let member = ctx.arg(2)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::Integer(entry.value.as_set()?.contains(member) as i64)),
        None => Ok(Frame::Integer(0)),
    }
}

pub fn smembers(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::Array(entry.value.as_set()?.iter().cloned().map(Frame::bulk).collect())),
        None => Ok(Frame::Array(Vec::new())),
    }
}

pub fn srandmember(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let count = match ctx.args.get(2) {
        Some(c) => parse_usize(c)?,
        None => 1,
    };
    let sample = match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => entry.value.as_set()?.random_sample(count),
        None => Vec::new(),
    };
    if ctx.args.len() == 2 {
        return Ok(sample.into_iter().next().map(Frame::bulk).unwrap_or(Frame::NullBulk));
    }
    Ok(Frame::Array(sample.into_iter().map(Frame::bulk).collect()))
}

pub fn smove(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let src = ctx.arg(1)?.clone();
    let dst = ctx.arg(2)?.clone();
    let member = ctx.arg(3)?.clone();
    let removed = mutate_existing(ctx.db(), &src, ctx.now_ms, |value| Ok(value.as_set_mut()?.remove(&member)))?
        .unwrap_or(false);
    if !removed {
        return Ok(Frame::Integer(0));
    }
    if ctx.db().get(&src).map(|e| matches!(e.value, Value::Set(ref s) if s.is_empty())).unwrap_or(false) {
        ctx.db().remove(&src);
    }
    mutate_or_insert(
        ctx.db(),
        &dst,
        ctx.now_ms,
        || Value::Set(RSet::new()),
        |value| {
            value.as_set_mut()?.insert(member.clone());
            Ok(())
        },
    )?;
    Ok(Frame::Integer(1))
}

/// Collects the live sets named by `args[start..]`, or `CommandError::WrongType`
/// if any named key holds something else. Missing keys are treated as empty
/// sets (standard Redis set-algebra semantics).
fn load_sets(ctx: &Ctx, start: usize) -> Result<Vec<RSet>, CommandError> {
    let mut sets = Vec::with_capacity(ctx.args.len() - start);
    for key in &ctx.args[start..] {
        match ctx.db().get_live(key, ctx.now_ms) {
            Some(entry) => sets.push(entry.value.as_set()?.clone()),
            None => sets.push(RSet::new()),
        }
    }
    Ok(sets)
}

fn set_algebra(sets: &[RSet], op: impl Fn(&RSet, &RSet) -> Vec<RedisBytes>) -> Vec<RedisBytes> {
    let mut iter = sets.iter();
    let Some(first) = iter.next() else { return Vec::new() };
    let mut acc: RSet = first.clone();
    for other in iter {
        let next: RSet = op(&acc, other).into_iter().fold(RSet::new(), |mut s, m| {
            s.insert(m);
            s
        });
        acc = next;
    }
    acc.iter().cloned().collect()
}

pub fn sinter(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let sets = load_sets(ctx, 1)?;
    let result = set_algebra(&sets, |a, b| a.intersection(b).cloned().collect());
    Ok(Frame::Array(result.into_iter().map(Frame::bulk).collect()))
}

pub fn sunion(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let sets = load_sets(ctx, 1)?;
    let result = set_algebra(&sets, |a, b| a.union(b).cloned().collect());
    Ok(Frame::Array(result.into_iter().map(Frame::bulk).collect()))
}

pub fn sdiff(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let sets = load_sets(ctx, 1)?;
    let result = set_algebra(&sets, |a, b| a.difference(b).cloned().collect());
    Ok(Frame::Array(result.into_iter().map(Frame::bulk).collect()))
}

fn algebra_store(
    ctx: &mut Ctx,
    op: impl Fn(&RSet, &RSet) -> Vec<RedisBytes>,
) -> Result<Frame, CommandError> {
    let dst = ctx.arg(1)?.clone();
    let sets = load_sets(ctx, 2)?;
    let result = set_algebra(&sets, op);
    let len = result.len();
    if result.is_empty() {
        ctx.db().remove(&dst);
    } else {
        let mut set = RSet::new();
        for m in result {
            set.insert(m);
        }
        ctx.db().insert(dst, crate::value::Entry::new(Value::Set(set)));
    }
    Ok(Frame::Integer(len as i64))
}

pub fn sinterstore(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    algebra_store(ctx, |a, b| a.intersection(b).cloned().collect())
}

pub fn sunionstore(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    algebra_store(ctx, |a, b| a.union(b).cloned().collect())
}

pub fn sdiffstore(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    algebra_store(ctx, |a, b| a.difference(b).cloned().collect())
}
