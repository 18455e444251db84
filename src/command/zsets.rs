//! Sorted-set command handlers (`spec.md` §4.E + SPEC_FULL.md §11).
//!
//! Grounded on `examples/yijun-tang-rudis/src/cmd.rs`'s `zadd_command` /
//! `zrange_command` / `zrangebyscore_command` family, retargeted onto
//! `RZSet`'s `BTreeSet`-backed rank/score ranges.

use super::{mutate_existing, mutate_or_insert, parse_f64, parse_i64, Ctx};
use crate::error::CommandError;
use crate::resp::Frame;
use crate::value::{RZSet, Value};

/// `ZADD key score member [score member ...]`.
pub fn zadd(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let rest = &ctx.args[2..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(CommandError::Syntax);
    }
    let mut pairs = Vec::with_capacity(rest.len() / 2);
    for c in rest.chunks_exact(2) {
        pairs.push((parse_f64(&c[0])?, c[1].clone()));
    }
    let added = mutate_or_insert(
        ctx.db(),
        &key,
        ctx.now_ms,
        || Value::ZSet(RZSet::new()),
        |value| {
            let zset = value.as_zset_mut()?;
            let mut added = 0;
            for (score, member) in pairs {
                if zset.insert(member, score) {
                    added += 1;
                }
            }
            Ok(added)
        },
    )?;
    Ok(Frame::Integer(added as i64))
}

fn render_range(pairs: Vec<(crate::bytes::RedisBytes, f64)>, with_scores: bool) -> Frame {
    let mut out = Vec::with_capacity(pairs.len() * if with_scores { 2 } else { 1 });
    for (member, score) in pairs {
        out.push(Frame::bulk(member));
        if with_scores {
            out.push(Frame::bulk(format_score(score)));
        }
    }
    Frame::Array(out)
}

/// Integral scores print without a trailing `.0`, matching Redis's own
/// `%.17g`-then-trim float formatting for the common integer case.
fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.is_finite() {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

fn wants_scores(args: &[crate::bytes::RedisBytes], idx: usize) -> bool {
    args.get(idx).map(|a| a.eq_ignore_ascii_case(b"WITHSCORES")).unwrap_or(false)
}

pub fn zrange(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let start = parse_i64(ctx.arg(2)?)?;
    let stop = parse_i64(ctx.arg(3)?)?;
    let with_scores = wants_scores(ctx.args, 4);
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(render_range(entry.value.as_zset()?.range_by_rank(start, stop), with_scores)),
        None => Ok(Frame::Array(Vec::new())),
    }
}

pub fn zrevrange(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let start = parse_i64(ctx.arg(2)?)?;
    let stop = parse_i64(ctx.arg(3)?)?;
    let with_scores = wants_scores(ctx.args, 4);
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(render_range(entry.value.as_zset()?.range_by_rank_rev(start, stop), with_scores)),
        None => Ok(Frame::Array(Vec::new())),
    }
}

pub fn zrangebyscore(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let min = parse_f64(ctx.arg(2)?)?;
    let max = parse_f64(ctx.arg(3)?)?;
    let with_scores = wants_scores(ctx.args, 4);
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(render_range(entry.value.as_zset()?.range_by_score(min, max), with_scores)),
        None => Ok(Frame::Array(Vec::new())),
    }
}

pub fn zcard(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => Ok(Frame::Integer(entry.value.as_zset()?.len() as i64)),
        None => Ok(Frame::Integer(0)),
    }
}

pub fn zscore(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?;
    let member = ctx.arg(2)?;
    match ctx.db().get_live(key, ctx.now_ms) {
        Some(entry) => match entry.value.as_zset()?.score(member) {
            Some(score) => Ok(Frame::bulk(format_score(score))),
            None => Ok(Frame::NullBulk),
        },
        None => Ok(Frame::NullBulk),
    }
}

pub fn zrem(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let members: Vec<_> = ctx.args[2..].to_vec();
    let removed = mutate_existing(ctx.db(), &key, ctx.now_ms, |value| {
        let zset = value.as_zset_mut()?;
        Ok(members.iter().filter(|m| zset.remove(m)).count())
    })?
    .unwrap_or(0);
    if ctx.db().get(&key).map(|e| matches!(e.value, Value::ZSet(ref z) if z.is_empty())).unwrap_or(false) {
        ctx.db().remove(&key);
    }
    Ok(Frame::Integer(removed as i64))
}

pub fn zincrby(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let delta = parse_f64(ctx.arg(2)?)?;
    let member = ctx.arg(3)?.clone();
    let new_score = mutate_or_insert(
        ctx.db(),
        &key,
        ctx.now_ms,
        || Value::ZSet(RZSet::new()),
        |value| Ok(value.as_zset_mut()?.incr_by(member.clone(), delta)),
    )?;
    Ok(Frame::bulk(format_score(new_score)))
}

pub fn zremrangebyscore(ctx: &mut Ctx) -> Result<Frame, CommandError> {
    let key = ctx.arg(1)?.clone();
    let min = parse_f64(ctx.arg(2)?)?;
    let max = parse_f64(ctx.arg(3)?)?;
    let removed = mutate_existing(ctx.db(), &key, ctx.now_ms, |value| Ok(value.as_zset_mut()?.remove_range_by_score(min, max)))?
        .unwrap_or(0);
    if ctx.db().get(&key).map(|e| matches!(e.value, Value::ZSet(ref z) if z.is_empty())).unwrap_or(false) {
        ctx.db().remove(&key);
    }
    Ok(Frame::Integer(removed as i64))
}
