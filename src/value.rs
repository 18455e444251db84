//! Component B: the five polymorphic value shapes.
//!
//! `spec.md` §9 ("Polymorphic values") calls for a tagged variant dispatched
//! by tag, replacing the teacher's class-hierarchy-flavored
//! `RedisObject`/`*StorageType` split (`examples/yijun-tang-rudis/src/obj.rs`).
//! The five `R*` containers below keep the teacher's per-shape operation set
//! (`ListStorageType::range`, `SetStorageType::get_random_key`,
//! `ZSetStorageType::dict`/`skiplist`) but store directly-ownable collections
//! instead of wrapping every element in `Arc<RwLock<RedisObject>>`.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use ordered_float::OrderedFloat;
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::bytes::RedisBytes;
use crate::error::CommandError;

/// No expiration set for a key (`spec.md` §3: "absolute milliseconds; -1 =
/// none").
pub const NO_EXPIRE: i64 = -1;

/// A keyspace entry: a value plus its expiration. Expiration lives beside
/// the value rather than inside it (`spec.md` §9 "Back-references key->value
/// owning key": we keep the association explicit rather than embedding a
/// self-pointer, and the natural place to hang "explicit" data that isn't
/// part of the value's own shape is the entry that owns it).
#[derive(Clone, Debug)]
pub struct Entry {
    pub value: Value,
    /// Absolute ms since epoch, or `NO_EXPIRE`.
    pub expire_at: i64,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expire_at: NO_EXPIRE,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expire_at != NO_EXPIRE && self.expire_at <= now_ms
    }
}

/// Tagged union of the five value shapes (`spec.md` §3).
#[derive(Clone, Debug)]
pub enum Value {
    Str(RString),
    List(RList),
    Hash(RHash),
    Set(RSet),
    ZSet(RZSet),
}

impl Value {
    /// Type byte used by the RDB format (`spec.md` §4.G): 0 string, 1 list,
    /// 2 set, 3 zset, 4 hash.
    pub fn type_code(&self) -> u8 {
        match self {
            Value::Str(_) => 0,
            Value::List(_) => 1,
            Value::Set(_) => 2,
            Value::ZSet(_) => 3,
            Value::Hash(_) => 4,
        }
    }

    /// Name used by the `TYPE` command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
        }
    }

    pub fn as_string(&self) -> Result<&RString, CommandError> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_string_mut(&mut self) -> Result<&mut RString, CommandError> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_list(&self) -> Result<&RList, CommandError> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_list_mut(&mut self) -> Result<&mut RList, CommandError> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_hash(&self) -> Result<&RHash, CommandError> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_hash_mut(&mut self) -> Result<&mut RHash, CommandError> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_set(&self) -> Result<&RSet, CommandError> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_set_mut(&mut self) -> Result<&mut RSet, CommandError> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_zset(&self) -> Result<&RZSet, CommandError> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CommandError::WrongType),
        }
    }
    pub fn as_zset_mut(&mut self) -> Result<&mut RZSet, CommandError> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CommandError::WrongType),
        }
    }
}

/// *String*: a growable byte buffer (`spec.md` §3).
#[derive(Clone, Debug, Default)]
pub struct RString {
    buf: Vec<u8>,
}

impl RString {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Amortised O(1) append (`spec.md` §3).
    pub fn append(&mut self, more: &[u8]) {
        self.buf.extend_from_slice(more);
    }

    /// In-place integer increment; `spec.md` §8 boundary: non-numeric
    /// content is rejected with `NotAnInteger`.
    pub fn incr_by(&mut self, delta: i64) -> Result<i64, CommandError> {
        let current: i64 = if self.buf.is_empty() {
            0
        } else {
            std::str::from_utf8(&self.buf)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or(CommandError::NotAnInteger)?
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| CommandError::Other("increment or decrement would overflow".into()))?;
        self.buf = next.to_string().into_bytes();
        Ok(next)
    }

    pub fn getrange(&self, start: i64, end: i64) -> Vec<u8> {
        let len = self.buf.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let (mut s, mut e) = (normalize_index(start, len), normalize_index(end, len));
        s = s.clamp(0, len - 1);
        e = e.clamp(0, len - 1);
        if s > e {
            return Vec::new();
        }
        self.buf[s as usize..=e as usize].to_vec()
    }
}

/// Negative indices count from the end (`spec.md` §3: "-1 = last").
fn normalize_index(i: i64, len: i64) -> i64 {
    if i < 0 {
        len + i
    } else {
        i
    }
}

/// *List*: ordered sequence with O(1) push/pop at both ends (`spec.md` §3).
#[derive(Clone, Debug, Default)]
pub struct RList {
    items: VecDeque<RedisBytes>,
}

impl RList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_front(&mut self, v: RedisBytes) {
        self.items.push_front(v);
    }
    pub fn push_back(&mut self, v: RedisBytes) {
        self.items.push_back(v);
    }
    pub fn pop_front(&mut self) -> Option<RedisBytes> {
        self.items.pop_front()
    }
    pub fn pop_back(&mut self) -> Option<RedisBytes> {
        self.items.pop_back()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn index(&self, index: i64) -> Option<&RedisBytes> {
        let len = self.items.len() as i64;
        let idx = normalize_index(index, len);
        if idx < 0 || idx >= len {
            None
        } else {
            self.items.get(idx as usize)
        }
    }

    pub fn set(&mut self, index: i64, v: RedisBytes) -> Result<(), CommandError> {
        let len = self.items.len() as i64;
        let idx = normalize_index(index, len);
        if idx < 0 || idx >= len {
            return Err(CommandError::OutOfRange);
        }
        self.items[idx as usize] = v;
        Ok(())
    }

    /// Range query with negative indices, clamped and possibly crossed
    /// (`spec.md` §8: "matches Redis").
    pub fn range(&self, start: i64, stop: i64) -> Vec<RedisBytes> {
        let len = self.items.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let mut s = normalize_index(start, len).max(0);
        let mut e = normalize_index(stop, len);
        if e >= len {
            e = len - 1;
        }
        if s > e || s >= len {
            return Vec::new();
        }
        if e < 0 {
            return Vec::new();
        }
        if s < 0 {
            s = 0;
        }
        self.items
            .iter()
            .skip(s as usize)
            .take((e - s + 1) as usize)
            .cloned()
            .collect()
    }

    pub fn trim(&mut self, start: i64, stop: i64) {
        let kept = self.range(start, stop);
        self.items = kept.into_iter().collect();
    }

    /// Value-equality remove, from either the head (`count > 0`) or the
    /// tail (`count < 0`); `count == 0` removes every match.
    pub fn remove(&mut self, count: i64, target: &RedisBytes) -> usize {
        let mut removed = 0usize;
        if count >= 0 {
            let limit = if count == 0 { usize::MAX } else { count as usize };
            let mut kept = VecDeque::with_capacity(self.items.len());
            for item in self.items.drain(..) {
                if removed < limit && &item == target {
                    removed += 1;
                } else {
                    kept.push_back(item);
                }
            }
            self.items = kept;
        } else {
            let limit = (-count) as usize;
            let mut kept: VecDeque<RedisBytes> = VecDeque::with_capacity(self.items.len());
            for item in self.items.drain(..).rev() {
                if removed < limit && &item == target {
                    removed += 1;
                } else {
                    kept.push_front(item);
                }
            }
            self.items = kept;
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &RedisBytes> {
        self.items.iter()
    }
}

/// *Hash*: keyed map byte-string -> byte-string (`spec.md` §3).
#[derive(Clone, Debug, Default)]
pub struct RHash {
    fields: HashMap<RedisBytes, RedisBytes>,
}

impl RHash {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set(&mut self, field: RedisBytes, value: RedisBytes) -> bool {
        self.fields.insert(field, value).is_none()
    }
    pub fn get(&self, field: &[u8]) -> Option<&RedisBytes> {
        self.fields.get(field)
    }
    pub fn del(&mut self, field: &[u8]) -> bool {
        self.fields.remove(field).is_some()
    }
    pub fn len(&self) -> usize {
        self.fields.len()
    }
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&RedisBytes, &RedisBytes)> {
        self.fields.iter()
    }
}

/// *Set*: collection of byte-strings with unique membership (`spec.md` §3).
#[derive(Clone, Debug, Default)]
pub struct RSet {
    members: HashSet<RedisBytes>,
}

impl RSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, member: RedisBytes) -> bool {
        self.members.insert(member)
    }
    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.members.remove(member)
    }
    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }
    pub fn len(&self) -> usize {
        self.members.len()
    }
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &RedisBytes> {
        self.members.iter()
    }

    /// Random-element extraction (`spec.md` §3); `count` elements are
    /// removed and returned without replacement.
    pub fn pop_random(&mut self, count: usize) -> Vec<RedisBytes> {
        let mut rng = rand::thread_rng();
        let chosen: Vec<RedisBytes> = self
            .members
            .iter()
            .cloned()
            .choose_multiple(&mut rng, count.min(self.members.len()));
        for m in &chosen {
            self.members.remove(m);
        }
        chosen
    }

    pub fn random_sample(&self, count: usize) -> Vec<RedisBytes> {
        let mut rng = rand::thread_rng();
        self.members
            .iter()
            .cloned()
            .choose_multiple(&mut rng, count.min(self.members.len()))
    }

    pub fn intersection<'a>(&'a self, other: &'a RSet) -> impl Iterator<Item = &'a RedisBytes> {
        self.members.intersection(&other.members)
    }
    pub fn union<'a>(&'a self, other: &'a RSet) -> impl Iterator<Item = &'a RedisBytes> {
        self.members.union(&other.members)
    }
    pub fn difference<'a>(&'a self, other: &'a RSet) -> impl Iterator<Item = &'a RedisBytes> {
        self.members.difference(&other.members)
    }
}

/// *SortedSet* / ZSet: two co-indexed structures (`spec.md` §3) — a member
/// -> score map for O(1) score lookup, and a score-ordered `BTreeSet` for
/// rank-range queries. Duplicate members are rejected by member identity,
/// not by score; ties are broken lexicographically by member
/// (`spec.md` §8: "members kept distinct and ordered lexicographically").
///
/// The teacher's `ZSetStorageType` backs this with a hand-rolled,
/// `Arc<RwLock<Node>>`-linked skip list (`examples/yijun-tang-rudis/src/
/// redis/skiplist.rs`). A `BTreeSet<(OrderedFloat<f64>, RedisBytes)>` gives
/// the same "two co-indexed structures" contract and O(log n + k) score-range
/// queries without the pointer-graph bookkeeping; rank-by-position still
/// walks the ordered set, same as the teacher's own `ListStorageType::range`
/// (skip/take over a linked list) does for lists.
#[derive(Clone, Debug, Default)]
pub struct RZSet {
    scores: HashMap<RedisBytes, f64>,
    ordered: BTreeSet<(OrderedFloat<f64>, RedisBytes)>,
}

impl RZSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Inserts or updates `member`'s score; returns `true` if `member` is
    /// new.
    pub fn insert(&mut self, member: RedisBytes, score: f64) -> bool {
        let is_new = match self.scores.get(&member) {
            Some(&old) => {
                self.ordered.remove(&(OrderedFloat(old), member.clone()));
                false
            }
            None => true,
        };
        self.ordered.insert((OrderedFloat(score), member.clone()));
        self.scores.insert(member, score);
        is_new
    }

    pub fn incr_by(&mut self, member: RedisBytes, delta: f64) -> f64 {
        let new_score = self.scores.get(&member).copied().unwrap_or(0.0) + delta;
        self.insert(member, new_score);
        new_score
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        if let Some((_, score)) = self.scores.remove_entry(member) {
            // Need the owned key for the BTreeSet tuple; look it up via the
            // ordered index since `remove_entry` already consumed the map's
            // copy.
            if let Some(key) = self
                .ordered
                .iter()
                .find(|(s, m)| s.0 == score && m.as_bytes() == member)
                .map(|(s, m)| (*s, m.clone()))
            {
                self.ordered.remove(&key);
            }
            true
        } else {
            false
        }
    }

    /// Rank-range iteration in ascending score order, `start`/`stop` using
    /// the same negative-index convention as lists.
    pub fn range_by_rank(&self, start: i64, stop: i64) -> Vec<(RedisBytes, f64)> {
        let len = self.ordered.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let mut s = normalize_index(start, len).max(0);
        let mut e = normalize_index(stop, len);
        if e >= len {
            e = len - 1;
        }
        if s > e || s >= len || e < 0 {
            return Vec::new();
        }
        if s < 0 {
            s = 0;
        }
        self.ordered
            .iter()
            .skip(s as usize)
            .take((e - s + 1) as usize)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }

    pub fn range_by_rank_rev(&self, start: i64, stop: i64) -> Vec<(RedisBytes, f64)> {
        let mut fwd = self.range_by_rank(start, stop);
        // A reverse rank range over an ascending-ordered set is the
        // complementary slice from the tail; simplest correct approach is to
        // materialize the full reversed order and re-slice.
        let len = self.ordered.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let rev: Vec<(RedisBytes, f64)> = self
            .ordered
            .iter()
            .rev()
            .map(|(score, member)| (member.clone(), score.0))
            .collect();
        let mut s = normalize_index(start, len).max(0);
        let mut e = normalize_index(stop, len);
        if e >= len {
            e = len - 1;
        }
        if s > e || s >= len || e < 0 {
            fwd.clear();
            return fwd;
        }
        if s < 0 {
            s = 0;
        }
        rev.into_iter()
            .skip(s as usize)
            .take((e - s + 1) as usize)
            .collect()
    }

    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<(RedisBytes, f64)> {
        self.ordered
            .range((OrderedFloat(min), RedisBytes::from(""))..)
            .take_while(|(score, _)| score.0 <= max)
            .filter(|(score, _)| score.0 >= min)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }

    pub fn remove_range_by_score(&mut self, min: f64, max: f64) -> usize {
        let victims: Vec<RedisBytes> = self
            .range_by_score(min, max)
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        for m in &victims {
            self.remove(m.as_bytes());
        }
        victims.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RedisBytes, f64)> {
        self.scores.iter().map(|(m, s)| (m, *s))
    }
}

/// Uniform random jitter helper shared by Raft election timeouts and
/// `SRANDMEMBER`-style sampling elsewhere in the crate.
pub fn rand_range_ms(lo: u64, hi: u64) -> u64 {
    rand::thread_rng().gen_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_range_negative_and_crossed() {
        let mut l = RList::new();
        for b in [b"a", b"b", b"c", b"d"] {
            l.push_back(RedisBytes::from(b.to_vec()));
        }
        let r: Vec<Vec<u8>> = l
            .range(-100, 100)
            .into_iter()
            .map(|b| b.as_bytes().to_vec())
            .collect();
        assert_eq!(r, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert!(l.range(2, 1).is_empty());
        let last_two: Vec<Vec<u8>> = l
            .range(-2, -1)
            .into_iter()
            .map(|b| b.as_bytes().to_vec())
            .collect();
        assert_eq!(last_two, vec![b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn string_incr_rejects_non_numeric() {
        let mut s = RString::new(b"abc".to_vec());
        assert_eq!(s.incr_by(1), Err(CommandError::NotAnInteger));
    }

    #[test]
    fn string_getrange_on_empty_is_empty() {
        let s = RString::new(Vec::new());
        assert!(s.getrange(0, -1).is_empty());
    }

    #[test]
    fn zset_ties_broken_lexicographically() {
        let mut z = RZSet::new();
        z.insert(RedisBytes::from("b"), 1.0);
        z.insert(RedisBytes::from("a"), 1.0);
        let r = z.range_by_rank(0, -1);
        assert_eq!(r[0].0.as_bytes(), b"a");
        assert_eq!(r[1].0.as_bytes(), b"b");
    }

    #[test]
    fn zset_remove_and_rescoring() {
        let mut z = RZSet::new();
        z.insert(RedisBytes::from("m"), 5.0);
        z.insert(RedisBytes::from("m"), 2.0);
        assert_eq!(z.score(b"m"), Some(2.0));
        assert_eq!(z.len(), 1);
        assert!(z.remove(b"m"));
        assert_eq!(z.len(), 0);
    }
}
