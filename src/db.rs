//! Components A (hash table half) and D: the versioned-snapshot keyspace map
//! and the N-database keyspace built on top of it.
//!
//! `spec.md` §9 "Versioned-snapshot map" asks for an open-addressed table
//! whose iteration reads a retained previous backing array while writers
//! continue against a fresh one, with the old array released once the last
//! reader drops it. `Arc<HashMap<_, _>>` behind a `parking_lot::RwLock`
//! gives exactly that lifecycle for free: `snapshot()` clones the `Arc`
//! (a refcount bump, not a copy); a subsequent write calls
//! `Arc::make_mut`, which clones the backing `HashMap` only if a snapshot
//! is still holding a reference to it, and mutates in place otherwise. The
//! teacher's own map (`examples/yijun-tang-rudis/src/server.rs`'s
//! `RedisDB { dict: HashMap<...>, ... }`) has no such concurrent-iteration
//! story at all — this is where the pack's replication/Raft-flavored repos
//! (`examples/other_examples/manifests/*raft*`) motivate reaching for
//! persistent-style sharing instead.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bytes::RedisBytes;
use crate::value::{Entry, Value, NO_EXPIRE};

/// A single database's keyspace: byte-string keys to `Entry` values, with
/// versioned-snapshot semantics for consistent concurrent iteration
/// (`spec.md` §9).
#[derive(Default)]
pub struct HashDb {
    inner: RwLock<Arc<HashMap<RedisBytes, Entry>>>,
}

impl HashDb {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// A consistent point-in-time view. Cheap: bumps a refcount. The
    /// returned `Arc` keeps its backing table alive even as writers swap in
    /// fresh copies underneath (`spec.md` §9: "every key that existed at T,
    /// never exposing a partial mutation").
    pub fn snapshot(&self) -> Arc<HashMap<RedisBytes, Entry>> {
        self.inner.read().clone()
    }

    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.inner.read().get(key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Inserts or replaces `key`'s entry, returning the prior value if any.
    pub fn insert(&self, key: RedisBytes, entry: Entry) -> Option<Entry> {
        let mut guard = self.inner.write();
        Arc::make_mut(&mut guard).insert(key, entry)
    }

    pub fn remove(&self, key: &[u8]) -> Option<Entry> {
        let mut guard = self.inner.write();
        Arc::make_mut(&mut guard).remove(key)
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write();
        *guard = Arc::new(HashMap::new());
    }

    /// Mutates `key`'s value in place via `f`, inserting `default()` first
    /// if absent *or if the existing entry has expired* — a key past its
    /// `expire_at` is logically gone, so a write path must start it fresh
    /// rather than mutate the stale value, matching what the `get_live`-based
    /// read path already reports. Used by handlers that need read-modify-
    /// write without re-cloning the value twice (`APPEND`, `INCRBY`, list
    /// pushes, ...).
    pub fn with_entry_or_insert<F, R>(&self, key: &RedisBytes, now_ms: i64, default: impl FnOnce() -> Value, f: F) -> R
    where
        F: FnOnce(&mut Entry) -> R,
    {
        let mut guard = self.inner.write();
        let map = Arc::make_mut(&mut guard);
        if map.get(key.as_bytes()).is_some_and(|e| e.is_expired(now_ms)) {
            map.remove(key.as_bytes());
        }
        let entry = map
            .entry(key.clone())
            .or_insert_with(|| Entry::new(default()));
        f(entry)
    }

    /// Mutates an existing, live key's value via `f`, returning `None` if
    /// absent or expired without creating a tombstone entry. An expired
    /// entry is dropped outright rather than left for the next sweep, since
    /// a caller reaching `with_entry` is already acting on the assumption
    /// that the key doesn't exist.
    pub fn with_entry<F, R>(&self, key: &[u8], now_ms: i64, f: F) -> Option<R>
    where
        F: FnOnce(&mut Entry) -> R,
    {
        let mut guard = self.inner.write();
        let map = Arc::make_mut(&mut guard);
        if map.get(key).is_some_and(|e| e.is_expired(now_ms)) {
            map.remove(key);
            return None;
        }
        map.get_mut(key).map(f)
    }

    pub fn set_expire(&self, key: &[u8], now_ms: i64, expire_at: i64) -> bool {
        self.with_entry(key, now_ms, |e| e.expire_at = expire_at).is_some()
    }

    pub fn persist(&self, key: &[u8], now_ms: i64) -> bool {
        self.with_entry(key, now_ms, |e| {
            let had = e.expire_at != NO_EXPIRE;
            e.expire_at = NO_EXPIRE;
            had
        })
        .unwrap_or(false)
    }

    /// Drops every key whose expiration has passed as of `now_ms`. Called
    /// lazily on access and periodically by the server's background sweep
    /// (`spec.md` doesn't mandate active expiry beyond "storing a per-entry
    /// timeout field" as in scope; this sweep keeps memory bounded without
    /// adding a scheduling concern the spec calls out of scope).
    pub fn sweep_expired(&self, now_ms: i64) -> usize {
        let expired: Vec<RedisBytes> = {
            let guard = self.inner.read();
            guard
                .iter()
                .filter(|(_, e)| e.is_expired(now_ms))
                .map(|(k, _)| k.clone())
                .collect()
        };
        let mut guard = self.inner.write();
        let map = Arc::make_mut(&mut guard);
        let mut removed = 0;
        for k in expired {
            if let Some(e) = map.get(&k) {
                if e.is_expired(now_ms) {
                    map.remove(&k);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Reads a key, transparently treating an expired entry as absent
    /// without mutating the map (the removal happens lazily via
    /// `sweep_expired` or the next write path).
    pub fn get_live(&self, key: &[u8], now_ms: i64) -> Option<Entry> {
        self.get(key).filter(|e| !e.is_expired(now_ms))
    }
}

/// The full N-database keyspace (`spec.md` §4.D: "A fixed array of N
/// independent databases").
pub struct Keyspace {
    databases: Vec<HashDb>,
}

impl Keyspace {
    pub fn new(n: usize) -> Self {
        let mut databases = Vec::with_capacity(n);
        for _ in 0..n {
            databases.push(HashDb::new());
        }
        Self { databases }
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn get(&self, index: usize) -> Option<&HashDb> {
        self.databases.get(index)
    }

    pub fn db(&self, index: usize) -> &HashDb {
        &self.databases[index]
    }

    pub fn flush_one(&self, index: usize) {
        if let Some(db) = self.databases.get(index) {
            db.clear();
        }
    }

    pub fn flush_all(&self) {
        for db in &self.databases {
            db.clear();
        }
    }

    pub fn sweep_expired_all(&self, now_ms: i64) -> usize {
        self.databases.iter().map(|d| d.sweep_expired(now_ms)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RString;

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let db = HashDb::new();
        db.insert(RedisBytes::from("a"), Entry::new(Value::Str(RString::new(b"1".to_vec()))));
        let snap = db.snapshot();
        db.insert(RedisBytes::from("b"), Entry::new(Value::Str(RString::new(b"2".to_vec()))));
        assert_eq!(snap.len(), 1);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn remove_and_contains() {
        let db = HashDb::new();
        let key = RedisBytes::from("k");
        db.insert(key.clone(), Entry::new(Value::Str(RString::new(b"v".to_vec()))));
        assert!(db.contains(b"k"));
        assert!(db.remove(b"k").is_some());
        assert!(!db.contains(b"k"));
    }

    #[test]
    fn expired_entries_are_invisible_but_not_removed_until_swept() {
        let db = HashDb::new();
        let key = RedisBytes::from("k");
        db.insert(key.clone(), Entry::new(Value::Str(RString::new(b"v".to_vec()))));
        db.set_expire(b"k", 0, 100);
        assert!(db.get_live(b"k", 200).is_none());
        assert_eq!(db.len(), 1);
        assert_eq!(db.sweep_expired(200), 1);
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn with_entry_or_insert_starts_fresh_on_an_expired_key() {
        let db = HashDb::new();
        let key = RedisBytes::from("k");
        db.insert(key.clone(), Entry::new(Value::Str(RString::new(b"old".to_vec()))));
        db.set_expire(b"k", 0, 100);
        db.with_entry_or_insert(&key, 200, || Value::Str(RString::new(b"fresh".to_vec())), |entry| {
            assert_eq!(entry.value.as_string().unwrap().as_bytes(), b"fresh");
            assert_eq!(entry.expire_at, NO_EXPIRE);
        });
    }

    #[test]
    fn with_entry_treats_an_expired_key_as_absent() {
        let db = HashDb::new();
        let key = RedisBytes::from("k");
        db.insert(key.clone(), Entry::new(Value::Str(RString::new(b"old".to_vec()))));
        db.set_expire(b"k", 0, 100);
        assert!(db.with_entry(b"k", 200, |_| ()).is_none());
        assert!(!db.contains(b"k"));
    }

    #[test]
    fn keyspace_select_out_of_range_is_none() {
        let ks = Keyspace::new(16);
        assert!(ks.get(16).is_none());
        assert!(ks.get(15).is_some());
    }
}
