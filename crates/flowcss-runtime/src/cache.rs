#![forbid(unsafe_code)]

//! Memo cache for evaluated expressions.
//!
//! Entries are keyed by a fingerprint of the expression source and the
//! values of its dependencies (see [`generate_key`]). The cache is an
//! optimization only: a miss just means the expression is evaluated.
//!
//! # Eviction
//!
//! When full, inserting a new key evicts the entry with the lowest access
//! count. Ties go to the oldest insertion, which is why entries live in an
//! [`IndexMap`].
//!
//! # Expiry
//!
//! An entry may carry an absolute expiry time. Expired entries are removed
//! lazily, when `get` or `has` next looks at them.

use flowcss_core::Value;
use flowcss_core::clock::Clock;
use indexmap::IndexMap;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_ms: f64,
    expires_ms: Option<f64>,
    accesses: u64,
}

/// Snapshot returned by [`ResultCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// `(total_accesses - size) / total_accesses`, clamped to `[0, 1]`.
    pub hit_rate: f64,
    /// Keys at 2 bytes per char plus [`Value::estimated_bytes`] per value.
    pub memory_bytes: usize,
}

/// Bounded result cache with optional expiry.
#[derive(Debug)]
pub struct ResultCache {
    entries: IndexMap<String, CacheEntry>,
    max_size: usize,
    clock: Clock,
}

impl ResultCache {
    /// A cache holding at most `max_size` entries (at least one).
    #[must_use]
    pub fn new(max_size: usize, clock: Clock) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size: max_size.max(1),
            clock,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up `key`, counting the access. Expired entries are removed and
    /// reported as absent.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        if self.evict_if_expired(key) {
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.accesses += 1;
        Some(entry.value.clone())
    }

    /// Insert or replace `key`. A replaced entry keeps its access count and
    /// position.
    pub fn set(&mut self, key: impl Into<String>, value: Value, ttl_ms: Option<f64>) {
        let key = key.into();
        let now = self.clock.now_ms();
        let expires_ms = ttl_ms.map(|ttl| now + ttl);

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.created_ms = now;
            entry.expires_ms = expires_ms;
            return;
        }
        if self.entries.len() >= self.max_size {
            self.evict_least_accessed();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_ms: now,
                expires_ms,
                accesses: 0,
            },
        );
    }

    /// Whether a live entry exists for `key`. Does not count as an access.
    pub fn has(&mut self, key: &str) -> bool {
        !self.evict_if_expired(key) && self.entries.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Clock time at which `key` was last written.
    #[must_use]
    pub fn created_ms(&self, key: &str) -> Option<f64> {
        self.entries.get(key).map(|e| e.created_ms)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let total: u64 = self.entries.values().map(|e| e.accesses).sum();
        let unique = self.entries.len() as u64;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (total.saturating_sub(unique) as f64 / total as f64).clamp(0.0, 1.0)
        };
        let memory_bytes = self
            .entries
            .iter()
            .map(|(k, e)| k.chars().count() * 2 + e.value.estimated_bytes())
            .sum();
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hit_rate,
            memory_bytes,
        }
    }

    fn evict_if_expired(&mut self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_ms)
            .is_some_and(|at| now > at);
        if expired {
            self.entries.shift_remove(key);
        }
        expired
    }

    fn evict_least_accessed(&mut self) {
        let victim = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(i, (_, e))| (e.accesses, *i))
            .map(|(i, _)| i);
        if let Some(index) = victim {
            self.entries.shift_remove_index(index);
        }
    }
}

/// Fingerprint an expression together with its dependency values.
///
/// Dependencies are sorted by name and serialized as `name:tag:value` pairs
/// (`n` number, `s` quoted text, `b` bool), so the key does not depend on
/// iteration order and `1`, `"1"` and `true` never collide. The result is
/// `hash(expression)#hash(dependencies)`, each an 8-digit hex rolling hash.
#[must_use]
pub fn generate_key<'a, K>(
    expression: &str,
    dependencies: impl IntoIterator<Item = (K, &'a Value)>,
) -> String
where
    K: AsRef<str>,
{
    let mut pairs: Vec<String> = dependencies
        .into_iter()
        .map(|(name, value)| fingerprint(name.as_ref(), value))
        .collect();
    pairs.sort_unstable();
    format!(
        "{:08x}#{:08x}",
        rolling_hash(expression),
        rolling_hash(&pairs.join(","))
    )
}

fn fingerprint(name: &str, value: &Value) -> String {
    match value {
        Value::Number(n) => format!("{name}:n:{n:?}"),
        Value::Text(text) => format!("{name}:s:{text:?}"),
        Value::Bool(b) => format!("{name}:b:{b}"),
    }
}

/// `h = h * 31 + c` over the chars of `text`, wrapping at 32 bits.
#[must_use]
pub fn rolling_hash(text: &str) -> u32 {
    text.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}
