//! TTL'd in-memory secret cache.
//!
//! Values are held as [`Arc<SecretValue>`] so a caller can keep a handle
//! while the cache evicts; the backing bytes are zeroed when the last
//! handle drops. Expiry is lazy: an entry older than the TTL is removed by
//! the access that observes it, never by a background task.

use crate::SecretValue;
use merlya_types::SecretKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Result of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    /// Live entry. `access_count` includes this access.
    Hit {
        /// The secret value.
        value: Arc<SecretValue>,
        /// Reads of this key since it was set, this one included.
        access_count: u64,
    },
    /// Entry existed but its age reached the TTL; it has been evicted.
    Expired,
    /// No entry under this key.
    Miss,
}

struct Entry {
    value: Arc<SecretValue>,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

/// In-memory secret map with lazy TTL eviction.
///
/// A TTL of zero means every entry is already stale when read: the secret
/// is evicted on the first access after `set`.
pub struct SecretCache {
    entries: Mutex<HashMap<SecretKey, Entry>>,
    ttl: Duration,
}

impl SecretCache {
    /// Create a cache whose entries expire `ttl` after they were set.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// The configured eviction age.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or replace a value. Replacement resets age and access count.
    pub fn set(&self, key: SecretKey, value: SecretValue) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("secret cache lock");
        entries.insert(
            key,
            Entry {
                value: Arc::new(value),
                created_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    /// Look up a key, bumping `last_accessed` and `access_count` on a hit
    /// and evicting the entry when its age has reached the TTL.
    pub fn get(&self, key: &SecretKey) -> CacheLookup {
        let mut entries = self.entries.lock().expect("secret cache lock");
        let Some(entry) = entries.get_mut(key) else {
            return CacheLookup::Miss;
        };
        if entry.created_at.elapsed() >= self.ttl {
            entries.remove(key);
            return CacheLookup::Expired;
        }
        entry.last_accessed = Instant::now();
        entry.access_count += 1;
        CacheLookup::Hit {
            value: Arc::clone(&entry.value),
            access_count: entry.access_count,
        }
    }

    /// Remove a key. Returns whether an entry existed.
    pub fn remove(&self, key: &SecretKey) -> bool {
        self.entries
            .lock()
            .expect("secret cache lock")
            .remove(key)
            .is_some()
    }

    /// Drop every entry. Backing buffers are zeroed as the values drop.
    pub fn clear_all(&self) {
        self.entries.lock().expect("secret cache lock").clear();
    }

    /// Names of all resident keys, sorted. Values are never listed.
    pub fn names(&self) -> Vec<SecretKey> {
        let entries = self.entries.lock().expect("secret cache lock");
        let mut names: Vec<SecretKey> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of resident entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("secret cache lock").len()
    }

    /// True when no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SecretKey {
        SecretKey::parse(s).unwrap()
    }

    #[test]
    fn hit_bumps_access_count() {
        let cache = SecretCache::new(Duration::from_secs(900));
        cache.set(key("db-password"), SecretValue::from_string("x".into()));

        for expected in 1..=3u64 {
            match cache.get(&key("db-password")) {
                CacheLookup::Hit { access_count, .. } => assert_eq!(access_count, expected),
                other => panic!("expected hit, got {other:?}"),
            }
        }
    }

    #[test]
    fn zero_ttl_evicts_on_first_read() {
        let cache = SecretCache::new(Duration::ZERO);
        cache.set(key("k"), SecretValue::from_string("v".into()));
        assert!(matches!(cache.get(&key("k")), CacheLookup::Expired));
        assert!(matches!(cache.get(&key("k")), CacheLookup::Miss));
    }

    #[test]
    fn replace_resets_counters() {
        let cache = SecretCache::new(Duration::from_secs(900));
        cache.set(key("k"), SecretValue::from_string("one".into()));
        let _ = cache.get(&key("k"));
        cache.set(key("k"), SecretValue::from_string("two".into()));
        match cache.get(&key("k")) {
            CacheLookup::Hit {
                value,
                access_count,
            } => {
                assert_eq!(access_count, 1);
                assert!(value.with_str(|s| s == "two"));
            }
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[test]
    fn names_are_sorted_and_value_free() {
        let cache = SecretCache::new(Duration::from_secs(900));
        cache.set(key("b"), SecretValue::from_string("2".into()));
        cache.set(key("a"), SecretValue::from_string("1".into()));
        let names: Vec<String> = cache
            .names()
            .into_iter()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
