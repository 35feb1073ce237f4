//! The combined secret store: in-memory cache plus optional keyring mirror.
//!
//! Resolution order on read: resident map → keyring (when the key namespace
//! is persistable) → none. Writes go to the map and, for non-elevation
//! keys, to the keyring. Every access emits a [`SecretAccessEvent`] whose
//! value field does not exist; only the key name travels.

use crate::cache::{CacheLookup, SecretCache};
use crate::keyring::KeyringAdapter;
use crate::{SecretError, SecretValue};
use merlya_types::{HostName, SecretAccessEvent, SecretAccessOutcome, SecretKey};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Observer for secret accesses; wired to the audit sink by the dispatcher.
pub trait SecretAccessObserver: Send + Sync {
    /// Called after every read attempt. The event carries the key name and
    /// outcome, never the value.
    fn on_access(&self, event: &SecretAccessEvent);
}

/// A credential held by the process.
///
/// `Host` and `Secret` carry a [`SecretValue`] and therefore cannot be
/// serialized; the variant itself is the guarantee that no code path
/// writes them to the on-disk inventory. `Config` is the one non-sensitive
/// kind; it is persisted by the inventory store, not here.
#[non_exhaustive]
#[derive(Debug)]
pub enum Credential {
    /// Transient SSH password for a host.
    Host {
        /// Target host.
        host: HostName,
        /// Login user the password belongs to.
        user: String,
        /// The password.
        password: SecretValue,
    },
    /// Persisted, non-sensitive user variable.
    Config {
        /// Variable name.
        name: String,
        /// Variable value.
        value: String,
    },
    /// Sensitive value, in-memory only.
    Secret {
        /// Store key.
        key: SecretKey,
        /// The value.
        value: SecretValue,
    },
}

/// Process-wide secret store.
pub struct SecretStore {
    cache: SecretCache,
    keyring: Option<Arc<dyn KeyringAdapter>>,
    keyring_available: AtomicBool,
    fallback_warned: AtomicBool,
    observer: RwLock<Option<Arc<dyn SecretAccessObserver>>>,
}

impl SecretStore {
    /// A store with the given TTL and no keyring backend.
    pub fn memory_only(ttl: Duration) -> Self {
        Self {
            cache: SecretCache::new(ttl),
            keyring: None,
            keyring_available: AtomicBool::new(false),
            fallback_warned: AtomicBool::new(true),
            observer: RwLock::new(None),
        }
    }

    /// A store mirroring persistable keys to `keyring`.
    ///
    /// Availability is probed once with a read of a sentinel key; a backend
    /// that errors is dropped to memory-only mode with a single warning.
    pub fn with_keyring(ttl: Duration, keyring: Arc<dyn KeyringAdapter>) -> Self {
        let available = match keyring.get("merlya-keyring-probe") {
            Ok(_) => true,
            Err(e) => {
                warn!("OS keyring unavailable, secrets are memory-only: {e}");
                false
            }
        };
        Self {
            cache: SecretCache::new(ttl),
            keyring: Some(keyring),
            keyring_available: AtomicBool::new(available),
            fallback_warned: AtomicBool::new(!available),
            observer: RwLock::new(None),
        }
    }

    /// Install the access observer. Replaces any previous one.
    pub fn set_observer(&self, observer: Arc<dyn SecretAccessObserver>) {
        *self.observer.write().expect("observer lock") = Some(observer);
    }

    /// Whether the keyring backend is present and answering.
    pub fn keyring_available(&self) -> bool {
        self.keyring_available.load(Ordering::Relaxed)
    }

    /// Store a secret. Elevation keys stay in memory; other namespaces are
    /// mirrored to the keyring when one is available.
    pub fn set(&self, key: &SecretKey, value: SecretValue) -> Result<(), SecretError> {
        if key.is_persistable() {
            if let Some(keyring) = self.usable_keyring() {
                let result = value.with_str(|plain| keyring.set(key.as_str(), plain));
                if let Err(e) = result {
                    self.degrade_keyring(&e);
                }
            }
        }
        self.cache.set(key.clone(), value);
        Ok(())
    }

    /// Fetch a secret: memory first, then the keyring for persistable
    /// namespaces. A keyring hit is re-cached with a fresh TTL.
    pub fn get(&self, key: &SecretKey) -> Option<Arc<SecretValue>> {
        let (value, outcome, access_count) = match self.cache.get(key) {
            CacheLookup::Hit {
                value,
                access_count,
            } => (Some(value), SecretAccessOutcome::Resolved, access_count),
            CacheLookup::Expired => {
                debug!(key = %key, "secret expired, evicted");
                match self.keyring_fetch(key) {
                    KeyringFetch::Found(value) => (Some(value), SecretAccessOutcome::Resolved, 1),
                    KeyringFetch::Absent => (None, SecretAccessOutcome::Expired, 0),
                    KeyringFetch::Failed => (None, SecretAccessOutcome::BackendFailed, 0),
                }
            }
            CacheLookup::Miss => match self.keyring_fetch(key) {
                KeyringFetch::Found(value) => (Some(value), SecretAccessOutcome::Resolved, 1),
                KeyringFetch::Absent => (None, SecretAccessOutcome::Missing, 0),
                KeyringFetch::Failed => (None, SecretAccessOutcome::BackendFailed, 0),
            },
        };
        self.emit(key, outcome, access_count);
        value
    }

    /// Elevation-credential lookup: resident map first, then the keyring
    /// even though the namespace is never *written* there by merlya; the
    /// user may have seeded it externally. Absence returns `None`; in
    /// non-interactive mode the caller turns that into a fatal error
    /// naming the key.
    pub fn elevation_get(&self, key: &SecretKey) -> Option<Arc<SecretValue>> {
        let (value, outcome, access_count) = match self.cache.get(key) {
            CacheLookup::Hit {
                value,
                access_count,
            } => (Some(value), SecretAccessOutcome::Resolved, access_count),
            CacheLookup::Expired | CacheLookup::Miss => match self.usable_keyring() {
                Some(keyring) => match keyring.get(key.as_str()) {
                    Ok(Some(plain)) => {
                        let value = Arc::new(SecretValue::from_string(plain));
                        (Some(value), SecretAccessOutcome::Resolved, 1)
                    }
                    Ok(None) => (None, SecretAccessOutcome::Missing, 0),
                    Err(e) => {
                        self.degrade_keyring(&e);
                        (None, SecretAccessOutcome::BackendFailed, 0)
                    }
                },
                None => (None, SecretAccessOutcome::Missing, 0),
            },
        };
        self.emit(key, outcome, access_count);
        value
    }

    /// Remove a secret from both copies. Never errors when absent.
    pub fn clear(&self, key: &SecretKey) {
        self.cache.remove(key);
        if let Some(keyring) = self.usable_keyring() {
            if key.is_persistable() {
                if let Err(e) = keyring.delete(key.as_str()) {
                    debug!(key = %key, "keyring delete failed: {e}");
                }
            }
        }
    }

    /// Drop every resident secret, zeroing the buffers. The keyring is
    /// left untouched; this is the process-exit path.
    pub fn zeroize_all(&self) {
        self.cache.clear_all();
    }

    /// Names of resident secrets, sorted. Values never appear.
    pub fn names(&self) -> Vec<SecretKey> {
        self.cache.names()
    }

    /// Up to five known names matching `prefix` case-insensitively, for
    /// "did you mean" suggestions.
    pub fn candidates(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.to_ascii_lowercase();
        self.cache
            .names()
            .into_iter()
            .map(|k| k.as_str().to_string())
            .filter(|name| name.to_ascii_lowercase().starts_with(&prefix))
            .take(5)
            .collect()
    }

    fn usable_keyring(&self) -> Option<&Arc<dyn KeyringAdapter>> {
        if self.keyring_available.load(Ordering::Relaxed) {
            self.keyring.as_ref()
        } else {
            None
        }
    }

    fn degrade_keyring(&self, cause: &SecretError) {
        self.keyring_available.store(false, Ordering::Relaxed);
        if !self.fallback_warned.swap(true, Ordering::Relaxed) {
            warn!("OS keyring unavailable, secrets are memory-only: {cause}");
        }
    }

    fn keyring_fetch(&self, key: &SecretKey) -> KeyringFetch {
        if !key.is_persistable() {
            return KeyringFetch::Absent;
        }
        let Some(keyring) = self.usable_keyring() else {
            return KeyringFetch::Absent;
        };
        match keyring.get(key.as_str()) {
            Ok(Some(plain)) => {
                let value = SecretValue::from_string(plain);
                self.cache.set(key.clone(), value);
                match self.cache.get(key) {
                    CacheLookup::Hit { value, .. } => KeyringFetch::Found(value),
                    // TTL zero: the re-cached value is already stale, hand
                    // the caller a fresh copy instead.
                    _ => match keyring.get(key.as_str()) {
                        Ok(Some(plain)) => {
                            KeyringFetch::Found(Arc::new(SecretValue::from_string(plain)))
                        }
                        _ => KeyringFetch::Absent,
                    },
                }
            }
            Ok(None) => KeyringFetch::Absent,
            Err(e) => {
                self.degrade_keyring(&e);
                KeyringFetch::Failed
            }
        }
    }

    fn emit(&self, key: &SecretKey, outcome: SecretAccessOutcome, access_count: u64) {
        let observer = self.observer.read().expect("observer lock").clone();
        if let Some(observer) = observer {
            let timestamp_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            observer.on_access(&SecretAccessEvent {
                key: key.clone(),
                outcome,
                access_count,
                timestamp_ms,
            });
        }
    }
}

enum KeyringFetch {
    Found(Arc<SecretValue>),
    Absent,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::{BrokenKeyring, MemoryKeyring};
    use std::sync::Mutex;

    fn key(s: &str) -> SecretKey {
        SecretKey::parse(s).unwrap()
    }

    struct Recorder(Mutex<Vec<SecretAccessEvent>>);

    impl SecretAccessObserver for Recorder {
        fn on_access(&self, event: &SecretAccessEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn memory_roundtrip_and_clear() {
        let store = SecretStore::memory_only(Duration::from_secs(900));
        store
            .set(&key("db-password"), SecretValue::from_string("s3cr3t".into()))
            .unwrap();
        let value = store.get(&key("db-password")).unwrap();
        assert!(value.with_str(|s| s == "s3cr3t"));
        store.clear(&key("db-password"));
        assert!(store.get(&key("db-password")).is_none());
        // clearing an absent key never errors
        store.clear(&key("db-password"));
    }

    #[test]
    fn persistable_keys_reach_the_keyring() {
        let keyring = Arc::new(MemoryKeyring::new());
        let store = SecretStore::with_keyring(Duration::from_secs(900), keyring.clone());
        store
            .set(&key("api-token"), SecretValue::from_string("t0k3n".into()))
            .unwrap();
        assert_eq!(keyring.get("api-token").unwrap().as_deref(), Some("t0k3n"));
    }

    #[test]
    fn elevation_keys_never_reach_the_keyring() {
        let keyring = Arc::new(MemoryKeyring::new());
        let store = SecretStore::with_keyring(Duration::from_secs(900), keyring.clone());
        store
            .set(
                &key("sudo:box-1:password"),
                SecretValue::from_string("pw".into()),
            )
            .unwrap();
        assert_eq!(keyring.get("sudo:box-1:password").unwrap(), None);
        assert!(store.get(&key("sudo:box-1:password")).is_some());
    }

    #[test]
    fn keyring_backs_memory_misses() {
        let keyring = Arc::new(MemoryKeyring::new());
        keyring.set("api-token", "persisted").unwrap();
        let store = SecretStore::with_keyring(Duration::from_secs(900), keyring);
        let value = store.get(&key("api-token")).unwrap();
        assert!(value.with_str(|s| s == "persisted"));
    }

    #[test]
    fn broken_keyring_degrades_to_memory_only() {
        let store = SecretStore::with_keyring(Duration::from_secs(900), Arc::new(BrokenKeyring));
        assert!(!store.keyring_available());
        store
            .set(&key("api-token"), SecretValue::from_string("x".into()))
            .unwrap();
        assert!(store.get(&key("api-token")).is_some());
    }

    #[test]
    fn accesses_emit_redacted_events() {
        let store = SecretStore::memory_only(Duration::from_secs(900));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        store.set_observer(recorder.clone());

        store
            .set(&key("db-password"), SecretValue::from_string("s3cr3t".into()))
            .unwrap();
        let _ = store.get(&key("db-password"));
        let _ = store.get(&key("missing"));

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, SecretAccessOutcome::Resolved);
        assert_eq!(events[0].access_count, 1);
        assert_eq!(events[1].outcome, SecretAccessOutcome::Missing);
        // the serialized event must not contain the value anywhere
        let json = serde_json::to_string(&events[0]).unwrap();
        assert!(!json.contains("s3cr3t"));
    }

    #[test]
    fn candidates_are_prefix_limited() {
        let store = SecretStore::memory_only(Duration::from_secs(900));
        for name in ["db-password", "db-passphrase", "db-port", "api-token"] {
            store
                .set(&key(name), SecretValue::from_string("v".into()))
                .unwrap();
        }
        let got = store.candidates("DB-PASS");
        assert_eq!(got, vec!["db-passphrase", "db-password"]);
        assert!(store.candidates("zz").is_empty());
    }
}
