//! OS keyring adapter.
//!
//! The keyring is a black-box capability with `set`/`get`/`delete`. The
//! trait exists so tests can inject [`MemoryKeyring`] and so the secret
//! store can detect an unavailable backend and degrade to memory-only.

use crate::SecretError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Object-safe keyring capability.
///
/// Implementations may fail; callers treat any error as "backend
/// unavailable" and stop mirroring to it.
pub trait KeyringAdapter: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError>;

    /// Fetch the value under `key`. `Ok(None)` when absent.
    fn get(&self, key: &str) -> Result<Option<String>, SecretError>;

    /// Remove the value under `key`. Absence is not an error.
    fn delete(&self, key: &str) -> Result<(), SecretError>;
}

/// Keyring backed by the platform credential service
/// (macOS Keychain, Windows Credential Manager, Secret Service on Linux).
pub struct OsKeyring {
    service: String,
}

impl OsKeyring {
    /// Adapter for the default `merlya` service name.
    pub fn new() -> Self {
        Self::with_service("merlya")
    }

    /// Adapter scoped to a custom service name (used by tests to avoid
    /// touching the real `merlya` entries).
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, SecretError> {
        keyring::Entry::new(&self.service, key).map_err(|e| SecretError::Backend(e.to_string()))
    }
}

impl Default for OsKeyring {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringAdapter for OsKeyring {
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| SecretError::Backend(e.to_string()))
    }

    fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretError::Backend(e.to_string())),
        }
    }

    fn delete(&self, key: &str) -> Result<(), SecretError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SecretError::Backend(e.to_string())),
        }
    }
}

/// In-memory keyring for tests and for platforms without a credential
/// service.
#[derive(Default)]
pub struct MemoryKeyring {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyring {
    /// An empty in-memory keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("memory keyring lock").len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyringAdapter for MemoryKeyring {
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        self.entries
            .lock()
            .expect("memory keyring lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(self
            .entries
            .lock()
            .expect("memory keyring lock")
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &str) -> Result<(), SecretError> {
        self.entries.lock().expect("memory keyring lock").remove(key);
        Ok(())
    }
}

/// A keyring that fails every call; used in tests to exercise the
/// unavailability fallback.
pub struct BrokenKeyring;

impl KeyringAdapter for BrokenKeyring {
    fn set(&self, _key: &str, _value: &str) -> Result<(), SecretError> {
        Err(SecretError::Backend("no secret service".into()))
    }

    fn get(&self, _key: &str) -> Result<Option<String>, SecretError> {
        Err(SecretError::Backend("no secret service".into()))
    }

    fn delete(&self, _key: &str) -> Result<(), SecretError> {
        Err(SecretError::Backend("no secret service".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn adapter_is_object_safe() {
        _assert_send_sync::<Box<dyn KeyringAdapter>>();
        _assert_send_sync::<Arc<dyn KeyringAdapter>>();
        let _: Arc<dyn KeyringAdapter> = Arc::new(MemoryKeyring::new());
    }

    #[test]
    fn memory_keyring_roundtrip() {
        let kr = MemoryKeyring::new();
        assert_eq!(kr.get("api-token").unwrap(), None);
        kr.set("api-token", "t0k3n").unwrap();
        assert_eq!(kr.get("api-token").unwrap().as_deref(), Some("t0k3n"));
        kr.delete("api-token").unwrap();
        assert_eq!(kr.get("api-token").unwrap(), None);
        // deleting twice is fine
        kr.delete("api-token").unwrap();
    }
}
