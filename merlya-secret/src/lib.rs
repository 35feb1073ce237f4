#![deny(missing_docs)]
//! Secret handling for merlya.
//!
//! This crate defines the [`SecretValue`] in-memory wrapper (no Serialize,
//! no Display, no Clone; memory zeroed on drop), the TTL'd [`SecretCache`],
//! the OS [`KeyringAdapter`] with its in-memory test double, the combined
//! [`SecretStore`], and the [`resolver`] that expands `@name` references in
//! two modes (`redacted` for anything LLM-bound, `resolved` for execution).
//!
//! ## Design
//!
//! - Secrets live in process memory only. The store exposes no serialization
//!   path for them; the on-disk inventory never sees a secret value.
//! - [`SecretValue`] uses scoped exposure (`with_bytes` / `with_str`) to keep
//!   accidental `Display`/log leaks impossible at the type level.
//! - The keyring is an opaque capability. Unavailability is detected once at
//!   construction and the store degrades to memory-only with a single warning.

pub mod cache;
pub mod keyring;
pub mod resolver;
pub mod store;

pub use cache::{CacheLookup, SecretCache};
pub use keyring::{BrokenKeyring, KeyringAdapter, MemoryKeyring, OsKeyring};
pub use resolver::{ReferenceSource, ResolveMode, resolve_references};
pub use store::{Credential, SecretAccessObserver, SecretStore};

use thiserror::Error;
use zeroize::Zeroizing;

/// Errors from secret storage and resolution.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SecretError {
    /// No value under this reference. Carries up to five near matches by
    /// case-insensitive prefix.
    #[error("unknown reference @{name}{}", format_suggestions(.suggestions))]
    NotFound {
        /// The reference that failed to resolve.
        name: String,
        /// Nearest known names, for the error message.
        suggestions: Vec<String>,
    },

    /// The key does not match the secret-key grammar.
    #[error(transparent)]
    InvalidKey(#[from] merlya_types::SecretKeyError),

    /// The keyring backend failed.
    #[error("keyring backend error: {0}")]
    Backend(String),
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

/// An opaque secret value. Cannot be logged, serialized, or cloned.
/// Memory is zeroed on drop via [`Zeroizing`].
///
/// The only ways to read the value are [`SecretValue::with_bytes`] and
/// [`SecretValue::with_str`], which enforce scoped exposure; the secret is
/// only visible inside the closure.
pub struct SecretValue {
    inner: Zeroizing<Vec<u8>>,
}

impl SecretValue {
    /// Create a new secret value. The input vector is moved, not copied.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: Zeroizing::new(bytes),
        }
    }

    /// Create a secret from a string, consuming and zeroing the original.
    pub fn from_string(mut s: String) -> Self {
        let value = Self::new(s.as_bytes().to_vec());
        zeroize::Zeroize::zeroize(&mut s);
        value
    }

    /// Scoped exposure. The secret bytes are only accessible inside the
    /// closure.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.inner)
    }

    /// Scoped exposure as UTF-8. Non-UTF-8 bytes are replaced lossily;
    /// passwords entered through merlya are always valid UTF-8.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        match std::str::from_utf8(&self.inner) {
            Ok(s) => f(s),
            Err(_) => {
                let owned = Zeroizing::new(String::from_utf8_lossy(&self.inner).into_owned());
                f(&owned)
            }
        }
    }

    /// Length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

// Intentionally: no Display, no Clone, no Serialize, no PartialEq.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_shows_value() {
        let v = SecretValue::from_string("hunter2".into());
        assert_eq!(format!("{v:?}"), "[REDACTED]");
    }

    #[test]
    fn scoped_exposure_returns_bytes() {
        let v = SecretValue::new(b"s3cr3t".to_vec());
        assert_eq!(v.with_bytes(<[u8]>::to_vec), b"s3cr3t");
        assert!(v.with_str(|s| s == "s3cr3t"));
        assert_eq!(v.len(), 6);
        assert!(!v.is_empty());
    }

    #[test]
    fn not_found_lists_suggestions() {
        let err = SecretError::NotFound {
            name: "db-pass".into(),
            suggestions: vec!["db-password".into(), "db-passphrase".into()],
        };
        assert_eq!(
            err.to_string(),
            "unknown reference @db-pass (did you mean: db-password, db-passphrase?)"
        );
        let bare = SecretError::NotFound {
            name: "x".into(),
            suggestions: vec![],
        };
        assert_eq!(bare.to_string(), "unknown reference @x");
    }
}
