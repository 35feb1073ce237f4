//! Secret-handling vocabulary: key grammar, namespaces, access events.
//!
//! These are data types only. The value-carrying types (`SecretValue`, the
//! TTL'd cache) live in `merlya-secret`; this module defines what a secret
//! *key* is and how accesses are observed, so that the store, the resolver
//! and the audit sink agree without depending on each other.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a string is not a valid secret key.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid secret key {0:?}: allowed characters are [A-Za-z0-9_\\-:./]")]
pub struct SecretKeyError(pub String);

/// A validated secret-store key, grammar `[A-Za-z0-9_\-:./]+`.
///
/// Elevation credentials use the canonical formats `sudo:<host>:password`,
/// `doas:<host>:password` and `root:<host>:password`; key passphrases use
/// `ssh-passphrase:<name>`. Keys in those namespaces are never written to
/// the OS keyring adapter by default policy; see
/// [`SecretKey::is_elevation_key`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    /// Parse and validate a secret key.
    pub fn parse(raw: &str) -> Result<Self, SecretKeyError> {
        if raw.is_empty() || !raw.chars().all(is_key_char) {
            return Err(SecretKeyError(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key names an elevation password
    /// (`sudo:…:password`, `doas:…:password`, `root:…:password`).
    pub fn is_elevation_key(&self) -> bool {
        let mut parts = self.0.splitn(3, ':');
        let (Some(ns), Some(host), Some(rest)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        matches!(ns, "sudo" | "doas" | "root") && !host.is_empty() && rest == "password"
    }

    /// Whether this key names an SSH key passphrase (`ssh-passphrase:<name>`).
    pub fn is_passphrase_key(&self) -> bool {
        self.0
            .strip_prefix("ssh-passphrase:")
            .is_some_and(|rest| !rest.is_empty())
    }

    /// Whether the key's namespace may be mirrored to the OS keyring.
    ///
    /// Elevation passwords stay in process memory only; everything else is
    /// persistable when a keyring backend is available.
    pub fn is_persistable(&self) -> bool {
        !self.is_elevation_key()
    }
}

impl std::fmt::Display for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SecretKey {
    type Err = SecretKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Character class of the secret key grammar.
pub fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/')
}

/// What happened on a secret access attempt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretAccessOutcome {
    /// Value found and handed to the caller.
    Resolved,
    /// No value under this key.
    Missing,
    /// Value existed but was past its TTL and has been evicted.
    Expired,
    /// The keyring backend failed.
    BackendFailed,
}

/// Observation record for one secret access. The value never appears here.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretAccessEvent {
    /// The key that was accessed (label, not the value).
    pub key: SecretKey,
    /// What happened.
    pub outcome: SecretAccessOutcome,
    /// Total reads of this key since it was set, including this one.
    pub access_count: u64,
    /// When it happened (Unix timestamp milliseconds).
    pub timestamp_ms: u64,
}
