//! Host inventory data types.
//!
//! A [`Host`] is the unit of targeting: a validated [`HostName`] plus the
//! connection and elevation attributes the session pool and the elevation
//! executor need. Hosts reference each other by name (`jump_host`), never by
//! pointer; the store rejects cycles at write time and the pool resolves the
//! chain lazily at session acquisition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Maximum length of a host name in bytes (DNS name limit).
pub const MAX_HOST_NAME_LEN: usize = 253;

/// Maximum length of a single DNS label in bytes.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum depth of a jump-host chain, target included.
pub const MAX_JUMP_DEPTH: usize = 4;

/// Error returned when a string is not a valid host name.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostNameError {
    /// The name is empty.
    #[error("host name is empty")]
    Empty,

    /// The name exceeds 253 bytes.
    #[error("host name exceeds {MAX_HOST_NAME_LEN} bytes: {0} bytes")]
    TooLong(usize),

    /// A label exceeds 63 bytes.
    #[error("host name label exceeds {MAX_LABEL_LEN} bytes: {0:?}")]
    LabelTooLong(String),

    /// A label is empty (leading, trailing, or doubled dot).
    #[error("host name has an empty label")]
    EmptyLabel,

    /// A character outside the DNS-label grammar, or an uppercase letter.
    #[error("invalid character {1:?} in host name {0:?}")]
    InvalidChar(String, char),

    /// A label starts or ends with a hyphen.
    #[error("host name label starts or ends with a hyphen: {0:?}")]
    HyphenEdge(String),
}

/// A validated host name: unique store key, lowercase DNS-label grammar,
/// at most 253 bytes.
///
/// `HostName` is immutable for the life of the inventory row; renaming a
/// host is deletion plus recreation. Lookups are case-insensitive; the name
/// is folded to lowercase at parse time so equality stays byte-wise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct HostName(String);

impl HostName {
    /// Parse and validate a host name. Uppercase input is folded to
    /// lowercase before validation.
    pub fn parse(raw: &str) -> Result<Self, HostNameError> {
        let name = raw.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(HostNameError::Empty);
        }
        if name.len() > MAX_HOST_NAME_LEN {
            return Err(HostNameError::TooLong(name.len()));
        }
        for label in name.split('.') {
            if label.is_empty() {
                return Err(HostNameError::EmptyLabel);
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(HostNameError::LabelTooLong(label.to_string()));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(HostNameError::HyphenEdge(label.to_string()));
            }
            if let Some(bad) = label
                .chars()
                .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
            {
                return Err(HostNameError::InvalidChar(name.clone(), bad));
            }
        }
        Ok(Self(name))
    }

    /// The validated name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HostName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for HostName {
    type Err = HostNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for HostName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// How privileged execution is obtained on a host.
///
/// Methods ending in `_password`, and `su`, require a credential lookup at
/// execution time under the canonical key returned by
/// [`ElevationMethod::credential_key`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElevationMethod {
    /// Run commands as the SSH user, unmodified.
    #[default]
    None,
    /// `sudo -n`; NOPASSWD sudo; fails rather than prompts.
    Sudo,
    /// `sudo -S -p ''` with the password piped on standard input.
    SudoPassword,
    /// `doas` without a password.
    Doas,
    /// `doas` with the password piped on standard input.
    DoasPassword,
    /// `su -c '<command>'` with the root password piped on standard input.
    Su,
}

impl ElevationMethod {
    /// Stable identifier used in the store and in audit records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Sudo => "sudo",
            Self::SudoPassword => "sudo_password",
            Self::Doas => "doas",
            Self::DoasPassword => "doas_password",
            Self::Su => "su",
        }
    }

    /// Parse the stable identifier back into a method.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "sudo" => Some(Self::Sudo),
            "sudo_password" => Some(Self::SudoPassword),
            "doas" => Some(Self::Doas),
            "doas_password" => Some(Self::DoasPassword),
            "su" => Some(Self::Su),
            _ => None,
        }
    }

    /// Whether execution with this method needs a password at run time.
    pub fn requires_credential(&self) -> bool {
        matches!(self, Self::SudoPassword | Self::DoasPassword | Self::Su)
    }

    /// Canonical secret-store key for this method's password on `host`,
    /// or `None` when no credential is involved.
    ///
    /// Formats: `sudo:<host>:password`, `doas:<host>:password`,
    /// `root:<host>:password`.
    pub fn credential_key(&self, host: &HostName) -> Option<String> {
        let prefix = match self {
            Self::SudoPassword => "sudo",
            Self::DoasPassword => "doas",
            Self::Su => "root",
            _ => return None,
        };
        Some(format!("{prefix}:{host}:password"))
    }
}

/// Last observed reachability of a host.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Never probed, or probe results expired.
    #[default]
    Unknown,
    /// Last command or probe succeeded.
    Healthy,
    /// Reachable but misbehaving (keep-alive losses, slow session setup).
    Degraded,
    /// The circuit breaker is open or connection attempts fail outright.
    Unreachable,
}

impl HealthStatus {
    /// Stable identifier used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unreachable => "unreachable",
        }
    }

    /// Parse the stable identifier back into a status.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Self::Unknown),
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "unreachable" => Some(Self::Unreachable),
            _ => None,
        }
    }
}

/// One inventory row: a target the dispatcher can run commands on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Unique, immutable store key.
    pub name: HostName,
    /// Address or DNS name the transport connects to.
    pub hostname: String,
    /// TCP port, 1..=65535.
    pub port: u16,
    /// Login user; falls back to the process owner when absent.
    pub username: Option<String>,
    /// Path to a private key file, if key auth is configured.
    pub private_key_path: Option<String>,
    /// Name of another inventory host used as a jump host.
    pub jump_host: Option<HostName>,
    /// Unordered set of short labels.
    pub tags: BTreeSet<String>,
    /// Opaque key/value annotations.
    pub metadata: BTreeMap<String, String>,
    /// How privileged execution is obtained.
    pub elevation_method: ElevationMethod,
    /// Last observed reachability.
    pub health_status: HealthStatus,
    /// Observed OS snapshot (e.g. trimmed `uname -a`), if any.
    pub os_info: Option<serde_json::Value>,
    /// Last successful command or probe against this host.
    pub last_seen: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// A fresh host with defaults for everything but name and address.
    pub fn new(name: HostName, hostname: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name,
            hostname: hostname.into(),
            port: 22,
            username: None,
            private_key_path: None,
            jump_host: None,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            elevation_method: ElevationMethod::None,
            health_status: HealthStatus::Unknown,
            os_info: None,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Tri-state update for a nullable host field.
///
/// Updates never silently erase non-null fields: an absent field keeps the
/// stored value, and erasure must be spelled out with [`FieldUpdate::Clear`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
    /// Leave the stored value untouched.
    Keep,
    /// Erase the stored value.
    Clear,
    /// Replace the stored value.
    Set(T),
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        Self::Keep
    }
}

impl<T> FieldUpdate<T> {
    /// Apply this update to the current value.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Self::Keep => current,
            Self::Clear => None,
            Self::Set(v) => Some(v),
        }
    }

    /// Whether applying this update changes anything.
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

/// Attribute changes for an upsert. Every field defaults to "keep".
#[derive(Debug, Clone, Default)]
pub struct HostPatch {
    /// New connect address.
    pub hostname: Option<String>,
    /// New port.
    pub port: Option<u16>,
    /// Login user.
    pub username: FieldUpdate<String>,
    /// Private key path.
    pub private_key_path: FieldUpdate<String>,
    /// Jump host reference.
    pub jump_host: FieldUpdate<HostName>,
    /// Replacement tag set.
    pub tags: Option<BTreeSet<String>>,
    /// Metadata entries, deep-merged into the stored map.
    pub metadata: BTreeMap<String, String>,
    /// Elevation method.
    pub elevation_method: Option<ElevationMethod>,
    /// Health status.
    pub health_status: Option<HealthStatus>,
    /// Observed OS snapshot.
    pub os_info: FieldUpdate<serde_json::Value>,
    /// Last-seen timestamp.
    pub last_seen: FieldUpdate<DateTime<Utc>>,
}

impl HostPatch {
    /// A patch that changes nothing.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_folds_case() {
        let name = HostName::parse("Web-01.Example.COM").unwrap();
        assert_eq!(name.as_str(), "web-01.example.com");
    }

    #[test]
    fn accepts_253_bytes_rejects_254() {
        // 4 labels of 62 bytes + 3 dots = 251; add a 1-byte label = 253.
        let label = "a".repeat(62);
        let ok = format!("{label}.{label}.{label}.{label}.a");
        assert_eq!(ok.len(), 253);
        assert!(HostName::parse(&ok).is_ok());

        let too_long = format!("{label}.{label}.{label}.{label}.ab");
        assert_eq!(too_long.len(), 254);
        assert_eq!(
            HostName::parse(&too_long),
            Err(HostNameError::TooLong(254))
        );
    }

    #[test]
    fn rejects_bad_labels() {
        assert_eq!(HostName::parse(""), Err(HostNameError::Empty));
        assert_eq!(HostName::parse("a..b"), Err(HostNameError::EmptyLabel));
        assert!(matches!(
            HostName::parse("-leading"),
            Err(HostNameError::HyphenEdge(_))
        ));
        assert!(matches!(
            HostName::parse("under_score"),
            Err(HostNameError::InvalidChar(_, '_'))
        ));
        assert!(matches!(
            HostName::parse(&"x".repeat(64)),
            Err(HostNameError::LabelTooLong(_))
        ));
    }

    #[test]
    fn elevation_credential_keys() {
        let host = HostName::parse("box-1").unwrap();
        assert_eq!(ElevationMethod::None.credential_key(&host), None);
        assert_eq!(ElevationMethod::Sudo.credential_key(&host), None);
        assert_eq!(
            ElevationMethod::SudoPassword.credential_key(&host).unwrap(),
            "sudo:box-1:password"
        );
        assert_eq!(
            ElevationMethod::DoasPassword.credential_key(&host).unwrap(),
            "doas:box-1:password"
        );
        assert_eq!(
            ElevationMethod::Su.credential_key(&host).unwrap(),
            "root:box-1:password"
        );
    }

    #[test]
    fn elevation_roundtrips_store_ids() {
        for m in [
            ElevationMethod::None,
            ElevationMethod::Sudo,
            ElevationMethod::SudoPassword,
            ElevationMethod::Doas,
            ElevationMethod::DoasPassword,
            ElevationMethod::Su,
        ] {
            assert_eq!(ElevationMethod::from_str_opt(m.as_str()), Some(m));
        }
        assert_eq!(ElevationMethod::from_str_opt("root"), None);
    }

    #[test]
    fn field_update_semantics() {
        assert_eq!(FieldUpdate::<u16>::Keep.apply(Some(22)), Some(22));
        assert_eq!(FieldUpdate::<u16>::Clear.apply(Some(22)), None);
        assert_eq!(FieldUpdate::Set(2222).apply(Some(22)), Some(2222));
    }

    #[test]
    fn host_serde_roundtrip() {
        let mut host = Host::new(HostName::parse("db-01").unwrap(), "10.0.0.5");
        host.tags.insert("prod".into());
        host.elevation_method = ElevationMethod::SudoPassword;
        let json = serde_json::to_string(&host).unwrap();
        let back: Host = serde_json::from_str(&json).unwrap();
        assert_eq!(back, host);
    }
}
