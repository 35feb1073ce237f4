//! Audit vocabulary: append-only observation records.
//!
//! Audit records carry hashes and labels, never payloads: the command is
//! recorded as a SHA-256 preimage hash and credential material is reduced to
//! the key name. The store persists these in the `audit` table; tests may
//! capture them in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final disposition of an audited operation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Completed with exit code 0.
    Ok,
    /// Completed with a non-zero exit code or a transport error.
    Failed,
    /// Refused before execution (risk policy, breaker, loop detector).
    Blocked,
    /// Cancelled cooperatively or by deadline.
    Cancelled,
}

impl AuditOutcome {
    /// Stable identifier used in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Who initiated the operation (local user, or `agent`).
    pub actor: String,
    /// Operation label: `exec`, `upload`, `download`, `secret_access`,
    /// `host_delete`, `breaker_trip`, …
    pub action: String,
    /// The target host or secret key name.
    pub target: String,
    /// Hex SHA-256 of the command preimage, when the action carries one.
    pub command_hash: Option<String>,
    /// Final disposition.
    pub outcome: AuditOutcome,
    /// Wall-clock duration in milliseconds, when measured.
    pub duration_ms: Option<u64>,
    /// Structured extras (elevation method, stdin_used, credential key
    /// name). Values must never contain secret material.
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    /// A minimal record with empty metadata.
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            target: target.into(),
            command_hash: None,
            outcome,
            duration_ms: None,
            metadata: serde_json::Value::Null,
        }
    }
}
