//! The dispatcher-boundary error taxonomy.
//!
//! Every internal failure (store, secret, transport, policy) is recovered at
//! the dispatcher boundary and mapped into [`DispatchError`]; nothing below
//! the boundary panics across it. Each variant knows its CLI exit code and a
//! one-line piece of actionable guidance; error messages never embed secret
//! values.

use std::time::Duration;
use thiserror::Error;

/// Typed failure returned by the dispatcher and surfaced to callers.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Input does not match the declared shape or grammar.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requested host, secret, or session does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation (duplicate host name).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store I/O failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Fast-failed by the circuit breaker.
    #[error("circuit breaker open for {host}")]
    BreakerOpen {
        /// The host whose breaker is open.
        host: String,
        /// Time until a probe will be admitted, if known.
        retry_in: Option<Duration>,
    },

    /// SSH authentication denied.
    #[error("authentication failed for {0}")]
    AuthFailure(String),

    /// Transport-level failure: connect, handshake, or channel I/O.
    #[error("network error: {0}")]
    Network(String),

    /// Non-interactive elevation required a credential that is not present.
    #[error("elevation credential missing: {key}")]
    ElevationCredentialMissing {
        /// The canonical key that was looked up, e.g. `sudo:box-1:password`.
        key: String,
    },

    /// The risk policy demands a user decision before execution.
    #[error("confirmation required ({level}): {rationale}")]
    ConfirmationRequired {
        /// Classified risk level, `moderate` or `critical`.
        level: String,
        /// Why the command was classified at that level.
        rationale: String,
    },

    /// The loop detector vetoed the call.
    #[error("loop detected: {advisory}")]
    LoopRedirect {
        /// Advisory for the caller: change approach.
        advisory: String,
    },

    /// Cooperative cancellation or a fired deadline.
    #[error("{}", cancel_label(.deadline))]
    Cancelled {
        /// True when a deadline fired rather than an explicit cancel.
        deadline: bool,
    },

    /// The remote side refused the operation after successful auth.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

fn cancel_label(deadline: &bool) -> &'static str {
    if *deadline { "timed out" } else { "cancelled" }
}

impl DispatchError {
    /// Process exit code for the one-shot CLI.
    ///
    /// `0` success, `2` usage error, `3` breaker open, `4` confirmation
    /// required, `5` elevation credential missing, `6` cancelled/timeout,
    /// `1` everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::BreakerOpen { .. } => 3,
            Self::ConfirmationRequired { .. } => 4,
            Self::ElevationCredentialMissing { .. } => 5,
            Self::Cancelled { .. } => 6,
            _ => 1,
        }
    }

    /// Second-line actionable guidance for user-facing rendering.
    pub fn guidance(&self) -> String {
        match self {
            Self::Validation(_) => "Check the argument shape and retry.".into(),
            Self::NotFound(what) => {
                format!("Nothing named {what:?} is known; list the inventory to see candidates.")
            }
            Self::Conflict(_) => "A host with this name already exists; delete it first or pick another name.".into(),
            Self::Persistence(_) => "The inventory database is unreadable or locked; check ~/.merlya/.".into(),
            Self::BreakerOpen { host, retry_in } => match retry_in {
                Some(d) => format!("Calls to {host} are suspended; retrying in ~{}s.", d.as_secs()),
                None => format!("Calls to {host} are suspended until a probe succeeds."),
            },
            Self::AuthFailure(_) => "Verify the username, key, or stored password for this host.".into(),
            Self::Network(_) => "Check connectivity and the host address/port.".into(),
            Self::ElevationCredentialMissing { key } => {
                format!("Store the password with `merlya secret set {key}` or run interactively.")
            }
            Self::ConfirmationRequired { .. } => {
                "Re-run interactively, or pass --yes (and allow_critical for critical commands).".into()
            }
            Self::LoopRedirect { .. } => "The same call keeps failing; change the approach instead of retrying.".into(),
            Self::Cancelled { deadline: true } => "Raise ssh.command_timeout if the command legitimately runs long.".into(),
            Self::Cancelled { deadline: false } => "The operation was interrupted before completion.".into(),
            Self::PermissionDenied(_) => "The remote user lacks rights; check the host's elevation method.".into(),
            Self::Other(_) => "See the log for details.".into(),
        }
    }
}
