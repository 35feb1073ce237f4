#![deny(missing_docs)]
//! SSH execution for merlya: the session pool, the elevation executor and
//! file transfer.
//!
//! The pool hands out authenticated sessions per host, with keep-alive
//! heartbeats, an idle reaper, jump-host chaining and per-host caps. The
//! elevation module rewrites commands into the form a host's
//! `elevation_method` requires and prepares the password bytes piped on
//! standard input. All network access goes through the [`SessionTransport`]
//! trait; the real implementation is [`russh_transport::RusshConnector`],
//! and a scripted in-process double ships behind the `test-utils` feature
//! so the pool and the dispatcher are testable without a network.

pub mod elevation;
pub mod pool;
pub mod russh_transport;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

pub use elevation::{ElevatedCommand, apply_elevation, strip_elevation};
pub use pool::{HostResolver, PoolStats, SessionHandle, SessionInfo, SessionPool};
pub use russh_transport::RusshConnector;
pub use transport::{
    CredentialBroker, ExecOutput, MfaPrompt, SessionTransport, TransportConnector,
};

use std::time::Duration;
use thiserror::Error;

/// Errors from SSH connection, execution and transfer.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SshError {
    /// Every configured authentication method was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transport-level failure: connect, handshake, channel I/O.
    #[error("network error: {0}")]
    Network(String),

    /// A deadline fired while connecting or executing.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The jump chain is unusable: missing host, cycle, or too deep.
    #[error("jump chain error: {0}")]
    JumpChain(String),

    /// The host's circuit breaker refused the call before any socket was
    /// opened.
    #[error("circuit breaker open, probe in {}s", retry_in.as_secs())]
    BreakerOpen {
        /// Time until a probe will be admitted.
        retry_in: Duration,
    },

    /// The host requires an elevation credential that is not available.
    #[error("elevation credential missing: {key}")]
    ElevationCredentialMissing {
        /// The canonical key that was looked up.
        key: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,

    /// Local file I/O during a transfer.
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for protocol-level failures.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        // auth rejections surface through AuthResult, not through Error;
        // anything the protocol layer throws is a transport fault here
        Self::Network(err.to_string())
    }
}
