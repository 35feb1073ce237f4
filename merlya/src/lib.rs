#![deny(missing_docs)]
//! # merlya: SSH execution substrate
//!
//! Facade crate re-exporting the merlya workspace behind feature gates:
//!
//! | Feature | Pulls in | What you get |
//! |---------|----------|--------------|
//! | `core` (default) | types, store, secret | Inventory, vocabulary, secret handling |
//! | `policy` | + policy | Risk classifier, loop detector |
//! | `breaker` | + breaker | Per-host circuit breaking |
//! | `ssh` | + ssh | Session pool, elevation, transfers |
//! | `dispatch` / `full` | + dispatch | The end-to-end dispatcher |
//!
//! Most binaries want `features = ["full"]` and start from
//! [`dispatch::ContextBuilder`].

/// Vocabulary types: hosts, credentials, config, errors, audit.
#[cfg(feature = "core")]
pub use merlya_types as types;

/// SQLite inventory.
#[cfg(feature = "core")]
pub use merlya_store as store;

/// Secret cache, keyring adapter and `@name` resolver.
#[cfg(feature = "core")]
pub use merlya_secret as secret;

/// Risk classification and loop detection.
#[cfg(feature = "policy")]
pub use merlya_policy as policy;

/// Per-host circuit breaker.
#[cfg(feature = "breaker")]
pub use merlya_breaker as breaker;

/// SSH session pool and elevation.
#[cfg(feature = "ssh")]
pub use merlya_ssh as ssh;

/// End-to-end dispatch.
#[cfg(feature = "dispatch")]
pub use merlya_dispatch as dispatch;
