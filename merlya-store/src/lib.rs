#![deny(missing_docs)]
//! SQLite-backed inventory for merlya.
//!
//! One [`InventoryStore`] per process, holding hosts, their version log,
//! deletion tombstones, import sources, non-sensitive config variables and
//! the append-only audit table under `~/.merlya/inventory.db`.
//!
//! Secrets never touch this crate: the schema has no column for them and
//! the API accepts none. All mutations run in transactions; on rollback no
//! partial state is visible. Writers serialize on the connection lock;
//! readers observe committed snapshots (WAL mode).

pub mod inventory;
pub mod schema;
pub mod ssh_config;

pub use inventory::{HostSearch, ImportSource, InventoryStore};
pub use ssh_config::{ParsedSshHost, parse_ssh_config};

use thiserror::Error;

/// Errors from inventory operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input does not match the declared shape or grammar.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database I/O failure.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// JSON column (tags, metadata, os_info) failed to encode or decode.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
