//! # merlya-types: vocabulary for the merlya execution substrate
//!
//! This crate defines the data types every other merlya crate speaks:
//!
//! | Module | What it defines |
//! |--------|-----------------|
//! | [`host`] | [`Host`], [`HostName`], [`ElevationMethod`], [`HealthStatus`], update patches |
//! | [`secret`] | [`SecretKey`] grammar, namespaces, [`SecretAccessEvent`] |
//! | [`trace`] | [`ToolCall`] trace entries read by the loop detector |
//! | [`audit`] | [`AuditRecord`] / [`AuditOutcome`] observation records |
//! | [`config`] | [`MerlyaConfig`] and its sections, with documented defaults |
//! | [`error`] | [`DispatchError`], the typed boundary taxonomy with exit codes |
//!
//! These are data types only; behavior (the store, the pool, the breaker,
//! the dispatcher) lives in the crates above. Keeping the vocabulary in one
//! dependency-light crate is what lets the SSH stack, the policy engine and
//! the CLI evolve independently without import cycles.

#![deny(missing_docs)]

pub mod audit;
pub mod config;
pub mod error;
pub mod host;
pub mod secret;
pub mod trace;

pub use audit::{AuditOutcome, AuditRecord};
pub use config::{
    BreakerConfig, ExecConfig, I18nConfig, Language, LoopConfig, MerlyaConfig, SecretsConfig,
    SshConfig,
};
pub use error::DispatchError;
pub use host::{
    ElevationMethod, FieldUpdate, HealthStatus, Host, HostName, HostNameError, HostPatch,
    MAX_JUMP_DEPTH,
};
pub use secret::{SecretAccessEvent, SecretAccessOutcome, SecretKey, SecretKeyError};
pub use trace::{ResultKind, ToolCall};
