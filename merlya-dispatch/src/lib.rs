#![deny(missing_docs)]
//! End-to-end command dispatch for merlya.
//!
//! [`Dispatcher::run_on_host`] orchestrates one logical operation: resolve
//! the target, expand secret references, classify risk and apply policy,
//! consult the loop detector, pass the circuit breaker, acquire a pooled
//! session, apply elevation and execute; recording every outcome to the
//! audit sink, the breaker, the tool-call trace and the host's health.
//!
//! The substrate singletons (pool, store, breakers, audit, secret cache,
//! metrics) live in [`ExecutionContext`], an explicit object threaded
//! through call sites rather than ambient globals; tests build a fresh one
//! per case.

pub mod audit;
pub mod context;
pub mod dispatcher;
pub mod metrics;

pub use audit::{AuditSink, MemoryAuditSink, SecretAuditBridge, StoreAuditSink};
pub use context::{ContextBroker, ContextBuilder, ExecutionContext, PromptHandler};
pub use dispatcher::{Dispatcher, ExecOptions, ExecResult};
pub use metrics::{Metrics, MetricsSnapshot};
