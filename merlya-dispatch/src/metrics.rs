//! Atomic metric counters. The core exposes counters only; rendering them
//! is the front-end's job.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide execution counters.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Commands that reached a session and completed.
    pub commands_run: AtomicU64,
    /// Commands that failed at the transport layer.
    pub commands_failed: AtomicU64,
    /// Commands refused before execution (policy, breaker, loop).
    pub commands_blocked: AtomicU64,
    /// Commands cancelled or timed out mid-flight.
    pub commands_cancelled: AtomicU64,
    /// Fast-fails returned by an open breaker.
    pub breaker_rejections: AtomicU64,
    /// Loop-detector redirect signals surfaced.
    pub loop_signals: AtomicU64,
    /// Secret references expanded in resolved mode.
    pub secrets_resolved: AtomicU64,
    /// File transfers completed.
    pub transfers: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// See [`Metrics::commands_run`].
    pub commands_run: u64,
    /// See [`Metrics::commands_failed`].
    pub commands_failed: u64,
    /// See [`Metrics::commands_blocked`].
    pub commands_blocked: u64,
    /// See [`Metrics::commands_cancelled`].
    pub commands_cancelled: u64,
    /// See [`Metrics::breaker_rejections`].
    pub breaker_rejections: u64,
    /// See [`Metrics::loop_signals`].
    pub loop_signals: u64,
    /// See [`Metrics::secrets_resolved`].
    pub secrets_resolved: u64,
    /// See [`Metrics::transfers`].
    pub transfers: u64,
}

impl Metrics {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_run: self.commands_run.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            commands_blocked: self.commands_blocked.load(Ordering::Relaxed),
            commands_cancelled: self.commands_cancelled.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            loop_signals: self.loop_signals.load(Ordering::Relaxed),
            secrets_resolved: self.secrets_resolved.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
        }
    }
}
