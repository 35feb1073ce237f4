#![deny(missing_docs)]
//! Per-host circuit breaking for merlya.
//!
//! One [`CircuitBreaker`] per host, held in a [`BreakerMap`]. The machine
//! has three states: `closed` (calls flow, failures are counted), `open`
//! (calls fail fast until `open_duration` elapses), and `half_open`
//! (exactly one probe is admitted; its outcome decides the next state).
//!
//! Counted failures: network errors, session-creation timeouts, and
//! authentication failures after a grace of one (a single wrong password is
//! not a host fault). Not counted: non-zero exit codes, parse errors, or a
//! remote permission refusal after successful auth.

use merlya_types::{BreakerConfig, HostName};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a counted failure happened. Auth failures get one free strike.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport-level failure: connect, handshake, channel I/O.
    Network,
    /// SSH authentication denied.
    Auth,
    /// Session creation or command deadline fired.
    Timeout,
}

/// Fast-fail verdict from an open breaker.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("circuit open; probe admitted in {}s", retry_in.as_secs())]
pub struct BreakerOpen {
    /// Time until the next probe will be admitted.
    pub retry_in: Duration,
}

/// Breaker state, per host.
#[derive(Debug, Clone)]
pub enum BreakerState {
    /// Calls flow; failures are counted.
    Closed,
    /// Calls fail fast until `open_duration` has elapsed.
    Open {
        /// When the breaker tripped.
        opened_at: Instant,
        /// What tripped it.
        failure_cause: FailureKind,
    },
    /// One probe decides whether to close again.
    HalfOpen {
        /// Whether the probe slot is taken.
        probe_inflight: bool,
    },
}

/// Metrics view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// `closed`, `open`, or `half_open`.
    pub state: &'static str,
    /// Consecutive counted failures.
    pub consecutive_failures: u32,
    /// Counted failures over the breaker's lifetime.
    pub total_failures: u64,
    /// Successes over the breaker's lifetime.
    pub total_successes: u64,
    /// Seconds spent in the current state.
    pub time_in_state_secs: u64,
}

/// The per-host state machine.
pub struct CircuitBreaker {
    host: HostName,
    config: BreakerConfig,
    state: BreakerState,
    entered_state_at: Instant,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    auth_grace_available: bool,
}

impl CircuitBreaker {
    /// A closed breaker for `host`.
    pub fn new(host: HostName, config: BreakerConfig) -> Self {
        Self {
            host,
            config,
            state: BreakerState::Closed,
            entered_state_at: Instant::now(),
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            auth_grace_available: true,
        }
    }

    /// Ask permission to attempt a network call.
    ///
    /// In `open`, fails fast until `open_duration` has elapsed, then
    /// transitions to `half_open` and admits the caller as the probe. In
    /// `half_open`, admits exactly one probe; concurrent callers fail fast.
    pub fn try_acquire(&mut self) -> Result<(), BreakerOpen> {
        match &self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open { opened_at, .. } => {
                let elapsed = opened_at.elapsed();
                let open_for = self.config.open_duration();
                if elapsed >= open_for {
                    debug!(host = %self.host, "breaker half-open, admitting probe");
                    self.transition(BreakerState::HalfOpen {
                        probe_inflight: true,
                    });
                    Ok(())
                } else {
                    Err(BreakerOpen {
                        retry_in: open_for - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen { probe_inflight } => {
                if *probe_inflight {
                    Err(BreakerOpen {
                        retry_in: Duration::ZERO,
                    })
                } else {
                    self.state = BreakerState::HalfOpen {
                        probe_inflight: true,
                    };
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call. Closes the breaker and resets counters.
    pub fn record_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_failures = 0;
        self.auth_grace_available = true;
        if !matches!(self.state, BreakerState::Closed) {
            debug!(host = %self.host, "breaker closed after successful probe");
            self.transition(BreakerState::Closed);
        }
    }

    /// Record a counted failure.
    ///
    /// The first auth failure since the last success is forgiven; a wrong
    /// password is not a network fault. A failed half-open probe reopens
    /// immediately regardless of the threshold.
    pub fn record_failure(&mut self, kind: FailureKind) {
        if kind == FailureKind::Auth && self.auth_grace_available {
            self.auth_grace_available = false;
            debug!(host = %self.host, "auth failure within grace, not counted");
            return;
        }
        self.consecutive_failures += 1;
        self.total_failures += 1;

        let should_open = match self.state {
            BreakerState::HalfOpen { .. } => true,
            BreakerState::Closed => {
                self.consecutive_failures >= self.config.failure_threshold
            }
            BreakerState::Open { .. } => false,
        };
        if should_open {
            warn!(
                host = %self.host,
                failures = self.consecutive_failures,
                "breaker open ({kind:?})"
            );
            self.transition(BreakerState::Open {
                opened_at: Instant::now(),
                failure_cause: kind,
            });
        }
    }

    /// Release a half-open probe slot without an outcome (cancelled probe).
    pub fn abort_probe(&mut self) {
        if let BreakerState::HalfOpen { probe_inflight: true } = self.state {
            self.state = BreakerState::HalfOpen {
                probe_inflight: false,
            };
        }
    }

    /// Whether a call attempted now would fail fast.
    pub fn is_open(&self) -> bool {
        match &self.state {
            BreakerState::Open { opened_at, .. } => {
                opened_at.elapsed() < self.config.open_duration()
            }
            _ => false,
        }
    }

    /// Metrics view.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = match self.state {
            BreakerState::Closed => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen { .. } => "half_open",
        };
        BreakerSnapshot {
            state,
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            time_in_state_secs: self.entered_state_at.elapsed().as_secs(),
        }
    }

    fn transition(&mut self, next: BreakerState) {
        self.state = next;
        self.entered_state_at = Instant::now();
    }
}

/// Registry of one breaker per host. Each entry mutates under its own lock.
pub struct BreakerMap {
    config: BreakerConfig,
    entries: Mutex<HashMap<HostName, Arc<Mutex<CircuitBreaker>>>>,
}

impl BreakerMap {
    /// An empty map creating breakers with `config`.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `host`, created closed on first use.
    pub fn breaker(&self, host: &HostName) -> Arc<Mutex<CircuitBreaker>> {
        let mut entries = self.entries.lock().expect("breaker map lock");
        Arc::clone(entries.entry(host.clone()).or_insert_with(|| {
            Arc::new(Mutex::new(CircuitBreaker::new(
                host.clone(),
                self.config.clone(),
            )))
        }))
    }

    /// Snapshots of every known breaker, sorted by host name.
    pub fn snapshots(&self) -> Vec<(HostName, BreakerSnapshot)> {
        let entries = self.entries.lock().expect("breaker map lock");
        let mut out: Vec<(HostName, BreakerSnapshot)> = entries
            .iter()
            .map(|(host, breaker)| {
                (
                    host.clone(),
                    breaker.lock().expect("breaker lock").snapshot(),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostName {
        HostName::parse("flaky-1").unwrap()
    }

    fn breaker(threshold: u32, open_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            host(),
            BreakerConfig {
                failure_threshold: threshold,
                open_duration: open_secs,
            },
        )
    }

    #[test]
    fn opens_at_threshold_and_fails_fast() {
        let mut b = breaker(5, 30);
        for _ in 0..4 {
            b.try_acquire().unwrap();
            b.record_failure(FailureKind::Network);
        }
        assert!(!b.is_open());
        b.try_acquire().unwrap();
        b.record_failure(FailureKind::Network);
        assert!(b.is_open());
        let denied = b.try_acquire().unwrap_err();
        assert!(denied.retry_in <= Duration::from_secs(30));
        assert_eq!(b.snapshot().state, "open");
    }

    #[test]
    fn zero_open_duration_probes_immediately() {
        let mut b = breaker(1, 0);
        b.record_failure(FailureKind::Network);
        // open_duration 0: the next call is admitted as the probe
        b.try_acquire().unwrap();
        assert_eq!(b.snapshot().state, "half_open");
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let mut b = breaker(1, 0);
        b.record_failure(FailureKind::Network);
        b.try_acquire().unwrap();
        let denied = b.try_acquire().unwrap_err();
        assert_eq!(denied.retry_in, Duration::ZERO);
    }

    #[test]
    fn probe_success_closes_and_resets() {
        let mut b = breaker(1, 0);
        b.record_failure(FailureKind::Network);
        b.try_acquire().unwrap();
        b.record_success();
        let snap = b.snapshot();
        assert_eq!(snap.state, "closed");
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.total_failures, 1);
        assert_eq!(snap.total_successes, 1);
    }

    #[test]
    fn probe_failure_reopens() {
        let mut b = breaker(5, 0);
        for _ in 0..5 {
            b.record_failure(FailureKind::Network);
        }
        b.try_acquire().unwrap();
        b.record_failure(FailureKind::Network);
        assert_eq!(b.snapshot().state, "open");
    }

    #[test]
    fn aborted_probe_frees_the_slot() {
        let mut b = breaker(1, 0);
        b.record_failure(FailureKind::Network);
        b.try_acquire().unwrap();
        b.abort_probe();
        b.try_acquire().unwrap();
    }

    #[test]
    fn first_auth_failure_is_forgiven() {
        let mut b = breaker(2, 30);
        b.record_failure(FailureKind::Auth);
        assert_eq!(b.snapshot().consecutive_failures, 0);
        b.record_failure(FailureKind::Auth);
        assert_eq!(b.snapshot().consecutive_failures, 1);
        b.record_failure(FailureKind::Auth);
        assert!(b.is_open());
    }

    #[test]
    fn success_restores_auth_grace() {
        let mut b = breaker(5, 30);
        b.record_failure(FailureKind::Auth);
        b.record_success();
        b.record_failure(FailureKind::Auth);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn map_returns_same_breaker_per_host() {
        let map = BreakerMap::new(BreakerConfig::default());
        let a = map.breaker(&host());
        a.lock().unwrap().record_failure(FailureKind::Network);
        let b = map.breaker(&host());
        assert_eq!(b.lock().unwrap().snapshot().total_failures, 1);
        assert_eq!(map.snapshots().len(), 1);
    }
}
