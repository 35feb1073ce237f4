//! Repetition detection over the tool-call trace.
//!
//! The detector watches the last `window` trace entries and flags three
//! patterns: the same call failing three times, an A/B/A/B alternation, and
//! any call repeated five times regardless of outcome. A detection is a
//! behavior-change signal, not a hard error; the dispatcher surfaces it
//! once, then the window resets.

use merlya_types::{ResultKind, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which repetition pattern fired.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPattern {
    /// The same `(tool, arguments)` call failed three or more times.
    RepeatedFailure,
    /// An A, B, A, B alternation of length four or more.
    Alternation,
    /// The same call executed five or more times, outcome regardless.
    Repetition,
}

/// The advisory handed to the caller when a loop is detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectSignal {
    /// Which pattern fired.
    pub pattern: LoopPattern,
    /// Human-readable advisory, e.g.
    /// "previous attempt failed 3 times; change approach".
    pub advisory: String,
    /// How many matching calls were observed.
    pub occurrences: u32,
}

/// Windowed repetition detector. A `window` of zero disables it.
pub struct LoopDetector {
    window: usize,
    trace: VecDeque<ToolCall>,
}

impl LoopDetector {
    /// A detector over the last `window` trace entries.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            trace: VecDeque::with_capacity(window),
        }
    }

    /// Record a completed call. Entries beyond the window age out.
    pub fn observe(&mut self, call: ToolCall) {
        if self.window == 0 {
            return;
        }
        if self.trace.len() == self.window {
            self.trace.pop_front();
        }
        self.trace.push_back(call);
    }

    /// Evaluate the trace against an upcoming `(tool, arguments)` call.
    ///
    /// Returns a signal when a pattern involving that signature holds. The
    /// signal is emitted exactly once: detection clears the window, so the
    /// advisory is not repeated until the pattern re-establishes itself.
    pub fn check(&mut self, tool_name: &str, arguments_hash: &str) -> Option<RedirectSignal> {
        if self.window == 0 {
            return None;
        }

        let signal = self
            .repeated_failure(tool_name, arguments_hash)
            .or_else(|| self.repetition(tool_name, arguments_hash))
            .or_else(|| self.alternation(tool_name, arguments_hash));

        if signal.is_some() {
            self.trace.clear();
        }
        signal
    }

    /// Entries currently in the window.
    pub fn len(&self) -> usize {
        self.trace.len()
    }

    /// True when no entries are recorded.
    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }

    fn repeated_failure(&self, tool: &str, args: &str) -> Option<RedirectSignal> {
        let failures = self
            .trace
            .iter()
            .filter(|c| {
                c.result_kind == ResultKind::Error && c.signature() == (tool, args)
            })
            .count() as u32;
        (failures >= 3).then(|| RedirectSignal {
            pattern: LoopPattern::RepeatedFailure,
            advisory: format!("previous attempt failed {failures} times; change approach"),
            occurrences: failures,
        })
    }

    fn repetition(&self, tool: &str, args: &str) -> Option<RedirectSignal> {
        let runs = self
            .trace
            .iter()
            .filter(|c| c.signature() == (tool, args))
            .count() as u32;
        (runs >= 5).then(|| RedirectSignal {
            pattern: LoopPattern::Repetition,
            advisory: format!("the same call ran {runs} times; change approach"),
            occurrences: runs,
        })
    }

    fn alternation(&self, tool: &str, args: &str) -> Option<RedirectSignal> {
        // Trailing A, B, A, B with identical arguments per side, where the
        // upcoming call matches one of the sides.
        let n = self.trace.len();
        if n < 4 {
            return None;
        }
        let tail: Vec<&ToolCall> = self.trace.iter().skip(n - 4).collect();
        let (a, b) = (tail[0].signature(), tail[1].signature());
        if a == b {
            return None;
        }
        let alternates = tail[2].signature() == a && tail[3].signature() == b;
        let involved = (tool, args) == a || (tool, args) == b;
        (alternates && involved).then(|| RedirectSignal {
            pattern: LoopPattern::Alternation,
            advisory: "alternating between the same two calls; change approach".to_string(),
            occurrences: 4,
        })
    }
}
