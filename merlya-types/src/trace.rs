//! Tool-call trace vocabulary.
//!
//! Every dispatched operation appends one [`ToolCall`] entry. The loop
//! detector reads the last `loop.window` entries; the audit sink reads all.

use serde::{Deserialize, Serialize};

/// How a traced tool call ended.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// The call completed and reported success.
    Ok,
    /// The call completed and reported failure.
    Error,
    /// The call was refused before execution (policy, breaker, loop).
    Blocked,
}

/// One entry in the tool-call trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// When the call completed (Unix timestamp milliseconds).
    pub timestamp_ms: u64,
    /// Name of the tool that ran, e.g. `run_on_host`.
    pub tool_name: String,
    /// Stable hash of the call arguments (hex SHA-256).
    pub arguments_hash: String,
    /// How the call ended.
    pub result_kind: ResultKind,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ToolCall {
    /// Signature used by the loop detector: tool plus arguments.
    pub fn signature(&self) -> (&str, &str) {
        (&self.tool_name, &self.arguments_hash)
    }
}
