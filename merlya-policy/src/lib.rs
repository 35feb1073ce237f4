#![deny(missing_docs)]
//! Execution gating for merlya: risk classification and loop detection.
//!
//! [`RiskClassifier`] maps a shell command to a [`RiskLevel`] with a
//! rationale through an ordered rule table (first match wins).
//! [`LoopDetector`] watches the tool-call trace and emits a
//! [`RedirectSignal`] when the agent is repeating itself. Both are
//! synchronous and run inline on the dispatcher path; neither touches the
//! network.

pub mod loops;
pub mod risk;

pub use loops::{LoopDetector, LoopPattern, RedirectSignal};
pub use risk::{
    ConfirmationGiven, ConfirmationRequirement, RiskAssessment, RiskClassifier, RiskLevel,
    confirmation_requirement,
};
