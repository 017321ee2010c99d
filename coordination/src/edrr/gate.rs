//! Transition gate: the external authority consulted in manual mode and
//! when unresolved consensus is escalated.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::metrics::ThresholdCheck;
use super::phase::Phase;
use crate::wsde::ConsensusRecord;

/// What the coordinator asks before moving on from a phase iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub cycle_id: String,
    pub depth: u32,
    pub phase: Phase,
    /// `None` when the phase is the last one.
    pub next: Option<Phase>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub quality: f64,
    pub threshold: f64,
    /// Score and per-metric gates after any recovery hooks ran.
    #[serde(default)]
    pub check: ThresholdCheck,
    /// Decision text of the iteration, for display.
    pub summary: String,
}

impl TransitionRequest {
    /// Score and per-metric gates met, after any recovery hook.
    pub fn quality_passed(&self) -> bool {
        self.check.passed
    }

    /// Whether another iteration of the phase is still allowed.
    pub fn can_repeat(&self) -> bool {
        self.iteration < self.max_iterations
    }
}

/// Answer of a [`TransitionGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionDecision {
    /// Advance to the next phase (or finish the cycle).
    Proceed,
    /// Run the phase again; ignored once the iteration cap is reached.
    Repeat,
    /// Fail the cycle.
    Abort,
}

impl std::fmt::Display for TransitionDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::Repeat => write!(f, "repeat"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

#[async_trait]
pub trait TransitionGate: Send + Sync {
    /// Confirm, repeat or abort after a phase iteration (manual mode only).
    async fn confirm(&self, request: &TransitionRequest) -> TransitionDecision;

    /// Supply a decision for consensus that stayed unresolved. `None` fails the phase.
    async fn escalate(&self, record: &ConsensusRecord) -> Option<String> {
        let _ = record;
        None
    }
}

/// Gate that always follows the automatic recommendation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl TransitionGate for AutoApprove {
    async fn confirm(&self, request: &TransitionRequest) -> TransitionDecision {
        if request.quality_passed() || !request.can_repeat() {
            TransitionDecision::Proceed
        } else {
            TransitionDecision::Repeat
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(quality: f64, iteration: u32) -> TransitionRequest {
        TransitionRequest {
            cycle_id: "c".into(),
            depth: 0,
            phase: Phase::Expand,
            next: Some(Phase::Differentiate),
            iteration,
            max_iterations: 3,
            quality,
            threshold: 0.5,
            check: ThresholdCheck {
                passed: quality >= 0.5,
                ..Default::default()
            },
            summary: String::new(),
        }
    }

    #[tokio::test]
    async fn test_auto_approve_follows_gate_and_cap() {
        assert_eq!(AutoApprove.confirm(&request(0.5, 1)).await, TransitionDecision::Proceed);
        assert_eq!(AutoApprove.confirm(&request(0.2, 1)).await, TransitionDecision::Repeat);
        assert_eq!(AutoApprove.confirm(&request(0.2, 3)).await, TransitionDecision::Proceed);
    }

    #[tokio::test]
    async fn test_default_escalation_declines() {
        let record = ConsensusRecord::unresolved(Phase::Expand, 1, "tie");
        assert!(AutoApprove.escalate(&record).await.is_none());
    }
}
