//! EDRR phases and cycle states, with the transition table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the four EDRR phases. Ordered `Expand < Differentiate < Refine < Retrospect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Divergent exploration of ideas.
    Expand,
    /// Comparison and selection among candidates.
    Differentiate,
    /// Elaboration of the selected candidate.
    Refine,
    /// Reflection on the cycle and its outcome.
    Retrospect,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [
        Phase::Expand,
        Phase::Differentiate,
        Phase::Refine,
        Phase::Retrospect,
    ];

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Expand => Some(Self::Differentiate),
            Self::Differentiate => Some(Self::Refine),
            Self::Refine => Some(Self::Retrospect),
            Self::Retrospect => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Expand => "expand",
            Self::Differentiate => "differentiate",
            Self::Refine => "refine",
            Self::Retrospect => "retrospect",
        }
    }

    /// Expertise vocabulary associated with the phase, used for primus scoring.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Expand => &[
                "brainstorming",
                "exploration",
                "creativity",
                "ideation",
                "idea generation",
                "divergent thinking",
                "research",
                "discovery",
            ],
            Self::Differentiate => &[
                "analysis",
                "comparison",
                "evaluation",
                "categorization",
                "critical thinking",
                "trade-off",
                "decision making",
                "architecture",
            ],
            Self::Refine => &[
                "implementation",
                "optimization",
                "refinement",
                "coding",
                "testing",
                "quality",
                "detail",
                "integration",
            ],
            Self::Retrospect => &[
                "reflection",
                "retrospective",
                "review",
                "learning",
                "documentation",
                "process improvement",
                "assessment",
                "lessons",
            ],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown phase: {}", s))
    }
}

/// State of a cycle's phase pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Expand,
    Differentiate,
    Refine,
    Retrospect,
    /// Retrospect finished; terminal.
    Completed,
    /// Unrecoverable failure, cancellation or abort; terminal.
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The phase this state executes, if it is not terminal.
    pub fn phase(self) -> Option<Phase> {
        match self {
            Self::Expand => Some(Phase::Expand),
            Self::Differentiate => Some(Phase::Differentiate),
            Self::Refine => Some(Phase::Refine),
            Self::Retrospect => Some(Phase::Retrospect),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Valid transitions from this state. The pointer never moves backwards.
    pub fn valid_transitions(self) -> &'static [CycleState] {
        match self {
            Self::Expand => &[Self::Differentiate, Self::Failed],
            Self::Differentiate => &[Self::Refine, Self::Failed],
            Self::Refine => &[Self::Retrospect, Self::Failed],
            Self::Retrospect => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed => &[],
        }
    }
}

impl From<Phase> for CycleState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Expand => Self::Expand,
            Phase::Differentiate => Self::Differentiate,
            Phase::Refine => Self::Refine,
            Phase::Retrospect => Self::Retrospect,
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            other => match other.phase() {
                Some(phase) => write!(f, "{}", phase),
                None => Ok(()),
            },
        }
    }
}

/// Why a cycle moved between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Quality met the phase threshold.
    QualityGate,
    /// Per-phase iteration cap reached before the quality gate passed.
    IterationCap,
    /// Confirmed by the external transition gate in manual mode.
    ManualApproval,
    /// Final phase finished.
    CycleFinished,
    /// Unrecoverable error, cancellation or abort.
    Failure,
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QualityGate => write!(f, "quality_gate"),
            Self::IterationCap => write!(f, "iteration_cap"),
            Self::ManualApproval => write!(f, "manual_approval"),
            Self::CycleFinished => write!(f, "cycle_finished"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// A recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CycleState,
    pub to: CycleState,
    pub reason: TransitionReason,
    pub timestamp: DateTime<Utc>,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} → {to}")]
pub struct TransitionError {
    pub from: CycleState,
    pub to: CycleState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(Phase::Expand < Phase::Differentiate);
        assert!(Phase::Refine < Phase::Retrospect);
        assert_eq!(Phase::Expand.next(), Some(Phase::Differentiate));
        assert_eq!(Phase::Retrospect.next(), None);

        let mut walked = vec![Phase::Expand];
        while let Some(next) = walked.last().and_then(|p| p.next()) {
            walked.push(next);
        }
        assert_eq!(walked, Phase::ALL.to_vec());
    }

    #[test]
    fn test_phase_parse_and_display() {
        for phase in Phase::ALL {
            assert_eq!(phase.to_string().parse::<Phase>(), Ok(phase));
        }
        assert_eq!("REFINE".parse::<Phase>(), Ok(Phase::Refine));
        assert!("review".parse::<Phase>().is_err());
        assert_eq!(
            serde_json::to_string(&Phase::Differentiate).unwrap(),
            "\"differentiate\""
        );
    }

    #[test]
    fn test_transitions_only_move_forward() {
        assert!(CycleState::Expand
            .valid_transitions()
            .contains(&CycleState::Differentiate));
        assert!(!CycleState::Refine
            .valid_transitions()
            .contains(&CycleState::Expand));
        assert!(!CycleState::Expand
            .valid_transitions()
            .contains(&CycleState::Refine));
        for state in [CycleState::Completed, CycleState::Failed] {
            assert!(state.is_terminal());
            assert!(state.valid_transitions().is_empty());
        }
        for phase in Phase::ALL {
            assert!(CycleState::from(phase)
                .valid_transitions()
                .contains(&CycleState::Failed));
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CycleState::Retrospect.to_string(), "retrospect");
        assert_eq!(CycleState::Completed.to_string(), "completed");
    }
}
