//! Coordinator error taxonomy.
//!
//! Every variant maps to a stable machine code used in reports and by the
//! runner; `is_recoverable` separates conditions the coordinator handles
//! itself (retry, annotate, warn) from those that fail the cycle.

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::edrr::{Phase, TransitionError};
use crate::manifest::ManifestError;
use crate::memory::{MemoryError, MemorySyncError};
use crate::provider::ProviderError;
use crate::task::TaskError;
use crate::wsde::TeamError;

/// Result type alias for coordinator operations
pub type EdrrResult<T> = Result<T, EdrrError>;

#[derive(Debug, thiserror::Error)]
pub enum EdrrError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("consensus unresolved during {phase}: {reason}")]
    ConsensusUnresolved { phase: Phase, reason: String },

    #[error("memory sync warning: {0}")]
    MemorySync(#[from] MemorySyncError),

    #[error("micro-cycle depth {depth} exceeds limit {limit}")]
    RecursionLimitExceeded { depth: u32, limit: u32 },

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("all agents timed out during {phase}")]
    AllAgentsTimedOut { phase: Phase },

    #[error("cycle cancelled")]
    Cancelled,

    #[error("cycle aborted at {phase}")]
    Aborted { phase: Phase },

    #[error("cycle exceeded {limit} phase executions")]
    IterationCapExceeded { limit: u32 },

    #[error("invalid task: {0}")]
    InvalidTask(#[from] TaskError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),
}

impl EdrrError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.code(),
            Self::ConsensusUnresolved { .. } => "consensus_unresolved",
            Self::MemorySync(_) => "memory_sync",
            Self::RecursionLimitExceeded { .. } => "recursion_limit_exceeded",
            Self::Memory(e) => e.code(),
            Self::AllAgentsTimedOut { .. } => "all_agents_timed_out",
            Self::Cancelled => "cancelled",
            Self::Aborted { .. } => "aborted",
            Self::IterationCapExceeded { .. } => "iteration_cap_exceeded",
            Self::InvalidTask(_) => "invalid_task",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Manifest(_) => "manifest_invalid",
            Self::InvalidTransition(_) => "invalid_transition",
        }
    }

    /// Whether the coordinator continues after this error.
    ///
    /// Sync warnings and truncated micro-cycles are annotations; unresolved
    /// consensus is retried. Everything else fails the cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MemorySync(_)
                | Self::RecursionLimitExceeded { .. }
                | Self::ConsensusUnresolved { .. }
        )
    }

    /// Whether running the task again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => match e {
                ProviderError::RetriesExhausted { last, .. } => last.is_transient(),
                other => other.is_transient(),
            },
            Self::AllAgentsTimedOut { .. } | Self::Cancelled => true,
            Self::ConsensusUnresolved { .. } => true,
            Self::Memory(MemoryError::Io { .. }) => true,
            _ => false,
        }
    }

    /// Phase the error is attributed to, when it carries one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::ConsensusUnresolved { phase, .. }
            | Self::AllAgentsTimedOut { phase }
            | Self::Aborted { phase } => Some(*phase),
            _ => None,
        }
    }
}

impl From<TeamError> for EdrrError {
    fn from(err: TeamError) -> Self {
        match err {
            TeamError::AllAgentsTimedOut { phase } => Self::AllAgentsTimedOut { phase },
            TeamError::Provider { source, .. } => Self::Provider(source),
            TeamError::Cancelled => Self::Cancelled,
            TeamError::Memory(e) => Self::Memory(e),
        }
    }
}

/// Unrecoverable failure summary carried in a cycle report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub phase: Option<Phase>,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Phases whose authoritative results were persisted before the failure.
    pub partial_results: Vec<Phase>,
}

impl FailureReport {
    pub fn from_error(phase: Option<Phase>, err: &EdrrError, partial_results: Vec<Phase>) -> Self {
        Self {
            phase: phase.or_else(|| err.phase()),
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            partial_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EdrrError::Cancelled.code(), "cancelled");
        assert_eq!(
            EdrrError::Aborted { phase: Phase::Refine }.code(),
            "aborted"
        );
        assert_eq!(
            EdrrError::Provider(ProviderError::Auth("x".into())).code(),
            ProviderError::Auth("x".into()).code()
        );
        assert_eq!(
            EdrrError::ConsensusUnresolved {
                phase: Phase::Expand,
                reason: "tie".into()
            }
            .code(),
            "consensus_unresolved"
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(EdrrError::RecursionLimitExceeded { depth: 4, limit: 3 }.is_recoverable());
        assert!(EdrrError::MemorySync(MemorySyncError {
            store: "s".into(),
            key: "k".into(),
            reason: "r".into()
        })
        .is_recoverable());
        assert!(!EdrrError::Cancelled.is_recoverable());
        assert!(!EdrrError::Provider(ProviderError::Auth("x".into())).is_recoverable());
    }

    #[test]
    fn test_retryable_follows_provider_transience() {
        let exhausted = ProviderError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ProviderError::RateLimited),
        };
        assert!(EdrrError::Provider(exhausted).is_retryable());
        assert!(!EdrrError::Provider(ProviderError::Auth("x".into())).is_retryable());
    }

    #[test]
    fn test_team_error_conversion() {
        let err: EdrrError = TeamError::AllAgentsTimedOut { phase: Phase::Expand }.into();
        assert!(matches!(err, EdrrError::AllAgentsTimedOut { phase: Phase::Expand }));
        assert_eq!(err.phase(), Some(Phase::Expand));
        let err: EdrrError = TeamError::Cancelled.into();
        assert!(matches!(err, EdrrError::Cancelled));
    }

    #[test]
    fn test_failure_report() {
        let err = EdrrError::ConsensusUnresolved {
            phase: Phase::Expand,
            reason: "no agents available".into(),
        };
        let report = FailureReport::from_error(None, &err, vec![]);
        assert_eq!(report.phase, Some(Phase::Expand));
        assert_eq!(report.code, "consensus_unresolved");
        assert!(report.message.contains("no agents available"));
    }
}
