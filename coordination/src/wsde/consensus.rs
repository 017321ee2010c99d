//! Consensus record: the persisted outcome of a team decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::{AgentId, Role};
use super::voting::VoteTally;
use crate::edrr::Phase;

/// Outcome class of a team decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    /// Full process completed.
    Reached,
    /// A decision exists but with reduced confidence (single responder,
    /// failed critique or synthesis).
    Degraded,
    /// No decision could be made.
    Unresolved,
}

impl ConsensusStatus {
    pub fn has_decision(self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

impl std::fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reached => write!(f, "reached"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Text produced by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub agent: AgentId,
    pub agent_name: String,
    pub content: String,
}

/// Why an agent's output was left out of a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExclusionReason {
    Timeout,
    ProviderError(String),
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ProviderError(e) => write!(f, "provider error: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedAgent {
    pub agent: AgentId,
    pub agent_name: String,
    pub reason: ExclusionReason,
}

/// Thesis → antithesis → synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialecticalExchange {
    pub thesis: Contribution,
    pub antithesis: Option<Contribution>,
    pub synthesis: Contribution,
}

/// Persisted result of a WSDE decision for one phase iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub phase: Phase,
    pub iteration: u32,
    pub primus: Option<AgentId>,
    pub primus_name: Option<String>,
    pub roles: Vec<(AgentId, Role)>,
    /// Proposals from agents that responded in time.
    pub contributions: Vec<Contribution>,
    pub excluded: Vec<ExcludedAgent>,
    pub vote: Option<VoteTally>,
    pub dialectic: Option<DialecticalExchange>,
    /// The authoritative decision text; empty when unresolved.
    pub decision: String,
    pub status: ConsensusStatus,
    pub reduced_confidence: bool,
    /// Why the decision is unresolved or degraded.
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConsensusRecord {
    /// Record for a phase where no decision was possible.
    pub fn unresolved(phase: Phase, iteration: u32, note: impl Into<String>) -> Self {
        Self {
            phase,
            iteration,
            primus: None,
            primus_name: None,
            roles: Vec::new(),
            contributions: Vec::new(),
            excluded: Vec::new(),
            vote: None,
            dialectic: None,
            decision: String::new(),
            status: ConsensusStatus::Unresolved,
            reduced_confidence: true,
            note: Some(note.into()),
            created_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status.has_decision()
    }

    /// The critique raised against the thesis, if any.
    pub fn critique(&self) -> Option<&str> {
        self.dialectic
            .as_ref()
            .and_then(|d| d.antithesis.as_ref())
            .map(|a| a.content.as_str())
    }

    /// One-line summary for logs and reports.
    pub fn status_line(&self) -> String {
        format!(
            "{} #{}: {} (primus: {}, contributions: {}, excluded: {})",
            self.phase,
            self.iteration,
            self.status,
            self.primus_name.as_deref().unwrap_or("none"),
            self.contributions.len(),
            self.excluded.len()
        )
    }
}
