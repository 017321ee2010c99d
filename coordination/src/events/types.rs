//! Event types for cycle observation
//!
//! Events are informational: the coordinator never waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edrr::{CycleState, Phase};
use crate::wsde::ExclusionReason;

/// All coordinator events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CycleEvent {
    /// A cycle (root or nested) began
    CycleStarted {
        cycle_id: String,
        task_id: String,
        depth: u32,
        parent_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A primus was chosen for a phase iteration
    PrimusSelected {
        cycle_id: String,
        phase: Phase,
        iteration: u32,
        agent: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent's output was left out of a decision
    AgentExcluded {
        cycle_id: String,
        phase: Phase,
        agent: String,
        reason: ExclusionReason,
        timestamp: DateTime<Utc>,
    },

    /// A phase iteration finished and its result was persisted
    PhaseCompleted {
        cycle_id: String,
        phase: Phase,
        iteration: u32,
        quality: f64,
        duration_ms: u64,
        advanced: bool,
        forced: bool,
        timestamp: DateTime<Utc>,
    },

    /// A retrospective follow-up started a nested cycle
    MicroCycleSpawned {
        parent_id: String,
        cycle_id: String,
        depth: u32,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// A cycle reached a terminal state
    CycleFinished {
        cycle_id: String,
        state: CycleState,
        phase_executions: u32,
        timestamp: DateTime<Utc>,
    },
}

impl CycleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CycleStarted { .. } => "cycle_started",
            Self::PrimusSelected { .. } => "primus_selected",
            Self::AgentExcluded { .. } => "agent_excluded",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::MicroCycleSpawned { .. } => "micro_cycle_spawned",
            Self::CycleFinished { .. } => "cycle_finished",
        }
    }

    /// The cycle this event belongs to. For spawn events, the nested cycle.
    pub fn cycle_id(&self) -> &str {
        match self {
            Self::CycleStarted { cycle_id, .. }
            | Self::PrimusSelected { cycle_id, .. }
            | Self::AgentExcluded { cycle_id, .. }
            | Self::PhaseCompleted { cycle_id, .. }
            | Self::MicroCycleSpawned { cycle_id, .. }
            | Self::CycleFinished { cycle_id, .. } => cycle_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::CycleStarted { timestamp, .. }
            | Self::PrimusSelected { timestamp, .. }
            | Self::AgentExcluded { timestamp, .. }
            | Self::PhaseCompleted { timestamp, .. }
            | Self::MicroCycleSpawned { timestamp, .. }
            | Self::CycleFinished { timestamp, .. } => *timestamp,
        }
    }
}
