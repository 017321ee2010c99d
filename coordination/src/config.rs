//! Coordinator configuration.
//!
//! Every field has a default, so partial TOML/YAML/JSON documents deserialize.
//! Feature toggles live here rather than in process-wide state.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::edrr::{Phase, PhaseThresholds};
use crate::memory::MemoryConfig;
use crate::provider::ProviderConfig;
use crate::wsde::{default_profiles, AgentProfile, TeamSettings};

/// How phase transitions are authorized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    /// Transition as soon as the quality gate or iteration cap allows.
    #[default]
    Automatic,
    /// Ask the transition gate before every transition.
    Manual,
}

impl std::fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for TransitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(Self::Automatic),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown transition mode: {}", other)),
        }
    }
}

/// What happens when consensus stays unresolved after the retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    #[default]
    Fail,
    /// Ask the transition gate for a manual decision.
    Escalate,
}

/// Optional behaviours, all enabled by default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// All agents propose; when off only the primus does.
    pub wsde_collaboration: bool,
    /// Critique and synthesis after the thesis.
    pub dialectical_reasoning: bool,
    /// Nested cycles for retrospective follow-ups.
    pub micro_cycles: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            wsde_collaboration: true,
            dialectical_reasoning: true,
            micro_cycles: true,
        }
    }
}

/// Error for invalid configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("threshold for {phase} must be within 0.0..=1.0, got {value}")]
    InvalidThreshold { phase: Phase, value: f64 },

    #[error("minimum for metric {metric} in {phase} must be a finite number, got {value}")]
    InvalidMetricThreshold { phase: Phase, metric: String, value: f64 },

    #[error("max_iterations_per_phase must be at least 1")]
    ZeroIterations,

    #[error("max_total_iterations ({total}) is below the four phases of one cycle")]
    TotalCapTooLow { total: u32 },

    #[error("max_concurrent_agents must be at least 1")]
    ZeroConcurrency,

    #[error("granularity_threshold must be within 0.0..=1.0, got {0}")]
    InvalidGranularity(f64),
}

/// Complete coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdrrConfig {
    pub thresholds: PhaseThresholds,
    pub max_iterations_per_phase: u32,
    /// Cap on phase executions of one cycle; `None` means 4 × per-phase cap.
    pub max_total_iterations: Option<u32>,
    /// Deepest allowed micro-cycle nesting (the root cycle has depth 0).
    pub max_recursion_depth: u32,
    pub transition_mode: TransitionMode,
    pub features: FeatureFlags,
    /// Phases whose thesis is chosen by majority vote.
    pub voting_phases: BTreeSet<Phase>,
    /// Extra attempts when consensus is unresolved.
    pub consensus_retries: u32,
    pub unresolved_policy: UnresolvedPolicy,
    pub agent_timeout_ms: u64,
    pub max_concurrent_agents: usize,
    /// Follow-up tasks with a granularity below this are not expanded.
    pub granularity_threshold: f64,
    pub provider: ProviderConfig,
    pub memory: MemoryConfig,
    pub agents: Vec<AgentProfile>,
}

impl Default for EdrrConfig {
    fn default() -> Self {
        Self {
            thresholds: PhaseThresholds::default(),
            max_iterations_per_phase: 3,
            max_total_iterations: None,
            max_recursion_depth: 3,
            transition_mode: TransitionMode::Automatic,
            features: FeatureFlags::default(),
            voting_phases: [Phase::Differentiate].into_iter().collect(),
            consensus_retries: 1,
            unresolved_policy: UnresolvedPolicy::Fail,
            agent_timeout_ms: 60_000,
            max_concurrent_agents: 4,
            granularity_threshold: 0.2,
            provider: ProviderConfig::default(),
            memory: MemoryConfig::default(),
            agents: default_profiles(),
        }
    }
}

impl EdrrConfig {
    /// Phase executions allowed for a single (non-nested) cycle.
    pub fn total_iteration_cap(&self) -> u32 {
        self.max_total_iterations
            .unwrap_or(self.max_iterations_per_phase.saturating_mul(4))
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    pub fn team_settings(&self) -> TeamSettings {
        TeamSettings {
            agent_timeout: self.agent_timeout(),
            max_concurrent_agents: self.max_concurrent_agents,
            voting_phases: self.voting_phases.clone(),
            dialectical_reasoning: self.features.dialectical_reasoning,
            collaboration: self.features.wsde_collaboration,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for phase in Phase::ALL {
            let value = self.thresholds.for_phase(phase);
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold { phase, value });
            }
            for (metric, value) in &self.thresholds.metrics.for_phase(phase).minimums {
                if !value.is_finite() {
                    return Err(ConfigError::InvalidMetricThreshold {
                        phase,
                        metric: metric.clone(),
                        value: *value,
                    });
                }
            }
        }
        if self.max_iterations_per_phase == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if let Some(total) = self.max_total_iterations {
            if total < 4 {
                return Err(ConfigError::TotalCapTooLow { total });
            }
        }
        if self.max_concurrent_agents == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if !(0.0..=1.0).contains(&self.granularity_threshold) {
            return Err(ConfigError::InvalidGranularity(self.granularity_threshold));
        }
        Ok(())
    }
}
