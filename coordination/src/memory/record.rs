//! Records, metadata, query filters and the key scheme.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edrr::Phase;

/// What a stored record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Task submitted to the orchestrator.
    Task,
    /// Non-authoritative agent proposal written during a phase.
    Draft,
    /// Authoritative phase result.
    PhaseResult,
    /// Team decision for a phase.
    Consensus,
    /// Final cycle report.
    Report,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Draft => write!(f, "draft"),
            Self::PhaseResult => write!(f, "phase_result"),
            Self::Consensus => write!(f, "consensus"),
            Self::Report => write!(f, "report"),
        }
    }
}

/// Metadata attached to every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Agent that produced the record, for drafts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl RecordMetadata {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            cycle_id: None,
            task_id: None,
            phase: None,
            agent: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_cycle(mut self, cycle_id: impl Into<String>) -> Self {
        self.cycle_id = Some(cycle_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// A stored value with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub metadata: RecordMetadata,
    pub stored_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(key: impl Into<String>, value: serde_json::Value, metadata: RecordMetadata) -> Self {
        Self {
            key: key.into(),
            value,
            metadata,
            stored_at: Utc::now(),
        }
    }
}

/// Conjunctive filter over records. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilter {
    pub cycle_id: Option<String>,
    pub phase: Option<Phase>,
    pub kind: Option<RecordKind>,
    pub tag: Option<String>,
    pub key_prefix: Option<String>,
    /// Substring of the serialized value.
    pub text: Option<String>,
}

impl MemoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle(mut self, cycle_id: impl Into<String>) -> Self {
        self.cycle_id = Some(cycle_id.into());
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        let meta = &record.metadata;
        if let Some(cycle_id) = &self.cycle_id {
            if meta.cycle_id.as_ref() != Some(cycle_id) {
                return false;
            }
        }
        if self.phase.is_some() && meta.phase != self.phase {
            return false;
        }
        if self.kind.is_some() && Some(meta.kind) != self.kind {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !meta.tags.contains(tag) {
                return false;
            }
        }
        if let Some(prefix) = &self.key_prefix {
            if !record.key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let haystack = match &record.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !haystack.contains(text.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Key builders.
pub mod keys {
    use crate::edrr::Phase;

    pub fn cycle_prefix(cycle_id: &str) -> String {
        format!("cycle:{}:", cycle_id)
    }

    pub fn task(cycle_id: &str) -> String {
        format!("cycle:{}:task", cycle_id)
    }

    /// Authoritative result of `phase` within a cycle.
    pub fn phase_result(cycle_id: &str, phase: Phase) -> String {
        format!("cycle:{}:phase:{}", cycle_id, phase)
    }

    pub fn consensus(cycle_id: &str, phase: Phase) -> String {
        format!("cycle:{}:consensus:{}", cycle_id, phase)
    }

    /// Prefix of every draft written during one iteration of `phase`.
    pub fn iteration_drafts_prefix(cycle_id: &str, phase: Phase, iteration: u32) -> String {
        format!("cycle:{}:draft:{}:{}:", cycle_id, phase, iteration)
    }

    /// Proposal of the agent at arena index `agent` in consensus attempt `attempt`.
    pub fn proposal_draft(
        cycle_id: &str,
        phase: Phase,
        iteration: u32,
        attempt: u32,
        agent: usize,
    ) -> String {
        format!(
            "{}{}:proposal:{}",
            iteration_drafts_prefix(cycle_id, phase, iteration),
            attempt,
            agent
        )
    }

    /// Antithesis or synthesis of consensus attempt `attempt`.
    pub fn dialectic_draft(
        cycle_id: &str,
        phase: Phase,
        iteration: u32,
        attempt: u32,
        stage: &str,
    ) -> String {
        format!(
            "{}{}:dialectic:{}",
            iteration_drafts_prefix(cycle_id, phase, iteration),
            attempt,
            stage
        )
    }

    pub fn drafts_prefix(cycle_id: &str, phase: Phase) -> String {
        format!("cycle:{}:draft:{}:", cycle_id, phase)
    }

    pub fn report(cycle_id: &str) -> String {
        format!("cycle:{}:report", cycle_id)
    }
}
