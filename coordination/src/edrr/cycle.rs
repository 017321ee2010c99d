//! Cycle aggregate and phase results.
//!
//! A [`Cycle`] owns its task (behind `Arc`, immutable once started), the
//! transition log, and one [`PhaseRecord`] per executed phase iteration.
//! Only the coordinator mutates it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::metrics::{QualityReport, ThresholdCheck};
use super::phase::{CycleState, Phase, StateTransition, TransitionError, TransitionReason};
use crate::task::Task;
use crate::wsde::{follow_ups, ConsensusRecord, ConsensusStatus, PrimusHistory};

/// Longest summary of an earlier phase carried into a prompt.
pub const PRIOR_SUMMARY_CHARS: usize = 600;

/// Authoritative output of one phase iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub cycle_id: String,
    pub task_id: String,
    pub phase: Phase,
    pub iteration: u32,
    /// Phase-shaped structured output, see [`shape_output`].
    pub output: Value,
    pub quality: QualityReport,
    /// Threshold outcome, including recovery by a phase hook.
    #[serde(default)]
    pub gate: ThresholdCheck,
    pub consensus_status: ConsensusStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Wall time of the iteration, consensus retries included.
    #[serde(default)]
    pub duration_ms: u64,
}

impl PhaseResult {
    /// Text carried into later phases as context.
    pub fn summary(&self) -> String {
        let field = match self.phase {
            Phase::Expand => "synthesis",
            Phase::Differentiate => "selected",
            Phase::Refine => "solution",
            Phase::Retrospect => "notes",
        };
        self.output
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Follow-up task descriptions flagged by a retrospective.
    pub fn follow_ups(&self) -> Vec<String> {
        self.output
            .get("follow_ups")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Shape a consensus record into the structured output of `phase`.
///
/// - expand: `ideas`, `synthesis`
/// - differentiate: `candidates`, `selected`, `votes`
/// - refine: `solution`, `critique`
/// - retrospect: `notes`, `learnings`, `follow_ups`
pub fn shape_output(phase: Phase, record: &ConsensusRecord) -> Value {
    let proposals: Vec<Value> = record
        .contributions
        .iter()
        .map(|c| json!({ "agent": c.agent_name, "content": c.content }))
        .collect();

    match phase {
        Phase::Expand => json!({
            "ideas": proposals,
            "synthesis": record.decision,
        }),
        Phase::Differentiate => json!({
            "candidates": proposals,
            "selected": record.decision,
            "votes": record.vote.as_ref().map(|t| &t.counts),
        }),
        Phase::Refine => json!({
            "solution": record.decision,
            "critique": record.critique(),
        }),
        Phase::Retrospect => {
            let learnings: Vec<&str> = record
                .decision
                .lines()
                .map(str::trim)
                .filter(|l| l.to_lowercase().contains("learn"))
                .collect();
            json!({
                "notes": record.decision,
                "learnings": learnings,
                "follow_ups": follow_ups(&record.decision),
            })
        }
    }
}

/// One executed phase iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub result: PhaseResult,
    pub consensus: ConsensusRecord,
}

/// An EDRR cycle, root or nested.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub id: String,
    pub task: Arc<Task>,
    /// Nesting depth; the root cycle has depth 0.
    pub depth: u32,
    pub parent_id: Option<String>,
    pub state: CycleState,
    pub transitions: Vec<StateTransition>,
    pub records: Vec<PhaseRecord>,
    /// Phase executions so far (every iteration counts).
    pub phase_executions: u32,
    pub primus_history: PrimusHistory,
    pub started_at: DateTime<Utc>,
}

impl Cycle {
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task,
            depth: 0,
            parent_id: None,
            state: CycleState::Expand,
            transitions: Vec::new(),
            records: Vec::new(),
            phase_executions: 0,
            primus_history: PrimusHistory::new(),
            started_at: Utc::now(),
        }
    }

    /// Nested cycle for a follow-up task.
    pub fn nested(parent: &Cycle, task: Arc<Task>) -> Self {
        let mut cycle = Self::new(task);
        cycle.depth = parent.depth + 1;
        cycle.parent_id = Some(parent.id.clone());
        cycle
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Move the phase pointer, rejecting anything the state table forbids.
    pub fn transition(
        &mut self,
        to: CycleState,
        reason: TransitionReason,
    ) -> Result<(), TransitionError> {
        if !self.state.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        self.transitions.push(StateTransition {
            from: self.state,
            to,
            reason,
            timestamp: Utc::now(),
        });
        self.state = to;
        Ok(())
    }

    pub fn current_phase(&self) -> Option<Phase> {
        self.state.phase()
    }

    /// Latest result of `phase`, i.e. the authoritative one.
    pub fn latest(&self, phase: Phase) -> Option<&PhaseRecord> {
        self.records.iter().rev().find(|r| r.phase == phase)
    }

    /// Phases in visit order, with iterations of the same phase collapsed.
    pub fn visited_phases(&self) -> Vec<Phase> {
        let mut visited: Vec<Phase> = Vec::new();
        for record in &self.records {
            if visited.last() != Some(&record.phase) {
                visited.push(record.phase);
            }
        }
        visited
    }

    /// Summaries of the latest result of every phase visited so far, for
    /// prompts. Each summary is cut to [`PRIOR_SUMMARY_CHARS`].
    pub fn prior_decisions(&self) -> Vec<String> {
        self.visited_phases()
            .into_iter()
            .filter_map(|p| self.latest(p))
            .map(|r| {
                let summary = r.result.summary();
                let mut short: String = summary.chars().take(PRIOR_SUMMARY_CHARS).collect();
                if short.len() < summary.len() {
                    short.push_str(" …");
                }
                format!("[{}] {}", r.phase, short)
            })
            .collect()
    }

    /// One-line summary for logs.
    pub fn status_line(&self) -> String {
        format!(
            "cycle {} (depth {}): {} after {} phase executions",
            self.id, self.depth, self.state, self.phase_executions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsde::{AgentId, Contribution};

    fn record(phase: Phase, decision: &str) -> ConsensusRecord {
        let mut r = ConsensusRecord::unresolved(phase, 1, "");
        r.status = ConsensusStatus::Reached;
        r.note = None;
        r.decision = decision.to_string();
        r.contributions = vec![Contribution {
            agent: AgentId(0),
            agent_name: "explorer".into(),
            content: "idea one".into(),
        }];
        r
    }

    fn phase_record(cycle: &Cycle, phase: Phase, decision: &str) -> PhaseRecord {
        let consensus = record(phase, decision);
        PhaseRecord {
            phase,
            result: PhaseResult {
                cycle_id: cycle.id.clone(),
                task_id: cycle.task.id.clone(),
                phase,
                iteration: 1,
                output: shape_output(phase, &consensus),
                quality: QualityReport::new(0.8),
                gate: ThresholdCheck {
                    passed: true,
                    ..Default::default()
                },
                consensus_status: consensus.status,
                started_at: Utc::now(),
                completed_at: Utc::now(),
                duration_ms: 0,
            },
            consensus,
        }
    }

    #[test]
    fn test_transition_forward_only() {
        let mut cycle = Cycle::new(Arc::new(Task::new("x")));
        cycle
            .transition(CycleState::Differentiate, TransitionReason::QualityGate)
            .unwrap();
        let err = cycle
            .transition(CycleState::Expand, TransitionReason::QualityGate)
            .unwrap_err();
        assert_eq!(err.from, CycleState::Differentiate);
        assert_eq!(cycle.transitions.len(), 1);
        assert_eq!(cycle.current_phase(), Some(Phase::Differentiate));
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let mut cycle = Cycle::new(Arc::new(Task::new("x")));
        cycle
            .transition(CycleState::Failed, TransitionReason::Failure)
            .unwrap();
        assert!(cycle
            .transition(CycleState::Differentiate, TransitionReason::QualityGate)
            .is_err());
    }

    #[test]
    fn test_nested_depth() {
        let parent = Cycle::new(Arc::new(Task::new("x"))).with_id("p");
        let child = Cycle::nested(&parent, Arc::new(Task::new("y")));
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_id.as_deref(), Some("p"));
        assert_ne!(child.id, parent.id);
    }

    #[test]
    fn test_shape_output_per_phase() {
        let out = shape_output(Phase::Expand, &record(Phase::Expand, "merged"));
        assert_eq!(out["ideas"][0]["content"], "idea one");
        assert_eq!(out["synthesis"], "merged");

        let out = shape_output(Phase::Refine, &record(Phase::Refine, "fn main() {}"));
        assert_eq!(out["solution"], "fn main() {}");
        assert!(out["critique"].is_null());

        let out = shape_output(
            Phase::Retrospect,
            &record(
                Phase::Retrospect,
                "We learned X.\nfollow-up: fuzz the parser\nDone.",
            ),
        );
        assert_eq!(out["learnings"][0], "We learned X.");
        assert_eq!(out["follow_ups"][0], "fuzz the parser");
    }

    #[test]
    fn test_visited_phases_collapse_iterations() {
        let mut cycle = Cycle::new(Arc::new(Task::new("x")));
        for (phase, d) in [
            (Phase::Expand, "a"),
            (Phase::Expand, "b"),
            (Phase::Differentiate, "c"),
        ] {
            let r = phase_record(&cycle, phase, d);
            cycle.records.push(r);
        }
        assert_eq!(
            cycle.visited_phases(),
            vec![Phase::Expand, Phase::Differentiate]
        );
        assert_eq!(cycle.latest(Phase::Expand).unwrap().consensus.decision, "b");
        assert_eq!(
            cycle.prior_decisions(),
            vec!["[expand] b".to_string(), "[differentiate] c".to_string()]
        );
    }

    #[test]
    fn test_prior_decisions_truncated() {
        let mut cycle = Cycle::new(Arc::new(Task::new("x")));
        let long = "y".repeat(PRIOR_SUMMARY_CHARS * 2);
        let r = phase_record(&cycle, Phase::Refine, &long);
        cycle.records.push(r);
        let prior = cycle.prior_decisions();
        assert!(prior[0].ends_with(" …"));
        assert!(prior[0].len() < long.len());
    }

    #[test]
    fn test_result_follow_ups() {
        let cycle = Cycle::new(Arc::new(Task::new("x")));
        let r = phase_record(&cycle, Phase::Retrospect, "follow-up: a\nfollow-up: b");
        assert_eq!(r.result.follow_ups(), vec!["a", "b"]);
        assert!(phase_record(&cycle, Phase::Expand, "x")
            .result
            .follow_ups()
            .is_empty());
    }
}
