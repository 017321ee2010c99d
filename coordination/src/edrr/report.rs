//! Final cycle report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cycle::{Cycle, PhaseRecord};
use super::phase::{CycleState, Phase, StateTransition};
use crate::error::FailureReport;
use crate::memory::MemorySyncError;
use crate::wsde::ConsensusStatus;

/// Summary of the authoritative result of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub iterations: u32,
    pub quality: f64,
    pub consensus_status: ConsensusStatus,
    /// Advanced on the iteration cap rather than the quality gate.
    pub forced: bool,
    pub primus: Option<String>,
    pub decision: String,
    /// Wall time across every iteration of the phase.
    #[serde(default)]
    pub duration_ms: u64,
    /// One entry per iteration, oldest first.
    #[serde(default)]
    pub executions: Vec<IterationTrace>,
}

/// Timing and gate outcome of one phase iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationTrace {
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub quality: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmet: Vec<String>,
}

impl From<&PhaseRecord> for IterationTrace {
    fn from(record: &PhaseRecord) -> Self {
        let result = &record.result;
        Self {
            iteration: result.iteration,
            started_at: result.started_at,
            duration_ms: result.duration_ms,
            quality: result.quality.score,
            passed: result.gate.passed,
            recovered: result.gate.recovered,
            unmet: result.gate.unmet.clone(),
        }
    }
}

/// Why a follow-up did not run as a nested cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkippedFollowUp {
    /// Depth cap reached.
    RecursionLimit { description: String, depth: u32, limit: u32 },
    /// Granularity below the configured threshold.
    TooFine { description: String, granularity: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub task_id: String,
    pub depth: u32,
    pub terminal_state: CycleState,
    pub phases: Vec<PhaseSummary>,
    pub phase_executions: u32,
    pub transitions: Vec<StateTransition>,
    /// Secondary-store write failures, as warnings.
    pub sync_warnings: Vec<MemorySyncError>,
    pub failure: Option<FailureReport>,
    pub micro_cycles: Vec<CycleReport>,
    pub skipped_follow_ups: Vec<SkippedFollowUp>,
    /// A follow-up was dropped because of the depth cap.
    pub truncated: bool,
    /// Decision of the last completed phase.
    pub final_output: Option<String>,
}

impl CycleReport {
    pub(crate) fn from_cycle(cycle: &Cycle, forced: &[Phase]) -> Self {
        let phases = cycle
            .visited_phases()
            .into_iter()
            .filter_map(|phase| {
                let latest = cycle.latest(phase)?;
                let executions: Vec<IterationTrace> = cycle
                    .records
                    .iter()
                    .filter(|r| r.phase == phase)
                    .map(IterationTrace::from)
                    .collect();
                Some(PhaseSummary {
                    phase,
                    iterations: latest.result.iteration,
                    quality: latest.result.quality.score,
                    consensus_status: latest.result.consensus_status,
                    forced: forced.contains(&phase),
                    primus: latest.consensus.primus_name.clone(),
                    decision: latest.consensus.decision.clone(),
                    duration_ms: executions.iter().map(|e| e.duration_ms).sum(),
                    executions,
                })
            })
            .collect::<Vec<_>>();
        let final_output = phases.last().map(|p| p.decision.clone());

        Self {
            cycle_id: cycle.id.clone(),
            task_id: cycle.task.id.clone(),
            depth: cycle.depth,
            terminal_state: cycle.state,
            phases,
            phase_executions: cycle.phase_executions,
            transitions: cycle.transitions.clone(),
            sync_warnings: Vec::new(),
            failure: None,
            micro_cycles: Vec::new(),
            skipped_follow_ups: Vec::new(),
            truncated: false,
            final_output,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.terminal_state == CycleState::Completed
    }

    /// 0 when completed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_completed() {
            0
        } else {
            1
        }
    }

    /// Phase executions of this cycle and every nested one.
    pub fn total_phase_executions(&self) -> u32 {
        self.phase_executions
            + self
                .micro_cycles
                .iter()
                .map(CycleReport::total_phase_executions)
                .sum::<u32>()
    }

    /// Total wall time per phase of this cycle.
    pub fn phase_durations(&self) -> BTreeMap<Phase, u64> {
        self.phases.iter().map(|p| (p.phase, p.duration_ms)).collect()
    }

    /// Plain-text rendering for terminals.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        out.push_str(&format!(
            "{pad}Cycle {} [{}] task {} ({} phase executions)\n",
            self.cycle_id, self.terminal_state, self.task_id, self.phase_executions
        ));
        for p in &self.phases {
            out.push_str(&format!(
                "{pad}  {:<13} quality {:.2}  iterations {}  consensus {}  {}ms{}{}\n",
                p.phase,
                p.quality,
                p.iterations,
                p.consensus_status,
                p.duration_ms,
                if p.executions.iter().any(|e| e.recovered) { "  (recovered)" } else { "" },
                if p.forced { "  (forced)" } else { "" }
            ));
        }
        if let Some(failure) = &self.failure {
            out.push_str(&format!(
                "{pad}  FAILED at {}: [{}] {}{}\n",
                failure
                    .phase
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "setup".into()),
                failure.code,
                failure.message,
                if failure.retryable { " (retryable)" } else { "" }
            ));
        }
        for w in &self.sync_warnings {
            out.push_str(&format!("{pad}  warning: {}\n", w));
        }
        for skipped in &self.skipped_follow_ups {
            match skipped {
                SkippedFollowUp::RecursionLimit { description, depth, limit } => out.push_str(
                    &format!("{pad}  truncated follow-up (depth {depth} > {limit}): {description}\n"),
                ),
                SkippedFollowUp::TooFine { description, granularity } => out.push_str(&format!(
                    "{pad}  skipped follow-up (granularity {granularity:.2}): {description}\n"
                )),
            }
        }
        for child in &self.micro_cycles {
            child.render_into(out, indent + 1);
        }
    }
}
