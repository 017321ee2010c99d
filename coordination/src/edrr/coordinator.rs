//! EDRR coordinator: drives one cycle through the four phases.
//!
//! ```text
//!   ┌────────────────────────── per phase iteration ───────────────────────────┐
//!   │ cancel? ─► cap? ─► WsdeTeam::run_phase ─► shape ─► evaluate ─► persist   │
//!   │                        (retry unresolved,                      │         │
//!   │                         then fail | escalate)                  ▼         │
//!   │                          thresholds met (or hook recovered)? ─► advance  │
//!   │                                         iteration ≥ cap?     ─► forced   │
//!   │                                         otherwise            ─► repeat   │
//!   └──────────────────────────────────────────────────────────────────────────┘
//!   Retrospect ─► follow-ups ─► nested cycles (depth + 1, capped) ─► Completed
//! ```
//!
//! Below threshold the [`PhaseHooks`] get a chance to recover the iteration
//! before it repeats or is forced onward. In manual mode the
//! [`TransitionGate`] decides every iteration; the iteration cap still wins
//! over a `Repeat`.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use futures::future::BoxFuture;
use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cycle::{shape_output, Cycle, PhaseRecord, PhaseResult};
use super::gate::{AutoApprove, TransitionDecision, TransitionGate, TransitionRequest};
use super::hooks::{gate_iteration, PhaseHooks};
use super::metrics::{HeuristicEvaluator, QualityEvaluator};
use super::phase::{CycleState, Phase, TransitionReason};
use super::report::{CycleReport, SkippedFollowUp};
use crate::config::{EdrrConfig, TransitionMode, UnresolvedPolicy};
use crate::error::{EdrrError, EdrrResult, FailureReport};
use crate::events::{CycleEvent, EventBus, SharedEventBus};
use crate::memory::{
    keys, MemoryError, MemoryFilter, MemoryStore, RecordKind, RecordMetadata, SharedSyncedMemory,
};
use crate::task::Task;
use crate::wsde::{ConsensusRecord, ConsensusStatus, DraftTarget, PromptContext, WsdeTeam};

static GRANULARITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\[granularity\s*=\s*([0-9]*\.?[0-9]+)\]\s*$")
        .expect("GRANULARITY_RE regex should compile")
});

/// Split a follow-up line into its description and an optional trailing
/// `[granularity=0.3]` annotation.
pub fn parse_follow_up(line: &str) -> (String, Option<f64>) {
    match GRANULARITY_RE.captures(line) {
        Some(caps) => {
            let granularity = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let start = caps.get(0).map(|m| m.start()).unwrap_or(line.len());
            (line[..start].trim().to_string(), granularity)
        }
        None => (line.trim().to_string(), None),
    }
}

/// A failure attributed to the phase that was running.
struct PhaseFailure {
    phase: Phase,
    error: EdrrError,
}

impl PhaseFailure {
    fn new(phase: Phase, error: impl Into<EdrrError>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }
}

/// What happens after a phase iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Repeat,
    Advance {
        reason: TransitionReason,
        forced: bool,
    },
}

/// Outcome of the retrospective follow-ups.
#[derive(Default)]
struct MicroCycles {
    reports: Vec<CycleReport>,
    skipped: Vec<SkippedFollowUp>,
    truncated: bool,
}

pub struct EdrrCoordinator {
    config: EdrrConfig,
    team: WsdeTeam,
    memory: SharedSyncedMemory,
    evaluator: Arc<dyn QualityEvaluator>,
    gate: Arc<dyn TransitionGate>,
    hooks: Vec<Arc<dyn PhaseHooks>>,
    events: SharedEventBus,
}

impl EdrrCoordinator {
    pub fn new(config: EdrrConfig, team: WsdeTeam, memory: SharedSyncedMemory) -> Self {
        Self {
            config,
            team,
            memory,
            evaluator: Arc::new(HeuristicEvaluator),
            gate: Arc::new(AutoApprove),
            hooks: Vec::new(),
            events: EventBus::new().shared(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn TransitionGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Append a hook; hooks are consulted in the order they were added.
    pub fn with_hook(mut self, hook: Arc<dyn PhaseHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_hooks(mut self, hooks: impl IntoIterator<Item = Arc<dyn PhaseHooks>>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EdrrConfig {
        &self.config
    }

    pub fn team(&self) -> &WsdeTeam {
        &self.team
    }

    pub fn memory(&self) -> &SharedSyncedMemory {
        &self.memory
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    /// Run a root cycle for `task`.
    ///
    /// Only an invalid task is an `Err`; failures during the cycle end in a
    /// `Failed` report.
    pub async fn run(&self, task: Task, cancel: &CancellationToken) -> EdrrResult<CycleReport> {
        task.validate()?;
        self.execute(Cycle::new(Arc::new(task)), &BTreeMap::new(), cancel)
            .await
    }

    /// Run a prepared cycle with per-phase prompt instructions.
    pub async fn execute(
        &self,
        cycle: Cycle,
        instructions: &BTreeMap<Phase, String>,
        cancel: &CancellationToken,
    ) -> EdrrResult<CycleReport> {
        cycle.task.validate()?;
        if cycle.state != CycleState::Expand || !cycle.records.is_empty() {
            return Err(EdrrError::InvalidTransition(
                super::phase::TransitionError {
                    from: cycle.state,
                    to: CycleState::Expand,
                },
            ));
        }
        Ok(self.drive_cycle(cycle, instructions, cancel).await)
    }

    fn drive_cycle<'a>(
        &'a self,
        mut cycle: Cycle,
        instructions: &'a BTreeMap<Phase, String>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, CycleReport> {
        Box::pin(async move {
            let sync_mark = self.memory.sync_errors().len();
            info!(
                cycle_id = %cycle.id,
                task_id = %cycle.task.id,
                depth = cycle.depth,
                "Cycle started"
            );
            self.events.publish(CycleEvent::CycleStarted {
                cycle_id: cycle.id.clone(),
                task_id: cycle.task.id.clone(),
                depth: cycle.depth,
                parent_id: cycle.parent_id.clone(),
                timestamp: Utc::now(),
            });

            let mut forced = Vec::new();
            let outcome = self
                .run_phases(&mut cycle, instructions, cancel, &mut forced)
                .await;
            let sync_warnings = self
                .memory
                .sync_errors()
                .into_iter()
                .skip(sync_mark)
                .collect();

            let mut micro = MicroCycles::default();
            let failure = match outcome {
                Ok(()) => {
                    micro = self.run_micro_cycles(&cycle, cancel).await;
                    if cancel.is_cancelled() {
                        Some(self.fail(&mut cycle, None, EdrrError::Cancelled))
                    } else {
                        match cycle.transition(CycleState::Completed, TransitionReason::CycleFinished)
                        {
                            Ok(()) => None,
                            Err(e) => Some(self.fail(&mut cycle, Some(Phase::Retrospect), e.into())),
                        }
                    }
                }
                Err(PhaseFailure { phase, error }) => Some(self.fail(&mut cycle, Some(phase), error)),
            };

            let mut report = CycleReport::from_cycle(&cycle, &forced);
            report.sync_warnings = sync_warnings;
            report.failure = failure;
            report.micro_cycles = micro.reports;
            report.skipped_follow_ups = micro.skipped;
            report.truncated = micro.truncated;

            info!(
                cycle_id = %cycle.id,
                state = %cycle.state,
                phase_executions = cycle.phase_executions,
                micro_cycles = report.micro_cycles.len(),
                "Cycle finished"
            );
            self.events.publish(CycleEvent::CycleFinished {
                cycle_id: cycle.id.clone(),
                state: cycle.state,
                phase_executions: cycle.phase_executions,
                timestamp: Utc::now(),
            });
            report
        })
    }

    fn fail(&self, cycle: &mut Cycle, phase: Option<Phase>, error: EdrrError) -> FailureReport {
        error!(
            cycle_id = %cycle.id,
            phase = ?phase,
            code = error.code(),
            error = %error,
            "Cycle failed"
        );
        if let Err(e) = cycle.transition(CycleState::Failed, TransitionReason::Failure) {
            warn!(cycle_id = %cycle.id, error = %e, "Cycle already terminal");
        }
        FailureReport::from_error(phase, &error, cycle.visited_phases())
    }

    async fn run_phases(
        &self,
        cycle: &mut Cycle,
        instructions: &BTreeMap<Phase, String>,
        cancel: &CancellationToken,
        forced: &mut Vec<Phase>,
    ) -> Result<(), PhaseFailure> {
        let cap = self.config.total_iteration_cap();
        let mut iteration = 0;

        while let Some(phase) = cycle.current_phase() {
            iteration += 1;
            if cancel.is_cancelled() {
                return Err(PhaseFailure::new(phase, EdrrError::Cancelled));
            }
            if cycle.phase_executions >= cap {
                return Err(PhaseFailure::new(
                    phase,
                    EdrrError::IterationCapExceeded { limit: cap },
                ));
            }
            cycle.phase_executions += 1;
            let started = Instant::now();
            let started_at = Utc::now();
            debug!(cycle_id = %cycle.id, %phase, iteration, "Phase iteration started");

            let record = match self
                .form_consensus(cycle, phase, iteration, instructions, cancel)
                .await
            {
                Ok(record) if !cancel.is_cancelled() => record,
                Ok(_) | Err(EdrrError::Cancelled) => {
                    self.discard_drafts(&cycle.id, phase, iteration).await;
                    return Err(PhaseFailure::new(phase, EdrrError::Cancelled));
                }
                Err(e) => return Err(PhaseFailure::new(phase, e)),
            };

            let output = shape_output(phase, &record);
            let mut quality = self.evaluator.evaluate(phase, &record, &output);
            let check = gate_iteration(
                &self.hooks,
                &self.config.thresholds,
                phase,
                &mut quality,
                &record,
            );
            let result = PhaseResult {
                cycle_id: cycle.id.clone(),
                task_id: cycle.task.id.clone(),
                phase,
                iteration,
                output,
                quality,
                gate: check.clone(),
                consensus_status: record.status,
                started_at,
                completed_at: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
            };
            self.persist(cycle, &result, &record)
                .await
                .map_err(|e| PhaseFailure::new(phase, e))?;

            let request = TransitionRequest {
                cycle_id: cycle.id.clone(),
                depth: cycle.depth,
                phase,
                next: phase.next(),
                iteration,
                max_iterations: self.config.max_iterations_per_phase,
                quality: result.quality.score,
                threshold: self.config.thresholds.for_phase(phase),
                check,
                summary: record.decision.clone(),
            };
            let duration_ms = result.duration_ms;
            cycle.records.push(PhaseRecord {
                phase,
                result,
                consensus: record,
            });

            let step = self.next_step(&request).await?;
            let (advanced, was_forced) = match step {
                Step::Repeat => (false, false),
                Step::Advance { forced, .. } => (true, forced),
            };
            info!(
                cycle_id = %cycle.id,
                %phase,
                iteration,
                quality = request.quality,
                threshold = request.threshold,
                recovered = request.check.recovered,
                unmet = ?request.check.unmet,
                duration_ms,
                advanced,
                forced = was_forced,
                "Phase iteration complete"
            );
            self.events.publish(CycleEvent::PhaseCompleted {
                cycle_id: cycle.id.clone(),
                phase,
                iteration,
                quality: request.quality,
                duration_ms,
                advanced,
                forced: was_forced,
                timestamp: Utc::now(),
            });

            if let Step::Advance { reason, forced: f } = step {
                if f {
                    warn!(
                        cycle_id = %cycle.id,
                        %phase,
                        quality = request.quality,
                        threshold = request.threshold,
                        "Iteration cap reached below threshold, forcing transition"
                    );
                    forced.push(phase);
                }
                match phase.next() {
                    Some(next) => {
                        cycle
                            .transition(next.into(), reason)
                            .map_err(|e| PhaseFailure::new(phase, e))?;
                        iteration = 0;
                    }
                    None => return Ok(()),
                }
            }
        }
        Ok(())
    }

    async fn next_step(&self, request: &TransitionRequest) -> Result<Step, PhaseFailure> {
        let passed = request.quality_passed();
        let at_cap = !request.can_repeat();
        if self.config.transition_mode == TransitionMode::Automatic {
            return Ok(if passed {
                Step::Advance {
                    reason: TransitionReason::QualityGate,
                    forced: false,
                }
            } else if at_cap {
                Step::Advance {
                    reason: TransitionReason::IterationCap,
                    forced: true,
                }
            } else {
                Step::Repeat
            });
        }

        let decision = self.gate.confirm(request).await;
        debug!(cycle_id = %request.cycle_id, phase = %request.phase, %decision, "Transition gate answered");
        match decision {
            TransitionDecision::Proceed => Ok(Step::Advance {
                reason: TransitionReason::ManualApproval,
                forced: false,
            }),
            TransitionDecision::Repeat if !at_cap => Ok(Step::Repeat),
            TransitionDecision::Repeat => {
                warn!(phase = %request.phase, "Repeat requested at the iteration cap, advancing");
                Ok(Step::Advance {
                    reason: TransitionReason::IterationCap,
                    forced: true,
                })
            }
            TransitionDecision::Abort => Err(PhaseFailure::new(
                request.phase,
                EdrrError::Aborted {
                    phase: request.phase,
                },
            )),
        }
    }

    /// Ask the team for a decision, retrying unresolved consensus and
    /// escalating per the configured policy.
    async fn form_consensus(
        &self,
        cycle: &mut Cycle,
        phase: Phase,
        iteration: u32,
        instructions: &BTreeMap<Phase, String>,
        cancel: &CancellationToken,
    ) -> EdrrResult<ConsensusRecord> {
        let prior = cycle.prior_decisions();
        let ctx = PromptContext {
            task: &cycle.task,
            phase,
            iteration,
            instructions: instructions.get(&phase).map(String::as_str),
            prior: &prior,
        };
        let mut attempt = 0;
        loop {
            let drafts = DraftTarget {
                memory: &*self.memory,
                cycle_id: &cycle.id,
                task_id: &cycle.task.id,
                attempt,
            };
            let record = self
                .team
                .run_phase(&ctx, &mut cycle.primus_history, &drafts, cancel)
                .await?;
            self.publish_participation(&cycle.id, &record);

            if record.is_resolved() {
                break Ok(record);
            }
            let reason = record
                .note
                .clone()
                .unwrap_or_else(|| "no decision".to_string());
            if attempt < self.config.consensus_retries {
                attempt += 1;
                warn!(cycle_id = %cycle.id, %phase, attempt, %reason, "Consensus unresolved, retrying");
                continue;
            }
            if self.config.unresolved_policy == UnresolvedPolicy::Escalate {
                if let Some(decision) = self.gate.escalate(&record).await {
                    info!(cycle_id = %cycle.id, %phase, "Unresolved consensus decided by escalation");
                    let mut record = record;
                    record.decision = decision;
                    record.status = ConsensusStatus::Degraded;
                    record.reduced_confidence = true;
                    record.note = Some(format!("escalated after unresolved consensus: {}", reason));
                    break Ok(record);
                }
            }
            break Err(EdrrError::ConsensusUnresolved { phase, reason });
        }
    }

    fn publish_participation(&self, cycle_id: &str, record: &ConsensusRecord) {
        if let Some(primus) = &record.primus_name {
            self.events.publish(CycleEvent::PrimusSelected {
                cycle_id: cycle_id.to_string(),
                phase: record.phase,
                iteration: record.iteration,
                agent: primus.clone(),
                timestamp: Utc::now(),
            });
        }
        for excluded in &record.excluded {
            self.events.publish(CycleEvent::AgentExcluded {
                cycle_id: cycle_id.to_string(),
                phase: record.phase,
                agent: excluded.agent_name.clone(),
                reason: excluded.reason.clone(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Write the consensus record and the authoritative phase result.
    async fn persist(
        &self,
        cycle: &Cycle,
        result: &PhaseResult,
        record: &ConsensusRecord,
    ) -> EdrrResult<()> {
        let metadata = |kind| {
            RecordMetadata::new(kind)
                .with_cycle(&cycle.id)
                .with_task(&cycle.task.id)
                .with_phase(result.phase)
        };
        let consensus = serde_json::to_value(record).map_err(MemoryError::from)?;
        self.memory
            .store(
                &keys::consensus(&cycle.id, result.phase),
                consensus,
                metadata(RecordKind::Consensus),
            )
            .await?;

        let value = serde_json::to_value(result).map_err(MemoryError::from)?;
        self.memory
            .store(
                &keys::phase_result(&cycle.id, result.phase),
                value,
                metadata(RecordKind::PhaseResult).with_tag(format!("iteration:{}", result.iteration)),
            )
            .await?;
        Ok(())
    }

    /// Remove the drafts of an interrupted iteration.
    async fn discard_drafts(&self, cycle_id: &str, phase: Phase, iteration: u32) {
        let prefix = keys::iteration_drafts_prefix(cycle_id, phase, iteration);
        let records = match self
            .memory
            .query(&MemoryFilter::new().key_prefix(prefix))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(cycle_id, %phase, error = %e, "Could not list drafts to discard");
                return;
            }
        };
        for record in &records {
            if let Err(e) = self.memory.delete(&record.key).await {
                warn!(cycle_id, key = %record.key, error = %e, "Could not discard draft");
            }
        }
        debug!(cycle_id, %phase, iteration, discarded = records.len(), "Drafts discarded");
    }

    async fn run_micro_cycles(&self, cycle: &Cycle, cancel: &CancellationToken) -> MicroCycles {
        let mut micro = MicroCycles::default();
        if !self.config.features.micro_cycles {
            return micro;
        }
        let Some(retrospect) = cycle.latest(Phase::Retrospect) else {
            return micro;
        };

        let no_instructions = BTreeMap::new();
        let limit = self.config.max_recursion_depth;
        for line in retrospect.result.follow_ups() {
            if cancel.is_cancelled() {
                break;
            }
            let (description, granularity) = parse_follow_up(&line);
            if description.is_empty() {
                continue;
            }

            let depth = cycle.depth + 1;
            if depth > limit {
                let err = EdrrError::RecursionLimitExceeded { depth, limit };
                warn!(cycle_id = %cycle.id, error = %err, follow_up = %description, "Micro-cycle truncated");
                micro.skipped.push(SkippedFollowUp::RecursionLimit {
                    description,
                    depth,
                    limit,
                });
                micro.truncated = true;
                continue;
            }

            let mut task = cycle.task.follow_up(description.clone());
            task.granularity = granularity.or(cycle.task.granularity);
            if let Some(g) = task.granularity {
                if g < self.config.granularity_threshold {
                    info!(
                        cycle_id = %cycle.id,
                        granularity = g,
                        threshold = self.config.granularity_threshold,
                        follow_up = %description,
                        "Follow-up below granularity threshold, skipped"
                    );
                    micro.skipped.push(SkippedFollowUp::TooFine {
                        description,
                        granularity: g,
                    });
                    continue;
                }
            }

            let child = Cycle::nested(cycle, Arc::new(task));
            info!(parent_id = %cycle.id, cycle_id = %child.id, depth, follow_up = %description, "Micro-cycle spawned");
            self.events.publish(CycleEvent::MicroCycleSpawned {
                parent_id: cycle.id.clone(),
                cycle_id: child.id.clone(),
                depth,
                description,
                timestamp: Utc::now(),
            });
            let report = self.drive_cycle(child, &no_instructions, cancel).await;
            micro.reports.push(report);
        }
        micro
    }
}
