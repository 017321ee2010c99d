//! Orchestration entry point.
//!
//! Builds provider, memory and team from an [`EdrrConfig`] (any of them can
//! be overridden), runs a task or a manifest through the coordinator and
//! stores the task and the final report in memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EdrrConfig;
use crate::edrr::{
    Cycle, CycleReport, EdrrCoordinator, Phase, PhaseHooks, QualityEvaluator, TransitionGate,
};
use crate::error::EdrrResult;
use crate::events::SharedEventBus;
use crate::manifest::Manifest;
use crate::memory::{
    build_memory, keys, MemoryError, MemoryStore, RecordKind, RecordMetadata, SharedSyncedMemory,
};
use crate::provider::{build_provider, SharedProvider};
use crate::task::Task;
use crate::wsde::{AgentPool, AgentProfile, WsdeTeam};

/// Final outcome of an orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub cycle: CycleReport,
    /// 0 iff the root cycle completed.
    pub exit_code: i32,
}

impl OrchestrationReport {
    pub fn new(cycle: CycleReport) -> Self {
        let exit_code = cycle.exit_code();
        Self { cycle, exit_code }
    }
}

/// Builder for [`Orchestrator`]; unset parts come from the configuration.
pub struct OrchestratorBuilder {
    config: EdrrConfig,
    provider: Option<SharedProvider>,
    memory: Option<SharedSyncedMemory>,
    agents: Option<Vec<AgentProfile>>,
    pool: Option<AgentPool>,
    evaluator: Option<Arc<dyn QualityEvaluator>>,
    gate: Option<Arc<dyn TransitionGate>>,
    hooks: Vec<Arc<dyn PhaseHooks>>,
    cancel: Option<CancellationToken>,
    events: Option<SharedEventBus>,
}

impl OrchestratorBuilder {
    /// Provider shared by every agent built from profiles.
    pub fn provider(mut self, provider: SharedProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn memory(mut self, memory: SharedSyncedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn agents(mut self, agents: Vec<AgentProfile>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Prebuilt pool, e.g. with a different provider per agent. Takes
    /// precedence over `provider` and `agents`.
    pub fn agent_pool(mut self, pool: AgentPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn gate(mut self, gate: Arc<dyn TransitionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Recovery and failure hook for iterations below threshold. Repeatable.
    pub fn hook(mut self, hook: Arc<dyn PhaseHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn build(self) -> EdrrResult<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let memory = match self.memory {
            Some(memory) => memory,
            None => build_memory(&config.memory).await?,
        };
        let pool = match self.pool {
            Some(pool) => pool,
            None => {
                let provider = match self.provider {
                    Some(provider) => provider,
                    None => build_provider(&config.provider)?,
                };
                let profiles = self.agents.unwrap_or_else(|| config.agents.clone());
                AgentPool::from_profiles(profiles, provider)
            }
        };
        info!(
            agents = pool.len(),
            memory = memory.name(),
            mode = %config.transition_mode,
            "Orchestrator ready"
        );

        let team = WsdeTeam::new(pool, config.team_settings());
        let mut coordinator = EdrrCoordinator::new(config, team, memory);
        if let Some(evaluator) = self.evaluator {
            coordinator = coordinator.with_evaluator(evaluator);
        }
        if let Some(gate) = self.gate {
            coordinator = coordinator.with_gate(gate);
        }
        if let Some(events) = self.events {
            coordinator = coordinator.with_events(events);
        }
        coordinator = coordinator.with_hooks(self.hooks);

        Ok(Orchestrator {
            coordinator,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

pub struct Orchestrator {
    coordinator: EdrrCoordinator,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn builder(config: EdrrConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            provider: None,
            memory: None,
            agents: None,
            pool: None,
            evaluator: None,
            gate: None,
            hooks: Vec::new(),
            cancel: None,
            events: None,
        }
    }

    pub fn coordinator(&self) -> &EdrrCoordinator {
        &self.coordinator
    }

    pub fn memory(&self) -> &SharedSyncedMemory {
        self.coordinator.memory()
    }

    pub fn events(&self) -> &SharedEventBus {
        self.coordinator.events()
    }

    /// Token that cancels the running cycle.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run_task(&self, task: Task) -> EdrrResult<OrchestrationReport> {
        self.run(task, BTreeMap::new()).await
    }

    /// Run the manifest's task with its per-phase instructions.
    pub async fn run_manifest(&self, manifest: &Manifest) -> EdrrResult<OrchestrationReport> {
        manifest.validate()?;
        info!(manifest = %manifest.id, "Running manifest");
        self.run(manifest.to_task(), manifest.instructions()).await
    }

    async fn run(
        &self,
        task: Task,
        instructions: BTreeMap<Phase, String>,
    ) -> EdrrResult<OrchestrationReport> {
        task.validate()?;
        let cycle = Cycle::new(Arc::new(task));
        let cycle_id = cycle.id.clone();
        let memory = self.coordinator.memory();

        memory
            .store(
                &keys::task(&cycle_id),
                serde_json::to_value(cycle.task.as_ref()).map_err(MemoryError::from)?,
                RecordMetadata::new(RecordKind::Task)
                    .with_cycle(&cycle_id)
                    .with_task(&cycle.task.id),
            )
            .await?;

        let report = self
            .coordinator
            .execute(cycle, &instructions, &self.cancel)
            .await?;

        // The report is already in hand; a failed write only costs persistence.
        match serde_json::to_value(&report) {
            Ok(value) => {
                let metadata = RecordMetadata::new(RecordKind::Report)
                    .with_cycle(&cycle_id)
                    .with_task(&report.task_id)
                    .with_tag(report.terminal_state.to_string());
                if let Err(e) = memory.store(&keys::report(&cycle_id), value, metadata).await {
                    warn!(cycle_id = %cycle_id, error = %e, "Failed to store cycle report");
                }
            }
            Err(e) => warn!(cycle_id = %cycle_id, error = %e, "Failed to serialize cycle report"),
        }

        Ok(OrchestrationReport::new(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edrr::CycleState;
    use crate::memory::MemoryFilter;
    use crate::provider::OfflineProvider;

    fn config() -> EdrrConfig {
        EdrrConfig {
            max_iterations_per_phase: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_task_stores_task_and_report() {
        let orchestrator = Orchestrator::builder(config())
            .provider(Arc::new(OfflineProvider::new("offline")))
            .build()
            .await
            .unwrap();
        let report = orchestrator
            .run_task(Task::new("Write a CSV parser").with_id("csv"))
            .await
            .unwrap();

        assert_eq!(report.cycle.terminal_state, CycleState::Completed);
        assert_eq!(report.exit_code, 0);
        let cycle_id = &report.cycle.cycle_id;
        let task = orchestrator
            .memory()
            .retrieve(&keys::task(cycle_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.value["id"], "csv");
        let stored = orchestrator
            .memory()
            .query(&MemoryFilter::new().kind(RecordKind::Report))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value["terminal_state"], "completed");
    }

    #[tokio::test]
    async fn test_empty_pool_fails_with_exit_code_one() {
        let orchestrator = Orchestrator::builder(config())
            .agent_pool(AgentPool::new())
            .build()
            .await
            .unwrap();
        let report = orchestrator.run_task(Task::new("anything")).await.unwrap();
        assert_eq!(report.exit_code, 1);
        assert_eq!(
            report.cycle.failure.as_ref().map(|f| f.code.as_str()),
            Some("consensus_unresolved")
        );
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let bad = EdrrConfig {
            max_concurrent_agents: 0,
            ..Default::default()
        };
        let err = Orchestrator::builder(bad).build().await.err().unwrap();
        assert_eq!(err.code(), "invalid_config");
    }

    #[tokio::test]
    async fn test_default_build_uses_offline_provider() {
        let orchestrator = Orchestrator::builder(EdrrConfig::default())
            .build()
            .await
            .unwrap();
        assert_eq!(orchestrator.coordinator().team().pool().len(), 4);
        assert!(!orchestrator.cancellation_token().is_cancelled());
    }
}
