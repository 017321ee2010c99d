//! EDRR Coordination Library
//!
//! Orchestration core of an LLM-driven development assistant:
//! - EDRR (Expand → Differentiate → Refine → Retrospect) cycle coordinator
//!   with quality gates, iteration caps and depth-bounded micro-cycles
//! - WSDE team: non-hierarchical agents with a rotating primus, dialectical
//!   critique and majority voting
//! - Pluggable memory (in-memory, JSON files, optional RocksDB) with
//!   primary + best-effort secondary synchronisation
//! - Provider abstraction over OpenAI-compatible APIs and a deterministic
//!   offline backend, with retry/backoff
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌────────────────┐    ┌──────────────┐
//! │ Orchestrator │───▶│ EdrrCoordinator│───▶│   WsdeTeam   │──▶ LlmProvider
//! │ (entry point)│    │ (state machine)│    │ (consensus)  │
//! └──────┬───────┘    └───────┬────────┘    └──────┬───────┘
//!        │                    │                    │
//!        ▼                    ▼                    ▼
//!   ┌──────────────────────────────────────────────────────┐
//!   │        SyncedMemory (primary + secondaries)          │
//!   └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use edrr_coordination::{EdrrConfig, Orchestrator, Task};
//!
//! let orchestrator = Orchestrator::builder(EdrrConfig::default()).build().await?;
//! let report = orchestrator.run_task(Task::new("Design a rate limiter")).await?;
//! println!("{}", report.cycle.render());
//! std::process::exit(report.exit_code);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod edrr;
pub mod error;
pub mod events;
pub mod manifest;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod task;
pub mod wsde;

// Re-export the entry points
pub use config::{ConfigError, EdrrConfig, FeatureFlags, TransitionMode, UnresolvedPolicy};
pub use edrr::{
    AutoApprove, CycleReport, CycleState, EdrrCoordinator, HeuristicEvaluator, MetricThresholds,
    Phase, PhaseHooks, PhaseResult, PhaseThresholds, QualityEvaluator, QualityReport,
    ThresholdCheck, TransitionDecision, TransitionGate, TransitionRequest,
};
pub use error::{EdrrError, EdrrResult, FailureReport};
pub use events::{CycleEvent, EventBus, SharedEventBus};
pub use manifest::{Manifest, ManifestError, PhaseSpec};
pub use memory::{
    build_memory, BackendConfig, MemoryConfig, MemoryError, MemoryStore, SharedSyncedMemory,
    SyncedMemory,
};
pub use orchestrator::{OrchestrationReport, Orchestrator, OrchestratorBuilder};
pub use provider::{
    build_provider, GenerateParams, LlmProvider, ProviderConfig, ProviderError, ProviderKind,
    SharedProvider,
};
pub use task::{Task, TaskError};
pub use wsde::{AgentPool, AgentProfile, ConsensusRecord, ConsensusStatus, WsdeTeam};
