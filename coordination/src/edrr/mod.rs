//! EDRR: Expand, Differentiate, Refine, Retrospect.
//!
//! ```text
//!  Expand ──► Differentiate ──► Refine ──► Retrospect ──► Completed
//!    │  ▲          │  ▲           │  ▲         │  ▲
//!    └──┘          └──┘           └──┘         └──┘   (iterate below threshold)
//!    any phase ────────────────────────────────────────► Failed
//! ```
//!
//! The phase pointer only moves forward. Retrospective follow-ups run as
//! nested cycles one level deeper, up to the configured depth.

pub mod coordinator;
pub mod cycle;
pub mod gate;
pub mod hooks;
pub mod metrics;
pub mod phase;
pub mod report;

pub use coordinator::{parse_follow_up, EdrrCoordinator};
pub use cycle::{shape_output, Cycle, PhaseRecord, PhaseResult};
pub use gate::{AutoApprove, TransitionDecision, TransitionGate, TransitionRequest};
pub use hooks::{gate_iteration, PhaseHooks};
pub use metrics::{
    HeuristicEvaluator, MetricGates, MetricThresholds, PhaseThresholds, QualityEvaluator,
    QualityReport, ThresholdCheck,
};
pub use phase::{CycleState, Phase, StateTransition, TransitionError, TransitionReason};
pub use report::{CycleReport, IterationTrace, PhaseSummary, SkippedFollowUp};
