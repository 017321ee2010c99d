//! WSDE team: non-hierarchical agents with a rotating primus.
//!
//! ```text
//!   AgentPool (arena) ──► select_primus (pure) ──► WsdeTeam::run_phase
//!                                                     │
//!                         proposals ─► vote ─► thesis/antithesis/synthesis
//!                                                     │
//!                                                     ▼
//!                                              ConsensusRecord
//! ```
//!
//! Fewer than two responders degrade to a single proposal with reduced
//! confidence; zero agents yield an unresolved record.

pub mod agent;
pub mod consensus;
pub mod dialectic;
pub mod primus;
pub mod team;
pub mod voting;

pub use agent::{default_profiles, Agent, AgentId, AgentPool, AgentProfile, Role};
pub use consensus::{
    ConsensusRecord, ConsensusStatus, Contribution, DialecticalExchange, ExcludedAgent,
    ExclusionReason,
};
pub use dialectic::{follow_ups, PromptContext, FOLLOW_UP_MARKER};
pub use primus::{select_primus, PrimusHistory};
pub use team::{DraftTarget, TeamError, TeamResult, TeamSettings, WsdeTeam};
pub use voting::{majority_vote, Ballot, VoteTally};
