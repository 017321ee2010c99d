//! WSDE team execution of a single phase iteration.
//!
//! ```text
//!   select primus ─► proposals (concurrent, per-agent timeout) ─► barrier
//!                                                                   │
//!        ┌──────────────────────────────────────────────────────────┘
//!        ▼
//!   thesis (vote winner | primus proposal) ─► critic antithesis ─► primus synthesis
//!        │
//!        ▼
//!   ConsensusRecord { Reached | Degraded | Unresolved }
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::agent::{Agent, AgentId, AgentPool};
use super::consensus::{
    ConsensusRecord, ConsensusStatus, Contribution, DialecticalExchange, ExcludedAgent,
    ExclusionReason,
};
use super::dialectic::{self, PromptContext};
use super::primus::{assign_roles, rank_agents, select_primus, PrimusHistory};
use super::voting::{cast_vote, majority_vote, Ballot};
use crate::edrr::Phase;
use crate::memory::{keys, MemoryError, MemoryStore, RecordKind, RecordMetadata};
use crate::provider::ProviderError;

/// Error type for team execution
#[derive(Debug, thiserror::Error)]
pub enum TeamError {
    #[error("all agents timed out during {phase}")]
    AllAgentsTimedOut { phase: Phase },

    #[error("no agent produced a proposal during {phase}: {source}")]
    Provider {
        phase: Phase,
        #[source]
        source: ProviderError,
    },

    #[error("phase cancelled")]
    Cancelled,

    #[error("draft write failed: {0}")]
    Memory(#[from] MemoryError),
}

/// Result type for team operations
pub type TeamResult<T> = Result<T, TeamError>;

/// Team behaviour knobs, derived from the coordinator configuration.
#[derive(Debug, Clone)]
pub struct TeamSettings {
    pub agent_timeout: Duration,
    pub max_concurrent_agents: usize,
    /// Phases whose thesis is chosen by majority vote.
    pub voting_phases: BTreeSet<Phase>,
    pub dialectical_reasoning: bool,
    /// When false only the primus participates.
    pub collaboration: bool,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(60),
            max_concurrent_agents: 4,
            voting_phases: [Phase::Differentiate].into_iter().collect(),
            dialectical_reasoning: true,
            collaboration: true,
        }
    }
}

/// Identifies where drafts of this iteration are written.
#[derive(Clone, Copy)]
pub struct DraftTarget<'a> {
    pub memory: &'a dyn MemoryStore,
    pub cycle_id: &'a str,
    pub task_id: &'a str,
    /// Consensus attempt within the iteration; retries write beside earlier attempts.
    pub attempt: u32,
}

enum AgentOutcome {
    Responded(String),
    TimedOut,
    Failed(ProviderError),
    Cancelled,
}

pub struct WsdeTeam {
    pool: AgentPool,
    settings: TeamSettings,
}

impl WsdeTeam {
    pub fn new(pool: AgentPool, settings: TeamSettings) -> Self {
        Self { pool, settings }
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn settings(&self) -> &TeamSettings {
        &self.settings
    }

    async fn call_agent(
        &self,
        agent: &Agent,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => AgentOutcome::Cancelled,
            result = tokio::time::timeout(self.settings.agent_timeout, agent.respond(prompt)) => {
                match result {
                    Ok(Ok(text)) => AgentOutcome::Responded(text),
                    Ok(Err(e)) => AgentOutcome::Failed(e),
                    Err(_) => AgentOutcome::TimedOut,
                }
            }
        }
    }

    async fn write_draft(
        drafts: &DraftTarget<'_>,
        key: String,
        phase: Phase,
        agent_name: &str,
        content: &str,
    ) -> Result<(), MemoryError> {
        let metadata = RecordMetadata::new(RecordKind::Draft)
            .with_cycle(drafts.cycle_id)
            .with_task(drafts.task_id)
            .with_phase(phase)
            .with_agent(agent_name);
        drafts
            .memory
            .store(&key, json!({ "agent": agent_name, "content": content }), metadata)
            .await
    }

    /// Run one iteration of `ctx.phase` and return the team's decision.
    pub async fn run_phase(
        &self,
        ctx: &PromptContext<'_>,
        history: &mut PrimusHistory,
        drafts: &DraftTarget<'_>,
        cancel: &CancellationToken,
    ) -> TeamResult<ConsensusRecord> {
        let phase = ctx.phase;
        let profiles = self.pool.profiles();

        let Some(primus) = select_primus(&profiles, ctx.task, phase, history) else {
            warn!(%phase, "No agents available, consensus impossible");
            return Ok(ConsensusRecord::unresolved(
                phase,
                ctx.iteration,
                "no agents available",
            ));
        };
        history.record(primus);
        let primus_name = self.pool.name_of(primus);
        info!(%phase, iteration = ctx.iteration, primus = %primus_name, "Primus selected");

        let participants: Vec<AgentId> = if self.settings.collaboration {
            self.pool.iter().map(|a| a.id).collect()
        } else {
            vec![primus]
        };

        // ── Proposals ──────────────────────────────────────────────────
        let prompt = dialectic::proposal_prompt(ctx);
        let semaphore = Semaphore::new(self.settings.max_concurrent_agents.max(1));
        let calls = participants.iter().filter_map(|&id| self.pool.get(id)).map(|agent| {
            let prompt = &prompt;
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let outcome = self.call_agent(agent, prompt, cancel).await;
                if let AgentOutcome::Responded(text) = &outcome {
                    let key = keys::proposal_draft(
                        drafts.cycle_id,
                        phase,
                        ctx.iteration,
                        drafts.attempt,
                        agent.id.0,
                    );
                    Self::write_draft(drafts, key, phase, agent.name(), text).await?;
                }
                Ok::<_, MemoryError>((agent, outcome))
            }
        });
        let outcomes = join_all(calls).await;

        if cancel.is_cancelled() {
            return Err(TeamError::Cancelled);
        }

        let mut contributions = Vec::new();
        let mut excluded = Vec::new();
        let mut first_provider_error = None;
        for result in outcomes {
            let (agent, outcome) = result?;
            match outcome {
                AgentOutcome::Responded(content) => contributions.push(Contribution {
                    agent: agent.id,
                    agent_name: agent.name().to_string(),
                    content,
                }),
                AgentOutcome::TimedOut => {
                    warn!(%phase, agent = agent.name(), "Agent timed out, excluded from consensus");
                    excluded.push(ExcludedAgent {
                        agent: agent.id,
                        agent_name: agent.name().to_string(),
                        reason: ExclusionReason::Timeout,
                    });
                }
                AgentOutcome::Failed(e) => {
                    warn!(%phase, agent = agent.name(), error = %e, "Agent failed, excluded from consensus");
                    excluded.push(ExcludedAgent {
                        agent: agent.id,
                        agent_name: agent.name().to_string(),
                        reason: ExclusionReason::ProviderError(e.to_string()),
                    });
                    first_provider_error.get_or_insert(e);
                }
                AgentOutcome::Cancelled => return Err(TeamError::Cancelled),
            }
        }

        if contributions.is_empty() {
            return Err(match first_provider_error {
                Some(source) => TeamError::Provider { phase, source },
                None => TeamError::AllAgentsTimedOut { phase },
            });
        }

        let mut record = ConsensusRecord {
            phase,
            iteration: ctx.iteration,
            primus: Some(primus),
            primus_name: Some(primus_name),
            roles: assign_roles(self.pool.len(), primus),
            contributions,
            excluded,
            vote: None,
            dialectic: None,
            decision: String::new(),
            status: ConsensusStatus::Reached,
            reduced_confidence: false,
            note: None,
            created_at: chrono::Utc::now(),
        };

        // ── Thesis ─────────────────────────────────────────────────────
        let primus_index = record.contributions.iter().position(|c| c.agent == primus);
        let thesis_index = if self.settings.voting_phases.contains(&phase)
            && record.contributions.len() >= 2
        {
            let texts: Vec<&str> = record
                .contributions
                .iter()
                .map(|c| c.content.as_str())
                .collect();
            let ballots: Vec<Ballot> = record
                .contributions
                .iter()
                .filter_map(|c| {
                    let voter = self.pool.get(c.agent)?;
                    let choice = cast_vote(&voter.profile, &texts, primus_index)?;
                    Some(Ballot {
                        voter: c.agent,
                        choice,
                    })
                })
                .collect();
            let tally = majority_vote(ballots, Some(primus));
            let winner = tally.winner;
            record.vote = Some(tally);
            match winner {
                Some(index) => index,
                None => {
                    warn!(%phase, "Vote tied without a primus tie-break");
                    record.status = ConsensusStatus::Unresolved;
                    record.reduced_confidence = true;
                    record.note = Some("vote tied and the primus did not break it".into());
                    return Ok(record);
                }
            }
        } else {
            primus_index.unwrap_or(0)
        };
        let thesis = record.contributions[thesis_index].clone();

        if record.contributions.len() < 2 {
            warn!(%phase, agent = %thesis.agent_name, "Single proposal, consensus has reduced confidence");
            record.status = ConsensusStatus::Degraded;
            record.reduced_confidence = true;
            record.note = Some("single proposal without critique".into());
            record.decision = thesis.content.clone();
            record.dialectic = Some(DialecticalExchange {
                thesis: thesis.clone(),
                antithesis: None,
                synthesis: thesis,
            });
            return Ok(record);
        }

        if !self.settings.dialectical_reasoning {
            record.decision = thesis.content;
            return Ok(record);
        }

        // ── Dialectic ──────────────────────────────────────────────────
        let responded: BTreeSet<AgentId> = record.contributions.iter().map(|c| c.agent).collect();
        let ranked: Vec<AgentId> = rank_agents(&profiles, ctx.task, phase)
            .into_iter()
            .filter(|id| responded.contains(id) && *id != thesis.agent)
            .collect();
        let critic_id = ranked
            .iter()
            .copied()
            .find(|id| *id != primus)
            .or_else(|| ranked.first().copied());
        let synthesizer_id = if responded.contains(&primus) {
            primus
        } else {
            thesis.agent
        };

        let antithesis = match critic_id.and_then(|id| self.pool.get(id)) {
            Some(critic) => {
                let prompt = dialectic::critique_prompt(ctx, &thesis.content);
                match self.call_agent(critic, &prompt, cancel).await {
                    AgentOutcome::Responded(text) => {
                        let key = keys::dialectic_draft(
                            drafts.cycle_id,
                            phase,
                            ctx.iteration,
                            drafts.attempt,
                            "antithesis",
                        );
                        Self::write_draft(drafts, key, phase, critic.name(), &text).await?;
                        Some(Contribution {
                            agent: critic.id,
                            agent_name: critic.name().to_string(),
                            content: text,
                        })
                    }
                    AgentOutcome::Cancelled => return Err(TeamError::Cancelled),
                    AgentOutcome::TimedOut => {
                        warn!(%phase, agent = critic.name(), "Critic timed out");
                        None
                    }
                    AgentOutcome::Failed(e) => {
                        warn!(%phase, agent = critic.name(), error = %e, "Critic failed");
                        None
                    }
                }
            }
            None => None,
        };

        let Some(antithesis) = antithesis else {
            record.status = ConsensusStatus::Degraded;
            record.reduced_confidence = true;
            record.note = Some("critique unavailable, thesis adopted unchallenged".into());
            record.decision = thesis.content.clone();
            record.dialectic = Some(DialecticalExchange {
                thesis: thesis.clone(),
                antithesis: None,
                synthesis: thesis,
            });
            return Ok(record);
        };

        let synthesis = match self.pool.get(synthesizer_id) {
            Some(synthesizer) => {
                let prompt =
                    dialectic::synthesis_prompt(ctx, &thesis.content, &antithesis.content);
                match self.call_agent(synthesizer, &prompt, cancel).await {
                    AgentOutcome::Responded(text) => {
                        let key = keys::dialectic_draft(
                            drafts.cycle_id,
                            phase,
                            ctx.iteration,
                            drafts.attempt,
                            "synthesis",
                        );
                        Self::write_draft(drafts, key, phase, synthesizer.name(), &text).await?;
                        Some(Contribution {
                            agent: synthesizer.id,
                            agent_name: synthesizer.name().to_string(),
                            content: text,
                        })
                    }
                    AgentOutcome::Cancelled => return Err(TeamError::Cancelled),
                    AgentOutcome::TimedOut => {
                        warn!(%phase, agent = synthesizer.name(), "Synthesizer timed out");
                        None
                    }
                    AgentOutcome::Failed(e) => {
                        warn!(%phase, agent = synthesizer.name(), error = %e, "Synthesizer failed");
                        None
                    }
                }
            }
            None => None,
        };

        let synthesis = match synthesis {
            Some(s) => s,
            None => {
                record.status = ConsensusStatus::Degraded;
                record.reduced_confidence = true;
                record.note = Some("synthesis unavailable, thesis adopted".into());
                thesis.clone()
            }
        };

        record.decision = synthesis.content.clone();
        record.dialectic = Some(DialecticalExchange {
            thesis,
            antithesis: Some(antithesis),
            synthesis,
        });
        debug!(status = %record.status_line(), "Consensus formed");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, MemoryFilter};
    use crate::provider::{GenerateParams, LlmProvider, OfflineProvider};
    use crate::task::Task;
    use crate::wsde::agent::AgentProfile;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct SlowProvider;

    #[async_trait]
    impl LlmProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }
        async fn generate(&self, _: &str, _: &GenerateParams) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".into())
        }
        async fn embed(&self, _: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(Vec::new())
        }
    }

    struct AuthFailProvider;

    #[async_trait]
    impl LlmProvider for AuthFailProvider {
        fn name(&self) -> &str {
            "auth-fail"
        }
        async fn generate(&self, _: &str, _: &GenerateParams) -> Result<String, ProviderError> {
            Err(ProviderError::Auth("bad key".into()))
        }
        async fn embed(&self, _: &str) -> Result<Vec<f32>, ProviderError> {
            Err(ProviderError::Auth("bad key".into()))
        }
    }

    fn settings() -> TeamSettings {
        TeamSettings {
            agent_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn ctx<'a>(task: &'a Task, phase: Phase) -> PromptContext<'a> {
        PromptContext {
            task,
            phase,
            iteration: 1,
            instructions: None,
            prior: &[],
        }
    }

    async fn run(
        team: &WsdeTeam,
        phase: Phase,
        memory: &InMemoryStore,
    ) -> TeamResult<ConsensusRecord> {
        let task = Task::new("Design a job scheduler").with_id("t1");
        let drafts = DraftTarget {
            memory,
            cycle_id: "c1",
            task_id: "t1",
            attempt: 0,
        };
        team.run_phase(
            &ctx(&task, phase),
            &mut PrimusHistory::new(),
            &drafts,
            &CancellationToken::new(),
        )
        .await
    }

    fn offline_team(names: &[&str]) -> WsdeTeam {
        let provider = Arc::new(OfflineProvider::new("offline"));
        let mut pool = AgentPool::new();
        for name in names {
            pool.add(AgentProfile::new(*name, &[]), provider.clone());
        }
        WsdeTeam::new(pool, settings())
    }

    #[tokio::test]
    async fn test_full_dialectic_with_three_agents() {
        let memory = InMemoryStore::new();
        let team = offline_team(&["a", "b", "c"]);
        let record = run(&team, Phase::Refine, &memory).await.unwrap();

        assert_eq!(record.status, ConsensusStatus::Reached);
        assert_eq!(record.contributions.len(), 3);
        let dialectic = record.dialectic.as_ref().unwrap();
        assert_eq!(dialectic.thesis.agent, AgentId(0));
        assert_eq!(dialectic.antithesis.as_ref().unwrap().agent, AgentId(1));
        assert_eq!(dialectic.synthesis.agent, AgentId(0));
        assert_eq!(record.decision, dialectic.synthesis.content);

        // three proposals, one antithesis, one synthesis
        let drafts = memory
            .query(&MemoryFilter::new().kind(RecordKind::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 5);
    }

    #[tokio::test]
    async fn test_same_named_agents_keep_separate_drafts() {
        let memory = InMemoryStore::new();
        let team = offline_team(&["dup", "dup", "synthesis"]);
        let record = run(&team, Phase::Refine, &memory).await.unwrap();
        assert!(record.critique().is_some());

        let drafts = memory
            .query(&MemoryFilter::new().kind(RecordKind::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 5);
        assert!(drafts
            .iter()
            .any(|d| d.key == keys::proposal_draft("c1", Phase::Refine, 1, 0, 2)));
        assert!(drafts
            .iter()
            .any(|d| d.key == keys::dialectic_draft("c1", Phase::Refine, 1, 0, "synthesis")));
    }

    #[tokio::test]
    async fn test_retry_attempt_does_not_overwrite_drafts() {
        let memory = InMemoryStore::new();
        let team = offline_team(&["a", "b"]);
        let task = Task::new("Design a job scheduler").with_id("t1");
        let mut history = PrimusHistory::new();
        for attempt in 0..2 {
            let drafts = DraftTarget {
                memory: &memory,
                cycle_id: "c1",
                task_id: "t1",
                attempt,
            };
            team.run_phase(&ctx(&task, Phase::Expand), &mut history, &drafts, &CancellationToken::new())
                .await
                .unwrap();
        }
        // two proposals, antithesis and synthesis per attempt
        assert_eq!(memory.len(), 8);
    }

    #[tokio::test]
    async fn test_voting_phase_records_tally() {
        let memory = InMemoryStore::new();
        let team = offline_team(&["a", "b", "c"]);
        let record = run(&team, Phase::Differentiate, &memory).await.unwrap();
        let tally = record.vote.as_ref().unwrap();
        assert_eq!(tally.ballots.len(), 3);
        // no expertise overlap: every agent backs the primus's proposal
        assert_eq!(tally.winner, Some(0));
        assert_eq!(record.status, ConsensusStatus::Reached);
    }

    #[tokio::test]
    async fn test_single_agent_is_degraded() {
        let memory = InMemoryStore::new();
        let team = offline_team(&["solo"]);
        let record = run(&team, Phase::Expand, &memory).await.unwrap();
        assert_eq!(record.status, ConsensusStatus::Degraded);
        assert!(record.reduced_confidence);
        assert!(record.critique().is_none());
        assert_eq!(record.decision, record.contributions[0].content);
    }

    #[tokio::test]
    async fn test_no_agents_is_unresolved() {
        let memory = InMemoryStore::new();
        let team = WsdeTeam::new(AgentPool::new(), settings());
        let record = run(&team, Phase::Expand, &memory).await.unwrap();
        assert_eq!(record.status, ConsensusStatus::Unresolved);
        assert!(memory.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_agent_is_excluded() {
        let memory = InMemoryStore::new();
        let mut pool = AgentPool::new();
        let fast = Arc::new(OfflineProvider::new("offline"));
        pool.add(AgentProfile::new("a", &[]), fast.clone());
        pool.add(AgentProfile::new("slow", &[]), Arc::new(SlowProvider));
        pool.add(AgentProfile::new("c", &[]), fast);
        let team = WsdeTeam::new(pool, settings());

        let record = run(&team, Phase::Expand, &memory).await.unwrap();
        assert_eq!(record.contributions.len(), 2);
        assert_eq!(record.excluded.len(), 1);
        assert_eq!(record.excluded[0].agent_name, "slow");
        assert_eq!(record.excluded[0].reason, ExclusionReason::Timeout);
        assert_eq!(record.status, ConsensusStatus::Reached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_agents_timed_out_fails() {
        let memory = InMemoryStore::new();
        let mut pool = AgentPool::new();
        pool.add(AgentProfile::new("x", &[]), Arc::new(SlowProvider));
        pool.add(AgentProfile::new("y", &[]), Arc::new(SlowProvider));
        let team = WsdeTeam::new(pool, settings());

        let err = run(&team, Phase::Expand, &memory).await.unwrap_err();
        assert!(matches!(err, TeamError::AllAgentsTimedOut { phase: Phase::Expand }));
    }

    #[tokio::test]
    async fn test_all_agents_failing_surfaces_provider_error() {
        let memory = InMemoryStore::new();
        let mut pool = AgentPool::new();
        pool.add(AgentProfile::new("x", &[]), Arc::new(AuthFailProvider));
        let team = WsdeTeam::new(pool, settings());

        match run(&team, Phase::Refine, &memory).await.unwrap_err() {
            TeamError::Provider { source, .. } => {
                assert_eq!(source, ProviderError::Auth("bad key".into()))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dialectic_disabled_adopts_thesis() {
        let memory = InMemoryStore::new();
        let mut team = offline_team(&["a", "b"]);
        team.settings.dialectical_reasoning = false;
        let record = run(&team, Phase::Refine, &memory).await.unwrap();
        assert!(record.dialectic.is_none());
        assert_eq!(record.decision, record.contributions[0].content);
    }

    #[tokio::test]
    async fn test_collaboration_disabled_uses_primus_only() {
        let memory = InMemoryStore::new();
        let mut team = offline_team(&["a", "b", "c"]);
        team.settings.collaboration = false;
        let record = run(&team, Phase::Expand, &memory).await.unwrap();
        assert_eq!(record.contributions.len(), 1);
        assert_eq!(record.status, ConsensusStatus::Degraded);
    }

    #[tokio::test]
    async fn test_cancelled_before_proposals() {
        let memory = InMemoryStore::new();
        let team = offline_team(&["a", "b"]);
        let task = Task::new("x");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let drafts = DraftTarget {
            memory: &memory,
            cycle_id: "c1",
            task_id: "t",
            attempt: 0,
        };
        let err = team
            .run_phase(&ctx(&task, Phase::Expand), &mut PrimusHistory::new(), &drafts, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TeamError::Cancelled));
    }
}
