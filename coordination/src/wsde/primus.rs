//! Primus selection: a pure function of agents, task, phase and history.
//!
//! Score = task keyword matches + PHASE_WEIGHT × phase keyword matches.
//! Ties go to the agent that has led least often in this cycle, then to the
//! lowest index, so the same inputs always select the same primus.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::agent::{AgentId, AgentProfile, Role};
use crate::edrr::Phase;
use crate::task::Task;

/// Weight of phase-specific expertise relative to task keywords.
pub const PHASE_WEIGHT: u32 = 4;

/// Primus assignments made so far in a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimusHistory {
    counts: BTreeMap<AgentId, u32>,
}

impl PrimusHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, agent: AgentId) {
        *self.counts.entry(agent).or_insert(0) += 1;
    }

    pub fn count(&self, agent: AgentId) -> u32 {
        self.counts.get(&agent).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

/// Expertise score of `profile` for `task` in `phase`.
pub fn expertise_score(profile: &AgentProfile, task: &Task, phase: Phase) -> u32 {
    let task_keywords = task.keywords();
    let task_matches = profile.keyword_matches(task_keywords.iter().map(String::as_str));
    let phase_matches = profile.keyword_matches(phase.keywords().iter().copied());
    task_matches + PHASE_WEIGHT * phase_matches
}

/// Pick the primus for `phase`. `None` only when `agents` is empty.
pub fn select_primus(
    agents: &[AgentProfile],
    task: &Task,
    phase: Phase,
    history: &PrimusHistory,
) -> Option<AgentId> {
    agents
        .iter()
        .enumerate()
        .map(|(i, profile)| {
            let id = AgentId(i);
            (
                std::cmp::Reverse(expertise_score(profile, task, phase)),
                history.count(id),
                id,
            )
        })
        .min()
        .map(|(_, _, id)| id)
}

/// Agents ordered by suitability for `phase`, best first.
pub fn rank_agents(agents: &[AgentProfile], task: &Task, phase: Phase) -> Vec<AgentId> {
    let mut ranked: Vec<(u32, AgentId)> = agents
        .iter()
        .enumerate()
        .map(|(i, p)| (expertise_score(p, task, phase), AgentId(i)))
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    ranked.into_iter().map(|(_, id)| id).collect()
}

/// Role of every agent for a phase: exactly one primus, everyone else a member.
pub fn assign_roles(agent_count: usize, primus: AgentId) -> Vec<(AgentId, Role)> {
    (0..agent_count)
        .map(|i| {
            let id = AgentId(i);
            let role = if id == primus { Role::Primus } else { Role::Member };
            (id, role)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsde::agent::default_profiles;

    fn task() -> Task {
        Task::new("Implement a rate limiter").with_id("t1")
    }

    #[test]
    fn test_empty_pool_has_no_primus() {
        assert_eq!(
            select_primus(&[], &task(), Phase::Expand, &PrimusHistory::new()),
            None
        );
    }

    #[test]
    fn test_phase_expertise_wins() {
        let agents = default_profiles();
        let history = PrimusHistory::new();
        assert_eq!(
            select_primus(&agents, &task(), Phase::Expand, &history),
            Some(AgentId(0))
        );
        assert_eq!(
            select_primus(&agents, &task(), Phase::Differentiate, &history),
            Some(AgentId(1))
        );
        assert_eq!(
            select_primus(&agents, &task(), Phase::Refine, &history),
            Some(AgentId(2))
        );
        assert_eq!(
            select_primus(&agents, &task(), Phase::Retrospect, &history),
            Some(AgentId(3))
        );
    }

    #[test]
    fn test_task_keywords_contribute() {
        let agents = vec![
            AgentProfile::new("generalist", &["python"]),
            AgentProfile::new("limiter", &["rate"]),
        ];
        assert_eq!(
            select_primus(&agents, &task(), Phase::Expand, &PrimusHistory::new()),
            Some(AgentId(1))
        );
    }

    #[test]
    fn test_ties_rotate_by_history_then_index() {
        let agents = vec![
            AgentProfile::new("a", &[]),
            AgentProfile::new("b", &[]),
            AgentProfile::new("c", &[]),
        ];
        let mut history = PrimusHistory::new();
        let mut picked = Vec::new();
        for _ in 0..4 {
            let primus = select_primus(&agents, &task(), Phase::Refine, &history).unwrap();
            history.record(primus);
            picked.push(primus.0);
        }
        assert_eq!(picked, vec![0, 1, 2, 0]);
        assert_eq!(history.total(), 4);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let agents = default_profiles();
        let mut history = PrimusHistory::new();
        history.record(AgentId(2));
        let first = select_primus(&agents, &task(), Phase::Refine, &history);
        for _ in 0..10 {
            assert_eq!(
                select_primus(&agents, &task(), Phase::Refine, &history),
                first
            );
        }
    }

    #[test]
    fn test_assign_roles_single_primus() {
        let roles = assign_roles(3, AgentId(1));
        assert_eq!(
            roles.iter().filter(|(_, r)| *r == Role::Primus).count(),
            1
        );
        assert_eq!(roles[1], (AgentId(1), Role::Primus));
    }

    #[test]
    fn test_rank_agents_orders_by_score() {
        let ranked = rank_agents(&default_profiles(), &task(), Phase::Retrospect);
        assert_eq!(ranked[0], AgentId(3));
        assert_eq!(ranked.len(), 4);
    }
}
