//! Majority voting over proposals, with the primus breaking ties.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::agent::{AgentId, AgentProfile};

/// A single agent's vote for a proposal (by index into the proposal list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: AgentId,
    pub choice: usize,
}

/// Result of a majority vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub ballots: Vec<Ballot>,
    /// Votes received per proposal index.
    pub counts: BTreeMap<usize, u32>,
    /// Winning proposal index, `None` when the vote is unresolved.
    pub winner: Option<usize>,
    /// Whether the primus's ballot decided a tie.
    pub tie_broken_by_primus: bool,
}

impl VoteTally {
    pub fn is_resolved(&self) -> bool {
        self.winner.is_some()
    }
}

/// Choose which proposal `voter` supports.
///
/// Each voter backs the proposal that overlaps its expertise most; ties fall
/// to the primus's proposal, then to the earliest proposal.
pub fn cast_vote(
    voter: &AgentProfile,
    proposals: &[&str],
    primus_proposal: Option<usize>,
) -> Option<usize> {
    proposals
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let lowered = text.to_lowercase();
            let overlap = voter
                .expertise
                .iter()
                .filter(|e| lowered.contains(&e.to_lowercase()))
                .count();
            let not_primus = primus_proposal != Some(i);
            (std::cmp::Reverse(overlap), not_primus, i)
        })
        .min()
        .map(|(_, _, i)| i)
}

/// Simple majority; a tie is broken by the primus's ballot when the primus
/// voted for one of the tied proposals, otherwise the vote is unresolved.
pub fn majority_vote(ballots: Vec<Ballot>, primus: Option<AgentId>) -> VoteTally {
    let mut counts: BTreeMap<usize, u32> = BTreeMap::new();
    for ballot in &ballots {
        *counts.entry(ballot.choice).or_insert(0) += 1;
    }

    let top = counts.values().copied().max().unwrap_or(0);
    let leaders: Vec<usize> = counts
        .iter()
        .filter(|(_, &c)| c == top && top > 0)
        .map(|(&i, _)| i)
        .collect();

    let (winner, tie_broken_by_primus) = match leaders.as_slice() {
        [] => (None, false),
        [only] => (Some(*only), false),
        tied => {
            let primus_choice = primus.and_then(|p| {
                ballots
                    .iter()
                    .find(|b| b.voter == p)
                    .map(|b| b.choice)
            });
            match primus_choice {
                Some(choice) if tied.contains(&choice) => (Some(choice), true),
                _ => (None, false),
            }
        }
    };

    debug!(
        ballots = ballots.len(),
        leaders = leaders.len(),
        winner = ?winner,
        tie_broken_by_primus,
        "Vote tallied"
    );

    VoteTally {
        ballots,
        counts,
        winner,
        tie_broken_by_primus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot(voter: usize, choice: usize) -> Ballot {
        Ballot {
            voter: AgentId(voter),
            choice,
        }
    }

    #[test]
    fn test_clear_majority() {
        let tally = majority_vote(vec![ballot(0, 1), ballot(1, 1), ballot(2, 0)], None);
        assert_eq!(tally.winner, Some(1));
        assert!(!tally.tie_broken_by_primus);
        assert_eq!(tally.counts[&1], 2);
    }

    #[test]
    fn test_tie_broken_by_primus() {
        let tally = majority_vote(
            vec![ballot(0, 0), ballot(1, 1), ballot(2, 2), ballot(3, 1), ballot(4, 2)],
            Some(AgentId(4)),
        );
        assert_eq!(tally.winner, Some(2));
        assert!(tally.tie_broken_by_primus);
    }

    #[test]
    fn test_tie_without_primus_ballot_is_unresolved() {
        let tally = majority_vote(vec![ballot(0, 0), ballot(1, 1)], Some(AgentId(7)));
        assert_eq!(tally.winner, None);
        assert!(!tally.is_resolved());
    }

    #[test]
    fn test_primus_voting_outside_tie_does_not_decide() {
        let tally = majority_vote(
            vec![ballot(0, 0), ballot(1, 1), ballot(2, 0), ballot(3, 1), ballot(4, 2)],
            Some(AgentId(4)),
        );
        assert_eq!(tally.winner, None);
    }

    #[test]
    fn test_no_ballots() {
        let tally = majority_vote(Vec::new(), None);
        assert_eq!(tally.winner, None);
        assert!(tally.counts.is_empty());
    }

    #[test]
    fn test_cast_vote_prefers_expertise_overlap() {
        let voter = AgentProfile::new("v", &["caching", "latency"]);
        let proposals = ["add retries", "add caching to cut latency", "rewrite in C"];
        assert_eq!(cast_vote(&voter, &proposals, Some(0)), Some(1));
    }

    #[test]
    fn test_cast_vote_falls_back_to_primus_then_first() {
        let voter = AgentProfile::new("v", &["security"]);
        let proposals = ["a", "b", "c"];
        assert_eq!(cast_vote(&voter, &proposals, Some(2)), Some(2));
        assert_eq!(cast_vote(&voter, &proposals, None), Some(0));
        assert_eq!(cast_vote(&voter, &[], None), None);
    }
}
