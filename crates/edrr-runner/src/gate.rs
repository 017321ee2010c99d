//! Interactive transition gate for manual mode.
//!
//! Prompts go to stderr so `--json` output on stdout stays parseable.

use async_trait::async_trait;
use edrr_coordination::{
    AutoApprove, ConsensusRecord, TransitionDecision, TransitionGate, TransitionRequest,
};
use tracing::warn;

/// Longest decision excerpt shown in a prompt.
const EXCERPT_CHARS: usize = 400;

/// Reads transition decisions from stdin.
///
/// An empty answer takes the automatic recommendation; stdin EOF does the
/// same for every later prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinGate;

impl StdinGate {
    pub fn new() -> Self {
        Self
    }
}

/// Parse an answer typed at the gate prompt. Empty or unknown answers
/// yield `None`.
pub fn parse_decision(line: &str) -> Option<TransitionDecision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "proceed" | "y" | "yes" => Some(TransitionDecision::Proceed),
        "r" | "repeat" => Some(TransitionDecision::Repeat),
        "a" | "abort" | "q" | "quit" => Some(TransitionDecision::Abort),
        _ => None,
    }
}

/// Prompt text for a transition request.
pub fn describe(request: &TransitionRequest) -> String {
    let next = request
        .next
        .map(|p| p.to_string())
        .unwrap_or_else(|| "completion".into());
    let mut excerpt: String = request.summary.chars().take(EXCERPT_CHARS).collect();
    if excerpt.len() < request.summary.len() {
        excerpt.push_str(" …");
    }
    let mut gate = String::new();
    if !request.check.unmet.is_empty() {
        gate.push_str(&format!("\nunmet: {}", request.check.unmet.join("; ")));
    }
    if request.check.recovered {
        gate.push_str("\nrecovered by a phase hook");
    }
    format!(
        "\n── {} iteration {}/{} (cycle {}, depth {}) ──\n{}\nquality {:.2} vs threshold {:.2}; next: {}{}\n[p]roceed / [r]epeat / [a]bort (enter = {}): ",
        request.phase,
        request.iteration,
        request.max_iterations,
        request.cycle_id,
        request.depth,
        excerpt,
        request.quality,
        request.threshold,
        next,
        gate,
        recommended(request),
    )
}

fn recommended(request: &TransitionRequest) -> TransitionDecision {
    if request.quality_passed() || !request.can_repeat() {
        TransitionDecision::Proceed
    } else {
        TransitionDecision::Repeat
    }
}

async fn read_line() -> Option<String> {
    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map(|n| (n > 0).then_some(line))
    })
    .await;
    match read {
        Ok(Ok(line)) => line,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read from stdin");
            None
        }
        Err(e) => {
            warn!(error = %e, "Stdin reader task failed");
            None
        }
    }
}

#[async_trait]
impl TransitionGate for StdinGate {
    async fn confirm(&self, request: &TransitionRequest) -> TransitionDecision {
        eprint!("{}", describe(request));
        match read_line().await {
            Some(line) => match parse_decision(&line) {
                Some(decision) => decision,
                None => {
                    if !line.trim().is_empty() {
                        eprintln!("unrecognised answer '{}', using recommendation", line.trim());
                    }
                    recommended(request)
                }
            },
            None => {
                warn!(phase = %request.phase, "Stdin closed; following automatic recommendation");
                AutoApprove.confirm(request).await
            }
        }
    }

    async fn escalate(&self, record: &ConsensusRecord) -> Option<String> {
        eprintln!(
            "\n── consensus unresolved in {} iteration {} ──",
            record.phase, record.iteration
        );
        if let Some(note) = &record.note {
            eprintln!("reason: {}", note);
        }
        for (i, c) in record.contributions.iter().enumerate() {
            let excerpt: String = c.content.chars().take(EXCERPT_CHARS).collect();
            eprintln!("  {}. {}: {}", i + 1, c.agent_name, excerpt);
        }
        eprint!("number of a proposal, a decision text, or enter to fail the phase: ");

        let line = read_line().await?;
        let answer = line.trim();
        if answer.is_empty() {
            return None;
        }
        if let Ok(n) = answer.parse::<usize>() {
            if let Some(c) = n.checked_sub(1).and_then(|i| record.contributions.get(i)) {
                return Some(c.content.clone());
            }
        }
        Some(answer.to_string())
    }
}
