//! Prompt construction for proposals, critiques and syntheses.

use crate::edrr::Phase;
use crate::task::Task;

/// Marker line prefix a retrospective uses to request a nested cycle.
pub const FOLLOW_UP_MARKER: &str = "follow-up:";

/// Inputs shared by every prompt of a phase iteration.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub task: &'a Task,
    pub phase: Phase,
    pub iteration: u32,
    /// Per-phase instructions, e.g. from a manifest.
    pub instructions: Option<&'a str>,
    /// Decisions of earlier phases (or earlier iterations of this one).
    pub prior: &'a [String],
}

fn phase_guidance(phase: Phase) -> &'static str {
    match phase {
        Phase::Expand => {
            "Generate a broad set of distinct approaches. Favour diversity over polish; \
             list each idea on its own line."
        }
        Phase::Differentiate => {
            "Compare the candidate approaches on trade-offs, risks and fit with the \
             constraints, then state which candidate should be pursued and why."
        }
        Phase::Refine => {
            "Turn the selected approach into a concrete, complete solution. Include \
             implementation detail, error handling and tests where relevant."
        }
        Phase::Retrospect => {
            "Reflect on the cycle: list learnings, successes, challenges, improvements \
             and next steps. Prefix any task needing its own cycle with `follow-up:` \
             at the start of a line."
        }
    }
}

fn header(ctx: &PromptContext<'_>) -> String {
    let mut out = format!(
        "EDRR phase: {} (iteration {})\n\n## Task\n\n{}",
        ctx.phase,
        ctx.iteration,
        ctx.task.render()
    );
    if let Some(instructions) = ctx.instructions {
        out.push_str(&format!("\n## Phase instructions\n\n{}\n", instructions));
    }
    if !ctx.prior.is_empty() {
        out.push_str("\n## Earlier decisions\n\n");
        for (i, p) in ctx.prior.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, p));
        }
    }
    out
}

/// Prompt asking an agent for its own proposal.
pub fn proposal_prompt(ctx: &PromptContext<'_>) -> String {
    format!(
        "{}\n## Your proposal\n\n{}",
        header(ctx),
        phase_guidance(ctx.phase)
    )
}

/// Prompt asking the critic for an antithesis to `thesis`.
pub fn critique_prompt(ctx: &PromptContext<'_>, thesis: &str) -> String {
    format!(
        "{}\n## Thesis\n\n{}\n\n## Your critique\n\n\
         Identify weaknesses, missing cases and risks in the thesis. \
         State each issue as a bullet starting with '- '.",
        header(ctx),
        thesis
    )
}

/// Prompt asking the synthesizer to merge thesis and antithesis.
pub fn synthesis_prompt(ctx: &PromptContext<'_>, thesis: &str, antithesis: &str) -> String {
    format!(
        "{}\n## Thesis\n\n{}\n\n## Antithesis\n\n{}\n\n## Synthesis\n\n\
         Produce an improved result that keeps the strengths of the thesis and \
         resolves the issues raised. {}",
        header(ctx),
        thesis,
        antithesis,
        phase_guidance(ctx.phase)
    )
}

/// Number of issues raised in a critique (bullet or numbered lines).
pub fn count_issues(critique: &str) -> usize {
    critique
        .lines()
        .map(str::trim_start)
        .filter(|line| {
            line.starts_with("- ")
                || line.starts_with("* ")
                || line
                    .split_once(". ")
                    .map(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
        })
        .count()
}

/// Follow-up task descriptions flagged in a retrospective, first occurrence only.
pub fn follow_ups(text: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    text.lines()
        .map(str::trim)
        .filter_map(|line| {
            let head = line.get(..FOLLOW_UP_MARKER.len())?;
            if head.eq_ignore_ascii_case(FOLLOW_UP_MARKER) {
                let rest = line[FOLLOW_UP_MARKER.len()..].trim();
                (!rest.is_empty()).then(|| rest.to_string())
            } else {
                None
            }
        })
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(task: &'a Task, prior: &'a [String]) -> PromptContext<'a> {
        PromptContext {
            task,
            phase: Phase::Retrospect,
            iteration: 2,
            instructions: Some("Focus on test gaps."),
            prior,
        }
    }

    #[test]
    fn test_proposal_prompt_sections() {
        let task = Task::new("Build a tokenizer");
        let prior = vec!["use a DFA".to_string()];
        let prompt = proposal_prompt(&ctx(&task, &prior));
        assert!(prompt.starts_with("EDRR phase: retrospect (iteration 2)"));
        assert!(prompt.contains("Build a tokenizer"));
        assert!(prompt.contains("Focus on test gaps."));
        assert!(prompt.contains("1. use a DFA"));
    }

    #[test]
    fn test_prompts_never_flag_follow_ups_themselves() {
        let task = Task::new("Build a tokenizer");
        let c = ctx(&task, &[]);
        assert!(follow_ups(&proposal_prompt(&c)).is_empty());
        assert!(follow_ups(&synthesis_prompt(&c, "t", "a")).is_empty());
    }

    #[test]
    fn test_count_issues() {
        let critique = "Overall fine.\n- no error handling\n  * unbounded memory\n3. slow start\nv1. not a list";
        assert_eq!(count_issues(critique), 3);
        assert_eq!(count_issues("looks good"), 0);
    }

    #[test]
    fn test_follow_ups() {
        let text = "Learnings: ok\nFollow-up: benchmark the cache\nfollow-up:   \n  follow-up: add fuzzing\nfollow-up: add fuzzing";
        assert_eq!(
            follow_ups(text),
            vec!["benchmark the cache".to_string(), "add fuzzing".to_string()]
        );
    }
}
