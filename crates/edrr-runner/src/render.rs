//! Report rendering for the terminal and for `--json`.

use anyhow::{Context, Result};
use edrr_coordination::{OrchestrationReport, Phase};

/// Human-readable report: the cycle tree, then the refined solution.
pub fn render_text(report: &OrchestrationReport) -> String {
    let mut out = report.cycle.render();

    let solution = report
        .cycle
        .phases
        .iter()
        .find(|p| p.phase == Phase::Refine)
        .map(|p| p.decision.as_str())
        .filter(|d| !d.trim().is_empty());
    if let Some(solution) = solution {
        out.push_str("\nSolution:\n");
        out.push_str(solution.trim_end());
        out.push('\n');
    }

    match &report.cycle.failure {
        Some(failure) => out.push_str(&format!(
            "\nResult: failed ({}) exit code {}\n",
            failure.code, report.exit_code
        )),
        None => out.push_str(&format!(
            "\nResult: {} in {} phase executions\n",
            report.cycle.terminal_state,
            report.cycle.total_phase_executions()
        )),
    }
    out
}

pub fn render_json(report: &OrchestrationReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}
