//! Phase quality metrics and per-phase thresholds.
//!
//! The coordinator asks a [`QualityEvaluator`] for a scalar score per phase
//! iteration and compares it with [`PhaseThresholds`]. The default
//! [`HeuristicEvaluator`] combines:
//!
//! - completeness: size, breadth and depth of the structured phase output
//! - consistency: word overlap between the decision and the proposals
//! - a phase-specific signal (idea diversity, selection clarity, solution
//!   quality, retrospective coverage)
//!
//! minus penalties for reduced-confidence consensus and unresolved critique.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Phase;
use crate::wsde::{dialectic::count_issues, ConsensusRecord, ConsensusStatus};

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").expect("WORD_RE regex should compile"));
static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("CODE_BLOCK_RE regex should compile"));
static ERROR_HANDLING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(result|err|error|try|catch|except|fallback|retry)\b")
        .expect("ERROR_HANDLING_RE regex should compile")
});
static TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(#\[test\]|\bassert|\btests?\b|\btest_\w+)")
        .expect("TEST_RE regex should compile")
});

/// Retrospective elements a complete retrospective mentions.
const RETROSPECTIVE_ELEMENTS: [&str; 5] = [
    r"(?i)\blearn",
    r"(?i)\bimprove",
    r"(?i)\bsuccess",
    r"(?i)\bchallenge",
    r"(?i)\bnext steps?\b",
];

static RETROSPECTIVE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    RETROSPECTIVE_ELEMENTS
        .iter()
        .map(|p| Regex::new(p).expect("retrospective element regex should compile"))
        .collect()
});

/// Quality of one phase iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Combined score in `[0, 1]`.
    pub score: f64,
    /// Named component metrics.
    pub metrics: BTreeMap<String, f64>,
    /// Critique issues left unresolved by the synthesis.
    pub conflicts: u32,
}

impl QualityReport {
    pub fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            metrics: BTreeMap::new(),
            conflicts: 0,
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

/// Per-metric floors and a conflicts ceiling for one phase.
///
/// A named metric missing from the [`QualityReport`] counts as unmet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricThresholds {
    /// Minimum value per component metric, inclusive.
    pub minimums: BTreeMap<String, f64>,
    /// Most unresolved conflicts tolerated.
    pub max_conflicts: Option<u32>,
}

impl MetricThresholds {
    pub fn is_empty(&self) -> bool {
        self.minimums.is_empty() && self.max_conflicts.is_none()
    }

    pub fn with_minimum(mut self, metric: impl Into<String>, minimum: f64) -> Self {
        self.minimums.insert(metric.into(), minimum);
        self
    }

    pub fn with_max_conflicts(mut self, max: u32) -> Self {
        self.max_conflicts = Some(max);
        self
    }

    fn unmet(&self, report: &QualityReport, out: &mut Vec<String>) {
        for (metric, minimum) in &self.minimums {
            match report.metrics.get(metric) {
                None => out.push(format!("{metric} missing")),
                Some(value) if value < minimum => {
                    out.push(format!("{metric} {value:.2} < {minimum:.2}"))
                }
                Some(_) => {}
            }
        }
        if let Some(max) = self.max_conflicts {
            if report.conflicts > max {
                out.push(format!("conflicts {} > {max}", report.conflicts));
            }
        }
    }
}

/// [`MetricThresholds`] for each phase. Empty by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricGates {
    pub expand: MetricThresholds,
    pub differentiate: MetricThresholds,
    pub refine: MetricThresholds,
    pub retrospect: MetricThresholds,
}

impl MetricGates {
    pub fn for_phase(&self, phase: Phase) -> &MetricThresholds {
        match phase {
            Phase::Expand => &self.expand,
            Phase::Differentiate => &self.differentiate,
            Phase::Refine => &self.refine,
            Phase::Retrospect => &self.retrospect,
        }
    }

    pub fn for_phase_mut(&mut self, phase: Phase) -> &mut MetricThresholds {
        match phase {
            Phase::Expand => &mut self.expand,
            Phase::Differentiate => &mut self.differentiate,
            Phase::Refine => &mut self.refine,
            Phase::Retrospect => &mut self.retrospect,
        }
    }

    pub fn is_empty(&self) -> bool {
        Phase::ALL.iter().all(|p| self.for_phase(*p).is_empty())
    }
}

/// Outcome of checking a [`QualityReport`] against the phase thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub passed: bool,
    /// Human-readable reasons, empty when passed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmet: Vec<String>,
    /// A recovery hook brought the iteration over the line.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
}

/// Minimum quality per phase for an automatic transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseThresholds {
    pub expand: f64,
    pub differentiate: f64,
    pub refine: f64,
    pub retrospect: f64,
    /// Optional per-metric gates on top of the combined score.
    #[serde(skip_serializing_if = "MetricGates::is_empty")]
    pub metrics: MetricGates,
}

impl PhaseThresholds {
    /// Same threshold for every phase.
    pub fn uniform(threshold: f64) -> Self {
        Self {
            expand: threshold,
            differentiate: threshold,
            refine: threshold,
            retrospect: threshold,
            metrics: MetricGates::default(),
        }
    }

    pub fn with_metric_gate(mut self, phase: Phase, gate: MetricThresholds) -> Self {
        *self.metrics.for_phase_mut(phase) = gate;
        self
    }

    pub fn for_phase(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Expand => self.expand,
            Phase::Differentiate => self.differentiate,
            Phase::Refine => self.refine,
            Phase::Retrospect => self.retrospect,
        }
    }

    /// Checks the combined score (inclusive) and any per-metric gates of `phase`.
    pub fn check(&self, phase: Phase, report: &QualityReport) -> ThresholdCheck {
        let mut unmet = Vec::new();
        let threshold = self.for_phase(phase);
        if report.score < threshold {
            unmet.push(format!("score {:.2} < {threshold:.2}", report.score));
        }
        self.metrics.for_phase(phase).unmet(report, &mut unmet);
        ThresholdCheck {
            passed: unmet.is_empty(),
            unmet,
            recovered: false,
        }
    }

    /// Whether `report` meets every threshold of `phase`.
    pub fn passes(&self, phase: Phase, report: &QualityReport) -> bool {
        self.check(phase, report).passed
    }
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            refine: 0.7,
            retrospect: 0.7,
            ..Self::uniform(0.5)
        }
    }
}

/// Scores a phase iteration.
pub trait QualityEvaluator: Send + Sync {
    fn evaluate(
        &self,
        phase: Phase,
        record: &ConsensusRecord,
        output: &serde_json::Value,
    ) -> QualityReport;
}

fn word_set(text: &str) -> BTreeSet<String> {
    WORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Jaccard similarity of the word sets of two texts.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let (wa, wb) = (word_set(a), word_set(b));
    if wa.is_empty() && wb.is_empty() {
        return 1.0;
    }
    let intersection = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    intersection / union
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn count_keys_and_depth(value: &serde_json::Value, depth: usize) -> (usize, usize) {
    match value {
        serde_json::Value::Object(map) => map.values().fold((map.len(), depth + 1), |acc, v| {
            let (k, d) = count_keys_and_depth(v, depth + 1);
            (acc.0 + k, acc.1.max(d))
        }),
        serde_json::Value::Array(items) => items.iter().fold((0, depth + 1), |acc, v| {
            let (k, d) = count_keys_and_depth(v, depth + 1);
            (acc.0 + k, acc.1.max(d))
        }),
        _ => (0, depth),
    }
}

/// Completeness of a structured output: 0.4·keys/20 + 0.3·depth/5 + 0.3·len/10000.
pub fn completeness(output: &serde_json::Value) -> f64 {
    let (keys, depth) = count_keys_and_depth(output, 0);
    let len = output.to_string().len();
    0.4 * (keys as f64 / 20.0).min(1.0)
        + 0.3 * (depth as f64 / 5.0).min(1.0)
        + 0.3 * (len as f64 / 10_000.0).min(1.0)
}

/// 1 − mean pairwise similarity of the proposals.
pub fn idea_diversity(ideas: &[&str]) -> f64 {
    let mut similarities = Vec::new();
    for i in 0..ideas.len() {
        for j in (i + 1)..ideas.len() {
            similarities.push(text_similarity(ideas[i], ideas[j]));
        }
    }
    mean(&similarities).map(|s| 1.0 - s).unwrap_or(0.5)
}

/// Presence of code, error handling and tests in a solution.
pub fn solution_quality(solution: &str) -> f64 {
    let code = if CODE_BLOCK_RE.is_match(solution) { 1.0 } else { 0.5 };
    let error_handling = (ERROR_HANDLING_RE.find_iter(solution).count() as f64 / 5.0).min(1.0);
    let tests = (TEST_RE.find_iter(solution).count() as f64 / 3.0).min(1.0);
    0.4 * code + 0.3 * error_handling + 0.3 * tests
}

/// Fraction of the retrospective elements the text covers.
pub fn retrospective_quality(text: &str) -> f64 {
    let covered = RETROSPECTIVE_RES.iter().filter(|re| re.is_match(text)).count();
    covered as f64 / RETROSPECTIVE_RES.len() as f64
}

/// Heuristic evaluator used when nothing else is configured.
#[derive(Debug, Clone, Default)]
pub struct HeuristicEvaluator;

impl HeuristicEvaluator {
    fn phase_metric(phase: Phase, record: &ConsensusRecord) -> (&'static str, f64) {
        match phase {
            Phase::Expand => {
                let ideas: Vec<&str> = record
                    .contributions
                    .iter()
                    .map(|c| c.content.as_str())
                    .collect();
                ("idea_diversity", idea_diversity(&ideas))
            }
            Phase::Differentiate => {
                let clarity = match &record.vote {
                    Some(tally) if tally.tie_broken_by_primus => 0.7,
                    Some(tally) if tally.is_resolved() => 1.0,
                    Some(_) => 0.0,
                    None => 0.5,
                };
                ("selection_clarity", clarity)
            }
            Phase::Refine => ("solution_quality", solution_quality(&record.decision)),
            Phase::Retrospect => (
                "retrospective_quality",
                retrospective_quality(&record.decision),
            ),
        }
    }
}

impl QualityEvaluator for HeuristicEvaluator {
    fn evaluate(
        &self,
        phase: Phase,
        record: &ConsensusRecord,
        output: &serde_json::Value,
    ) -> QualityReport {
        if !record.is_resolved() {
            return QualityReport::new(0.0);
        }

        let completeness = completeness(output);
        let similarities: Vec<f64> = record
            .contributions
            .iter()
            .map(|c| text_similarity(&record.decision, &c.content))
            .collect();
        let consistency = mean(&similarities).unwrap_or(0.5);
        let (phase_metric_name, phase_metric) = Self::phase_metric(phase, record);

        // Issues stay open when the critique was never synthesized.
        let conflicts = match (&record.dialectic, record.status) {
            (Some(d), ConsensusStatus::Degraded) => d
                .antithesis
                .as_ref()
                .map(|a| count_issues(&a.content) as u32)
                .unwrap_or(0),
            _ => 0,
        };

        let mut score = 0.3 * completeness + 0.3 * consistency + 0.4 * phase_metric;
        if record.reduced_confidence {
            score -= 0.1;
        }
        score -= (0.05 * conflicts as f64).min(0.2);

        let mut report = QualityReport::new(score)
            .with_metric("completeness", completeness)
            .with_metric("consistency", consistency)
            .with_metric(phase_metric_name, phase_metric);
        report.conflicts = conflicts;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsde::{AgentId, Contribution};
    use serde_json::json;

    fn record(decision: &str, proposals: &[&str]) -> ConsensusRecord {
        let mut r = ConsensusRecord::unresolved(Phase::Expand, 1, "");
        r.status = ConsensusStatus::Reached;
        r.reduced_confidence = false;
        r.note = None;
        r.decision = decision.to_string();
        r.contributions = proposals
            .iter()
            .enumerate()
            .map(|(i, p)| Contribution {
                agent: AgentId(i),
                agent_name: format!("a{i}"),
                content: p.to_string(),
            })
            .collect();
        r
    }

    #[test]
    fn test_default_thresholds() {
        let t = PhaseThresholds::default();
        assert_eq!(t.for_phase(Phase::Expand), 0.5);
        assert_eq!(t.for_phase(Phase::Differentiate), 0.5);
        assert_eq!(t.for_phase(Phase::Refine), 0.7);
        assert_eq!(t.for_phase(Phase::Retrospect), 0.7);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let t = PhaseThresholds::uniform(0.5);
        assert!(t.passes(Phase::Refine, &QualityReport::new(0.5)));
        assert!(!t.passes(Phase::Refine, &QualityReport::new(0.49)));
    }

    #[test]
    fn test_metric_minimum_and_missing_metric() {
        let t = PhaseThresholds::uniform(0.5).with_metric_gate(
            Phase::Refine,
            MetricThresholds::default()
                .with_minimum("solution_quality", 0.6)
                .with_minimum("consistency", 0.3),
        );
        let report = QualityReport::new(0.8).with_metric("solution_quality", 0.55);
        let check = t.check(Phase::Refine, &report);
        assert!(!check.passed);
        assert_eq!(
            check.unmet,
            vec![
                "consistency missing".to_string(),
                "solution_quality 0.55 < 0.60".to_string()
            ]
        );

        let report = report
            .with_metric("solution_quality", 0.6)
            .with_metric("consistency", 0.3);
        assert!(t.passes(Phase::Refine, &report));
        // Gates of other phases do not apply.
        assert!(t.passes(Phase::Expand, &QualityReport::new(0.5)));
    }

    #[test]
    fn test_conflicts_ceiling_is_exclusive() {
        let t = PhaseThresholds::uniform(0.0).with_metric_gate(
            Phase::Differentiate,
            MetricThresholds::default().with_max_conflicts(1),
        );
        let mut report = QualityReport::new(0.9);
        report.conflicts = 1;
        assert!(t.passes(Phase::Differentiate, &report));
        report.conflicts = 2;
        let check = t.check(Phase::Differentiate, &report);
        assert!(!check.passed);
        assert_eq!(check.unmet, vec!["conflicts 2 > 1".to_string()]);
    }

    #[test]
    fn test_low_score_reported_with_metric_failures() {
        let t = PhaseThresholds::default().with_metric_gate(
            Phase::Retrospect,
            MetricThresholds::default().with_max_conflicts(0),
        );
        let mut report = QualityReport::new(0.4);
        report.conflicts = 3;
        let check = t.check(Phase::Retrospect, &report);
        assert_eq!(
            check.unmet,
            vec!["score 0.40 < 0.70".to_string(), "conflicts 3 > 0".to_string()]
        );
        assert!(!check.recovered);
    }

    #[test]
    fn test_metric_gates_deserialize_per_phase() {
        let t: PhaseThresholds = serde_json::from_value(json!({
            "refine": 0.8,
            "metrics": {"refine": {"minimums": {"solution_quality": 0.6}, "max_conflicts": 2}}
        }))
        .unwrap();
        assert_eq!(t.refine, 0.8);
        assert_eq!(t.expand, 0.5);
        assert_eq!(t.metrics.refine.max_conflicts, Some(2));
        assert_eq!(t.metrics.refine.minimums.get("solution_quality"), Some(&0.6));
        assert!(t.metrics.expand.is_empty());

        let plain = serde_json::to_value(PhaseThresholds::default()).unwrap();
        assert!(plain.get("metrics").is_none());
    }

    #[test]
    fn test_text_similarity() {
        assert_eq!(text_similarity("", ""), 1.0);
        assert_eq!(text_similarity("a b", "a b"), 1.0);
        assert_eq!(text_similarity("a b", "c d"), 0.0);
        assert!((text_similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_idea_diversity() {
        assert_eq!(idea_diversity(&["only one"]), 0.5);
        assert_eq!(idea_diversity(&["cache", "shard"]), 1.0);
        assert_eq!(idea_diversity(&["same idea", "same idea"]), 0.0);
    }

    #[test]
    fn test_completeness_bounds() {
        assert!(completeness(&json!(null)) < 0.01);
        let rich = json!({"a": {"b": {"c": {"d": {"e": "x".repeat(20_000)}}}}});
        let c = completeness(&rich);
        assert!(c > 0.6 && c <= 1.0, "completeness {c}");
    }

    #[test]
    fn test_solution_quality_rewards_code_and_tests() {
        let bare = solution_quality("use a hashmap");
        let rich = solution_quality(
            "```rust\nfn get() -> Result<u8, Error> { Err(Error) }\n#[test]\nfn test_get() { assert!(get().is_err()); }\n```",
        );
        assert!(rich > bare);
        assert!(rich > 0.8);
    }

    #[test]
    fn test_retrospective_quality() {
        assert_eq!(retrospective_quality("nothing"), 0.0);
        assert_eq!(
            retrospective_quality(
                "Learnings: x. Successes: y. Challenges: z. Improvements: w. Next steps: v."
            ),
            1.0
        );
    }

    #[test]
    fn test_unresolved_scores_zero() {
        let r = ConsensusRecord::unresolved(Phase::Expand, 1, "tie");
        let report = HeuristicEvaluator.evaluate(Phase::Expand, &r, &json!({}));
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn test_heuristic_reports_phase_metric() {
        let r = record("use caching", &["use caching", "shard the table"]);
        let report = HeuristicEvaluator.evaluate(Phase::Expand, &r, &json!({"ideas": ["a", "b"]}));
        assert!(report.metrics.contains_key("idea_diversity"));
        assert!(report.metrics.contains_key("completeness"));
        assert!((0.0..=1.0).contains(&report.score));
    }

    #[test]
    fn test_reduced_confidence_penalized() {
        let r = record("use caching", &["use caching"]);
        let mut degraded = r.clone();
        degraded.reduced_confidence = true;
        let out = json!({"solution": "use caching"});
        let full = HeuristicEvaluator.evaluate(Phase::Refine, &r, &out);
        let reduced = HeuristicEvaluator.evaluate(Phase::Refine, &degraded, &out);
        assert!(reduced.score < full.score);
    }
}
