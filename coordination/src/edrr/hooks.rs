//! Hooks consulted when a phase iteration misses its thresholds.
//!
//! ```text
//!   check ─► passed ─────────────────────────────────────► gate
//!     │
//!     └─► recover hooks in order ─► one returns true ─► re-check ─► gate
//!                 │
//!                 └─ none recovered ─► on_failure hooks ─► gate (repeat or forced)
//! ```
//!
//! A recovery hook may rewrite the [`QualityReport`] in place. Once a hook
//! reports recovery the chain stops and the failure hooks are skipped, even
//! if the re-check still fails.

use std::sync::Arc;

use tracing::{debug, info};

use super::metrics::{PhaseThresholds, QualityReport, ThresholdCheck};
use super::Phase;
use crate::wsde::ConsensusRecord;

pub trait PhaseHooks: Send + Sync {
    fn name(&self) -> &str;

    /// Try to bring a failing iteration over its thresholds.
    fn recover(
        &self,
        _phase: Phase,
        _quality: &mut QualityReport,
        _record: &ConsensusRecord,
    ) -> bool {
        false
    }

    /// Called when no hook recovered the iteration.
    fn on_failure(&self, _phase: Phase, _quality: &QualityReport, _check: &ThresholdCheck) {}
}

/// Check `quality` against `thresholds` and run `hooks` when it falls short.
pub fn gate_iteration(
    hooks: &[Arc<dyn PhaseHooks>],
    thresholds: &PhaseThresholds,
    phase: Phase,
    quality: &mut QualityReport,
    record: &ConsensusRecord,
) -> ThresholdCheck {
    let check = thresholds.check(phase, quality);
    if check.passed || hooks.is_empty() {
        return check;
    }

    if let Some(hook) = hooks.iter().find(|h| h.recover(phase, quality, record)) {
        let mut rechecked = thresholds.check(phase, quality);
        rechecked.recovered = true;
        info!(
            %phase,
            hook = hook.name(),
            score = quality.score,
            passed = rechecked.passed,
            "Phase hook recovered iteration"
        );
        return rechecked;
    }

    for hook in hooks {
        debug!(%phase, hook = hook.name(), "Running phase failure hook");
        hook.on_failure(phase, quality, &check);
    }
    check
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        recover_to: Option<f64>,
        recovers: AtomicUsize,
        failures: AtomicUsize,
    }

    impl PhaseHooks for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn recover(&self, _: Phase, quality: &mut QualityReport, _: &ConsensusRecord) -> bool {
            self.recovers.fetch_add(1, Ordering::SeqCst);
            match self.recover_to {
                Some(score) => {
                    quality.score = score;
                    true
                }
                None => false,
            }
        }

        fn on_failure(&self, _: Phase, _: &QualityReport, _: &ThresholdCheck) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record() -> ConsensusRecord {
        ConsensusRecord::unresolved(Phase::Refine, 1, "")
    }

    #[test]
    fn test_passing_iteration_skips_hooks() {
        let hook = Arc::new(Counting::default());
        let hooks: Vec<Arc<dyn PhaseHooks>> = vec![hook.clone()];
        let mut quality = QualityReport::new(0.9);
        let check = gate_iteration(
            &hooks,
            &PhaseThresholds::uniform(0.5),
            Phase::Refine,
            &mut quality,
            &record(),
        );
        assert!(check.passed);
        assert_eq!(hook.recovers.load(Ordering::SeqCst), 0);
        assert_eq!(hook.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_recovery_stops_the_chain() {
        let first = Arc::new(Counting {
            recover_to: Some(0.8),
            ..Default::default()
        });
        let second = Arc::new(Counting::default());
        let hooks: Vec<Arc<dyn PhaseHooks>> = vec![first.clone(), second.clone()];
        let mut quality = QualityReport::new(0.2);
        let check = gate_iteration(
            &hooks,
            &PhaseThresholds::uniform(0.5),
            Phase::Refine,
            &mut quality,
            &record(),
        );
        assert!(check.passed);
        assert!(check.recovered);
        assert_eq!(quality.score, 0.8);
        assert_eq!(second.recovers.load(Ordering::SeqCst), 0);
        assert_eq!(first.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_recovery_that_still_misses_skips_failure_hooks() {
        let hook = Arc::new(Counting {
            recover_to: Some(0.3),
            ..Default::default()
        });
        let hooks: Vec<Arc<dyn PhaseHooks>> = vec![hook.clone()];
        let mut quality = QualityReport::new(0.2);
        let check = gate_iteration(
            &hooks,
            &PhaseThresholds::uniform(0.5),
            Phase::Refine,
            &mut quality,
            &record(),
        );
        assert!(!check.passed);
        assert!(check.recovered);
        assert_eq!(hook.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_hooks_run_when_nothing_recovers() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let hooks: Vec<Arc<dyn PhaseHooks>> = vec![a.clone(), b.clone()];
        let mut quality = QualityReport::new(0.2);
        let check = gate_iteration(
            &hooks,
            &PhaseThresholds::uniform(0.5),
            Phase::Refine,
            &mut quality,
            &record(),
        );
        assert!(!check.passed);
        assert!(!check.recovered);
        assert_eq!(check.unmet, vec!["score 0.20 < 0.50".to_string()]);
        assert_eq!(a.recovers.load(Ordering::SeqCst), 1);
        assert_eq!(b.recovers.load(Ordering::SeqCst), 1);
        assert_eq!(a.failures.load(Ordering::SeqCst), 1);
        assert_eq!(b.failures.load(Ordering::SeqCst), 1);
    }
}
