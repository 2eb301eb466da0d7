//! Library surface behind the `harness` binary: runs every curated
//! conformance check (the six concrete scenarios of the "Testable
//! Properties" section plus the deterministic boundary-behavior suite) and
//! renders one combined pass/fail report. The `proptest`-driven quantified
//! invariants live in `hn4-conformance`'s own `tests/invariants.rs` and are
//! exercised by `cargo test`, not by this binary — they need the shrinking
//! search loop, not a one-shot run.

use std::fmt;

use hn4_conformance::{run_boundary_suite, Report};
use hn4_fixture_exec::run_all;

/// One named result, whichever suite it came from.
#[derive(Debug)]
pub struct Outcome {
    pub name: &'static str,
    pub result: Result<(), String>,
}

/// The combined report both suites produce.
#[derive(Debug, Default)]
pub struct CombinedReport {
    pub outcomes: Vec<Outcome>,
}

impl CombinedReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

impl fmt::Display for CombinedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(()) => writeln!(f, "PASS  {}", outcome.name)?,
                Err(reason) => writeln!(f, "FAIL  {}: {reason}", outcome.name)?,
            }
        }
        write!(f, "{} passed, {} failed", self.outcomes.len() - self.failed_count(), self.failed_count())
    }
}

fn boundary_outcomes(report: Report) -> Vec<Outcome> {
    let mut outcomes: Vec<Outcome> = report.passed.into_iter().map(|name| Outcome { name, result: Ok(()) }).collect();
    outcomes.extend(report.failed.into_iter().map(|(name, reason)| Outcome { name, result: Err(reason) }));
    outcomes
}

/// Run the concrete scenarios and the boundary-behavior suite, in that
/// order, and return one combined report.
#[must_use]
pub fn verify() -> CombinedReport {
    let mut outcomes: Vec<Outcome> =
        run_all().into_iter().map(|scenario| Outcome { name: scenario.name, result: scenario.outcome }).collect();
    outcomes.extend(boundary_outcomes(run_boundary_suite()));
    CombinedReport { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_runs_every_scenario_and_boundary_check() {
        let report = verify();
        assert!(report.all_passed(), "{report}");
        // Six scenarios + six boundary checks at time of writing.
        assert_eq!(report.outcomes.len(), 12);
    }
}
