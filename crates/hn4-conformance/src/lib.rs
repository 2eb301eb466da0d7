//! Conformance checks for HN4's "Testable Properties".
//!
//! The quantified invariants (property-based) live in `tests/invariants.rs`
//! as `proptest` properties — they need `cargo test` to run the shrinking
//! search. This crate's own library surface is the deterministic "Boundary
//! behaviors" and "Concrete scenarios" checks: small enough to run both as
//! `#[test]`s here and as a curated pass/fail suite from `hn4-harness`.

pub mod boundary;

use std::fmt;

/// One named conformance check, runnable on demand.
pub struct Check {
    pub name: &'static str,
    pub run: fn() -> Result<(), String>,
}

/// Aggregate result of running a set of [`Check`]s.
#[derive(Debug, Default)]
pub struct Report {
    pub passed: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl Report {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.passed {
            writeln!(f, "PASS  {name}")?;
        }
        for (name, reason) in &self.failed {
            writeln!(f, "FAIL  {name}: {reason}")?;
        }
        write!(f, "{} passed, {} failed", self.passed.len(), self.failed.len())
    }
}

/// Every boundary-behavior check names.
#[must_use]
pub fn boundary_checks() -> Vec<Check> {
    vec![
        Check { name: "write_len_zero_and_full_payload_both_succeed", run: boundary::write_len_zero_and_full_payload_both_succeed },
        Check { name: "generation_wraps_from_u32_max_to_one", run: boundary::generation_wraps_from_u32_max_to_one },
        Check { name: "single_bit_ecc_error_returns_healed", run: boundary::single_bit_ecc_error_returns_healed },
        Check { name: "tombstone_grace_boundary", run: boundary::tombstone_grace_boundary },
        Check { name: "horizon_ring_reports_enospc_within_four_attempts", run: boundary::horizon_ring_reports_enospc_within_four_attempts },
        Check { name: "delta_table_idempotence", run: boundary::delta_table_idempotence },
    ]
}

/// Run every [`boundary_checks`] entry and collect the results.
#[must_use]
pub fn run_boundary_suite() -> Report {
    let mut report = Report::default();
    for check in boundary_checks() {
        match (check.run)() {
            Ok(()) => report.passed.push(check.name),
            Err(e) => report.failed.push((check.name, e)),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_boundary_check_passes() {
        let report = run_boundary_suite();
        assert!(report.all_passed(), "{report}");
    }
}
