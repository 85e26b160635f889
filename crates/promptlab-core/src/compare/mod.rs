//! Run-to-run comparison, paired on (test case index, model).

mod stats;

pub use stats::{RunStats, StatsDelta};

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::info;

use crate::errors::StoreError;
use crate::model::{Run, RunResult, RunSummary};
use crate::storage::Store;

/// How one (test case, model) pair moved between two runs.
///
/// Pass status is compared first; an error slot counts as not passing. Only when the pass
/// status is unchanged does response text decide between drifted and unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Improvement,
    Regression,
    ResponseDrifted { passing: bool },
    Unchanged { passing: bool },
    Added,
    Removed,
}

impl Change {
    pub fn label(&self) -> &'static str {
        match self {
            Change::Improvement => "improvement",
            Change::Regression => "regression",
            Change::ResponseDrifted { .. } => "response_drifted",
            Change::Unchanged { passing: true } => "still_passing",
            Change::Unchanged { passing: false } => "still_failing",
            Change::Added => "added",
            Change::Removed => "removed",
        }
    }
}

pub fn classify(before: Option<&RunResult>, after: Option<&RunResult>) -> Option<Change> {
    match (before, after) {
        (None, None) => None,
        (None, Some(_)) => Some(Change::Added),
        (Some(_), None) => Some(Change::Removed),
        (Some(a), Some(b)) => Some(match (a.passed(), b.passed()) {
            (false, true) => Change::Improvement,
            (true, false) => Change::Regression,
            (passing, _) if a.response != b.response => Change::ResponseDrifted { passing },
            (passing, _) => Change::Unchanged { passing },
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairComparison {
    pub test_case_idx: usize,
    pub model: String,
    pub change: Change,
    pub before: Option<RunResult>,
    pub after: Option<RunResult>,
    /// `after - before`, present when both sides exist.
    pub cost_delta: Option<f64>,
    pub latency_delta_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub run_a: RunSummary,
    pub run_b: RunSummary,
    pub entries: Vec<PairComparison>,
    pub stats_a: RunStats,
    pub stats_b: RunStats,
    pub delta: StatsDelta,
}

impl ComparisonReport {
    pub fn entry(&self, test_case_idx: usize, model: &str) -> Option<&PairComparison> {
        self.entries
            .iter()
            .find(|e| e.test_case_idx == test_case_idx && e.model == model)
    }

    pub fn regressions(&self) -> impl Iterator<Item = &PairComparison> {
        self.entries
            .iter()
            .filter(|e| e.change == Change::Regression)
    }

    pub fn improvements(&self) -> impl Iterator<Item = &PairComparison> {
        self.entries
            .iter()
            .filter(|e| e.change == Change::Improvement)
    }

    /// Entry count per [`Change::label`].
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for e in &self.entries {
            *counts.entry(e.change.label()).or_insert(0) += 1;
        }
        counts
    }

    pub fn has_regressions(&self) -> bool {
        self.regressions().next().is_some()
    }
}

/// Pure comparison of two sealed runs. Entries are ordered by (test case index, model id).
pub fn compare_runs(run_a: &Run, run_b: &Run) -> ComparisonReport {
    fn index(run: &Run) -> BTreeMap<(usize, String), RunResult> {
        run.results()
            .iter()
            .map(|r| ((r.test_case_idx, r.model.clone()), r.clone()))
            .collect()
    }
    let mut before = index(run_a);
    let mut after = index(run_b);
    let keys: BTreeSet<(usize, String)> = before.keys().chain(after.keys()).cloned().collect();

    let entries = keys
        .into_iter()
        .filter_map(|key| {
            let a = before.remove(&key);
            let b = after.remove(&key);
            let change = classify(a.as_ref(), b.as_ref())?;
            let (cost_delta, latency_delta_ms) = match (&a, &b) {
                (Some(a), Some(b)) => (
                    Some(b.cost - a.cost),
                    Some(b.latency_ms as i64 - a.latency_ms as i64),
                ),
                _ => (None, None),
            };
            Some(PairComparison {
                test_case_idx: key.0,
                model: key.1,
                change,
                before: a,
                after: b,
                cost_delta,
                latency_delta_ms,
            })
        })
        .collect();

    let stats_a = RunStats::from_results(run_a.results());
    let stats_b = RunStats::from_results(run_b.results());
    let delta = StatsDelta::between(&stats_a, &stats_b);
    ComparisonReport {
        run_a: run_a.summary(),
        run_b: run_b.summary(),
        entries,
        stats_a,
        stats_b,
        delta,
    }
}

/// Loads both runs from a [`Store`] and compares them.
#[derive(Clone)]
pub struct Comparator {
    store: Store,
}

impl Comparator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn compare(&self, run_a: &str, run_b: &str) -> Result<ComparisonReport, StoreError> {
        let a = self.store.load(run_a)?;
        let b = self.store.load(run_b)?;
        if a.definition_hash() != b.definition_hash() {
            info!(
                run_a,
                run_b,
                hash_a = a.definition_hash(),
                hash_b = b.definition_hash(),
                "comparing runs of different definition versions"
            );
        }
        let report = compare_runs(&a, &b);
        info!(
            run_a,
            run_b,
            pairs = report.entries.len(),
            regressions = report.regressions().count(),
            improvements = report.improvements().count(),
            "runs compared"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ItemError;
    use crate::model::{MatchMode, Outcome, TestCase};

    fn r(outcome: Outcome, response: &str) -> RunResult {
        let mut r = RunResult::pending(0, "m", &TestCase::new("x"), MatchMode::Exact);
        r.outcome = outcome;
        r.response = Some(response.to_string());
        r
    }

    #[test]
    fn pass_status_beats_response_text() {
        let pass = r(Outcome::Pass, "Paris");
        let fail = r(Outcome::Fail, "Paris");
        assert_eq!(classify(Some(&fail), Some(&pass)), Some(Change::Improvement));
        assert_eq!(classify(Some(&pass), Some(&fail)), Some(Change::Regression));
    }

    #[test]
    fn same_status_splits_on_response() {
        let a = r(Outcome::Pass, "Paris");
        let b = r(Outcome::Pass, "Paris!");
        assert_eq!(
            classify(Some(&a), Some(&b)),
            Some(Change::ResponseDrifted { passing: true })
        );
        assert_eq!(
            classify(Some(&a), Some(&a.clone())),
            Some(Change::Unchanged { passing: true })
        );
        let f = r(Outcome::Fail, "Lyon");
        assert_eq!(classify(Some(&f), Some(&f.clone())).unwrap().label(), "still_failing");
    }

    #[test]
    fn error_counts_as_not_passing() {
        let pass = r(Outcome::Pass, "Paris");
        let err = RunResult::pending(0, "m", &TestCase::new("x"), MatchMode::Exact)
            .failed(ItemError::Timeout { after_ms: 10 });
        assert_eq!(classify(Some(&pass), Some(&err)), Some(Change::Regression));
        assert_eq!(classify(Some(&err), Some(&pass)), Some(Change::Improvement));
    }

    #[test]
    fn one_sided_pairs() {
        let a = r(Outcome::Pass, "x");
        assert_eq!(classify(None, Some(&a)), Some(Change::Added));
        assert_eq!(classify(Some(&a), None), Some(Change::Removed));
        assert_eq!(classify(None, None), None);
    }
}
