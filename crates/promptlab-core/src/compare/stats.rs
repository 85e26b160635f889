use serde::Serialize;

use crate::model::RunResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total_results: usize,
    pub matches: usize,
    pub accuracy_pct: f64,
    pub total_cost: f64,
    /// Mean over results that reached a model; 0.0 when none did.
    pub avg_latency_ms: f64,
    pub total_tokens: u64,
}

impl RunStats {
    pub fn from_results(results: &[RunResult]) -> Self {
        let total_results = results.len();
        let matches = results.iter().filter(|r| r.passed()).count();
        let latencies: Vec<u64> = results
            .iter()
            .map(|r| r.latency_ms)
            .filter(|l| *l > 0)
            .collect();
        Self {
            total_results,
            matches,
            accuracy_pct: if total_results == 0 {
                0.0
            } else {
                matches as f64 / total_results as f64 * 100.0
            },
            total_cost: results.iter().map(|r| r.cost).sum(),
            avg_latency_ms: if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
            },
            total_tokens: results.iter().map(RunResult::total_tokens).sum(),
        }
    }
}

/// `after - before` for every statistic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsDelta {
    pub total_results: i64,
    pub matches: i64,
    pub accuracy_pct: f64,
    pub total_cost: f64,
    pub avg_latency_ms: f64,
    pub total_tokens: i64,
}

impl StatsDelta {
    pub fn between(before: &RunStats, after: &RunStats) -> Self {
        Self {
            total_results: after.total_results as i64 - before.total_results as i64,
            matches: after.matches as i64 - before.matches as i64,
            accuracy_pct: after.accuracy_pct - before.accuracy_pct,
            total_cost: after.total_cost - before.total_cost,
            avg_latency_ms: after.avg_latency_ms - before.avg_latency_ms,
            total_tokens: after.total_tokens as i64 - before.total_tokens as i64,
        }
    }
}
