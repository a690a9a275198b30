//! Rolling performance metrics for the query engine.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Number of most recent queries the summary covers.
pub const METRICS_WINDOW: usize = 100;

#[derive(Debug, Clone)]
struct QuerySample {
    outcome: String,
    latency: Duration,
}

/// Snapshot of the rolling window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    /// Queries in the window, at most [`METRICS_WINDOW`].
    pub total_queries: usize,
    /// Share of `"ok"` outcomes in `0.0..=1.0`; `0.0` for an empty window.
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    /// Count per outcome (`"ok"` or a `QueryError::kind()`).
    pub outcomes: BTreeMap<String, usize>,
}

/// Records query outcomes in a fixed-size window.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    window: Mutex<VecDeque<QuerySample>>,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &str, latency: Duration) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if window.len() == METRICS_WINDOW {
            window.pop_front();
        }
        window.push_back(QuerySample {
            outcome: outcome.to_string(),
            latency,
        });
    }

    pub fn summary(&self) -> PerformanceSummary {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let total = window.len();

        let mut outcomes = BTreeMap::new();
        for sample in window.iter() {
            *outcomes.entry(sample.outcome.clone()).or_insert(0) += 1;
        }

        let (success_rate, avg_latency_ms) = if total == 0 {
            (0.0, 0.0)
        } else {
            let successes = outcomes.get("ok").copied().unwrap_or(0);
            let latency_ms: f64 = window
                .iter()
                .map(|sample| sample.latency.as_secs_f64() * 1000.0)
                .sum();
            (successes as f64 / total as f64, latency_ms / total as f64)
        };

        PerformanceSummary {
            total_queries: total,
            success_rate,
            avg_latency_ms,
            outcomes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_summary() {
        let summary = QueryMetrics::new().summary();
        assert_eq!(summary.total_queries, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert!(summary.outcomes.is_empty());
    }

    #[test]
    fn test_summary_rates() {
        let metrics = QueryMetrics::new();
        metrics.record("ok", Duration::from_millis(10));
        metrics.record("ok", Duration::from_millis(30));
        metrics.record("ok", Duration::from_millis(20));
        metrics.record("validation_rejected", Duration::from_millis(40));

        let summary = metrics.summary();
        assert_eq!(summary.total_queries, 4);
        assert_eq!(summary.success_rate, 0.75);
        assert!((summary.avg_latency_ms - 25.0).abs() < 1e-9);
        assert_eq!(summary.outcomes["validation_rejected"], 1);
    }

    #[test]
    fn test_window_keeps_latest() {
        let metrics = QueryMetrics::new();
        for _ in 0..METRICS_WINDOW {
            metrics.record("execution_timeout", Duration::from_millis(1));
        }
        for _ in 0..10 {
            metrics.record("ok", Duration::from_millis(1));
        }
        let summary = metrics.summary();
        assert_eq!(summary.total_queries, METRICS_WINDOW);
        assert_eq!(summary.outcomes["ok"], 10);
        assert_eq!(summary.outcomes["execution_timeout"], METRICS_WINDOW - 10);
    }
}
