use async_trait::async_trait;
use mingo_common::Result;
use mingo_core::{BenchmarkService, Metrics, TimeUnit};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::info;

/// Execution-time statistics for one query, in nanoseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    pub count: usize,
    pub min: i64,
    pub max: i64,
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
}

/// Samples kept per query for the median; min, max, mean and stddev cover every sample
pub const MEDIAN_WINDOW: usize = 1024;

/// Running aggregates for one query (Welford's mean and variance)
#[derive(Debug, Clone, Default)]
struct Accumulator {
    count: usize,
    min: i64,
    max: i64,
    mean: f64,
    m2: f64,
    recent: VecDeque<i64>,
}

impl Accumulator {
    fn record(&mut self, nanos: i64) {
        if self.count == 0 {
            self.min = nanos;
            self.max = nanos;
        } else {
            self.min = self.min.min(nanos);
            self.max = self.max.max(nanos);
        }
        self.count += 1;
        let delta = nanos as f64 - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (nanos as f64 - self.mean);

        if self.recent.len() == MEDIAN_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(nanos);
    }

    fn stats(&self) -> Option<QueryStats> {
        if self.count == 0 {
            return None;
        }
        let mut window: Vec<i64> = self.recent.iter().copied().collect();
        window.sort_unstable();
        let mid = window.len() / 2;
        let median = if window.len() % 2 == 0 {
            (window[mid - 1] as f64 + window[mid] as f64) / 2.0
        } else {
            window[mid] as f64
        };

        Some(QueryStats {
            count: self.count,
            min: self.min,
            max: self.max,
            mean: self.mean,
            median,
            stddev: (self.m2 / self.count as f64).sqrt(),
        })
    }
}

/// Collects execution times per query and logs a summary on destroy.
///
/// Memory per query is bounded by [`MEDIAN_WINDOW`].
#[derive(Debug, Default)]
pub struct SummaryBenchmarkService {
    queries: Mutex<BTreeMap<String, Accumulator>>,
}

impl SummaryBenchmarkService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics for every query seen so far, by query name
    pub fn snapshot(&self) -> BTreeMap<String, QueryStats> {
        self.queries
            .lock()
            .iter()
            .filter_map(|(name, acc)| acc.stats().map(|s| (name.clone(), s)))
            .collect()
    }

    pub fn reset(&self) {
        self.queries.lock().clear();
    }
}

#[async_trait]
impl BenchmarkService for SummaryBenchmarkService {
    fn name(&self) -> &str {
        "summary"
    }

    async fn submit(&self, metrics: &Metrics) -> Result<()> {
        let nanos = metrics.unit.convert(metrics.execution_time_nanos, TimeUnit::Nanoseconds) as i64;
        self.queries
            .lock()
            .entry(metrics.name.clone())
            .or_default()
            .record(nanos);
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        for (query, stats) in self.snapshot() {
            info!(
                target: "mingo::benchmark",
                query = %query,
                count = stats.count,
                min_ns = stats.min,
                max_ns = stats.max,
                mean_ns = stats.mean,
                median_ns = stats.median,
                stddev_ns = stats.stddev,
                "query summary"
            );
        }
        Ok(())
    }
}
