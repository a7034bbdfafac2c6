//! Query timing metrics and their delivery to benchmark services.
//!
//! [`QueryProfiler`] measures one execution and produces [`Metrics`];
//! [`MetricsTransfer`] hands them to every registered [`BenchmarkService`] in the
//! background, so a slow or failing service never delays or fails a query.

mod profiler;
mod transfer;

pub use profiler::QueryProfiler;
pub use transfer::{MetricsTransfer, TransferStats};

use crate::context::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mingo_common::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unit a measurement is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    fn nanos_per_unit(&self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1_000.0,
            TimeUnit::Milliseconds => 1_000_000.0,
            TimeUnit::Seconds => 1_000_000_000.0,
        }
    }

    /// Convert `value` expressed in `self` into `target`
    pub fn convert(&self, value: i64, target: TimeUnit) -> f64 {
        value as f64 * self.nanos_per_unit() / target.nanos_per_unit()
    }

    pub fn to_duration(&self, value: i64) -> Duration {
        let nanos = self.convert(value.max(0), TimeUnit::Nanoseconds);
        Duration::from_nanos(nanos as u64)
    }
}

/// Timing of one query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Query name
    pub name: String,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    pub start_time_nanos: i64,
    pub execution_time_nanos: i64,
    pub unit: TimeUnit,
}

impl Metrics {
    pub fn execution_time(&self) -> Duration {
        self.unit.to_duration(self.execution_time_nanos)
    }

    /// Execution time expressed in `unit`
    pub fn execution_time_in(&self, unit: TimeUnit) -> f64 {
        self.unit.convert(self.execution_time_nanos, unit)
    }
}

/// A consumer of query metrics.
///
/// `submit` runs on the transfer's worker pool; errors are logged by the transfer and
/// never reach the query caller.
#[async_trait]
pub trait BenchmarkService: Send + Sync {
    fn name(&self) -> &str;

    /// Called once while the context is being created, before any metrics arrive
    fn init(&self, context: &Context) -> Result<()> {
        let _ = context;
        Ok(())
    }

    async fn submit(&self, metrics: &Metrics) -> Result<()>;

    /// Called once on context shutdown, after pending metrics are delivered
    fn destroy(&self) -> Result<()> {
        Ok(())
    }
}
