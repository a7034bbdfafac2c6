use async_trait::async_trait;
use mingo_common::Result;
use mingo_core::{BenchmarkService, Metrics, TimeUnit};
use tracing::info;

/// Emits one `tracing` event per executed query
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingBenchmarkService {
    unit: TimeUnit,
}

impl LoggingBenchmarkService {
    /// Report execution times in `unit`
    pub fn new(unit: TimeUnit) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }
}

#[async_trait]
impl BenchmarkService for LoggingBenchmarkService {
    fn name(&self) -> &str {
        "logging"
    }

    async fn submit(&self, metrics: &Metrics) -> Result<()> {
        info!(
            target: "mingo::benchmark",
            query = %metrics.name,
            started_at = %metrics.started_at,
            execution_time = metrics.execution_time_in(self.unit),
            unit = ?self.unit,
            "query executed"
        );
        Ok(())
    }
}
