use super::{Metrics, TimeUnit};
use chrono::{DateTime, Utc};
use std::time::Instant;

/// Stopwatch for a single query execution
#[derive(Debug)]
pub struct QueryProfiler {
    name: String,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl QueryProfiler {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the clock; times are reported in nanoseconds
    pub fn stop(self) -> Metrics {
        let elapsed = self.start.elapsed();
        Metrics {
            name: self.name,
            started_at: self.started_at,
            start_time_nanos: self.started_at.timestamp_nanos_opt().unwrap_or_default(),
            execution_time_nanos: i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX),
            unit: TimeUnit::Nanoseconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_profiler_measures_elapsed_time() {
        let profiler = QueryProfiler::start("users.byAge");
        std::thread::sleep(Duration::from_millis(5));
        let metrics = profiler.stop();

        assert_eq!(metrics.name, "users.byAge");
        assert_eq!(metrics.unit, TimeUnit::Nanoseconds);
        assert!(metrics.execution_time() >= Duration::from_millis(5));
        assert!(metrics.start_time_nanos > 0);
    }
}
