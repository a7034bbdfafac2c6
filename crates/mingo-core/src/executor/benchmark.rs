use super::{QueryExecutor, ResultSet};
use crate::benchmark::{MetricsTransfer, QueryProfiler};
use crate::statement::QueryStatement;
use async_trait::async_trait;
use mingo_common::Result;
use std::sync::Arc;

/// Times every execution of the wrapped executor and publishes the metrics.
///
/// The result, including any error, is passed through untouched.
pub struct BenchmarkQueryExecutor {
    inner: Arc<dyn QueryExecutor>,
    transfer: Arc<MetricsTransfer>,
}

impl BenchmarkQueryExecutor {
    pub fn new(inner: Arc<dyn QueryExecutor>, transfer: Arc<MetricsTransfer>) -> Self {
        Self { inner, transfer }
    }
}

#[async_trait]
impl QueryExecutor for BenchmarkQueryExecutor {
    async fn execute(&self, statement: &QueryStatement) -> Result<ResultSet> {
        let profiler = QueryProfiler::start(&statement.query_name);
        let result = self.inner.execute(statement).await;
        self.transfer.publish(profiler.stop());
        result
    }
}
