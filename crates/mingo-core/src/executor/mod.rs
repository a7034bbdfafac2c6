//! Statement execution

mod benchmark;

pub use benchmark::BenchmarkQueryExecutor;

use crate::convert::ConverterService;
use crate::driver::DataStore;
use crate::query::ConverterRef;
use crate::statement::{QueryStatement, ResolvedQuery};
use async_trait::async_trait;
use bson::Document as BsonDocument;
use mingo_common::{MingoError, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Raw records returned for one statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    query_name: String,
    converter: Option<ConverterRef>,
    records: Vec<BsonDocument>,
}

impl ResultSet {
    pub fn new(statement: &QueryStatement, records: Vec<BsonDocument>) -> Self {
        Self {
            query_name: statement.query_name.clone(),
            converter: statement.converter.clone(),
            records,
        }
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn converter(&self) -> Option<&ConverterRef> {
        self.converter.as_ref()
    }

    pub fn records(&self) -> &[BsonDocument] {
        &self.records
    }

    pub fn into_records(self) -> Vec<BsonDocument> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Convert every record
    pub fn into_list<T>(self, converters: &ConverterService) -> Result<Vec<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let converter = converters.resolve::<T>(self.converter.as_ref())?;
        self.records
            .into_iter()
            .map(|record| converter.convert(record))
            .collect()
    }

    /// Convert the first record only; any further records are ignored
    pub fn into_first<T>(self, converters: &ConverterService) -> Result<Option<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let converter = converters.resolve::<T>(self.converter.as_ref())?;
        self.records
            .into_iter()
            .next()
            .map(|first| converter.convert(first))
            .transpose()
    }
}

/// Runs statements against a database
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, statement: &QueryStatement) -> Result<ResultSet>;
}

/// [`QueryExecutor`] over a [`DataStore`]
#[derive(Debug, Clone)]
pub struct StoreQueryExecutor {
    store: Arc<dyn DataStore>,
}

impl StoreQueryExecutor {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }
}

#[async_trait]
impl QueryExecutor for StoreQueryExecutor {
    async fn execute(&self, statement: &QueryStatement) -> Result<ResultSet> {
        let records = match &statement.query {
            ResolvedQuery::Filter(filter) => {
                self.store.find(&statement.collection, filter.clone()).await?
            }
            ResolvedQuery::Pipeline(stages) => {
                let Some((first, rest)) = stages.split_first() else {
                    return Err(MingoError::Execution(format!(
                        "aggregation '{}' has no pipeline stages",
                        statement.query_name
                    )));
                };
                self.store
                    .aggregate(&statement.collection, first.clone(), rest.to_vec())
                    .await?
            }
        };

        debug!(query = %statement.query_name, records = records.len(), "query executed");
        Ok(ResultSet::new(statement, records))
    }
}
