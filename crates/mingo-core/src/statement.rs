//! Per-invocation query statements

use crate::el::ElEngine;
use crate::query::{ConverterRef, QueryDefinition, QueryKind, QueryParameters};
use bson::{Bson, Document as BsonDocument};
use mingo_common::{MingoError, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// The resolved query of a statement
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedQuery {
    /// `find` filter
    Filter(BsonDocument),
    /// Aggregation stages, in order
    Pipeline(Vec<BsonDocument>),
}

/// A query definition bound to concrete parameters. Built per call, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStatement {
    pub query_name: String,
    pub collection: String,
    pub kind: QueryKind,
    pub query: ResolvedQuery,
    pub converter: Option<ConverterRef>,
    pub escape_null_parameters: bool,
}

impl QueryStatement {
    /// Relaxed extended-JSON view, for display
    pub fn to_json(&self) -> serde_json::Value {
        let (field, query) = match &self.query {
            ResolvedQuery::Filter(filter) => ("filter", Bson::Document(filter.clone())),
            ResolvedQuery::Pipeline(stages) => (
                "pipeline",
                Bson::Array(stages.iter().cloned().map(Bson::Document).collect()),
            ),
        };
        let mut value = json!({
            "query": self.query_name,
            "collection": self.collection,
            "type": self.kind.name(),
        });
        value[field] = query.into_relaxed_extjson();
        if let Some(converter) = &self.converter {
            value["converter"] = json!(converter.to_string());
        }
        value
    }
}

/// Builds statements from definitions through an expression engine
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    engine: Arc<dyn ElEngine>,
}

impl StatementBuilder {
    pub fn new(engine: Arc<dyn ElEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn ElEngine> {
        &self.engine
    }

    /// Resolve `definition` against `parameters`.
    ///
    /// Pure: the definition is not modified and the same inputs give identical output.
    pub fn build(
        &self,
        definition: &QueryDefinition,
        parameters: &QueryParameters,
    ) -> Result<QueryStatement> {
        let engine = self.engine.as_ref();
        let template = definition.body.template(engine, parameters)?;
        let rendered = template.render(engine, parameters, definition.escape_null_parameters)?;

        let query = match (definition.kind, rendered) {
            (QueryKind::Plain, Bson::Document(filter)) => ResolvedQuery::Filter(filter),
            // A lone stage emptied by null escaping means no stages, as in the array form
            (QueryKind::Aggregation, Bson::Document(stage)) if stage.is_empty() => {
                ResolvedQuery::Pipeline(Vec::new())
            }
            (QueryKind::Aggregation, Bson::Document(stage)) => ResolvedQuery::Pipeline(vec![stage]),
            (QueryKind::Aggregation, Bson::Array(stages)) => ResolvedQuery::Pipeline(
                stages
                    .into_iter()
                    .map(|stage| match stage {
                        Bson::Document(stage) => Ok(stage),
                        other => Err(MingoError::Validation(format!(
                            "query '{}': aggregation stage rendered as {:?}, expected a document",
                            definition.name,
                            other.element_type()
                        ))),
                    })
                    .collect::<Result<_>>()?,
            ),
            (kind, other) => {
                return Err(MingoError::Validation(format!(
                    "query '{}': {} body rendered as {:?}",
                    definition.name,
                    kind,
                    other.element_type()
                )))
            }
        };

        debug!(query = %definition.name, collection = %definition.collection, "statement built");

        Ok(QueryStatement {
            query_name: definition.name.clone(),
            collection: definition.collection.clone(),
            kind: definition.kind,
            query,
            converter: definition.converter.clone(),
            escape_null_parameters: definition.escape_null_parameters,
        })
    }
}
