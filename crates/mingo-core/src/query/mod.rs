//! Query definitions and query sets

mod body;
mod parameters;
mod template;

pub use body::{BodyPart, Branch, QueryBody};
pub use parameters::QueryParameters;
pub use template::{Key, Node, Segment, Template};

use mingo_common::{MingoError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// How a query is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryKind {
    /// `find` with a filter document
    #[default]
    Plain,
    /// Aggregation pipeline
    Aggregation,
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueryKind::Plain => "plain",
            QueryKind::Aggregation => "aggregation",
        }
    }

    /// Check the shape of a parsed body for this kind of query.
    ///
    /// A placeholder-free pipeline must have at least one stage unless `allow_empty`
    /// (conditional bodies may legitimately assemble to no stages).
    pub(crate) fn check_shape(&self, template: &Template, allow_empty: bool) -> Result<()> {
        let root = template.root();
        match self {
            QueryKind::Plain if root.is_document() => Ok(()),
            QueryKind::Plain => Err(MingoError::Parse(
                "plain query body must be a JSON object".to_string(),
            )),
            QueryKind::Aggregation if root.is_document() => Ok(()),
            QueryKind::Aggregation => match root.array_len() {
                None => Err(MingoError::Parse(
                    "aggregation body must be an array of stages".to_string(),
                )),
                Some(0) if template.is_static() && !allow_empty => Err(MingoError::Parse(
                    "aggregation pipeline has no stages".to_string(),
                )),
                Some(_) => {
                    if root.elements().iter().all(|stage| stage.may_be_document()) {
                        Ok(())
                    } else {
                        Err(MingoError::Parse(
                            "aggregation stages must be JSON objects".to_string(),
                        ))
                    }
                }
            },
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryKind {
    type Err = MingoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(QueryKind::Plain),
            "aggregation" => Ok(QueryKind::Aggregation),
            other => Err(MingoError::Parse(format!("unknown query type '{}'", other))),
        }
    }
}

/// Reference to a named converter, optionally naming one of its methods
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConverterRef {
    pub name: String,
    pub method: Option<String>,
}

impl ConverterRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

impl fmt::Display for ConverterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}#{}", self.name, method),
            None => f.write_str(&self.name),
        }
    }
}

/// A named query loaded from a query set. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    pub name: String,
    pub collection: String,
    pub kind: QueryKind,
    pub body: QueryBody,
    pub converter: Option<ConverterRef>,
    pub escape_null_parameters: bool,
    /// File the query was loaded from
    pub source: PathBuf,
}

/// Collection implied by a query name: the part before the first `.`
pub fn collection_from_name(name: &str) -> Option<&str> {
    match name.split_once('.') {
        Some((prefix, _)) if !prefix.is_empty() => Some(prefix),
        _ => None,
    }
}

/// Queries loaded from one file
#[derive(Debug, Clone, Default)]
pub struct QuerySet {
    pub path: PathBuf,
    pub db_name: Option<String>,
    pub queries: Vec<Arc<QueryDefinition>>,
}

impl QuerySet {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(|q| q.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<QueryDefinition>> {
        self.queries.iter().find(|q| q.name == name)
    }
}
