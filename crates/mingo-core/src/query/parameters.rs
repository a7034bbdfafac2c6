//! Runtime parameters bound to a query template

use bson::{Bson, Document as BsonDocument};
use std::collections::BTreeMap;

/// Parameter map used to resolve `${...}` placeholders.
///
/// A key mapped to `Bson::Null` is an explicit null; a missing key is an absent parameter.
/// The two are distinguished by the expression engine: absent parameters fail strict
/// evaluation while explicit nulls evaluate to null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParameters {
    values: BTreeMap<String, Bson>,
}

impl QueryParameters {
    /// Create an empty parameter map
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Add a parameter (builder style)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add an explicit null parameter
    pub fn with_null(mut self, name: impl Into<String>) -> Self {
        self.values.insert(name.into(), Bson::Null);
        self
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Get a parameter value; `None` means the parameter is absent
    pub fn get(&self, name: &str) -> Option<&Bson> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Bson)> {
        self.values.iter()
    }
}

impl From<BsonDocument> for QueryParameters {
    fn from(doc: BsonDocument) -> Self {
        doc.into_iter().collect()
    }
}

impl<K: Into<String>> FromIterator<(K, Bson)> for QueryParameters {
    fn from_iter<I: IntoIterator<Item = (K, Bson)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
