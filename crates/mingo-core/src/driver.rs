//! Data-store contract and its MongoDB implementation

use crate::connection::Connection;
use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mingo_common::{MingoError, Result};
use mongodb::options::IndexOptions;
use mongodb::IndexModel;
use std::fmt;
use tracing::debug;

/// Counts reported by an update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    /// `_id` of the document created by an upsert
    pub upserted_id: Option<Bson>,
}

/// An index on a collection
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Empty to let the server derive the name from the keys
    pub name: String,
    pub keys: BsonDocument,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(keys: BsonDocument) -> Self {
        Self {
            name: String::new(),
            keys,
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }
}

/// Operations the executor and template need from a database.
///
/// All failures surface as `Execution` errors.
#[async_trait]
pub trait DataStore: Send + Sync + fmt::Debug {
    async fn find(&self, collection: &str, filter: BsonDocument) -> Result<Vec<BsonDocument>>;

    /// Run a pipeline given as its first stage and the remaining stages
    async fn aggregate(
        &self,
        collection: &str,
        first: BsonDocument,
        rest: Vec<BsonDocument>,
    ) -> Result<Vec<BsonDocument>>;

    /// Insert documents, returning their `_id`s in input order
    async fn insert(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>>;

    /// Apply `update` to documents matching `filter`.
    ///
    /// An update made only of `$` operators modifies in place; anything else replaces
    /// the matched document (and cannot be combined with `multi`).
    async fn update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateOutcome>;

    /// Delete matching documents, returning how many were removed
    async fn remove(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn create_collection(&self, name: &str) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    /// Create an index, returning its name
    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<String>;

    async fn drop_index(&self, collection: &str, name: &str) -> Result<()>;

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>>;

    /// Release resources; the store is not used afterwards
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// MongoDB allows longer names; keep well under the namespace limit
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Reject collection names MongoDB would refuse or that address system collections
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MingoError::Validation("Collection name cannot be empty".to_string()));
    }
    if name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(MingoError::Validation(format!(
            "Collection name exceeds maximum length of {} characters: '{}'",
            MAX_COLLECTION_NAME_LENGTH, name
        )));
    }
    if name.contains('\0') {
        return Err(MingoError::Validation("Collection name cannot contain null bytes".to_string()));
    }
    if name.starts_with("system.") {
        return Err(MingoError::Validation(format!(
            "Collection name cannot start with 'system.' (reserved): '{}'",
            name
        )));
    }
    if name.contains('$') {
        return Err(MingoError::Validation(format!(
            "Collection name cannot contain '$' character: '{}'",
            name
        )));
    }
    Ok(())
}

/// Whether an update document consists only of update operators
pub fn is_operator_update(update: &BsonDocument) -> bool {
    !update.is_empty() && update.keys().all(|k| k.starts_with('$'))
}

/// [`DataStore`] backed by the MongoDB driver
#[derive(Debug, Clone)]
pub struct MongoDataStore {
    connection: Connection,
}

impl MongoDataStore {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl DataStore for MongoDataStore {
    async fn find(&self, collection: &str, filter: BsonDocument) -> Result<Vec<BsonDocument>> {
        debug!(collection, filter = %filter, "find");
        let mut cursor = self.connection.collection(collection).find(filter).await?;

        let mut results = Vec::new();
        while cursor.advance().await? {
            results.push(cursor.deserialize_current()?);
        }
        Ok(results)
    }

    async fn aggregate(
        &self,
        collection: &str,
        first: BsonDocument,
        rest: Vec<BsonDocument>,
    ) -> Result<Vec<BsonDocument>> {
        debug!(collection, stages = rest.len() + 1, "aggregate");
        let pipeline = std::iter::once(first).chain(rest);
        let cursor = self.connection.collection(collection).aggregate(pipeline).await?;
        let results: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(results)
    }

    async fn insert(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let count = documents.len();
        let result = self.connection.collection(collection).insert_many(documents).await?;

        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        if ids.len() != count {
            return Err(MingoError::Execution(format!(
                "inserted {} of {} documents",
                ids.len(),
                count
            )));
        }
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateOutcome> {
        let coll = self.connection.collection(collection);
        let result = if is_operator_update(&update) {
            if multi {
                coll.update_many(filter, update).upsert(upsert).await?
            } else {
                coll.update_one(filter, update).upsert(upsert).await?
            }
        } else if multi {
            return Err(MingoError::Validation(
                "multi update requires an update made of $ operators".to_string(),
            ));
        } else {
            coll.replace_one(filter, update).upsert(upsert).await?
        };

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn remove(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let result = self.connection.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.connection.database().create_collection(name).await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.connection.collection(name).drop().await?;
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<String> {
        let name = (!index.name.is_empty()).then_some(index.name);
        let options = IndexOptions::builder().name(name).unique(index.unique).build();
        let model = IndexModel::builder().keys(index.keys).options(options).build();

        let result = self.connection.collection(collection).create_index(model).await?;
        Ok(result.index_name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        self.connection.collection(collection).drop_index(name).await?;
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let models: Vec<IndexModel> = self
            .connection
            .collection(collection)
            .list_indexes()
            .await?
            .try_collect()
            .await?;

        Ok(models
            .into_iter()
            .map(|model| {
                let (name, unique) = model
                    .options
                    .map(|o| (o.name.unwrap_or_default(), o.unique.unwrap_or(false)))
                    .unwrap_or_default();
                IndexSpec {
                    name,
                    keys: model.keys,
                    unique,
                }
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.connection.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_operator_update_detection() {
        assert!(is_operator_update(&doc! { "$set": { "a": 1 }, "$inc": { "n": 1 } }));
        assert!(!is_operator_update(&doc! { "a": 1 }));
        assert!(!is_operator_update(&doc! { "$set": { "a": 1 }, "b": 2 }));
        assert!(!is_operator_update(&doc! {}));
    }

    #[test]
    fn test_collection_name_validation() {
        assert!(validate_collection_name("users").is_ok());
        assert!(validate_collection_name("app.events").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("system.users").is_err());
        assert!(validate_collection_name("bad$name").is_err());
        assert!(validate_collection_name("nul\0byte").is_err());
        assert!(validate_collection_name(&"x".repeat(121)).is_err());
    }

    #[test]
    fn test_index_spec_builder() {
        let spec = IndexSpec::new(doc! { "email": 1 }).named("email_idx").unique(true);
        assert_eq!(spec.name, "email_idx");
        assert!(spec.unique);
    }
}
