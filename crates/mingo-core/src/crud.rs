//! Named-query and CRUD operations for application code

use crate::convert::ConverterService;
use crate::document::Document;
use crate::driver::{validate_collection_name, DataStore, IndexSpec, UpdateOutcome};
use crate::el::ElEngine;
use crate::executor::{QueryExecutor, ResultSet};
use crate::manager::QueryManager;
use crate::query::{QueryParameters, Template};
use crate::statement::{QueryStatement, StatementBuilder};
use bson::{doc, Bson, Document as BsonDocument};
use mingo_common::{MingoError, Result};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Template(Template),
    Document(BsonDocument),
}

/// Selects documents for find, update and remove.
///
/// Either a filter template with its own parameters, rendered through the same
/// expression engine as named queries, or a literal document.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    filter: Filter,
    parameters: QueryParameters,
    escape_nulls: bool,
    upsert: bool,
    multi: bool,
}

impl Criteria {
    /// A filter template such as `{ "email": "${email}" }`
    pub fn parse(template: &str) -> Result<Self> {
        Ok(Self::from_filter(Filter::Template(Template::parse(template)?)))
    }

    /// A literal filter
    pub fn document(filter: BsonDocument) -> Self {
        Self::from_filter(Filter::Document(filter))
    }

    /// Match by `_id`
    pub fn where_id(id: impl Into<Bson>) -> Self {
        Self::document(doc! { "_id": id.into() })
    }

    /// Match everything
    pub fn all() -> Self {
        Self::document(BsonDocument::new())
    }

    fn from_filter(filter: Filter) -> Self {
        Self {
            filter,
            parameters: QueryParameters::new(),
            escape_nulls: false,
            upsert: false,
            multi: false,
        }
    }

    /// Bind a template parameter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    /// Drop clauses whose parameters are null or absent
    pub fn escape_nulls(mut self, escape: bool) -> Self {
        self.escape_nulls = escape;
        self
    }

    /// Insert when nothing matches (updates only)
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    /// Update every match instead of the first (updates only)
    pub fn multi(mut self, multi: bool) -> Self {
        self.multi = multi;
        self
    }

    pub fn is_upsert(&self) -> bool {
        self.upsert
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    /// The filter document
    pub fn resolve(&self, engine: &dyn ElEngine) -> Result<BsonDocument> {
        match &self.filter {
            Filter::Document(filter) => Ok(filter.clone()),
            Filter::Template(template) => match template.render(engine, &self.parameters, self.escape_nulls)? {
                Bson::Document(filter) => Ok(filter),
                other => Err(MingoError::Validation(format!(
                    "criteria must render to a document, got {:?}",
                    other.element_type()
                ))),
            },
        }
    }
}

/// Entry point for executing named queries and plain CRUD.
///
/// Results of named queries go through the [`ConverterService`]; so do documents read by
/// the CRUD methods, which lets a registered converter for a document type take over
/// from its `Deserialize` impl.
#[derive(Clone)]
pub struct MingoTemplate {
    manager: Arc<QueryManager>,
    builder: StatementBuilder,
    executor: Arc<dyn QueryExecutor>,
    store: Arc<dyn DataStore>,
    converters: Arc<ConverterService>,
}

impl std::fmt::Debug for MingoTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MingoTemplate")
            .field("queries", &self.manager.len())
            .field("engine", &self.builder.engine().engine_type())
            .field("store", &self.store)
            .finish()
    }
}

impl MingoTemplate {
    pub fn new(
        manager: Arc<QueryManager>,
        builder: StatementBuilder,
        executor: Arc<dyn QueryExecutor>,
        store: Arc<dyn DataStore>,
        converters: Arc<ConverterService>,
    ) -> Self {
        Self {
            manager,
            builder,
            executor,
            store,
            converters,
        }
    }

    pub fn converters(&self) -> &ConverterService {
        &self.converters
    }

    // ==================== Named queries ====================

    /// Build the statement for a named query without executing it
    pub fn statement(&self, name: &str, parameters: &QueryParameters) -> Result<QueryStatement> {
        let definition = self.manager.lookup(name)?;
        self.builder.build(&definition, parameters)
    }

    /// Execute a named query and return the raw records
    pub async fn execute(&self, name: &str, parameters: &QueryParameters) -> Result<ResultSet> {
        let statement = self.statement(name, parameters)?;
        self.executor.execute(&statement).await
    }

    /// First converted record of a named query, if any
    pub async fn query_for_object<T>(&self, name: &str, parameters: &QueryParameters) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned + 'static,
    {
        self.execute(name, parameters).await?.into_first(&self.converters)
    }

    /// All converted records of a named query
    pub async fn query_for_list<T>(&self, name: &str, parameters: &QueryParameters) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned + 'static,
    {
        self.execute(name, parameters).await?.into_list(&self.converters)
    }

    // ==================== CRUD ====================

    fn read<T: Document + 'static>(&self, records: Vec<BsonDocument>) -> Result<Vec<T>> {
        let converter = self.converters.resolve::<T>(None)?;
        records.into_iter().map(|record| converter.convert(record)).collect()
    }

    /// Serialized form of `item`, with a fresh `_id` if it has none and its type generates them
    fn prepare_insert<T: Document>(item: &mut T) -> Result<BsonDocument> {
        let mut record = item.to_bson()?;
        if item.id().is_none() {
            if let Some(id) = T::id_strategy().generate() {
                record.insert("_id", id.clone());
                item.set_id(id);
            }
        }
        Ok(record)
    }

    /// Insert one document; its `_id` is set on `item` and returned
    pub async fn insert<T: Document>(&self, item: &mut T) -> Result<Bson> {
        let record = Self::prepare_insert(item)?;
        let ids = self.store.insert(T::collection_name(), vec![record]).await?;
        let id = ids
            .into_iter()
            .next()
            .ok_or_else(|| MingoError::Execution("insert returned no id".to_string()))?;
        item.set_id(id.clone());
        Ok(id)
    }

    /// Insert several documents in one call
    pub async fn insert_all<T: Document>(&self, items: &mut [T]) -> Result<Vec<Bson>> {
        let records = items
            .iter_mut()
            .map(Self::prepare_insert)
            .collect::<Result<Vec<_>>>()?;
        let ids = self.store.insert(T::collection_name(), records).await?;
        for (item, id) in items.iter_mut().zip(&ids) {
            item.set_id(id.clone());
        }
        Ok(ids)
    }

    /// Write `item` to the documents selected by `criteria`.
    ///
    /// A single-document update replaces the match; a `multi` update sets the item's
    /// fields on every match.
    pub async fn update<T: Document>(&self, criteria: &Criteria, item: &T) -> Result<UpdateOutcome> {
        let filter = criteria.resolve(self.builder.engine().as_ref())?;
        let mut fields = item.to_bson()?;
        fields.remove("_id");
        let update = if criteria.is_multi() {
            doc! { "$set": fields }
        } else {
            fields
        };
        let outcome = self
            .store
            .update(T::collection_name(), filter, update, criteria.is_upsert(), criteria.is_multi())
            .await?;
        debug!(collection = T::collection_name(), matched = outcome.matched, modified = outcome.modified, "update");
        Ok(outcome)
    }

    pub async fn find_all<T: Document + 'static>(&self) -> Result<Vec<T>> {
        let records = self.store.find(T::collection_name(), BsonDocument::new()).await?;
        self.read(records)
    }

    pub async fn find_by_id<T: Document + 'static>(&self, id: impl Into<Bson>) -> Result<Option<T>> {
        self.find_one(&Criteria::where_id(id)).await
    }

    /// First match of `criteria`
    pub async fn find_one<T: Document + 'static>(&self, criteria: &Criteria) -> Result<Option<T>> {
        let filter = criteria.resolve(self.builder.engine().as_ref())?;
        let records = self.store.find(T::collection_name(), filter).await?;
        Ok(self.read(records.into_iter().take(1).collect())?.into_iter().next())
    }

    pub async fn find<T: Document + 'static>(&self, criteria: &Criteria) -> Result<Vec<T>> {
        let filter = criteria.resolve(self.builder.engine().as_ref())?;
        let records = self.store.find(T::collection_name(), filter).await?;
        self.read(records)
    }

    /// Remove `item` by its `_id`
    pub async fn remove<T: Document>(&self, item: &T) -> Result<u64> {
        let id = item
            .id()
            .ok_or_else(|| MingoError::Validation("cannot remove a document without _id".to_string()))?;
        self.store.remove(T::collection_name(), doc! { "_id": id }).await
    }

    pub async fn remove_by<T: Document>(&self, criteria: &Criteria) -> Result<u64> {
        let filter = criteria.resolve(self.builder.engine().as_ref())?;
        self.store.remove(T::collection_name(), filter).await
    }

    pub async fn remove_all<T: Document>(&self) -> Result<u64> {
        self.store.remove(T::collection_name(), BsonDocument::new()).await
    }

    // ==================== Collections & indexes ====================

    pub async fn create_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.store.create_collection(name).await
    }

    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.store.drop_collection(name).await
    }

    /// Create an index unless an equivalent one exists; returns its name
    pub async fn ensure_index(&self, collection: &str, index: IndexSpec) -> Result<String> {
        if index.keys.is_empty() {
            return Err(MingoError::Validation("index keys must not be empty".to_string()));
        }
        self.store.create_index(collection, index).await
    }

    pub async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        self.store.drop_index(collection, name).await
    }

    pub async fn get_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        self.store.list_indexes(collection).await
    }

    /// Index by name, ignoring case
    pub async fn get_index(&self, collection: &str, name: &str) -> Result<Option<IndexSpec>> {
        Ok(self
            .get_indexes(collection)
            .await?
            .into_iter()
            .find(|index| index.name.eq_ignore_ascii_case(name)))
    }
}
