//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use mingo_core::{DataStore, IndexSpec, MingoError, Result, UpdateOutcome};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A call made against [`RecordingStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Find { collection: String, filter: BsonDocument },
    Aggregate { collection: String, pipeline: Vec<BsonDocument> },
    Insert { collection: String, count: usize },
    Update { collection: String, filter: BsonDocument, update: BsonDocument, upsert: bool, multi: bool },
    Remove { collection: String, filter: BsonDocument },
    CreateCollection(String),
    DropCollection(String),
    CreateIndex { collection: String, name: String },
    DropIndex { collection: String, name: String },
    ListIndexes(String),
    Close,
}

/// In-memory store that records every call.
///
/// Filters match on top-level equality only; aggregations return the canned result
/// set for their collection, or every document when none is set.
#[derive(Debug, Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<Call>>,
    collections: Mutex<HashMap<String, Vec<BsonDocument>>>,
    aggregations: Mutex<HashMap<String, Vec<BsonDocument>>>,
    indexes: Mutex<HashMap<String, Vec<IndexSpec>>>,
    fail_with: Mutex<Option<MingoError>>,
    fail_close: Mutex<bool>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(self, collection: &str, documents: Vec<BsonDocument>) -> Self {
        self.collections.lock().insert(collection.to_string(), documents);
        self
    }

    pub fn with_aggregation_result(self, collection: &str, documents: Vec<BsonDocument>) -> Self {
        self.aggregations.lock().insert(collection.to_string(), documents);
        self
    }

    /// Make every data call fail with `error`
    pub fn failing(self, error: MingoError) -> Self {
        *self.fail_with.lock() = Some(error);
        self
    }

    pub fn failing_close(self) -> Self {
        *self.fail_close.lock() = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn documents(&self, collection: &str) -> Vec<BsonDocument> {
        self.collections.lock().get(collection).cloned().unwrap_or_default()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().push(call);
        match self.fail_with.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn matches(document: &BsonDocument, filter: &BsonDocument) -> bool {
    filter.iter().all(|(key, expected)| match expected {
        Bson::Document(inner) if inner.keys().any(|k| k.starts_with('$')) => true,
        _ => document.get(key) == Some(expected),
    })
}

#[async_trait]
impl DataStore for RecordingStore {
    async fn find(&self, collection: &str, filter: BsonDocument) -> Result<Vec<BsonDocument>> {
        self.record(Call::Find {
            collection: collection.to_string(),
            filter: filter.clone(),
        })?;
        Ok(self
            .documents(collection)
            .into_iter()
            .filter(|document| matches(document, &filter))
            .collect())
    }

    async fn aggregate(
        &self,
        collection: &str,
        first: BsonDocument,
        rest: Vec<BsonDocument>,
    ) -> Result<Vec<BsonDocument>> {
        let mut pipeline = vec![first];
        pipeline.extend(rest);
        self.record(Call::Aggregate {
            collection: collection.to_string(),
            pipeline,
        })?;
        let canned = self.aggregations.lock().get(collection).cloned();
        Ok(canned.unwrap_or_else(|| self.documents(collection)))
    }

    async fn insert(&self, collection: &str, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        self.record(Call::Insert {
            collection: collection.to_string(),
            count: documents.len(),
        })?;
        let mut ids = Vec::new();
        let mut collections = self.collections.lock();
        let stored = collections.entry(collection.to_string()).or_default();
        for mut document in documents {
            let id = match document.get("_id") {
                Some(id) => id.clone(),
                None => {
                    let id = Bson::ObjectId(ObjectId::new());
                    document.insert("_id", id.clone());
                    id
                }
            };
            stored.push(document);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
        multi: bool,
    ) -> Result<UpdateOutcome> {
        self.record(Call::Update {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
            upsert,
            multi,
        })?;
        let mut collections = self.collections.lock();
        let stored = collections.entry(collection.to_string()).or_default();
        let mut matched = 0;
        for document in stored.iter_mut().filter(|d| matches(d, &filter)) {
            matched += 1;
            match update.get_document("$set") {
                Ok(fields) => document.extend(fields.clone()),
                Err(_) => {
                    let id = document.get("_id").cloned();
                    *document = update.clone();
                    if let Some(id) = id {
                        document.insert("_id", id);
                    }
                }
            }
            if !multi {
                break;
            }
        }

        let mut upserted_id = None;
        if matched == 0 && upsert {
            let id = Bson::ObjectId(ObjectId::new());
            let mut document = update.get_document("$set").cloned().unwrap_or(update);
            document.insert("_id", id.clone());
            stored.push(document);
            upserted_id = Some(id);
        }
        Ok(UpdateOutcome {
            matched,
            modified: matched,
            upserted_id,
        })
    }

    async fn remove(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        self.record(Call::Remove {
            collection: collection.to_string(),
            filter: filter.clone(),
        })?;
        let mut collections = self.collections.lock();
        let stored = collections.entry(collection.to_string()).or_default();
        let before = stored.len();
        stored.retain(|document| !matches(document, &filter));
        Ok((before - stored.len()) as u64)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.record(Call::CreateCollection(name.to_string()))?;
        self.collections.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.record(Call::DropCollection(name.to_string()))?;
        self.collections.lock().remove(name);
        Ok(())
    }

    async fn create_index(&self, collection: &str, mut index: IndexSpec) -> Result<String> {
        if index.name.is_empty() {
            index.name = index
                .keys
                .iter()
                .map(|(key, value)| format!("{}_{}", key, value))
                .collect::<Vec<_>>()
                .join("_");
        }
        self.record(Call::CreateIndex {
            collection: collection.to_string(),
            name: index.name.clone(),
        })?;
        let name = index.name.clone();
        let mut indexes = self.indexes.lock();
        let existing = indexes.entry(collection.to_string()).or_default();
        if !existing.iter().any(|i| i.name == name) {
            existing.push(index);
        }
        Ok(name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        self.record(Call::DropIndex {
            collection: collection.to_string(),
            name: name.to_string(),
        })?;
        if let Some(existing) = self.indexes.lock().get_mut(collection) {
            existing.retain(|index| index.name != name);
        }
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        self.record(Call::ListIndexes(collection.to_string()))?;
        Ok(self.indexes.lock().get(collection).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        self.calls.lock().push(Call::Close);
        if *self.fail_close.lock() {
            return Err(MingoError::Connection("already closed".to_string()));
        }
        Ok(())
    }
}

/// Write `content` to `dir/name` and return the path
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub const USERS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<querySet dbName="app">
    <query name="users.byStatus">
        { "status": "${status}" }
    </query>
    <query name="users.byStatusOptional" escapeNullParameters="true">
        { "status": "${status}" }
    </query>
    <query name="users.summary" converter="userSummary">
        { "active": true }
    </query>
    <query name="users.countByStatus" type="aggregation">
        [
            { "$match": { "age": { "$gte": ${minAge} } } },
            { "$group": { "_id": "$status", "n": { "$sum": 1 } } }
        ]
    </query>
    <query name="users.sorted" type="aggregation">
        [
            <if test="sortBy != null">{ "$sort": { "${sortBy}": 1 } }</if>
        ]
    </query>
</querySet>
"#;

pub const ORDERS_XML: &str = r#"<querySet collection="orders">
    <query name="findUser">{ "userId": ${id} }</query>
</querySet>
"#;

/// A context document pointing at `query_sets`, with a MongoDB section that is never
/// connected to when a store is injected
pub fn context_xml(query_sets: &[&str], benchmark: bool) -> String {
    let sets: String = query_sets
        .iter()
        .map(|path| format!(r#"<querySet path="{}"/>"#, path))
        .collect();
    format!(
        r#"<context>
    <config><benchmark enabled="{}" threads="4" queueSize="64"/></config>
    <querySetConfig dbName="app">{}</querySetConfig>
    <queryAnalyzer type="jexl"/>
    <mongo host="localhost" port="27017" dbName="app">
        <option name="connectTimeout" value="100"/>
    </mongo>
    <defaultConverter class="default"/>
</context>
"#,
        benchmark, sets
    )
}
