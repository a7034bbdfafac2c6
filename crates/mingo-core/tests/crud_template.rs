//! Integration tests for CRUD operations through MingoTemplate

mod common;

use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use common::{Call, RecordingStore};
use mingo_core::{
    create_engine, ConverterService, Criteria, Document, ElEngineType, IdStrategy, IndexSpec,
    MingoError, MingoTemplate, QueryManager, StatementBuilder, StoreQueryExecutor,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    email: String,
    plan: String,
}

impl Account {
    fn new(email: &str, plan: &str) -> Self {
        Self {
            id: None,
            email: email.to_string(),
            plan: plan.to_string(),
        }
    }
}

impl Document for Account {
    fn collection_name() -> &'static str {
        "accounts"
    }

    fn id(&self) -> Option<Bson> {
        self.id.map(Bson::ObjectId)
    }

    fn set_id(&mut self, id: Bson) {
        self.id = id.as_object_id();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Tag {
    #[serde(rename = "_id")]
    id: String,
}

impl Document for Tag {
    fn collection_name() -> &'static str {
        "tags"
    }

    fn id_strategy() -> IdStrategy {
        IdStrategy::Assigned
    }

    fn id(&self) -> Option<Bson> {
        Some(Bson::String(self.id.clone()))
    }
}

fn template(store: Arc<RecordingStore>, converters: ConverterService) -> MingoTemplate {
    MingoTemplate::new(
        Arc::new(QueryManager::new()),
        StatementBuilder::new(create_engine(ElEngineType::Jexl)),
        Arc::new(StoreQueryExecutor::new(store.clone())),
        store,
        Arc::new(converters),
    )
}

#[tokio::test]
async fn test_insert_assigns_ids() {
    let store = Arc::new(RecordingStore::new());
    let template = template(store.clone(), ConverterService::new());

    let mut account = Account::new("a@example.com", "free");
    let id = template.insert(&mut account).await.unwrap();
    assert!(matches!(id, Bson::ObjectId(_)));
    assert_eq!(account.id().unwrap(), id);
    assert_eq!(store.documents("accounts")[0].get("_id"), Some(&id));

    let mut batch = vec![Account::new("b@example.com", "pro"), Account::new("c@example.com", "pro")];
    let ids = template.insert_all(&mut batch).await.unwrap();
    assert_eq!(ids.len(), 2);
    assert!(batch.iter().all(|a| a.id.is_some()));

    let mut tag = Tag { id: "rust".to_string() };
    assert_eq!(template.insert(&mut tag).await.unwrap(), Bson::String("rust".to_string()));
}

#[tokio::test]
async fn test_find_variants() {
    let store = Arc::new(RecordingStore::new());
    let template = template(store.clone(), ConverterService::new());
    let mut accounts = vec![
        Account::new("a@example.com", "free"),
        Account::new("b@example.com", "pro"),
        Account::new("c@example.com", "pro"),
    ];
    template.insert_all(&mut accounts).await.unwrap();

    assert_eq!(template.find_all::<Account>().await.unwrap().len(), 3);

    let by_id: Option<Account> = template.find_by_id(accounts[1].id.unwrap()).await.unwrap();
    assert_eq!(by_id, Some(accounts[1].clone()));

    let criteria = Criteria::parse(r#"{ "plan": "${plan}" }"#).unwrap().with("plan", "pro");
    let pro: Vec<Account> = template.find(&criteria).await.unwrap();
    assert_eq!(pro.len(), 2);
    let first: Option<Account> = template.find_one(&criteria).await.unwrap();
    assert_eq!(first.map(|a| a.email), Some("b@example.com".to_string()));
}

#[tokio::test]
async fn test_registered_type_converter_overrides_serde() {
    let store = Arc::new(RecordingStore::new().with_documents(
        "accounts",
        vec![doc! { "email": "A@EXAMPLE.COM", "plan": "free" }],
    ));
    let mut converters = ConverterService::new();
    converters.register(|doc: BsonDocument| -> mingo_core::Result<Account> {
        Ok(Account::new(&doc.get_str("email").unwrap_or_default().to_lowercase(), "free"))
    });
    let template = template(store, converters);

    let accounts: Vec<Account> = template.find_all().await.unwrap();
    assert_eq!(accounts[0].email, "a@example.com");
}

#[tokio::test]
async fn test_update_single_and_multi() {
    let store = Arc::new(RecordingStore::new());
    let template = template(store.clone(), ConverterService::new());
    let mut account = Account::new("a@example.com", "free");
    template.insert(&mut account).await.unwrap();

    account.plan = "pro".to_string();
    let outcome = template
        .update(&Criteria::where_id(account.id().unwrap()), &account)
        .await
        .unwrap();
    assert_eq!(outcome.matched, 1);

    let everyone = Criteria::all().multi(true);
    template.update(&everyone, &account).await.unwrap();

    let updates: Vec<_> = store
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Update { update, multi, .. } => Some((update, multi)),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![
            (doc! { "email": "a@example.com", "plan": "pro" }, false),
            (doc! { "$set": { "email": "a@example.com", "plan": "pro" } }, true),
        ]
    );
}

#[tokio::test]
async fn test_upsert_creates_document() {
    let store = Arc::new(RecordingStore::new());
    let template = template(store.clone(), ConverterService::new());
    let account = Account::new("new@example.com", "free");

    let criteria = Criteria::document(doc! { "email": "new@example.com" }).upsert(true);
    let outcome = template.update(&criteria, &account).await.unwrap();
    assert_eq!(outcome.matched, 0);
    assert!(outcome.upserted_id.is_some());
    assert_eq!(store.documents("accounts").len(), 1);
}

#[tokio::test]
async fn test_remove_variants() {
    let store = Arc::new(RecordingStore::new());
    let template = template(store.clone(), ConverterService::new());
    let mut accounts = vec![
        Account::new("a@example.com", "free"),
        Account::new("b@example.com", "pro"),
        Account::new("c@example.com", "pro"),
    ];
    template.insert_all(&mut accounts).await.unwrap();

    assert_eq!(template.remove(&accounts[0]).await.unwrap(), 1);
    let err = template.remove(&Account::new("x@example.com", "free")).await.unwrap_err();
    assert!(matches!(err, MingoError::Validation(_)));

    let pro = Criteria::document(doc! { "plan": "pro" });
    assert_eq!(template.remove_by::<Account>(&pro).await.unwrap(), 2);
    assert_eq!(template.remove_all::<Account>().await.unwrap(), 0);
}

#[tokio::test]
async fn test_collections_and_indexes() {
    let store = Arc::new(RecordingStore::new());
    let template = template(store.clone(), ConverterService::new());

    template.create_collection("audit").await.unwrap();
    let err = template.create_collection("system.audit").await.unwrap_err();
    assert!(matches!(err, MingoError::Validation(_)));

    let err = template
        .ensure_index("audit", IndexSpec::new(doc! {}))
        .await
        .unwrap_err();
    assert!(matches!(err, MingoError::Validation(_)));

    let name = template
        .ensure_index("audit", IndexSpec::new(doc! { "at": -1 }).named("At_Desc").unique(true))
        .await
        .unwrap();
    assert_eq!(name, "At_Desc");

    let found = template.get_index("audit", "at_desc").await.unwrap().unwrap();
    assert!(found.unique);
    assert_eq!(template.get_indexes("audit").await.unwrap().len(), 1);

    template.drop_index("audit", "At_Desc").await.unwrap();
    assert_eq!(template.get_index("audit", "at_desc").await.unwrap(), None);

    template.drop_collection("audit").await.unwrap();
    assert!(store.calls().contains(&Call::DropCollection("audit".to_string())));
}
