//! Domain types stored in MongoDB collections
//!
//! # Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use bson::{oid::ObjectId, Bson};
//! use mingo_core::Document;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
//!     id: Option<ObjectId>,
//!     email: String,
//! }
//!
//! impl Document for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//!
//!     fn id(&self) -> Option<Bson> {
//!         self.id.map(Bson::ObjectId)
//!     }
//!
//!     fn set_id(&mut self, id: Bson) {
//!         self.id = id.as_object_id();
//!     }
//! }
//! ```

use bson::{Bson, Document as BsonDocument};
use mingo_common::{MingoError, Result};
use serde::{de::DeserializeOwned, Serialize};

/// How `_id` values are produced for new documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// Generate an `ObjectId` client-side
    #[default]
    ObjectId,
    /// Generate a random UUID (BSON binary subtype 4)
    Uuid,
    /// The caller assigns ids; the server fills in an `ObjectId` if none is set
    Assigned,
}

impl IdStrategy {
    /// A fresh id, or `None` when ids are assigned by the caller
    pub fn generate(&self) -> Option<Bson> {
        match self {
            IdStrategy::ObjectId => Some(Bson::ObjectId(bson::oid::ObjectId::new())),
            IdStrategy::Uuid => Some(Bson::from(bson::Uuid::from_uuid_1(uuid::Uuid::new_v4()))),
            IdStrategy::Assigned => None,
        }
    }
}

/// A type stored in its own collection
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Sized {
    /// Get the collection name for this document type
    fn collection_name() -> &'static str;

    fn id_strategy() -> IdStrategy {
        IdStrategy::ObjectId
    }

    /// The document's `_id`, if set
    fn id(&self) -> Option<Bson> {
        None
    }

    /// Store the `_id` assigned on insert
    fn set_id(&mut self, _id: Bson) {}

    fn to_bson(&self) -> Result<BsonDocument> {
        bson::to_document(self).map_err(|e| MingoError::Serialization(e.to_string()))
    }

    fn from_bson(doc: BsonDocument) -> Result<Self> {
        bson::from_document(doc).map_err(|e| MingoError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, spec::BinarySubtype};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<Bson>,
        text: String,
    }

    impl Document for Note {
        fn collection_name() -> &'static str {
            "notes"
        }

        fn id_strategy() -> IdStrategy {
            IdStrategy::Uuid
        }
    }

    #[test]
    fn test_id_generation() {
        assert!(matches!(IdStrategy::ObjectId.generate(), Some(Bson::ObjectId(_))));
        match IdStrategy::Uuid.generate() {
            Some(Bson::Binary(binary)) => assert_eq!(binary.subtype, BinarySubtype::Uuid),
            other => panic!("unexpected id {:?}", other),
        }
        assert_eq!(IdStrategy::Assigned.generate(), None);
    }

    #[test]
    fn test_bson_conversion() {
        let note = Note {
            id: None,
            text: "hello".to_string(),
        };
        let doc = note.to_bson().unwrap();
        assert_eq!(doc, doc! { "text": "hello" });
        assert_eq!(Note::from_bson(doc).unwrap(), note);
        assert_eq!(Note::id_strategy(), IdStrategy::Uuid);
    }
}
