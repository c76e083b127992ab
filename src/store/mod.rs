//! Generic document-store contract used by the conversion pipeline.
//!
//! Any backend offering point reads, filtered queries, store-managed
//! timestamps and an all-or-nothing multi-document batch satisfies it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgDocumentStore;

/// Errors raised by a document store backend.
#[derive(Debug)]
pub enum StoreError {
    /// Postgres driver error.
    Database(sqlx::Error),
    /// A document targeted by an update does not exist.
    NotFound(String),
    /// A create targeted an id that is already taken.
    AlreadyExists(String),
    /// An update precondition did not hold against the current document.
    PreconditionFailed(String),
    /// A document could not be encoded or decoded.
    Serialization(String),
    /// The backend refused the operation (transient failure).
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::NotFound(msg) => write!(f, "document not found: {}", msg),
            StoreError::AlreadyExists(msg) => write!(f, "document already exists: {}", msg),
            StoreError::PreconditionFailed(msg) => write!(f, "precondition failed: {}", msg),
            StoreError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A stored document: its id, JSON body and store-managed timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Decode the body into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            StoreError::Serialization(format!("failed to decode document {}: {}", self.id, e))
        })
    }
}

/// Query predicate over top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the given JSON value.
    Eq { field: String, value: Value },
    /// Any of the predicates holds. An empty list matches nothing.
    Or(Vec<Filter>),
    /// All of the predicates hold. An empty list matches everything.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluate the predicate against a document body.
    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Filter::Eq { field, value } => data.get(field) == Some(value),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(data)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(data)),
        }
    }
}

/// Condition checked against the current document inside the commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The field is absent or differs from `value`.
    FieldNotEquals { field: String, value: Value },
}

impl Precondition {
    pub fn field_not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Precondition::FieldNotEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn holds(&self, data: &Value) -> bool {
        match self {
            Precondition::FieldNotEquals { field, value } => data.get(field) != Some(value),
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::FieldNotEquals { field, value } => write!(f, "{} != {}", field, value),
        }
    }
}

/// One staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a new document; fails if the id is taken.
    Create {
        collection: String,
        id: Uuid,
        data: Value,
    },
    /// Shallow-merge `patch` into an existing document.
    Update {
        collection: String,
        id: Uuid,
        patch: Value,
        precondition: Option<Precondition>,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Create { collection, .. } | WriteOp::Update { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            WriteOp::Create { id, .. } | WriteOp::Update { id, .. } => *id,
        }
    }
}

/// Ordered set of writes committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage creation of a typed entity.
    pub fn create<T: Serialize>(
        &mut self,
        collection: &str,
        id: Uuid,
        entity: &T,
    ) -> Result<&mut Self, StoreError> {
        let data = serde_json::to_value(entity)?;
        if !data.is_object() {
            return Err(StoreError::Serialization(format!(
                "document {}/{} must serialize to an object",
                collection, id
            )));
        }
        self.ops.push(WriteOp::Create {
            collection: collection.to_string(),
            id,
            data,
        });
        Ok(self)
    }

    /// Stage a partial update, optionally guarded by a precondition.
    pub fn update(
        &mut self,
        collection: &str,
        id: Uuid,
        patch: Value,
        precondition: Option<Precondition>,
    ) -> &mut Self {
        self.ops.push(WriteOp::Update {
            collection: collection.to_string(),
            id,
            patch,
            precondition,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether any staged write targets the collection.
    pub fn touches(&self, collection: &str) -> bool {
        self.ops.iter().any(|op| op.collection() == collection)
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Shallow merge of `patch` object fields into `target`.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) -> Result<(), StoreError> {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target), Some(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
            Ok(())
        }
        _ => Err(StoreError::Serialization(
            "update patch and target must both be JSON objects".to_string(),
        )),
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read by id.
    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Document>, StoreError>;

    /// All documents of a collection matching the filter, oldest first.
    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Apply every write of the batch, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}

/// Point read decoded into a typed entity.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    id: Uuid,
) -> Result<Option<T>, StoreError> {
    match store.get(collection, id).await? {
        Some(doc) => Ok(Some(doc.decode()?)),
        None => Ok(None),
    }
}

/// Filtered query decoded into typed entities.
pub async fn query_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    filter: &Filter,
) -> Result<Vec<T>, StoreError> {
    store
        .query(collection, filter)
        .await?
        .iter()
        .map(Document::decode)
        .collect()
}
