//! Document store used by the query engine.
//!
//! The engine only needs a handful of operations from its store: insert,
//! find, aggregate, explain and index management on named collections.
//! [`DocumentStore`] captures that surface. Two implementations ship with the
//! crate:
//! - [`MemoryStore`]: collections held in process memory, used by tests and
//!   one-shot runs.
//! - [`SledStore`]: collections persisted in a sled database.
//!
//! Both evaluate pipelines with the same evaluator ([`aggregate`]), which
//! understands the subset of aggregation stages the query sets use.

pub mod aggregate;
pub mod error;
pub mod filter;
pub mod memory;
pub mod sled_store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sled_store::{SledStore, open_db};

use serde::{Deserialize, Serialize};
use xenia_document::{Document, Value};

/// An index declared on a collection. Key fields may carry a `-` prefix for
/// descending order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    pub fn new<S: Into<String>>(key: impl IntoIterator<Item = S>, unique: bool) -> Self {
        Self {
            key: key.into_iter().map(Into::into).collect(),
            unique,
        }
    }

    /// Field paths without direction prefixes.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.key
            .iter()
            .map(|k| k.trim_start_matches(['-', '+']))
    }

    /// Conventional index name, e.g. `station_id_1_name_-1`.
    pub fn name(&self) -> String {
        self.key
            .iter()
            .map(|k| match k.strip_prefix('-') {
                Some(field) => format!("{field}_-1"),
                None => format!("{}_1", k.trim_start_matches('+')),
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    /// The values this index keys a document on. Missing fields key as null.
    pub fn key_of(&self, doc: &Document) -> Vec<Value> {
        self.fields()
            .map(|f| doc.get_path(f).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Operations the engine performs against a document database.
///
/// Implementations provide storage primitives; filtering, aggregation and
/// explain default to the in-process evaluator over a collection snapshot.
pub trait DocumentStore: Send + Sync {
    /// All documents of a collection in natural (insertion) order. A missing
    /// collection is empty.
    fn documents(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Indexes declared on a collection.
    fn indexes(&self, collection: &str) -> Result<Vec<Index>, StoreError>;

    /// Insert documents, assigning an `_id` where absent. Returns the number
    /// of documents inserted.
    fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<usize, StoreError>;

    /// Declare an index. Declaring an existing index again is a no-op.
    fn ensure_index(&self, collection: &str, index: &Index) -> Result<(), StoreError>;

    /// Remove a collection with its documents and indexes.
    fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Documents matching a `$match`-style filter.
    fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>, StoreError> {
        let filter = crate::filter::Filter::compile(filter)?;
        Ok(self
            .documents(collection)?
            .into_iter()
            .filter(|doc| filter.matches(doc))
            .collect())
    }

    /// Run an aggregation pipeline.
    fn aggregate(&self, collection: &str, pipeline: &[Document]) -> Result<Vec<Document>, StoreError> {
        let compiled = aggregate::Pipeline::compile(pipeline)?;
        Ok(compiled.run(self.documents(collection)?))
    }

    /// Describe how a pipeline would run instead of running it.
    fn explain(&self, collection: &str, pipeline: &[Document]) -> Result<Document, StoreError> {
        let compiled = aggregate::Pipeline::compile(pipeline)?;
        Ok(compiled.explain(collection, pipeline, &self.indexes(collection)?))
    }
}

/// Reject documents that would violate a unique index, either against the
/// existing documents or within the batch itself.
pub(crate) fn check_unique(
    collection: &str,
    indexes: &[Index],
    existing: &[Document],
    incoming: &[Document],
) -> Result<(), StoreError> {
    for index in indexes.iter().filter(|i| i.unique) {
        let mut seen: Vec<Vec<Value>> = existing.iter().map(|d| index.key_of(d)).collect();
        for doc in incoming {
            let key = index.key_of(doc);
            let clash = seen.iter().any(|k| {
                k.len() == key.len() && k.iter().zip(key.iter()).all(|(a, b)| a.loose_eq(b))
            });
            if clash {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    index: index.name(),
                    key: Value::Array(key).to_string(),
                });
            }
            seen.push(key);
        }
    }
    Ok(())
}

pub(crate) fn with_object_id(mut doc: Document) -> Document {
    if !doc.contains_key("_id") {
        let mut with_id = Document::new();
        with_id.insert("_id", xenia_document::ObjectId::new());
        for (k, v) in doc {
            with_id.insert(k, v);
        }
        doc = with_id;
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_follow_direction() {
        let index = Index::new(["station_id", "-name"], true);
        assert_eq!(index.name(), "station_id_1_name_-1");
        assert_eq!(index.fields().collect::<Vec<_>>(), vec!["station_id", "name"]);
    }

    #[test]
    fn unique_check_catches_batch_duplicates() {
        let index = Index::new(["code"], true);
        let a = Document::from_json_str(r#"{"code": 1}"#).unwrap();
        let b = Document::from_json_str(r#"{"code": 1.0}"#).unwrap();
        let err = check_unique("c", &[index], &[], &[a, b]).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn object_id_is_first_field() {
        let doc = with_object_id(Document::from_json_str(r#"{"a": 1}"#).unwrap());
        assert_eq!(doc.keys().next().map(String::as_str), Some("_id"));
    }
}
