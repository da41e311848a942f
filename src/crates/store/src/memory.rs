use std::collections::HashMap;

use parking_lot::RwLock;
use xenia_document::Document;

use crate::{DocumentStore, Index, StoreError, check_unique, with_object_id};

#[derive(Debug, Default)]
struct Collection {
    docs: Vec<Document>,
    indexes: Vec<Index>,
}

/// Collections held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl DocumentStore for MemoryStore {
    fn documents(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.docs.clone())
            .unwrap_or_default())
    }

    fn indexes(&self, collection: &str) -> Result<Vec<Index>, StoreError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default())
    }

    fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<usize, StoreError> {
        let docs: Vec<Document> = docs.into_iter().map(with_object_id).collect();
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();
        check_unique(collection, &entry.indexes, &entry.docs, &docs)?;
        let inserted = docs.len();
        entry.docs.extend(docs);
        log::debug!("memory store : insert : {inserted} documents into {collection}");
        Ok(inserted)
    }

    fn ensure_index(&self, collection: &str, index: &Index) -> Result<(), StoreError> {
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.indexes.iter().any(|i| i.name() == index.name()) {
            return Ok(());
        }
        check_unique(collection, std::slice::from_ref(index), &[], &entry.docs)?;
        entry.indexes.push(index.clone());
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections.write().remove(collection);
        Ok(())
    }
}
