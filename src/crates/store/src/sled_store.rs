use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use sled::{Db, IVec, Tree};
use xenia_document::Document;

use crate::{DocumentStore, Index, StoreError, check_unique, with_object_id};

pub const DATA_TREE_PREFIX: &str = "data:";
pub const INDEX_TREE_NAME: &str = "collection_indexes";

const OPEN_ATTEMPTS: u32 = 50;
const OPEN_BACKOFF: Duration = Duration::from_millis(20);

/// Open a sled database. sled releases its file lock from a background
/// flusher after the last handle drops, so a reopen in the same process can
/// briefly find the directory locked; that case is retried for about a
/// second before the error is returned.
pub fn open_db(path: impl AsRef<Path>) -> sled::Result<Db> {
    let path = path.as_ref();
    let mut attempt = 1;
    loop {
        match sled::open(path) {
            Err(sled::Error::Io(err)) if attempt < OPEN_ATTEMPTS && is_lock_contention(&err) => {
                log::debug!("sled : open : {} is locked, attempt {attempt}", path.display());
                attempt += 1;
                std::thread::sleep(OPEN_BACKOFF);
            }
            result => return result,
        }
    }
}

fn is_lock_contention(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock || err.to_string().contains("could not acquire lock")
}

/// Collections persisted in sled: one tree per collection, keyed by a
/// monotonically increasing id so iteration yields insertion order. Index
/// declarations live in a shared tree keyed by `collection\0index_name`.
pub struct SledStore {
    db: Db,
    indexes: Tree,
    // Serializes unique checks with the insert that follows them.
    write_lock: Mutex<()>,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_db(open_db(path)?)
    }

    pub fn from_db(db: Db) -> Result<Self, StoreError> {
        let indexes = db.open_tree(INDEX_TREE_NAME)?;
        Ok(Self {
            db,
            indexes,
            write_lock: Mutex::new(()),
        })
    }

    fn tree_name(collection: &str) -> String {
        format!("{DATA_TREE_PREFIX}{collection}")
    }

    fn data_tree(&self, collection: &str) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(Self::tree_name(collection))?)
    }

    fn index_prefix(collection: &str) -> Vec<u8> {
        let mut prefix = collection.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn decode_document(raw: &IVec) -> Result<Document, StoreError> {
        serde_json::from_slice(raw).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Names of collections that currently hold a data tree.
    pub fn collection_names(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| {
                std::str::from_utf8(&name)
                    .ok()
                    .and_then(|n| n.strip_prefix(DATA_TREE_PREFIX))
                    .map(str::to_string)
            })
            .collect()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl DocumentStore for SledStore {
    fn documents(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let name = Self::tree_name(collection);
        if !self.db.tree_names().iter().any(|n| n.as_ref() == name.as_bytes()) {
            return Ok(Vec::new());
        }
        self.data_tree(collection)?
            .iter()
            .values()
            .map(|raw| Self::decode_document(&raw?))
            .collect()
    }

    fn indexes(&self, collection: &str) -> Result<Vec<Index>, StoreError> {
        self.indexes
            .scan_prefix(Self::index_prefix(collection))
            .values()
            .map(|raw| {
                let raw = raw?;
                serde_json::from_slice(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    fn insert(&self, collection: &str, docs: Vec<Document>) -> Result<usize, StoreError> {
        let docs: Vec<Document> = docs.into_iter().map(with_object_id).collect();
        let _guard = self.write_lock.lock();
        let indexes = self.indexes(collection)?;
        if indexes.iter().any(|i| i.unique) {
            check_unique(collection, &indexes, &self.documents(collection)?, &docs)?;
        }
        let tree = self.data_tree(collection)?;
        let mut batch = sled::Batch::default();
        for doc in &docs {
            let id = self.db.generate_id()?;
            batch.insert(id.to_be_bytes().to_vec(), Self::encode(doc)?);
        }
        tree.apply_batch(batch)?;
        log::debug!("sled store : insert : {} documents into {collection}", docs.len());
        Ok(docs.len())
    }

    fn ensure_index(&self, collection: &str, index: &Index) -> Result<(), StoreError> {
        let mut key = Self::index_prefix(collection);
        key.extend_from_slice(index.name().as_bytes());
        let _guard = self.write_lock.lock();
        if self.indexes.contains_key(&key)? {
            return Ok(());
        }
        check_unique(collection, std::slice::from_ref(index), &[], &self.documents(collection)?)?;
        self.indexes.insert(key, Self::encode(index)?)?;
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.db.drop_tree(Self::tree_name(collection))?;
        for key in self.indexes.scan_prefix(Self::index_prefix(collection)).keys() {
            self.indexes.remove(key?)?;
        }
        Ok(())
    }
}
