//! Persisted definition stores.
//!
//! Every definition kind lives in its own collection (a sled tree, or a map
//! for the in-memory store). Writes that replace or delete an existing
//! definition append the previous version to the kind's `*_history`
//! collection; history is append-only and never read during execution.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::{Definition, DefinitionError, Mask, Regex, Script, Set};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Updated,
    Deleted,
}

/// A prior version of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry<T> {
    pub key: String,
    pub action: HistoryAction,
    pub recorded_at: DateTime<Utc>,
    pub definition: T,
}

impl<T> HistoryEntry<T> {
    fn new(key: &str, action: HistoryAction, definition: T) -> Self {
        Self {
            key: key.to_string(),
            action,
            recorded_at: Utc::now(),
            definition,
        }
    }
}

pub trait DefinitionStore<T: Definition>: Send + Sync {
    fn get(&self, key: &str) -> Result<T, DefinitionError>;

    /// All definitions ordered by key.
    fn list(&self) -> Result<Vec<T>, DefinitionError>;

    /// Validate and store a definition, replacing any previous version.
    fn upsert(&self, definition: T) -> Result<(), DefinitionError>;

    fn delete(&self, key: &str) -> Result<(), DefinitionError>;

    /// Prior versions of a definition, oldest first.
    fn history(&self, key: &str) -> Result<Vec<HistoryEntry<T>>, DefinitionError>;
}

fn not_found<T: Definition>(key: &str) -> DefinitionError {
    DefinitionError::NotFound {
        kind: T::KIND,
        name: key.to_string(),
    }
}

pub struct MemoryDefinitions<T> {
    current: RwLock<BTreeMap<String, T>>,
    history: RwLock<Vec<HistoryEntry<T>>>,
}

impl<T> Default for MemoryDefinitions<T> {
    fn default() -> Self {
        Self {
            current: RwLock::new(BTreeMap::new()),
            history: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Definition> MemoryDefinitions<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Definition> DefinitionStore<T> for MemoryDefinitions<T> {
    fn get(&self, key: &str) -> Result<T, DefinitionError> {
        self.current
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| not_found::<T>(key))
    }

    fn list(&self) -> Result<Vec<T>, DefinitionError> {
        Ok(self.current.read().values().cloned().collect())
    }

    fn upsert(&self, definition: T) -> Result<(), DefinitionError> {
        definition.validate()?;
        let key = definition.key();
        if let Some(previous) = self.current.write().insert(key.clone(), definition) {
            self.history
                .write()
                .push(HistoryEntry::new(&key, HistoryAction::Updated, previous));
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), DefinitionError> {
        let previous = self
            .current
            .write()
            .remove(key)
            .ok_or_else(|| not_found::<T>(key))?;
        self.history
            .write()
            .push(HistoryEntry::new(key, HistoryAction::Deleted, previous));
        Ok(())
    }

    fn history(&self, key: &str) -> Result<Vec<HistoryEntry<T>>, DefinitionError> {
        Ok(self
            .history
            .read()
            .iter()
            .filter(|e| e.key == key)
            .cloned()
            .collect())
    }
}

pub struct SledDefinitions<T> {
    db: Db,
    tree: Tree,
    history: Tree,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Definition> SledDefinitions<T> {
    pub fn from_trees(db: Db, tree: Tree, history: Tree) -> Self {
        Self {
            db,
            tree,
            history,
            _kind: PhantomData,
        }
    }

    fn decode(raw: &[u8]) -> Result<T, DefinitionError> {
        Ok(serde_json::from_slice(raw)?)
    }

    fn history_prefix(key: &str) -> Vec<u8> {
        let mut prefix = key.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn record(&self, key: &str, action: HistoryAction, raw: &[u8]) -> Result<(), DefinitionError> {
        let entry = HistoryEntry::new(key, action, Self::decode(raw)?);
        let mut history_key = Self::history_prefix(key);
        history_key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.history
            .insert(history_key, serde_json::to_vec(&entry)?)?;
        Ok(())
    }
}

impl<T: Definition> DefinitionStore<T> for SledDefinitions<T> {
    fn get(&self, key: &str) -> Result<T, DefinitionError> {
        match self.tree.get(key)? {
            Some(raw) => Self::decode(&raw),
            None => Err(not_found::<T>(key)),
        }
    }

    fn list(&self) -> Result<Vec<T>, DefinitionError> {
        self.tree
            .iter()
            .values()
            .map(|raw| Self::decode(&raw?))
            .collect()
    }

    fn upsert(&self, definition: T) -> Result<(), DefinitionError> {
        definition.validate()?;
        let key = definition.key();
        let encoded = serde_json::to_vec(&definition)?;
        if let Some(previous) = self.tree.insert(key.as_bytes(), encoded)? {
            self.record(&key, HistoryAction::Updated, &previous)?;
        }
        log::debug!("{} : upsert : {key}", T::TREE);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), DefinitionError> {
        let previous = self.tree.remove(key)?.ok_or_else(|| not_found::<T>(key))?;
        self.record(key, HistoryAction::Deleted, &previous)?;
        log::debug!("{} : delete : {key}", T::TREE);
        Ok(())
    }

    fn history(&self, key: &str) -> Result<Vec<HistoryEntry<T>>, DefinitionError> {
        self.history
            .scan_prefix(Self::history_prefix(key))
            .values()
            .map(|raw| Ok(serde_json::from_slice(&raw?)?))
            .collect()
    }
}

/// Opens the definition collections on one sled database.
pub struct SledDefinitionsFactory {
    db: Db,
}

impl SledDefinitionsFactory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        Ok(Self {
            db: xenia_store::open_db(path)?,
        })
    }

    pub fn from_db(db: Db) -> Self {
        Self { db }
    }

    pub fn definitions<T: Definition>(&self) -> Result<SledDefinitions<T>, DefinitionError> {
        let tree = self.db.open_tree(T::TREE)?;
        let history = self.db.open_tree(format!("{}_history", T::TREE))?;
        Ok(SledDefinitions::from_trees(self.db.clone(), tree, history))
    }

    pub fn sets(&self) -> Result<SledDefinitions<Set>, DefinitionError> {
        self.definitions()
    }

    pub fn regexes(&self) -> Result<SledDefinitions<Regex>, DefinitionError> {
        self.definitions()
    }

    pub fn scripts(&self) -> Result<SledDefinitions<Script>, DefinitionError> {
        self.definitions()
    }

    pub fn masks(&self) -> Result<SledDefinitions<Mask>, DefinitionError> {
        self.definitions()
    }
}
