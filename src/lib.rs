//! Process wiring for the xenia engine.
//!
//! [`Xenia`] opens one sled database and shares it between the document
//! store and the definition registry, so a single directory holds both the
//! collections queried by sets and the sets, regexes, scripts and masks
//! themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use xenia_definitions::{CacheConfig, Registry, SledDefinitionsFactory};
use xenia_document::Document;
use xenia_pipeline::{DEFAULT_SCRIPT_COLLECTION, SetExecutor};
use xenia_store::{DocumentStore, SledStore};

pub use xenia_definitions as definitions;
pub use xenia_document as document;
pub use xenia_pipeline as pipeline;
pub use xenia_store as store;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_path: PathBuf,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub script_collection: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("xenia.db"),
            cache_capacity: 1024,
            cache_ttl_secs: 300,
            script_collection: DEFAULT_SCRIPT_COLLECTION.to_string(),
        }
    }
}

impl Config {
    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn cache(&self) -> CacheConfig {
        CacheConfig::new(self.cache_capacity, Duration::from_secs(self.cache_ttl_secs))
    }
}

pub struct Xenia {
    store: Arc<SledStore>,
    executor: SetExecutor,
}

impl Xenia {
    pub fn open(config: &Config) -> Result<Self> {
        let db = xenia_store::open_db(&config.data_path)
            .with_context(|| format!("opening database {}", config.data_path.display()))?;
        let store = Arc::new(SledStore::from_db(db.clone())?);
        let factory = SledDefinitionsFactory::from_db(db);
        let registry = Arc::new(Registry::sled(&factory, config.cache())?);
        let executor = SetExecutor::new(store.clone(), registry)
            .with_script_collection(config.script_collection.clone());
        log::debug!(
            "xenia : open : {} with script collection {}",
            config.data_path.display(),
            config.script_collection
        );
        Ok(Self { store, executor })
    }

    pub fn executor(&self) -> &SetExecutor {
        &self.executor
    }

    pub fn registry(&self) -> &Registry {
        self.executor.registry()
    }

    pub fn store(&self) -> &SledStore {
        &self.store
    }

    /// Append documents to a collection and return how many were written.
    pub fn load(&self, collection: &str, docs: Vec<Document>) -> Result<usize> {
        let count = self.store.insert(collection, docs)?;
        self.store.flush()?;
        log::info!("xenia : load : {count} documents into {collection}");
        Ok(count)
    }

    /// Persist pending writes, definitions included.
    pub fn flush(&self) -> Result<()> {
        Ok(self.store.flush()?)
    }

    pub fn drop_collection(&self, collection: &str) -> Result<()> {
        self.store.drop_collection(collection)?;
        self.store.flush()?;
        Ok(())
    }
}
