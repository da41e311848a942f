//! Cached access to every definition kind.
//!
//! Reads go through a [`TtlCache`] per kind. Writes go straight to the
//! backing store and invalidate the affected cache entries, so an upsert is
//! visible to the next execution even when the ttl has not elapsed.

use std::sync::Arc;

use crate::cache::{CacheConfig, TtlCache};
use crate::mask::{ALL_COLLECTIONS, FieldMasks};
use crate::named_regex::CompiledRegex;
use crate::store::{DefinitionStore, HistoryEntry, MemoryDefinitions, SledDefinitionsFactory};
use crate::{Definition, DefinitionError, Mask, Regex, Script, Set};

pub struct Registry {
    sets: Arc<dyn DefinitionStore<Set>>,
    regexes: Arc<dyn DefinitionStore<Regex>>,
    scripts: Arc<dyn DefinitionStore<Script>>,
    masks: Arc<dyn DefinitionStore<Mask>>,
    set_cache: TtlCache<String, Arc<Set>>,
    regex_cache: TtlCache<String, Arc<CompiledRegex>>,
    script_cache: TtlCache<String, Arc<Script>>,
    mask_cache: TtlCache<String, Arc<FieldMasks>>,
}

impl Registry {
    pub fn new(
        sets: Arc<dyn DefinitionStore<Set>>,
        regexes: Arc<dyn DefinitionStore<Regex>>,
        scripts: Arc<dyn DefinitionStore<Script>>,
        masks: Arc<dyn DefinitionStore<Mask>>,
        cache: CacheConfig,
    ) -> Self {
        Self {
            sets,
            regexes,
            scripts,
            masks,
            set_cache: TtlCache::new(cache),
            regex_cache: TtlCache::new(cache),
            script_cache: TtlCache::new(cache),
            mask_cache: TtlCache::new(cache),
        }
    }

    pub fn in_memory(cache: CacheConfig) -> Self {
        Self::new(
            Arc::new(MemoryDefinitions::<Set>::new()),
            Arc::new(MemoryDefinitions::<Regex>::new()),
            Arc::new(MemoryDefinitions::<Script>::new()),
            Arc::new(MemoryDefinitions::<Mask>::new()),
            cache,
        )
    }

    pub fn sled(factory: &SledDefinitionsFactory, cache: CacheConfig) -> Result<Self, DefinitionError> {
        Ok(Self::new(
            Arc::new(factory.sets()?),
            Arc::new(factory.regexes()?),
            Arc::new(factory.scripts()?),
            Arc::new(factory.masks()?),
            cache,
        ))
    }

    pub fn set(&self, name: &str) -> Result<Arc<Set>, DefinitionError> {
        cached(&self.set_cache, Set::KIND, name, || self.sets.get(name).map(Arc::new))
    }

    /// The named regex, compiled once per cache fill.
    pub fn regex(&self, name: &str) -> Result<Arc<CompiledRegex>, DefinitionError> {
        cached(&self.regex_cache, Regex::KIND, name, || {
            let compiled = self.regexes.get(name)?.compile()?;
            Ok(Arc::new(compiled))
        })
    }

    pub fn script(&self, name: &str) -> Result<Arc<Script>, DefinitionError> {
        cached(&self.script_cache, Script::KIND, name, || {
            self.scripts.get(name).map(Arc::new)
        })
    }

    /// Field masks that apply to `collection`, including `*` masks.
    pub fn masks(&self, collection: &str) -> Result<Arc<FieldMasks>, DefinitionError> {
        cached(&self.mask_cache, Mask::KIND, collection, || {
            let all = self.masks.list()?;
            Ok(Arc::new(Mask::for_collection(collection, &all)))
        })
    }

    pub fn upsert_set(&self, set: Set) -> Result<(), DefinitionError> {
        let name = set.name.clone();
        self.sets.upsert(set)?;
        self.set_cache.invalidate(&name);
        Ok(())
    }

    pub fn delete_set(&self, name: &str) -> Result<(), DefinitionError> {
        let result = self.sets.delete(name);
        self.set_cache.invalidate(&name.to_string());
        result
    }

    pub fn list_sets(&self) -> Result<Vec<Set>, DefinitionError> {
        self.sets.list()
    }

    pub fn set_history(&self, name: &str) -> Result<Vec<HistoryEntry<Set>>, DefinitionError> {
        self.sets.history(name)
    }

    pub fn upsert_regex(&self, regex: Regex) -> Result<(), DefinitionError> {
        let name = regex.name.clone();
        self.regexes.upsert(regex)?;
        self.regex_cache.invalidate(&name);
        Ok(())
    }

    pub fn delete_regex(&self, name: &str) -> Result<(), DefinitionError> {
        let result = self.regexes.delete(name);
        self.regex_cache.invalidate(&name.to_string());
        result
    }

    pub fn regex_definition(&self, name: &str) -> Result<Regex, DefinitionError> {
        self.regexes.get(name)
    }

    pub fn list_regexes(&self) -> Result<Vec<Regex>, DefinitionError> {
        self.regexes.list()
    }

    pub fn regex_history(&self, name: &str) -> Result<Vec<HistoryEntry<Regex>>, DefinitionError> {
        self.regexes.history(name)
    }

    pub fn upsert_script(&self, script: Script) -> Result<(), DefinitionError> {
        let name = script.name.clone();
        self.scripts.upsert(script)?;
        self.script_cache.invalidate(&name);
        Ok(())
    }

    pub fn delete_script(&self, name: &str) -> Result<(), DefinitionError> {
        let result = self.scripts.delete(name);
        self.script_cache.invalidate(&name.to_string());
        result
    }

    pub fn list_scripts(&self) -> Result<Vec<Script>, DefinitionError> {
        self.scripts.list()
    }

    pub fn script_history(&self, name: &str) -> Result<Vec<HistoryEntry<Script>>, DefinitionError> {
        self.scripts.history(name)
    }

    pub fn upsert_mask(&self, mask: Mask) -> Result<(), DefinitionError> {
        let collection = mask.collection.clone();
        self.masks.upsert(mask)?;
        self.invalidate_masks(&collection);
        Ok(())
    }

    pub fn delete_mask(&self, collection: &str, field: &str) -> Result<(), DefinitionError> {
        let result = self.masks.delete(&Mask::key_for(collection, field));
        self.invalidate_masks(collection);
        result
    }

    pub fn mask(&self, collection: &str, field: &str) -> Result<Mask, DefinitionError> {
        self.masks.get(&Mask::key_for(collection, field))
    }

    pub fn list_masks(&self) -> Result<Vec<Mask>, DefinitionError> {
        self.masks.list()
    }

    pub fn mask_history(
        &self,
        collection: &str,
        field: &str,
    ) -> Result<Vec<HistoryEntry<Mask>>, DefinitionError> {
        self.masks.history(&Mask::key_for(collection, field))
    }

    fn invalidate_masks(&self, collection: &str) {
        if collection == ALL_COLLECTIONS {
            self.mask_cache.clear();
        } else {
            self.mask_cache.invalidate(&collection.to_string());
        }
    }
}

/// Read through `cache`, logging hits at debug level.
fn cached<V: Clone>(
    cache: &TtlCache<String, V>,
    kind: &str,
    key: &str,
    load: impl FnOnce() -> Result<V, DefinitionError>,
) -> Result<V, DefinitionError> {
    let key = key.to_string();
    if let Some(value) = cache.get(&key) {
        log::debug!("registry : {kind} : cache hit {key}");
        return Ok(value);
    }
    cache.get_or_try_load(key, load)
}
