//! Authored definitions consumed by the execution engine.
//!
//! - [`Set`]: a named list of [`Query`] pipelines with declared [`Param`]s.
//! - [`Regex`]: named validation patterns referenced by params.
//! - [`Script`]: reusable commands run before or after a set.
//! - [`Mask`]: per collection and field obscuring rules.
//!
//! Each kind is stored through a [`DefinitionStore`] and read through the
//! [`Registry`], which caches reads and invalidates on writes.

pub mod cache;
pub mod error;
pub mod mask;
pub mod named_regex;
pub mod registry;
pub mod script;
pub mod set;
pub mod store;

pub use cache::{CacheConfig, TtlCache};
pub use error::DefinitionError;
pub use mask::{ALL_COLLECTIONS, FieldMasks, Mask, MaskType};
pub use named_regex::{CompiledRegex, Regex};
pub use registry::Registry;
pub use script::Script;
pub use set::{PIPELINE_TYPE, Param, Query, Set};
pub use store::{
    DefinitionStore, HistoryAction, HistoryEntry, MemoryDefinitions, SledDefinitions,
    SledDefinitionsFactory,
};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A persisted definition kind.
pub trait Definition: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name used in error messages.
    const KIND: &'static str;
    /// Collection (sled tree) holding the current versions.
    const TREE: &'static str;

    /// Identity within the collection.
    fn key(&self) -> String;

    fn validate(&self) -> Result<(), DefinitionError>;
}
