//! Query set execution engine.
//!
//! A [`Set`](xenia_definitions::Set) is a named list of aggregation
//! pipelines. Executing it renders every pipeline stage against the caller's
//! variables and the results of earlier queries, runs the rendered stages
//! against a [`DocumentStore`](xenia_store::DocumentStore), masks the
//! returned documents and assembles one [`SetResult`].
//!
//! - [`directive`]: `#kind:payload` and `{name}` templating in stages.
//! - [`bag`]: documents saved by one query for later ones.
//! - [`params`]: caller variables against declared params.
//! - [`executor`]: one pipeline against the store, `$save` and explain.
//! - [`mask`]: field masking of returned documents.
//! - [`exec`]: the set-level state machine.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use xenia_definitions::{CacheConfig, Registry, Set};
//! use xenia_document::documents_from_json_str;
//! use xenia_pipeline::{SetExecutor, Vars};
//! use xenia_store::{DocumentStore, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! store
//!     .insert("stations", documents_from_json_str(r#"[{"station_id": "42021"}]"#).unwrap())
//!     .unwrap();
//!
//! let set = Set::from_json_str(r#"{
//!     "name": "count", "enabled": true,
//!     "queries": [{"name": "n", "collection": "stations", "return": true,
//!                  "commands": [{"$count": "stations"}]}]
//! }"#).unwrap();
//!
//! let executor = SetExecutor::new(store, Arc::new(Registry::in_memory(CacheConfig::DISABLED)));
//! let result = executor.exec(&set, Vars::new());
//! assert_eq!(
//!     result.to_json().to_string(),
//!     r#"{"results":[{"Name":"n","Docs":[{"stations":1}]}]}"#
//! );
//! ```

pub mod bag;
pub mod directive;
pub mod error;
pub mod exec;
pub mod executor;
pub mod mask;
pub mod params;

#[cfg(test)]
mod tests;

pub use bag::DataBag;
pub use directive::{Directive, Resolver, Selector};
pub use error::ExecError;
pub use exec::{DEFAULT_SCRIPT_COLLECTION, QueryResult, SetExecutor, SetResult};
pub use executor::{ExecContext, Execution, PipelineExecutor, PipelineFailure};
pub use params::{Vars, reconcile};
