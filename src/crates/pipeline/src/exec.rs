//! Set execution.
//!
//! A set runs through these steps in order:
//! - checks that it is enabled and has queries;
//! - reconciles the caller's variables with its params;
//! - runs the pre script, if any;
//! - runs every query in declaration order;
//! - runs the post script, if any.
//!
//! Any step can fail the whole execution. The one exception is a query
//! marked `continue`: its failure is logged, the results gathered so far are
//! dropped and the next query runs.

use std::sync::Arc;

use serde::Serialize;
use serde::ser::SerializeStruct;
use xenia_definitions::{Query, Registry, Set};
use xenia_document::{Document, ObjectId};
use xenia_store::DocumentStore;

use crate::executor::{ExecContext, PipelineExecutor, PipelineFailure};
use crate::params::{Vars, reconcile};
use crate::{ExecError, mask};

pub const DEFAULT_SCRIPT_COLLECTION: &str = "query_scripts_target";

/// The documents one query contributed to the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Docs")]
    pub docs: Vec<Document>,
}

/// Outcome of a set execution. Serializes as
/// `{"results": [...]}` or `{"results": {"commands": [...], "error": "..."}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum SetResult {
    Success(Vec<QueryResult>),
    Failure {
        commands: Option<Vec<Document>>,
        error: String,
    },
}

impl SetResult {
    fn failed(error: &ExecError) -> Self {
        SetResult::Failure {
            commands: None,
            error: error.to_string(),
        }
    }

    fn failed_pipeline(failure: PipelineFailure) -> Self {
        SetResult::Failure {
            commands: Some(failure.commands),
            error: failure.error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SetResult::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SetResult::Success(_) => None,
            SetResult::Failure { error, .. } => Some(error),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Serialize)]
struct FailureBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    commands: Option<&'a [Document]>,
    error: &'a str,
}

impl Serialize for SetResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut envelope = serializer.serialize_struct("SetResult", 1)?;
        match self {
            SetResult::Success(results) => envelope.serialize_field("results", results)?,
            SetResult::Failure { commands, error } => envelope.serialize_field(
                "results",
                &FailureBody {
                    commands: commands.as_deref(),
                    error: error.as_str(),
                },
            )?,
        }
        envelope.end()
    }
}

/// What happened to one query.
#[derive(Debug)]
enum QueryOutcome {
    Returned(QueryResult),
    Discarded,
    Continued(ExecError),
    Failed(PipelineFailure),
}

/// Executes sets against a document store.
pub struct SetExecutor {
    store: Arc<dyn DocumentStore>,
    registry: Arc<Registry>,
    script_collection: String,
}

impl SetExecutor {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            script_collection: DEFAULT_SCRIPT_COLLECTION.to_string(),
        }
    }

    pub fn with_script_collection(mut self, collection: impl Into<String>) -> Self {
        self.script_collection = collection.into();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Load a set through the registry and execute it.
    pub fn exec_name(&self, name: &str, vars: Vars) -> SetResult {
        match self.registry.set(name) {
            Ok(set) => self.exec(&set, vars),
            Err(err) => {
                log::error!("exec : load : {name} : {err}");
                SetResult::failed(&ExecError::from(err))
            }
        }
    }

    pub fn exec(&self, set: &Set, vars: Vars) -> SetResult {
        let id = ObjectId::new().to_hex();
        log::info!("{id} : exec : started set {}", set.name);
        let result = self.run_set(&id, set, vars);
        match &result {
            SetResult::Success(results) => {
                log::info!("{id} : exec : completed set {} with {} results", set.name, results.len())
            }
            SetResult::Failure { error, .. } => {
                log::error!("{id} : exec : set {} failed : {error}", set.name)
            }
        }
        result
    }

    fn run_set(&self, id: &str, set: &Set, vars: Vars) -> SetResult {
        if !set.enabled {
            return SetResult::failed(&ExecError::SetDisabled(set.name.clone()));
        }
        if set.queries.is_empty() {
            return SetResult::failed(&ExecError::NoQueries(set.name.clone()));
        }

        let vars = match reconcile(&set.params, vars, &self.registry) {
            Ok(vars) => vars,
            Err(err) => return SetResult::failed(&err),
        };
        let mut ctx = ExecContext::new(id, vars);

        if let Err(result) = self.run_script(&mut ctx, &set.pre_script) {
            return result;
        }

        let mut results = Vec::new();
        for query in &set.queries {
            match self.run_query(&mut ctx, query, set.explain) {
                QueryOutcome::Returned(result) => results.push(result),
                QueryOutcome::Discarded => {}
                QueryOutcome::Continued(err) => {
                    log::warn!("{id} : exec : query {} failed, continuing : {err}", query.name);
                    results.clear();
                }
                QueryOutcome::Failed(failure) => return SetResult::failed_pipeline(failure),
            }
        }

        if let Err(result) = self.run_script(&mut ctx, &set.pst_script) {
            return result;
        }
        SetResult::Success(results)
    }

    fn run_script(&self, ctx: &mut ExecContext, name: &str) -> Result<(), SetResult> {
        if name.is_empty() {
            return Ok(());
        }
        let script = self
            .registry
            .script(name)
            .map_err(|err| SetResult::failed(&ExecError::from(err)))?;
        log::debug!("{} : script : running {name}", ctx.id);
        PipelineExecutor::new(self.store.as_ref())
            .run(ctx, &self.script_collection, &script.commands, &[], false)
            .map(|_| ())
            .map_err(SetResult::failed_pipeline)
    }

    fn run_query(&self, ctx: &mut ExecContext, query: &Query, explain: bool) -> QueryOutcome {
        let outcome = self.try_query(ctx, query, explain);
        match outcome {
            Ok(Some(result)) => QueryOutcome::Returned(result),
            Ok(None) => QueryOutcome::Discarded,
            Err(failure) if query.continue_on_error => QueryOutcome::Continued(failure.error),
            Err(failure) => QueryOutcome::Failed(failure),
        }
    }

    fn try_query(
        &self,
        ctx: &mut ExecContext,
        query: &Query,
        explain: bool,
    ) -> Result<Option<QueryResult>, PipelineFailure> {
        if !query.is_pipeline() {
            return Err(PipelineFailure {
                error: ExecError::UnsupportedQueryType {
                    name: query.name.clone(),
                    query_type: query.query_type.clone(),
                },
                commands: query.commands.clone(),
            });
        }

        let execution = PipelineExecutor::new(self.store.as_ref()).run(
            ctx,
            &query.collection,
            &query.commands,
            &query.indexes,
            explain,
        )?;
        if !query.return_docs {
            return Ok(None);
        }

        let mut docs = execution.docs;
        if !execution.explained {
            let masked = self
                .registry
                .masks(&query.collection)
                .map_err(ExecError::from)
                .and_then(|masks| mask::apply(&masks, &mut docs));
            if let Err(error) = masked {
                return Err(PipelineFailure {
                    error,
                    commands: execution.commands,
                });
            }
        }
        Ok(Some(QueryResult {
            name: query.name.clone(),
            docs,
        }))
    }
}
