//! Runs one rendered pipeline against the store.

use xenia_document::{Document, Value};
use xenia_store::{DocumentStore, Index};

use crate::bag::DataBag;
use crate::directive::Resolver;
use crate::params::Vars;
use crate::ExecError;

/// State shared by every pipeline of one set execution.
#[derive(Debug)]
pub struct ExecContext {
    /// Identifies the execution in log lines.
    pub id: String,
    pub vars: Vars,
    pub bag: DataBag,
}

impl ExecContext {
    pub fn new(id: impl Into<String>, vars: Vars) -> Self {
        Self {
            id: id.into(),
            vars,
            bag: DataBag::new(),
        }
    }
}

/// A successful pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub docs: Vec<Document>,
    /// The commands sent to the store, without any `$save` stage.
    pub commands: Vec<Document>,
    pub explained: bool,
}

/// A failed pipeline run with the commands to report alongside the error:
/// the original commands when rendering failed, the rendered ones when the
/// store rejected them.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: ExecError,
    pub commands: Vec<Document>,
}

impl PipelineFailure {
    fn new(error: impl Into<ExecError>, commands: Vec<Document>) -> Self {
        Self {
            error: error.into(),
            commands,
        }
    }
}

/// `{"$save": {"$map": "key"}}` yields `key`.
fn save_key(stage: &Document) -> Option<String> {
    let (name, spec) = stage.single_entry()?;
    if name != "$save" {
        return None;
    }
    spec.as_document()?
        .get("$map")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub struct PipelineExecutor<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> PipelineExecutor<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub fn run(
        &self,
        ctx: &mut ExecContext,
        collection: &str,
        stages: &[Document],
        indexes: &[Index],
        explain: bool,
    ) -> Result<Execution, PipelineFailure> {
        let rendered = Resolver::new(&ctx.vars, &ctx.bag)
            .render_all(stages)
            .map_err(|err| PipelineFailure::new(err, stages.to_vec()))?;

        let mut save = None;
        let mut commands = Vec::with_capacity(rendered.len());
        for stage in rendered {
            match save_key(&stage) {
                Some(key) => save = Some(key),
                None => commands.push(stage),
            }
        }
        log::debug!(
            "{} : pipeline : {collection} {}",
            ctx.id,
            serde_json::Value::Array(commands.iter().map(Document::to_json).collect())
        );

        if explain {
            let plan = self
                .store
                .explain(collection, &commands)
                .map_err(|err| PipelineFailure::new(err, commands.clone()))?;
            return Ok(Execution {
                docs: vec![plan],
                commands,
                explained: true,
            });
        }

        let docs = self
            .execute(collection, &commands, indexes)
            .map_err(|err| PipelineFailure::new(err, commands.clone()))?;
        if let Some(key) = save {
            log::debug!("{} : pipeline : saving {} documents as {key}", ctx.id, docs.len());
            ctx.bag.put(key, docs.clone());
        }
        Ok(Execution {
            docs,
            commands,
            explained: false,
        })
    }

    fn execute(
        &self,
        collection: &str,
        commands: &[Document],
        indexes: &[Index],
    ) -> Result<Vec<Document>, ExecError> {
        for index in indexes {
            self.store.ensure_index(collection, index)?;
        }
        Ok(self.store.aggregate(collection, commands)?)
    }
}
