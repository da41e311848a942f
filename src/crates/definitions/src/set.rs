//! Query sets: named, parameterized lists of aggregation queries.

use serde::{Deserialize, Serialize};
use xenia_document::Document;
use xenia_store::Index;

use crate::{Definition, DefinitionError};

pub const PIPELINE_TYPE: &str = "pipeline";

fn pipeline_type() -> String {
    PIPELINE_TYPE.to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Set {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub explain: bool,
    #[serde(default)]
    pub pre_script: String,
    #[serde(default)]
    pub pst_script: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub queries: Vec<Query>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub regex_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(rename = "type", default = "pipeline_type")]
    pub query_type: String,
    #[serde(default)]
    pub collection: String,
    #[serde(rename = "return", default)]
    pub return_docs: bool,
    #[serde(rename = "continue", default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub commands: Vec<Document>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            name: String::new(),
            desc: String::new(),
            query_type: pipeline_type(),
            collection: String::new(),
            return_docs: false,
            continue_on_error: false,
            commands: Vec::new(),
            indexes: Vec::new(),
        }
    }
}

impl Set {
    pub fn from_json_str(s: &str) -> Result<Set, DefinitionError> {
        Ok(serde_json::from_str(s)?)
    }
}

impl Query {
    pub fn is_pipeline(&self) -> bool {
        self.query_type == PIPELINE_TYPE
    }
}

impl Definition for Set {
    const KIND: &'static str = "set";
    const TREE: &'static str = "query_sets";

    fn key(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::invalid(Self::KIND, "set name is required"));
        }
        if self.queries.is_empty() {
            return Err(DefinitionError::invalid(
                Self::KIND,
                format!("set {} needs at least one query", self.name),
            ));
        }
        for param in &self.params {
            if param.name.trim().is_empty() {
                return Err(DefinitionError::invalid(
                    Self::KIND,
                    format!("set {} has a param without a name", self.name),
                ));
            }
        }
        for (i, query) in self.queries.iter().enumerate() {
            let reason = if query.name.trim().is_empty() {
                Some(format!("query {i} has no name"))
            } else if query.collection.trim().is_empty() {
                Some(format!("query {} has no collection", query.name))
            } else if !query.is_pipeline() {
                Some(format!(
                    "query {} has unsupported type {}",
                    query.name, query.query_type
                ))
            } else if query.commands.is_empty() {
                Some(format!("query {} has no commands", query.name))
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(DefinitionError::invalid(Self::KIND, reason));
            }
        }
        Ok(())
    }
}
