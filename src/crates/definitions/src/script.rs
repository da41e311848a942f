use serde::{Deserialize, Serialize};
use xenia_document::Document;

use crate::{Definition, DefinitionError};

/// Reusable pipeline commands run before or after a set's queries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Script {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub commands: Vec<Document>,
}

impl Definition for Script {
    const KIND: &'static str = "script";
    const TREE: &'static str = "query_scripts";

    fn key(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::invalid(Self::KIND, "script name is required"));
        }
        if self.commands.is_empty() {
            return Err(DefinitionError::invalid(
                Self::KIND,
                format!("script {} has no commands", self.name),
            ));
        }
        Ok(())
    }
}
