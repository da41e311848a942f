use serde::{Deserialize, Serialize};

use crate::{Definition, DefinitionError};

/// A named validation pattern referenced by `Param::regex_name`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Regex {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    pub expr: String,
}

/// A [`Regex`] definition with its pattern compiled.
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    pub name: String,
    pub matcher: regex::Regex,
}

impl CompiledRegex {
    pub fn is_match(&self, value: &str) -> bool {
        self.matcher.is_match(value)
    }
}

impl Regex {
    pub fn compile(&self) -> Result<CompiledRegex, DefinitionError> {
        let matcher = regex::Regex::new(&self.expr).map_err(|source| DefinitionError::InvalidRegex {
            name: self.name.clone(),
            source,
        })?;
        Ok(CompiledRegex {
            name: self.name.clone(),
            matcher,
        })
    }
}

impl Definition for Regex {
    const KIND: &'static str = "regex";
    const TREE: &'static str = "query_regexs";

    fn key(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.name.trim().is_empty() {
            return Err(DefinitionError::invalid(Self::KIND, "regex name is required"));
        }
        if self.expr.is_empty() {
            return Err(DefinitionError::invalid(
                Self::KIND,
                format!("regex {} has an empty expression", self.name),
            ));
        }
        self.compile().map(|_| ())
    }
}
