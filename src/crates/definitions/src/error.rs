use thiserror::Error;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("invalid {kind}: {reason}")]
    Validation { kind: &'static str, reason: String },
    #[error("regex {name} does not compile: {source}")]
    InvalidRegex {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("definition backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("definition serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DefinitionError {
    pub(crate) fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        DefinitionError::Validation {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DefinitionError::NotFound { .. })
    }
}
