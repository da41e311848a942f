use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unrecognized pipeline stage name: '{0}'")]
    UnknownStage(String),
    #[error("Invalid {stage} stage: {reason}")]
    InvalidStage { stage: String, reason: String },
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),
    #[error("Invalid operand for {operator}: {reason}")]
    InvalidOperand { operator: String, reason: String },
    #[error("E11000 duplicate key error collection: {collection} index: {index} dup key: {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },
    #[error("store backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub(crate) fn stage(stage: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidStage {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn operand(operator: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidOperand {
            operator: operator.to_string(),
            reason: reason.into(),
        }
    }
}
