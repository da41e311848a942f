use thiserror::Error;
use xenia_definitions::DefinitionError;
use xenia_store::StoreError;

/// Everything that can fail while executing a set. The display form is the
/// string reported in the result envelope.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Missing[{0}]")]
    MissingParameter(String),
    /// Aggregated parameter failures, joined with `,`.
    #[error("{0}")]
    InvalidParameters(String),
    #[error("Invalid date value: {0}")]
    InvalidDate(String),
    #[error("Invalid ObjectId value: {0}")]
    InvalidObjectId(String),
    #[error("Invalid regex value: {0}")]
    InvalidRegexLiteral(String),
    #[error("Invalid number value: {0}")]
    InvalidNumber(String),
    #[error("Invalid duration value: {0}")]
    InvalidDuration(String),
    #[error("Missing data operator in {0}")]
    DataMissingOperator(String),
    #[error("Invalid data operator {operator} in {directive}")]
    InvalidOperator { directive: String, operator: String },
    #[error("Key {0} not found")]
    KeyNotFound(String),
    #[error("Index {index} out of range for {key} with {len} documents")]
    IndexOutOfRange { key: String, index: usize, len: usize },
    #[error("{operator} requires an array, got {found}")]
    MalformedInOperator { operator: String, found: &'static str },
    #[error("Field {field} of type {found} cannot be masked")]
    InvalidMaskFieldType { field: String, found: &'static str },
    #[error("Field {field} is not an email address")]
    InvalidMaskValue { field: String },
    #[error("Set {0} is disabled")]
    SetDisabled(String),
    #[error("Set {0} has no queries")]
    NoQueries(String),
    #[error("Query {name} has unsupported type {query_type}")]
    UnsupportedQueryType { name: String, query_type: String },
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Definition(#[from] DefinitionError),
}
