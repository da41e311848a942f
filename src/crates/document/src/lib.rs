//! Schema-less document model shared by the store and the query engine.
//!
//! Pipeline stages, stored records and query output are all trees of
//! [`Value`]. Documents keep their field insertion order so that rendering a
//! stage or returning a result never reorders fields.
//!
//! # Example
//!
//! ```
//! use xenia_document::{Document, Value};
//!
//! let doc = Document::from_json_str(r#"{"condition": {"wind_speed": 12}}"#).unwrap();
//! assert_eq!(doc.get_path("condition.wind_speed"), Some(&Value::Int(12)));
//! ```

pub mod document;
pub mod json;
pub mod oid;
pub mod value;

pub use document::Document;
pub use json::{JsonError, documents_from_json_str, from_json, to_json};
pub use oid::{ObjectId, ObjectIdError};
pub use value::Value;
