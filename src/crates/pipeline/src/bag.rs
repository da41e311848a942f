use std::collections::HashMap;

use xenia_document::Document;

use crate::ExecError;

/// Per-execution scratch space. A `$save` stage stores a query's documents
/// under a key and later queries read them back with `#data` directives.
#[derive(Debug, Default)]
pub struct DataBag {
    entries: HashMap<String, Vec<Document>>,
}

impl DataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `docs` under `key`, replacing anything saved there before.
    pub fn put(&mut self, key: impl Into<String>, docs: Vec<Document>) {
        self.entries.insert(key.into(), docs);
    }

    pub fn get(&self, key: &str) -> Result<&[Document], ExecError> {
        self.entries
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| ExecError::KeyNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
