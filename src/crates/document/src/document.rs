//! Insertion-ordered documents with dotted-path access.

use indexmap::IndexMap;
use indexmap::map::{IntoIter, Iter, IterMut, Keys};

use crate::value::Value;

/// An ordered map of field name to [`Value`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a field. An existing field keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a field, preserving the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn keys(&self) -> Keys<'_, String, Value> {
        self.0.keys()
    }

    pub fn iter(&self) -> Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, String, Value> {
        self.0.iter_mut()
    }

    /// The single `(key, value)` pair of a one-field document, the shape of
    /// every pipeline stage.
    pub fn single_entry(&self) -> Option<(&str, &Value)> {
        if self.0.len() != 1 {
            return None;
        }
        self.0.iter().next().map(|(k, v)| (k.as_str(), v))
    }

    /// Walk a dotted path through nested documents. Numeric segments index
    /// into arrays.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            current = match current {
                Value::Document(doc) => doc.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set the value at a dotted path, creating intermediate documents. A
    /// non-document value in the way is replaced.
    pub fn set_path(&mut self, path: &str, value: Value) {
        match path.split_once('.') {
            None => {
                self.insert(path, value);
            }
            Some((head, rest)) => {
                let slot = self
                    .0
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Document(Document::new()));
                if !matches!(slot, Value::Document(_)) {
                    *slot = Value::Document(Document::new());
                }
                if let Value::Document(child) = slot {
                    child.set_path(rest, value);
                }
            }
        }
    }

    /// Remove the value at a dotted path, if present.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => self.remove(path),
            Some((head, rest)) => match self.get_mut(head) {
                Some(Value::Document(child)) => child.remove_path(rest),
                _ => None,
            },
        }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
