use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Definition, DefinitionError};

/// Collection name whose masks apply to every collection.
pub const ALL_COLLECTIONS: &str = "*";

const DEFAULT_MASK_LEN: usize = 4;

/// How a masked field is obscured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskType {
    All,
    Email,
    Left(usize),
    Right(usize),
    Remove,
}

impl MaskType {
    fn parse_len(rest: &str) -> Option<usize> {
        if rest.is_empty() {
            return Some(DEFAULT_MASK_LEN);
        }
        let digits = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .unwrap_or(rest);
        digits.parse().ok()
    }
}

impl FromStr for MaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s {
            "all" => Some(MaskType::All),
            "email" => Some(MaskType::Email),
            "remove" => Some(MaskType::Remove),
            _ => {
                if let Some(rest) = s.strip_prefix("left") {
                    MaskType::parse_len(rest).map(MaskType::Left)
                } else if let Some(rest) = s.strip_prefix("right") {
                    MaskType::parse_len(rest).map(MaskType::Right)
                } else {
                    None
                }
            }
        };
        parsed.ok_or_else(|| format!("unrecognised mask type {s:?}"))
    }
}

impl fmt::Display for MaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskType::All => write!(f, "all"),
            MaskType::Email => write!(f, "email"),
            MaskType::Left(n) => write!(f, "left[{n}]"),
            MaskType::Right(n) => write!(f, "right[{n}]"),
            MaskType::Remove => write!(f, "remove"),
        }
    }
}

impl Serialize for MaskType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MaskType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    pub collection: String,
    pub field: String,
    #[serde(rename = "type")]
    pub mask_type: MaskType,
}

/// Field name to mask type, as applied to one collection.
pub type FieldMasks = HashMap<String, MaskType>;

impl Mask {
    /// Storage key for a mask: the JSON array `["collection","field"]`.
    /// JSON string escaping keeps keys unambiguous whatever the names hold.
    pub fn key_for(collection: &str, field: &str) -> String {
        serde_json::json!([collection, field]).to_string()
    }

    /// Masks that apply to `collection`: its own masks win over `*` masks on
    /// the same field.
    pub fn for_collection<'a>(
        collection: &str,
        masks: impl IntoIterator<Item = &'a Mask>,
    ) -> FieldMasks {
        let mut wildcard = FieldMasks::new();
        let mut specific = FieldMasks::new();
        for mask in masks {
            if mask.collection == collection {
                specific.insert(mask.field.clone(), mask.mask_type);
            } else if mask.collection == ALL_COLLECTIONS {
                wildcard.insert(mask.field.clone(), mask.mask_type);
            }
        }
        wildcard.extend(specific);
        wildcard
    }
}

impl Definition for Mask {
    const KIND: &'static str = "mask";
    const TREE: &'static str = "query_masks";

    fn key(&self) -> String {
        Mask::key_for(&self.collection, &self.field)
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        if self.collection.trim().is_empty() {
            return Err(DefinitionError::invalid(Self::KIND, "mask collection is required"));
        }
        if self.field.trim().is_empty() {
            return Err(DefinitionError::invalid(Self::KIND, "mask field is required"));
        }
        Ok(())
    }
}
