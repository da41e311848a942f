//! Field masking applied to returned documents.

use xenia_definitions::{FieldMasks, MaskType};
use xenia_document::{Document, Value};

use crate::ExecError;

const MASK: &str = "******";

/// Mask every document in place. Nested documents and documents inside
/// arrays are visited too, and every scalar element of an array held by a
/// masked field is masked. Containers themselves are only ever removed,
/// never obscured. Applying the same masks twice changes nothing.
pub fn apply(masks: &FieldMasks, docs: &mut [Document]) -> Result<(), ExecError> {
    if masks.is_empty() {
        return Ok(());
    }
    for doc in docs {
        mask_document(masks, doc)?;
    }
    Ok(())
}

fn mask_document(masks: &FieldMasks, doc: &mut Document) -> Result<(), ExecError> {
    let removed: Vec<String> = doc
        .keys()
        .filter(|k| masks.get(k.as_str()) == Some(&MaskType::Remove))
        .cloned()
        .collect();
    for field in &removed {
        doc.remove(field);
    }

    for (field, value) in doc.iter_mut() {
        let mask = masks.get(field.as_str()).copied();
        mask_entry(masks, field, mask, value)?;
    }
    Ok(())
}

fn mask_entry(
    masks: &FieldMasks,
    field: &str,
    mask: Option<MaskType>,
    value: &mut Value,
) -> Result<(), ExecError> {
    match value {
        Value::Document(inner) => mask_document(masks, inner),
        Value::Array(items) => {
            for item in items {
                mask_entry(masks, field, mask, item)?;
            }
            Ok(())
        }
        _ => {
            if let Some(mask) = mask {
                let masked = mask_value(field, mask, value)?;
                *value = masked;
            }
            Ok(())
        }
    }
}

fn mask_value(field: &str, mask: MaskType, value: &Value) -> Result<Value, ExecError> {
    match value {
        Value::Int(_) => Ok(Value::Int(0)),
        Value::Float(_) => Ok(Value::Float(0.0)),
        Value::String(s) => mask_string(field, mask, s).map(Value::String),
        other => Err(ExecError::InvalidMaskFieldType {
            field: field.to_string(),
            found: other.type_name(),
        }),
    }
}

fn mask_string(field: &str, mask: MaskType, s: &str) -> Result<String, ExecError> {
    Ok(match mask {
        MaskType::All | MaskType::Remove => MASK.to_string(),
        MaskType::Email => match s.find('@') {
            Some(at) => format!("{MASK}{}", &s[at..]),
            None => {
                return Err(ExecError::InvalidMaskValue {
                    field: field.to_string(),
                });
            }
        },
        MaskType::Left(n) => {
            let len = s.chars().count();
            let n = n.min(len);
            "*".repeat(n) + &s.chars().skip(n).collect::<String>()
        }
        MaskType::Right(n) => {
            let len = s.chars().count();
            let keep = len - n.min(len);
            s.chars().take(keep).collect::<String>() + &"*".repeat(len - keep)
        }
    })
}
