//! `$match` filters.
//!
//! A filter document is compiled once into a [`Filter`] tree (regexes are
//! built at this point) and then evaluated against every candidate document.

use regex::{Regex, RegexBuilder};
use xenia_document::{Document, Value};

use crate::StoreError;

#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field { path: String, cond: Condition },
}

#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Operand>),
    Nin(Vec<Operand>),
    Exists(bool),
    Regex(Regex),
    Size(usize),
    Not(Box<Condition>),
    All(Vec<Condition>),
}

/// A member of an `$in`/`$nin` list: a plain value or a regex.
#[derive(Debug, Clone)]
pub enum Operand {
    Value(Value),
    Regex(Regex),
}

pub(crate) fn build_regex(pattern: &str, options: &str) -> Result<Regex, StoreError> {
    for flag in options.chars() {
        if !matches!(flag, 'i' | 'm' | 's' | 'x') {
            return Err(StoreError::operand(
                "$options",
                format!("invalid flag '{flag}' in regex options: {options}"),
            ));
        }
    }
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| StoreError::operand("$regex", e.to_string()))
}

fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Document(doc) => doc.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn operand(value: &Value) -> Result<Operand, StoreError> {
    Ok(match value {
        Value::Regex { pattern, options } => Operand::Regex(build_regex(pattern, options)?),
        other => Operand::Value(other.clone()),
    })
}

fn operand_list(operator: &str, value: &Value) -> Result<Vec<Operand>, StoreError> {
    match value {
        Value::Array(items) => items.iter().map(operand).collect(),
        other => Err(StoreError::operand(
            operator,
            format!("needs an array, got {}", other.type_name()),
        )),
    }
}

impl Filter {
    /// Compile a filter document.
    pub fn compile(doc: &Document) -> Result<Filter, StoreError> {
        let mut clauses = Vec::with_capacity(doc.len());
        for (key, value) in doc.iter() {
            let clause = match key.as_str() {
                "$and" => Filter::And(Self::compile_list(key, value)?),
                "$or" => Filter::Or(Self::compile_list(key, value)?),
                "$nor" => Filter::Nor(Self::compile_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(StoreError::UnknownOperator(op.to_string()));
                }
                path => Filter::Field {
                    path: path.to_string(),
                    cond: Condition::compile(value)?,
                },
            };
            clauses.push(clause);
        }
        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    fn compile_list(operator: &str, value: &Value) -> Result<Vec<Filter>, StoreError> {
        let items = value
            .as_array()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| StoreError::operand(operator, "needs a nonempty array"))?;
        items
            .iter()
            .map(|item| match item {
                Value::Document(doc) => Filter::compile(doc),
                other => Err(StoreError::operand(
                    operator,
                    format!("entries must be objects, got {}", other.type_name()),
                )),
            })
            .collect()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(all) => all.iter().all(|f| f.matches(doc)),
            Filter::Or(any) => any.iter().any(|f| f.matches(doc)),
            Filter::Nor(none) => !none.iter().any(|f| f.matches(doc)),
            Filter::Field { path, cond } => cond.matches(&candidates(doc, path)),
        }
    }

    /// Top-level field paths tested by this filter, used by explain.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Filter::And(all) => all.iter().flat_map(|f| f.fields()).collect(),
            Filter::Or(_) | Filter::Nor(_) => Vec::new(),
            Filter::Field { path, .. } => vec![path.as_str()],
        }
    }
}

impl Condition {
    fn compile(value: &Value) -> Result<Condition, StoreError> {
        if !is_operator_document(value) {
            return Ok(match value {
                Value::Regex { pattern, options } => Condition::Regex(build_regex(pattern, options)?),
                other => Condition::Eq(other.clone()),
            });
        }
        let Some(ops) = value.as_document() else {
            return Ok(Condition::Eq(value.clone()));
        };

        let options = match ops.get("$options") {
            Some(Value::String(o)) => Some(o.as_str()),
            Some(other) => {
                return Err(StoreError::operand(
                    "$options",
                    format!("needs a string, got {}", other.type_name()),
                ));
            }
            None => None,
        };

        let mut conds = Vec::with_capacity(ops.len());
        for (op, operand_value) in ops.iter() {
            let cond = match op.as_str() {
                "$eq" => Condition::Eq(operand_value.clone()),
                "$ne" => Condition::Ne(operand_value.clone()),
                "$gt" => Condition::Gt(operand_value.clone()),
                "$gte" => Condition::Gte(operand_value.clone()),
                "$lt" => Condition::Lt(operand_value.clone()),
                "$lte" => Condition::Lte(operand_value.clone()),
                "$in" => Condition::In(operand_list(op, operand_value)?),
                "$nin" => Condition::Nin(operand_list(op, operand_value)?),
                "$exists" => Condition::Exists(operand_value.is_truthy()),
                "$size" => match operand_value.as_i64() {
                    Some(n) if n >= 0 => Condition::Size(n as usize),
                    _ => return Err(StoreError::operand(op, "needs a non-negative integer")),
                },
                "$regex" => match operand_value {
                    Value::String(pattern) => {
                        Condition::Regex(build_regex(pattern, options.unwrap_or(""))?)
                    }
                    Value::Regex { pattern, options: inline } => {
                        Condition::Regex(build_regex(pattern, options.unwrap_or(inline))?)
                    }
                    other => {
                        return Err(StoreError::operand(
                            op,
                            format!("needs a string or regex, got {}", other.type_name()),
                        ));
                    }
                },
                "$options" => continue,
                "$not" => match operand_value {
                    Value::Regex { .. } | Value::Document(_) => {
                        Condition::Not(Box::new(Condition::compile(operand_value)?))
                    }
                    _ => return Err(StoreError::operand(op, "needs a regex or a document")),
                },
                other => return Err(StoreError::UnknownOperator(other.to_string())),
            };
            conds.push(cond);
        }

        if options.is_some() && !ops.contains_key("$regex") {
            return Err(StoreError::operand("$options", "needs a $regex"));
        }

        Ok(match conds.len() {
            1 => conds.remove(0),
            _ => Condition::All(conds),
        })
    }

    /// Evaluate against the values found at the field path. An empty slice
    /// means the field is missing.
    pub fn matches(&self, values: &[&Value]) -> bool {
        match self {
            Condition::Eq(target) => equals(values, target),
            Condition::Ne(target) => !equals(values, target),
            Condition::Gt(target) => compares(values, target, |o| o.is_gt()),
            Condition::Gte(target) => compares(values, target, |o| o.is_ge()),
            Condition::Lt(target) => compares(values, target, |o| o.is_lt()),
            Condition::Lte(target) => compares(values, target, |o| o.is_le()),
            Condition::In(list) => in_list(values, list),
            Condition::Nin(list) => !in_list(values, list),
            Condition::Exists(expected) => values.is_empty() != *expected,
            Condition::Regex(re) => values.iter().any(|v| regex_matches(re, v)),
            Condition::Size(n) => values
                .iter()
                .any(|v| matches!(v, Value::Array(items) if items.len() == *n)),
            Condition::Not(inner) => !inner.matches(values),
            Condition::All(conds) => conds.iter().all(|c| c.matches(values)),
        }
    }
}

fn regex_matches(re: &Regex, value: &Value) -> bool {
    match value {
        Value::String(s) => re.is_match(s),
        Value::Regex { pattern, .. } => pattern == re.as_str(),
        _ => false,
    }
}

fn equals(values: &[&Value], target: &Value) -> bool {
    if values.is_empty() {
        return target.is_null();
    }
    values.iter().any(|v| v.loose_eq(target))
}

fn compares(values: &[&Value], target: &Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    values
        .iter()
        .any(|v| v.type_class() == target.type_class() && pred(v.canonical_cmp(target)))
}

fn in_list(values: &[&Value], list: &[Operand]) -> bool {
    list.iter().any(|member| match member {
        Operand::Value(target) => equals(values, target),
        Operand::Regex(re) => values.iter().any(|v| regex_matches(re, v)),
    })
}

/// All values reachable at a dotted path. Arrays are traversed: an array of
/// documents fans out to each element, and a terminal array contributes both
/// itself and its elements.
pub fn candidates<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(segments[0]) {
        collect(first, &segments[1..], &mut out);
    }
    out
}

fn collect<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    let Some((segment, tail)) = rest.split_first() else {
        out.push(value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
        return;
    };
    match value {
        Value::Document(doc) => {
            if let Some(next) = doc.get(segment) {
                collect(next, tail, out);
            }
        }
        Value::Array(items) => {
            if let Some(item) = segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                collect(item, tail, out);
            }
            for item in items.iter().filter(|i| matches!(i, Value::Document(_))) {
                collect(item, rest, out);
            }
        }
        _ => {}
    }
}
