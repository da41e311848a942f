//! Aggregation pipeline evaluator.
//!
//! A pipeline is compiled stage by stage into [`Stage`] values and then run
//! over a snapshot of a collection. Stage order is preserved and each stage
//! consumes the output of the previous one.

use std::cmp::Ordering;

use xenia_document::{Document, Value};

use crate::filter::Filter;
use crate::{Index, StoreError};

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    Project(Projection),
    Limit(usize),
    Skip(usize),
    Sort(Vec<(String, bool)>),
    Unwind { path: String, preserve_empty: bool },
    Group(Group),
    Count(String),
    AddFields(Document),
}

/// A compiled pipeline.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn compile(stages: &[Document]) -> Result<Pipeline, StoreError> {
        let stages = stages
            .iter()
            .map(Stage::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn run(&self, mut docs: Vec<Document>) -> Vec<Document> {
        for stage in &self.stages {
            docs = stage.run(docs);
        }
        docs
    }

    /// Planner output for this pipeline. The leading `$match` decides between
    /// an index scan and a collection scan.
    pub fn explain(&self, collection: &str, raw: &[Document], indexes: &[Index]) -> Document {
        let mut plan = Document::new();
        let used = match self.stages.first() {
            Some(Stage::Match(filter)) => {
                let fields = filter.fields();
                indexes
                    .iter()
                    .find(|index| index.fields().next().is_some_and(|f| fields.contains(&f)))
            }
            _ => None,
        };
        match used {
            Some(index) => {
                plan.insert("stage", "IXSCAN");
                plan.insert("indexName", index.name());
                plan.insert(
                    "keyPattern",
                    Value::Array(index.key.iter().map(|k| Value::from(k.as_str())).collect()),
                );
            }
            None => {
                plan.insert("stage", "COLLSCAN");
            }
        }
        if let Some(Stage::Match(_)) = self.stages.first() {
            if let Some(first) = raw.first().and_then(|d| d.get("$match")) {
                plan.insert("filter", first.clone());
            }
        }

        let mut planner = Document::new();
        planner.insert("namespace", collection);
        planner.insert(
            "parsedPipeline",
            Value::Array(raw.iter().cloned().map(Value::Document).collect()),
        );
        planner.insert("winningPlan", plan);

        let mut out = Document::new();
        out.insert("queryPlanner", planner);
        out.insert("stages", self.stages.len() as i64);
        out
    }
}

fn positive(stage: &str, value: &Value) -> Result<usize, StoreError> {
    match value.as_i64() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(StoreError::stage(
            stage,
            format!("needs a non-negative integer, got {value}"),
        )),
    }
}

fn field_path(stage: &str, value: &Value) -> Result<String, StoreError> {
    match value.as_str().and_then(|s| s.strip_prefix('$')) {
        Some(path) if !path.is_empty() => Ok(path.to_string()),
        _ => Err(StoreError::stage(
            stage,
            format!("field path must be a string prefixed with '$', got {value}"),
        )),
    }
}

impl Stage {
    pub fn compile(doc: &Document) -> Result<Stage, StoreError> {
        let (name, spec) = doc.single_entry().ok_or_else(|| {
            StoreError::stage(
                "pipeline",
                "a pipeline stage specification object must contain exactly one field",
            )
        })?;
        let as_doc = |stage: &str| {
            spec.as_document().ok_or_else(|| {
                StoreError::stage(stage, format!("needs an object, got {}", spec.type_name()))
            })
        };
        Ok(match name {
            "$match" => Stage::Match(Filter::compile(as_doc(name)?)?),
            "$project" => Stage::Project(Projection::compile(as_doc(name)?)?),
            "$limit" => Stage::Limit(positive(name, spec)?),
            "$skip" => Stage::Skip(positive(name, spec)?),
            "$sort" => {
                let keys = as_doc(name)?;
                if keys.is_empty() {
                    return Err(StoreError::stage(name, "must have at least one sort key"));
                }
                let mut order = Vec::with_capacity(keys.len());
                for (field, dir) in keys.iter() {
                    let ascending = match dir.as_i64() {
                        Some(1) => true,
                        Some(-1) => false,
                        _ => {
                            return Err(StoreError::stage(
                                name,
                                format!("sort direction for {field} must be 1 or -1"),
                            ));
                        }
                    };
                    order.push((field.clone(), ascending));
                }
                Stage::Sort(order)
            }
            "$unwind" => match spec {
                Value::String(_) => Stage::Unwind {
                    path: field_path(name, spec)?,
                    preserve_empty: false,
                },
                Value::Document(opts) => Stage::Unwind {
                    path: field_path(name, opts.get("path").unwrap_or(&Value::Null))?,
                    preserve_empty: opts
                        .get("preserveNullAndEmptyArrays")
                        .is_some_and(Value::is_truthy),
                },
                other => {
                    return Err(StoreError::stage(
                        name,
                        format!("needs a string or object, got {}", other.type_name()),
                    ));
                }
            },
            "$group" => Stage::Group(Group::compile(as_doc(name)?)?),
            "$count" => match spec.as_str() {
                Some(field) if !field.is_empty() && !field.starts_with('$') => {
                    Stage::Count(field.to_string())
                }
                _ => return Err(StoreError::stage(name, "needs a non-empty field name")),
            },
            "$addFields" | "$set" => Stage::AddFields(as_doc(name)?.clone()),
            other => return Err(StoreError::UnknownStage(other.to_string())),
        })
    }

    pub fn run(&self, docs: Vec<Document>) -> Vec<Document> {
        match self {
            Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Project(projection) => docs.iter().map(|d| projection.apply(d)).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Sort(keys) => {
                let mut docs = docs;
                docs.sort_by(|a, b| compare_by(keys, a, b));
                docs
            }
            Stage::Unwind {
                path,
                preserve_empty,
            } => unwind(docs, path, *preserve_empty),
            Stage::Group(group) => group.run(&docs),
            Stage::Count(field) => {
                if docs.is_empty() {
                    return Vec::new();
                }
                let mut out = Document::new();
                out.insert(field.as_str(), docs.len() as i64);
                vec![out]
            }
            Stage::AddFields(fields) => docs
                .into_iter()
                .map(|mut doc| {
                    for (path, expr) in fields.iter() {
                        let value = evaluate(expr, &doc);
                        doc.set_path(path, value);
                    }
                    doc
                })
                .collect(),
        }
    }
}

fn compare_by(keys: &[(String, bool)], a: &Document, b: &Document) -> Ordering {
    for (path, ascending) in keys {
        let left = a.get_path(path).unwrap_or(&Value::Null);
        let right = b.get_path(path).unwrap_or(&Value::Null);
        let ord = left.canonical_cmp(right);
        let ord = if *ascending { ord } else { ord.reverse() };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn unwind(docs: Vec<Document>, path: &str, preserve_empty: bool) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.get_path(path) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items.clone() {
                    let mut copy = doc.clone();
                    copy.set_path(path, item);
                    out.push(copy);
                }
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {
                if preserve_empty {
                    out.push(doc);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    out
}

/// Evaluate an aggregation expression against a document.
///
/// `"$a.b"` reads a field, `{"$op": ...}` applies one of the supported
/// operators, other documents and arrays evaluate element-wise and
/// everything else is a literal.
pub fn evaluate(expr: &Value, doc: &Document) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') && !s.starts_with("$$") => {
            doc.get_path(&s[1..]).cloned().unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(|i| evaluate(i, doc)).collect()),
        Value::Document(inner) => match inner.single_entry() {
            Some((op, arg)) if op.starts_with('$') => operator(op, arg, doc),
            _ => Value::Document(
                inner
                    .iter()
                    .map(|(k, v)| (k.clone(), evaluate(v, doc)))
                    .collect(),
            ),
        },
        other => other.clone(),
    }
}

fn arguments(arg: &Value, doc: &Document) -> Vec<Value> {
    match arg {
        Value::Array(items) => items.iter().map(|i| evaluate(i, doc)).collect(),
        single => vec![evaluate(single, doc)],
    }
}

fn operator(op: &str, arg: &Value, doc: &Document) -> Value {
    match op {
        "$literal" => arg.clone(),
        "$concat" => {
            let parts = arguments(arg, doc);
            let mut out = String::new();
            for part in parts {
                match part {
                    Value::String(s) => out.push_str(&s),
                    _ => return Value::Null,
                }
            }
            Value::String(out)
        }
        "$toUpper" | "$toLower" => match arguments(arg, doc).first() {
            Some(Value::String(s)) if op == "$toUpper" => Value::String(s.to_uppercase()),
            Some(Value::String(s)) => Value::String(s.to_lowercase()),
            _ => Value::String(String::new()),
        },
        "$add" => {
            let parts = arguments(arg, doc);
            if parts.iter().all(|p| matches!(p, Value::Int(_))) {
                Value::Int(parts.iter().filter_map(Value::as_i64).sum())
            } else if parts.iter().all(Value::is_number) {
                Value::Float(parts.iter().filter_map(Value::as_f64).sum())
            } else {
                Value::Null
            }
        }
        "$ifNull" => arguments(arg, doc)
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null),
        "$size" => match arguments(arg, doc).first() {
            Some(Value::Array(items)) => Value::Int(items.len() as i64),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// A `$project` specification.
#[derive(Debug, Clone)]
pub struct Projection {
    exclude_id: bool,
    mode: ProjectionMode,
}

#[derive(Debug, Clone)]
enum ProjectionMode {
    /// Keep only these paths; `Some` carries a computed expression.
    Include(Vec<(String, Option<Value>)>),
    Exclude(Vec<String>),
}

impl Projection {
    fn compile(spec: &Document) -> Result<Projection, StoreError> {
        let mut flat = Vec::new();
        flatten_projection(spec, "", &mut flat);

        let mut exclude_id = false;
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for (path, value) in flat {
            let flag = match &value {
                Value::Bool(_) | Value::Int(_) | Value::Float(_) => Some(value.is_truthy()),
                _ => None,
            };
            match (path.as_str(), flag) {
                ("_id", Some(false)) => exclude_id = true,
                (_, Some(true)) => include.push((path, None)),
                (_, Some(false)) => exclude.push(path),
                (_, None) => include.push((path, Some(value))),
            }
        }
        if !include.is_empty() && !exclude.is_empty() {
            return Err(StoreError::stage(
                "$project",
                format!("cannot do exclusion on field {} in inclusion projection", exclude[0]),
            ));
        }
        let mode = if !include.is_empty() {
            ProjectionMode::Include(include)
        } else if !exclude.is_empty() || exclude_id {
            ProjectionMode::Exclude(exclude)
        } else {
            return Err(StoreError::stage("$project", "specification must have at least one field"));
        };
        Ok(Projection { exclude_id, mode })
    }

    fn apply(&self, doc: &Document) -> Document {
        match &self.mode {
            ProjectionMode::Include(fields) => {
                let mut out = Document::new();
                match doc.get("_id") {
                    Some(id) if !self.exclude_id => {
                        out.insert("_id", id.clone());
                    }
                    _ => {}
                }
                for (path, computed) in fields {
                    match computed {
                        Some(expr) => out.set_path(path, evaluate(expr, doc)),
                        None => {
                            if let Some(value) = doc.get_path(path) {
                                out.set_path(path, value.clone());
                            }
                        }
                    }
                }
                out
            }
            ProjectionMode::Exclude(paths) => {
                let mut out = doc.clone();
                for path in paths {
                    out.remove_path(path);
                }
                if self.exclude_id {
                    out.remove("_id");
                }
                out
            }
        }
    }
}

/// `{"a": {"b": 1}}` projects like `{"a.b": 1}` unless the inner document is
/// an operator expression.
fn flatten_projection(spec: &Document, prefix: &str, out: &mut Vec<(String, Value)>) {
    for (key, value) in spec.iter() {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Document(inner)
                if !inner.is_empty() && !inner.keys().any(|k| k.starts_with('$')) =>
            {
                flatten_projection(inner, &path, out)
            }
            other => out.push((path, other.clone())),
        }
    }
}

/// A `$group` specification.
#[derive(Debug, Clone)]
pub struct Group {
    id: Value,
    accumulators: Vec<(String, Accumulator, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
}

impl Accumulator {
    fn parse(name: &str) -> Option<Accumulator> {
        Some(match name {
            "$sum" => Accumulator::Sum,
            "$avg" => Accumulator::Avg,
            "$min" => Accumulator::Min,
            "$max" => Accumulator::Max,
            "$first" => Accumulator::First,
            "$last" => Accumulator::Last,
            "$push" => Accumulator::Push,
            "$addToSet" => Accumulator::AddToSet,
            _ => return None,
        })
    }

    fn fold(self, values: &[Value]) -> Value {
        match self {
            Accumulator::Sum => sum(values.iter()),
            Accumulator::Avg => {
                let nums: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            Accumulator::Min | Accumulator::Max => {
                let present = values.iter().filter(|v| !v.is_null());
                let pick = if self == Accumulator::Min {
                    present.min_by(|a, b| a.canonical_cmp(b))
                } else {
                    present.max_by(|a, b| a.canonical_cmp(b))
                };
                pick.cloned().unwrap_or(Value::Null)
            }
            Accumulator::First => values.first().cloned().unwrap_or(Value::Null),
            Accumulator::Last => values.last().cloned().unwrap_or(Value::Null),
            Accumulator::Push => Value::Array(values.to_vec()),
            Accumulator::AddToSet => {
                let mut set: Vec<Value> = Vec::new();
                for v in values {
                    if !set.iter().any(|s| s.loose_eq(v)) {
                        set.push(v.clone());
                    }
                }
                Value::Array(set)
            }
        }
    }
}

fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut is_float = false;
    for value in values {
        match value {
            Value::Int(i) => int_total = int_total.saturating_add(*i),
            Value::Float(f) => {
                is_float = true;
                float_total += f;
            }
            _ => {}
        }
    }
    if is_float {
        Value::Float(float_total + int_total as f64)
    } else {
        Value::Int(int_total)
    }
}

impl Group {
    fn compile(spec: &Document) -> Result<Group, StoreError> {
        let id = spec
            .get("_id")
            .cloned()
            .ok_or_else(|| StoreError::stage("$group", "a group specification must include an _id"))?;
        let mut accumulators = Vec::new();
        for (field, value) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
            let (op, arg) = value
                .as_document()
                .and_then(Document::single_entry)
                .ok_or_else(|| {
                    StoreError::stage("$group", format!("the field '{field}' must be an accumulator object"))
                })?;
            let acc = Accumulator::parse(op).ok_or_else(|| {
                StoreError::stage("$group", format!("unknown group operator '{op}'"))
            })?;
            accumulators.push((field.clone(), acc, arg.clone()));
        }
        Ok(Group { id, accumulators })
    }

    fn run(&self, docs: &[Document]) -> Vec<Document> {
        // Groups keep the order in which their key was first seen.
        let mut groups: Vec<(Value, Vec<&Document>)> = Vec::new();
        for doc in docs {
            let key = evaluate(&self.id, doc);
            match groups.iter_mut().find(|(k, _)| k.loose_eq(&key)) {
                Some((_, members)) => members.push(doc),
                None => groups.push((key, vec![doc])),
            }
        }
        groups
            .into_iter()
            .map(|(key, members)| {
                let mut out = Document::new();
                out.insert("_id", key);
                for (field, acc, arg) in &self.accumulators {
                    let values: Vec<Value> = members
                        .iter()
                        .map(|d| evaluate(arg, d))
                        .filter(|v| {
                            !(v.is_null() && matches!(acc, Accumulator::Push | Accumulator::AddToSet))
                        })
                        .collect();
                    out.insert(field.as_str(), acc.fold(&values));
                }
                out
            })
            .collect()
    }
}
