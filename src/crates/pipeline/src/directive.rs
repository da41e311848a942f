//! Template directives inside pipeline stages.
//!
//! Two kinds of templating are applied to every stage before it reaches the
//! store:
//! - `{name}` tokens in keys and string values are replaced by the value of
//!   the variable `name`. Unknown names are left untouched.
//! - String values of the form `#kind:payload` are parsed into a
//!   [`Directive`] and replaced by the value it resolves to. Strings that do
//!   not name a recognised kind pass through as plain strings.
//!
//! | directive | result |
//! |---|---|
//! | `#string:name` | the variable's raw string |
//! | `#number:x` | integer, or float when it has a fraction |
//! | `#date:x` | date from RFC 3339, `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD` |
//! | `#objid:x` | object id from 24 hex characters |
//! | `#regex:/p/flags` | regex with `i`, `m`, `s`, `x` flags |
//! | `#time:-15m` | now plus a relative duration |
//! | `#data.N:key.path` | `path` of the Nth document saved under `key` |
//! | `#data.*:key.path` | `path` of every saved document that has it |
//!
//! For every kind except `string` and `data`, a payload naming a variable is
//! replaced by the variable's value first; otherwise it is used literally.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use xenia_document::{Document, ObjectId, Value};

use crate::bag::DataBag;
use crate::params::Vars;
use crate::ExecError;

/// Which saved documents a `#data` directive reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Index(usize),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive<'a> {
    String(&'a str),
    Number(&'a str),
    Date(&'a str),
    ObjectId(&'a str),
    Regex(&'a str),
    Time(&'a str),
    Data {
        selector: Selector,
        key: &'a str,
        path: Option<&'a str>,
    },
}

impl<'a> Directive<'a> {
    /// `None` when `raw` is not a directive at all. `Some(Err(_))` when it is
    /// a `#data` directive with a bad selector.
    pub fn parse(raw: &'a str) -> Option<Result<Directive<'a>, ExecError>> {
        let body = raw.strip_prefix('#')?;
        let (kind, payload) = body.split_once(':')?;
        let directive = match kind {
            "string" => Directive::String(payload),
            "number" => Directive::Number(payload),
            "date" => Directive::Date(payload),
            "objid" => Directive::ObjectId(payload),
            "regex" => Directive::Regex(payload),
            "time" => Directive::Time(payload),
            _ => {
                let selector = kind.strip_prefix("data")?;
                if !selector.is_empty() && !selector.starts_with('.') {
                    return None;
                }
                return Some(Self::parse_data(raw, selector, payload));
            }
        };
        Some(Ok(directive))
    }

    fn parse_data(
        raw: &str,
        selector: &str,
        payload: &'a str,
    ) -> Result<Directive<'a>, ExecError> {
        let selector = match selector.strip_prefix('.') {
            None | Some("") => return Err(ExecError::DataMissingOperator(raw.to_string())),
            Some("*") => Selector::All,
            Some(index) => Selector::Index(index.parse().map_err(|_| ExecError::InvalidOperator {
                directive: raw.to_string(),
                operator: index.to_string(),
            })?),
        };
        let (key, path) = match payload.split_once('.') {
            Some((key, path)) => (key, Some(path).filter(|p| !p.is_empty())),
            None => (payload, None),
        };
        Ok(Directive::Data {
            selector,
            key,
            path,
        })
    }
}

/// Renders stages against a variable map and the data bag.
pub struct Resolver<'a> {
    vars: &'a Vars,
    bag: &'a DataBag,
    now: DateTime<Utc>,
}

impl<'a> Resolver<'a> {
    pub fn new(vars: &'a Vars, bag: &'a DataBag) -> Self {
        Self::with_clock(vars, bag, Utc::now())
    }

    /// A resolver whose `#time` directives are relative to `now`.
    pub fn with_clock(vars: &'a Vars, bag: &'a DataBag, now: DateTime<Utc>) -> Self {
        Self { vars, bag, now }
    }

    /// Render one stage. Key order is preserved.
    pub fn render(&self, stage: &Document) -> Result<Document, ExecError> {
        let mut out = Document::new();
        for (key, value) in stage.iter() {
            let key = self.substitute(key);
            let rendered = match value {
                Value::String(raw) if key == "$in" || key == "$nin" => {
                    let rendered = self.render_str(raw)?;
                    let was_directive = Directive::parse(&self.substitute(raw)).is_some();
                    if was_directive && !matches!(rendered, Value::Array(_)) {
                        return Err(ExecError::MalformedInOperator {
                            operator: key,
                            found: rendered.type_name(),
                        });
                    }
                    rendered
                }
                other => self.render_value(other)?,
            };
            out.insert(key, rendered);
        }
        Ok(out)
    }

    pub fn render_all(&self, stages: &[Document]) -> Result<Vec<Document>, ExecError> {
        stages.iter().map(|stage| self.render(stage)).collect()
    }

    fn render_value(&self, value: &Value) -> Result<Value, ExecError> {
        Ok(match value {
            Value::String(raw) => self.render_str(raw)?,
            Value::Document(doc) => Value::Document(self.render(doc)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item))
                    .collect::<Result<_, _>>()?,
            ),
            other => other.clone(),
        })
    }

    fn render_str(&self, raw: &str) -> Result<Value, ExecError> {
        let substituted = self.substitute(raw);
        match Directive::parse(&substituted) {
            Some(directive) => self.resolve(directive?),
            None => Ok(Value::String(substituted)),
        }
    }

    /// Replace `{name}` tokens with variable values.
    pub fn substitute(&self, raw: &str) -> String {
        if !raw.contains('{') {
            return raw.to_string();
        }
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if !after[..close].contains('{') => {
                    let name = &after[..close];
                    match self.vars.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn var_or_literal<'s>(&'s self, payload: &'s str) -> &'s str {
        self.vars.get(payload).map(String::as_str).unwrap_or(payload)
    }

    pub fn resolve(&self, directive: Directive<'_>) -> Result<Value, ExecError> {
        match directive {
            Directive::String(name) => self
                .vars
                .get(name)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| ExecError::MissingParameter(name.to_string())),
            Directive::Number(payload) => parse_number(self.var_or_literal(payload)),
            Directive::Date(payload) => parse_date(self.var_or_literal(payload)),
            Directive::ObjectId(payload) => {
                let value = self.var_or_literal(payload);
                ObjectId::parse_str(value)
                    .map(Value::ObjectId)
                    .map_err(|_| ExecError::InvalidObjectId(value.to_string()))
            }
            Directive::Regex(payload) => parse_regex(self.var_or_literal(payload)),
            Directive::Time(payload) => {
                let value = self.var_or_literal(payload);
                let offset = parse_duration(value)?;
                self.now
                    .checked_add_signed(offset)
                    .map(Value::DateTime)
                    .ok_or_else(|| ExecError::InvalidDuration(value.to_string()))
            }
            Directive::Data {
                selector,
                key,
                path,
            } => self.resolve_data(selector, key, path),
        }
    }

    fn resolve_data(
        &self,
        selector: Selector,
        key: &str,
        path: Option<&str>,
    ) -> Result<Value, ExecError> {
        let docs = self.bag.get(key)?;
        match selector {
            Selector::Index(index) => {
                let doc = docs.get(index).ok_or_else(|| ExecError::IndexOutOfRange {
                    key: key.to_string(),
                    index,
                    len: docs.len(),
                })?;
                match path {
                    None => Ok(Value::Document(doc.clone())),
                    Some(path) => doc
                        .get_path(path)
                        .cloned()
                        .ok_or_else(|| ExecError::KeyNotFound(format!("{key}.{path}"))),
                }
            }
            // Documents without the field contribute nothing.
            Selector::All => Ok(Value::Array(
                docs.iter()
                    .filter_map(|doc| match path {
                        None => Some(Value::Document(doc.clone())),
                        Some(path) => doc.get_path(path).cloned(),
                    })
                    .collect(),
            )),
        }
    }
}

fn parse_number(raw: &str) -> Result<Value, ExecError> {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    match trimmed.parse::<f64>() {
        Ok(float) if float.is_finite() => Ok(Value::Float(float)),
        _ => Err(ExecError::InvalidNumber(raw.to_string())),
    }
}

fn parse_date(raw: &str) -> Result<Value, ExecError> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Value::DateTime(date.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Value::DateTime(naive.and_utc()));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Value::DateTime(naive.and_utc()))
        .ok_or_else(|| ExecError::InvalidDate(raw.to_string()))
}

fn parse_regex(raw: &str) -> Result<Value, ExecError> {
    let invalid = || ExecError::InvalidRegexLiteral(raw.to_string());
    let body = raw.strip_prefix('/').ok_or_else(invalid)?;
    let (pattern, options) = body.rsplit_once('/').ok_or_else(invalid)?;
    if options.chars().any(|c| !matches!(c, 'i' | 'm' | 's' | 'x')) {
        return Err(invalid());
    }
    Ok(Value::Regex {
        pattern: pattern.to_string(),
        options: options.to_string(),
    })
}

/// Parse a relative duration such as `-87600h`, `1h30m`, `-15m` or `500ms`.
pub fn parse_duration(raw: &str) -> Result<TimeDelta, ExecError> {
    let invalid = || ExecError::InvalidDuration(raw.to_string());
    let (negative, mut rest) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    if rest == "0" {
        return Ok(TimeDelta::zero());
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if number_len == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];
        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return Err(invalid()),
        };
        nanos += amount * scale;
        rest = &rest[unit_len..];
    }
    if !nanos.is_finite() || nanos > i64::MAX as f64 {
        return Err(invalid());
    }
    let delta = TimeDelta::nanoseconds(nanos.round() as i64);
    Ok(if negative { -delta } else { delta })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn doc(json: &str) -> Document {
        Document::from_json_str(json).unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2013, 1, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn parse_recognises_kinds() {
        assert_eq!(
            Directive::parse("#string:station_id").unwrap().unwrap(),
            Directive::String("station_id")
        );
        assert_eq!(
            Directive::parse("#data.2:station.name.first").unwrap().unwrap(),
            Directive::Data {
                selector: Selector::Index(2),
                key: "station",
                path: Some("name.first"),
            }
        );
        assert_eq!(
            Directive::parse("#data.*:station").unwrap().unwrap(),
            Directive::Data {
                selector: Selector::All,
                key: "station",
                path: None,
            }
        );
        assert!(Directive::parse("plain").is_none());
        assert!(Directive::parse("#hashtag").is_none());
        assert!(Directive::parse("#unknown:x").is_none());
        assert!(Directive::parse("#database:x").is_none());
    }

    #[test]
    fn parse_rejects_bad_data_selectors() {
        assert!(matches!(
            Directive::parse("#data:station.id"),
            Some(Err(ExecError::DataMissingOperator(_)))
        ));
        assert!(matches!(
            Directive::parse("#data.:station.id"),
            Some(Err(ExecError::DataMissingOperator(_)))
        ));
        assert!(matches!(
            Directive::parse("#data.x:station.id"),
            Some(Err(ExecError::InvalidOperator { operator, .. })) if operator == "x"
        ));
    }

    #[test]
    fn string_directive_requires_variable() {
        let vars = vars(&[("station_id", "42021")]);
        let bag = DataBag::new();
        let resolver = Resolver::new(&vars, &bag);
        let out = resolver
            .render(&doc(r##"{"$match": {"station_id": "#string:station_id"}}"##))
            .unwrap();
        assert_eq!(out.get_path("$match.station_id"), Some(&Value::from("42021")));

        let err = resolver
            .render(&doc(r##"{"$match": {"name": "#string:name"}}"##))
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing[name]");
    }

    #[test]
    fn typed_directives() {
        let vars = vars(&[("since", "2013-01-16T00:00:00.000Z"), ("limit", "10")]);
        let bag = DataBag::new();
        let resolver = Resolver::new(&vars, &bag);
        let out = resolver
            .render(&doc(
                r##"{"a": "#date:since", "b": "#date:2013-01-16", "c": "#number:limit",
                     "d": "#number:2.5", "e": "#objid:5660bc6e16908cae692e0593",
                     "f": "#regex:/^c14/i", "g": "#time:0"}"##,
            ))
            .unwrap();
        let midnight = Utc.with_ymd_and_hms(2013, 1, 16, 0, 0, 0).unwrap();
        assert_eq!(out.get("a"), Some(&Value::DateTime(midnight)));
        assert_eq!(out.get("b"), Some(&Value::DateTime(midnight)));
        assert_eq!(out.get("c"), Some(&Value::Int(10)));
        assert_eq!(out.get("d"), Some(&Value::Float(2.5)));
        assert!(matches!(out.get("e"), Some(Value::ObjectId(id)) if id.to_hex() == "5660bc6e16908cae692e0593"));
        assert_eq!(
            out.get("f"),
            Some(&Value::Regex {
                pattern: "^c14".into(),
                options: "i".into()
            })
        );
        assert!(matches!(out.get("g"), Some(Value::DateTime(_))));
    }

    #[test]
    fn typed_directive_failures() {
        let vars = Vars::new();
        let bag = DataBag::new();
        let resolver = Resolver::new(&vars, &bag);
        let render = |json: &str| resolver.render(&doc(json)).unwrap_err();
        assert!(matches!(render(r##"{"a": "#date:yesterday"}"##), ExecError::InvalidDate(_)));
        assert!(matches!(render(r##"{"a": "#objid:1234"}"##), ExecError::InvalidObjectId(_)));
        assert!(matches!(render(r##"{"a": "#regex:^c14"}"##), ExecError::InvalidRegexLiteral(_)));
        assert!(matches!(render(r##"{"a": "#regex:/c14"}"##), ExecError::InvalidRegexLiteral(_)));
        assert!(matches!(render(r##"{"a": "#regex:/c14/q"}"##), ExecError::InvalidRegexLiteral(_)));
        assert!(matches!(render(r##"{"a": "#number:ten"}"##), ExecError::InvalidNumber(_)));
        assert!(matches!(render(r##"{"a": "#time:soon"}"##), ExecError::InvalidDuration(_)));
    }

    #[test]
    fn time_is_relative_to_clock() {
        let vars = Vars::new();
        let bag = DataBag::new();
        let resolver = Resolver::with_clock(&vars, &bag, fixed_now());
        let out = resolver
            .render(&doc(r##"{"a": "#time:-1h30m", "b": "#time:24h"}"##))
            .unwrap();
        assert_eq!(
            out.get("a"),
            Some(&Value::DateTime(Utc.with_ymd_and_hms(2013, 1, 16, 10, 30, 0).unwrap()))
        );
        assert_eq!(
            out.get("b"),
            Some(&Value::DateTime(Utc.with_ymd_and_hms(2013, 1, 17, 12, 0, 0).unwrap()))
        );
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("-87600h").unwrap(), TimeDelta::hours(-87600));
        assert_eq!(parse_duration("500ms").unwrap(), TimeDelta::milliseconds(500));
        assert_eq!(parse_duration("1.5h").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration("0").unwrap(), TimeDelta::zero());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn braces_substitute_keys_and_values() {
        let vars = vars(&[("cond", "condition"), ("dt", "date")]);
        let bag = DataBag::new();
        let resolver = Resolver::new(&vars, &bag);
        let out = resolver
            .render(&doc(r#"{"$project": {"{cond}.{dt}": 1, "label": "{cond}-{missing}-{"}}"#))
            .unwrap();
        let project = out.get("$project").and_then(Value::as_document).unwrap();
        assert_eq!(project.get("condition.date"), Some(&Value::Int(1)));
        assert_eq!(project.get("label"), Some(&Value::from("condition-{missing}-{")));
    }

    #[test]
    fn data_directives_read_the_bag() {
        let vars = Vars::new();
        let mut bag = DataBag::new();
        bag.put(
            "stations",
            vec![
                doc(r#"{"station_id": "42021"}"#),
                doc(r#"{"station_id": "46026"}"#),
                doc(r#"{"other": 1}"#),
            ],
        );
        let resolver = Resolver::new(&vars, &bag);

        let out = resolver
            .render(&doc(r##"{"$match": {"station_id": {"$in": "#data.*:stations.station_id"}}}"##))
            .unwrap();
        assert_eq!(
            out.get_path("$match.station_id.$in"),
            Some(&Value::Array(vec!["42021".into(), "46026".into()]))
        );

        let out = resolver.render(&doc(r##"{"all": "#data.*:stations.missing"}"##)).unwrap();
        assert_eq!(out.get("all"), Some(&Value::Array(Vec::new())));

        let out = resolver.render(&doc(r##"{"id": "#data.1:stations.station_id"}"##)).unwrap();
        assert_eq!(out.get("id"), Some(&Value::from("46026")));

        let out = resolver.render(&doc(r##"{"first": "#data.0:stations"}"##)).unwrap();
        assert_eq!(out.get_path("first.station_id"), Some(&Value::from("42021")));

        let err = resolver.render(&doc(r##"{"id": "#data.3:stations.station_id"}"##)).unwrap_err();
        assert!(matches!(err, ExecError::IndexOutOfRange { index: 3, len: 3, .. }));

        let err = resolver.render(&doc(r##"{"id": "#data.2:stations.station_id"}"##)).unwrap_err();
        assert!(matches!(err, ExecError::KeyNotFound(_)));

        let err = resolver.render(&doc(r##"{"id": "#data.0:nothing.station_id"}"##)).unwrap_err();
        assert!(matches!(err, ExecError::KeyNotFound(k) if k == "nothing"));
    }

    #[test]
    fn in_operator_needs_an_array() {
        let vars = vars(&[("ids", "42021")]);
        let mut bag = DataBag::new();
        bag.put("stations", vec![doc(r#"{"station_id": "42021"}"#)]);
        let resolver = Resolver::new(&vars, &bag);

        let err = resolver
            .render(&doc(r##"{"station_id": {"$in": "#string:ids"}}"##))
            .unwrap_err();
        assert!(matches!(err, ExecError::MalformedInOperator { ref operator, found: "string" } if operator == "$in"));

        let err = resolver
            .render(&doc(r##"{"station_id": {"$nin": "#data.0:stations.station_id"}}"##))
            .unwrap_err();
        assert!(matches!(err, ExecError::MalformedInOperator { .. }));

        let out = resolver
            .render(&doc(r##"{"station_id": {"$in": ["#string:ids", "x"]}}"##))
            .unwrap();
        assert_eq!(
            out.get_path("station_id.$in"),
            Some(&Value::Array(vec!["42021".into(), "x".into()]))
        );
    }

    #[test]
    fn non_string_leaves_are_untouched() {
        let vars = Vars::new();
        let bag = DataBag::new();
        let stage = doc(r##"{"$limit": 5, "$x": [true, null, 1.5, {"y": "#notadirective"}]}"##);
        assert_eq!(Resolver::new(&vars, &bag).render(&stage).unwrap(), stage);
    }
}
