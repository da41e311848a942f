use std::collections::BTreeMap;

use xenia_definitions::{Param, Registry};

use crate::ExecError;

/// Caller-supplied variables, keyed by name.
pub type Vars = BTreeMap<String, String>;

/// Reconcile caller variables with a set's declared params.
///
/// Missing params take their default. Params bound to a named regex must
/// match it. All failures are collected and reported together, and no
/// partially reconciled map is ever returned. Undeclared variables pass
/// through.
pub fn reconcile(params: &[Param], mut vars: Vars, registry: &Registry) -> Result<Vars, ExecError> {
    let mut failures = Vec::new();

    for param in params {
        if !vars.contains_key(&param.name) {
            if param.default.is_empty() {
                failures.push(format!("Missing[{}]", param.name));
                continue;
            }
            vars.insert(param.name.clone(), param.default.clone());
        }

        if param.regex_name.is_empty() {
            continue;
        }
        let Some(value) = vars.get(&param.name) else {
            continue;
        };
        match registry.regex(&param.regex_name) {
            Ok(regex) if regex.is_match(value) => {}
            Ok(regex) => failures.push(format!(
                "Invalid[{value}:{}:Regex {} did not match]",
                param.name, regex.name
            )),
            Err(err) if err.is_not_found() => {
                failures.push(format!("Invalid[{value}:{}:Regex Not found]", param.name))
            }
            Err(err) => return Err(err.into()),
        }
    }

    if failures.is_empty() {
        Ok(vars)
    } else {
        Err(ExecError::InvalidParameters(failures.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xenia_definitions::{CacheConfig, Regex};

    fn param(name: &str, default: &str, regex_name: &str) -> Param {
        Param {
            name: name.into(),
            desc: String::new(),
            default: default.into(),
            regex_name: regex_name.into(),
        }
    }

    fn registry() -> Registry {
        let registry = Registry::in_memory(CacheConfig::default());
        registry
            .upsert_regex(Regex {
                name: "station".into(),
                desc: String::new(),
                expr: r"^\d{5}$".into(),
            })
            .unwrap();
        registry
    }

    #[test]
    fn defaults_fill_missing_vars() {
        let vars = reconcile(&[param("station_id", "42021", "")], Vars::new(), &registry()).unwrap();
        assert_eq!(vars["station_id"], "42021");
    }

    #[test]
    fn caller_values_win_and_extras_pass_through() {
        let mut vars = Vars::new();
        vars.insert("station_id".into(), "46026".into());
        vars.insert("extra".into(), "kept".into());
        let vars = reconcile(&[param("station_id", "42021", "station")], vars, &registry()).unwrap();
        assert_eq!(vars["station_id"], "46026");
        assert_eq!(vars["extra"], "kept");
    }

    #[test]
    fn failures_are_aggregated_in_declaration_order() {
        let mut vars = Vars::new();
        vars.insert("station_id".into(), "abc".into());
        vars.insert("other".into(), "x".into());
        let params = [
            param("station_id", "", "station"),
            param("name", "", ""),
            param("other", "", "nope"),
        ];
        let err = reconcile(&params, vars, &registry()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid[abc:station_id:Regex station did not match],Missing[name],Invalid[x:other:Regex Not found]"
        );
    }

    #[test]
    fn defaults_are_validated_too() {
        let err = reconcile(&[param("station_id", "4202", "station")], Vars::new(), &registry()).unwrap_err();
        assert!(matches!(err, ExecError::InvalidParameters(_)));
    }
}
