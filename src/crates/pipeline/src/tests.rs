use std::sync::Arc;

use anyhow::Result;
use xenia_definitions::{CacheConfig, Mask, MaskType, Registry, Script, Set};
use xenia_document::{Value, documents_from_json_str};
use xenia_store::{DocumentStore, MemoryStore};

use crate::{SetExecutor, SetResult, Vars};

const COLLECTION: &str = "test_xenia_data";

const STATIONS: &str = r#"[
    {
        "station_id": "42021",
        "name": "C14 - Pasco County Buoy, FL",
        "location": {"type": "Point", "coordinates": [-83.446, 28.311]},
        "condition": {
            "type": "wind",
            "wind_string": "Northeast at 14.0 MPH (12 KT)",
            "wind_speed": 12,
            "date": {"$date": "2013-01-16T00:00:00.000Z"}
        },
        "observation_time": "Last Updated on Oct 30 2012, 11:00 am CDT"
    },
    {
        "station_id": "42036",
        "name": "West Tampa",
        "location": {"type": "Point", "coordinates": [-84.517, 28.5]},
        "condition": {
            "type": "wind",
            "wind_string": "East at 9.2 MPH (8 KT)",
            "wind_speed": 8,
            "date": {"$date": "2013-01-17T00:00:00.000Z"}
        },
        "observation_time": "Last Updated on Oct 30 2012, 10:50 am CDT"
    },
    {
        "station_id": "46026",
        "name": "San Francisco",
        "location": {"type": "Point", "coordinates": [-122.839, 37.759]},
        "condition": {
            "type": "wind",
            "wind_string": "West at 20.7 MPH (18 KT)",
            "wind_speed": 18,
            "date": {"$date": "2013-01-18T00:00:00.000Z"}
        },
        "observation_time": "Last Updated on Oct 30 2012, 9:50 am PDT"
    }
]"#;

struct Fixture {
    store: Arc<MemoryStore>,
    registry: Arc<Registry>,
    executor: SetExecutor,
}

fn fixture() -> Result<Fixture> {
    let store = Arc::new(MemoryStore::new());
    store.insert(COLLECTION, documents_from_json_str(STATIONS)?)?;
    store.insert(crate::DEFAULT_SCRIPT_COLLECTION, documents_from_json_str(STATIONS)?)?;
    let registry = Arc::new(Registry::in_memory(CacheConfig::default()));
    let executor = SetExecutor::new(store.clone(), registry.clone());
    Ok(Fixture {
        store,
        registry,
        executor,
    })
}

fn set(json: &str) -> Result<Set> {
    Ok(Set::from_json_str(json)?)
}

fn vars(pairs: &[(&str, &str)]) -> Vars {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn json(result: &SetResult) -> String {
    result.to_json().to_string()
}

const BASIC_RESULT: &str = r#"{"results":[{"Name":"Basic","Docs":[{"name":"C14 - Pasco County Buoy, FL"}]}]}"#;

#[test]
fn basic_query_returns_projected_station() -> Result<()> {
    let fx = fixture()?;
    let set = set(r#"{
        "name": "QTEST_basic", "enabled": true,
        "queries": [{
            "name": "Basic", "type": "pipeline", "collection": "test_xenia_data", "return": true,
            "commands": [
                {"$match": {"station_id": "42021"}},
                {"$project": {"_id": 0, "name": 1}}
            ]
        }]
    }"#)?;
    assert_eq!(json(&fx.executor.exec(&set, Vars::new())), BASIC_RESULT);
    Ok(())
}

#[test]
fn missing_parameter_fails_before_any_query() -> Result<()> {
    let fx = fixture()?;
    let set = set(r##"{
        "name": "QTEST_missing", "enabled": true,
        "params": [{"name": "station_id"}],
        "queries": [{
            "name": "Basic", "collection": "test_xenia_data", "return": true,
            "commands": [{"$match": {"station_id": "#string:station_id"}}]
        }]
    }"##)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r#"{"results":{"error":"Missing[station_id]"}}"#
    );
    Ok(())
}

#[test]
fn saved_data_feeds_a_later_query() -> Result<()> {
    let fx = fixture()?;
    let set = set(r##"{
        "name": "QTEST_save", "enabled": true,
        "queries": [
            {
                "name": "Station", "collection": "test_xenia_data", "return": false,
                "commands": [
                    {"$project": {"_id": 0, "station_id": 1}},
                    {"$limit": 1},
                    {"$save": {"$map": "station"}}
                ]
            },
            {
                "name": "Basic", "collection": "test_xenia_data", "return": true,
                "commands": [
                    {"$match": {"station_id": "#data.0:station.station_id"}},
                    {"$project": {"_id": 0, "name": 1}}
                ]
            }
        ]
    }"##)?;
    assert_eq!(json(&fx.executor.exec(&set, Vars::new())), BASIC_RESULT);
    Ok(())
}

#[test]
fn right_mask_hides_observation_time_suffix() -> Result<()> {
    let fx = fixture()?;
    fx.registry.upsert_mask(Mask {
        collection: COLLECTION.into(),
        field: "observation_time".into(),
        mask_type: "right".parse().map_err(anyhow::Error::msg)?,
    })?;
    let set = set(r#"{
        "name": "QTEST_mask", "enabled": true,
        "queries": [{
            "name": "Masked", "collection": "test_xenia_data", "return": true,
            "commands": [
                {"$match": {"station_id": "42021"}},
                {"$project": {"_id": 0, "observation_time": 1}}
            ]
        }]
    }"#)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r#"{"results":[{"Name":"Masked","Docs":[{"observation_time":"Last Updated on Oct 30 2012, 11:00 am****"}]}]}"#
    );
    Ok(())
}

#[test]
fn wildcard_masks_apply_to_every_collection() -> Result<()> {
    let fx = fixture()?;
    fx.registry.upsert_mask(Mask {
        collection: "*".into(),
        field: "name".into(),
        mask_type: MaskType::Left(3),
    })?;
    let set = set(r#"{
        "name": "QTEST_wildcard", "enabled": true,
        "queries": [{
            "name": "Masked", "collection": "test_xenia_data", "return": true,
            "commands": [{"$match": {"station_id": "46026"}}, {"$project": {"_id": 0, "name": 1}}]
        }]
    }"#)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r#"{"results":[{"Name":"Masked","Docs":[{"name":"*** Francisco"}]}]}"#
    );
    Ok(())
}

#[test]
fn rendering_is_deterministic() -> Result<()> {
    let fx = fixture()?;
    let set = set(r##"{
        "name": "QTEST_determinism", "enabled": true,
        "params": [{"name": "cond", "default": "condition"}],
        "queries": [{
            "name": "Wind", "collection": "test_xenia_data", "return": true,
            "commands": [
                {"$match": {"{cond}.wind_speed": {"$gte": "#number:8"}}},
                {"$sort": {"station_id": 1}},
                {"$project": {"_id": 0, "station_id": 1, "speed": "${cond}.wind_speed"}}
            ]
        }]
    }"##)?;
    let first = fx.executor.exec(&set, Vars::new());
    let second = fx.executor.exec(&set, Vars::new());
    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(
        json(&first),
        r#"{"results":[{"Name":"Wind","Docs":[{"station_id":"42021","speed":12},{"station_id":"42036","speed":8},{"station_id":"46026","speed":18}]}]}"#
    );
    Ok(())
}

#[test]
fn param_defaults_and_regex_validation() -> Result<()> {
    let fx = fixture()?;
    fx.registry.upsert_regex(xenia_definitions::Regex {
        name: "station".into(),
        desc: "five digit station id".into(),
        expr: r"^\d{5}$".into(),
    })?;
    let set = set(r##"{
        "name": "QTEST_default", "enabled": true,
        "params": [{"name": "station_id", "default": "42021", "regex_name": "station"}],
        "queries": [{
            "name": "Basic", "collection": "test_xenia_data", "return": true,
            "commands": [
                {"$match": {"station_id": "#string:station_id"}},
                {"$project": {"_id": 0, "name": 1}}
            ]
        }]
    }"##)?;
    assert_eq!(json(&fx.executor.exec(&set, Vars::new())), BASIC_RESULT);

    let result = fx.executor.exec(&set, vars(&[("station_id", "4x")]));
    assert_eq!(
        json(&result),
        r#"{"results":{"error":"Invalid[4x:station_id:Regex station did not match]"}}"#
    );
    Ok(())
}

#[test]
fn continue_discards_earlier_results() -> Result<()> {
    let fx = fixture()?;
    let set = set(r##"{
        "name": "QTEST_continue", "enabled": true,
        "queries": [
            {
                "name": "First", "collection": "test_xenia_data", "return": true,
                "commands": [{"$count": "n"}]
            },
            {
                "name": "Broken", "collection": "test_xenia_data", "return": true, "continue": true,
                "commands": [{"$match": {"station_id": "#string:unknown"}}]
            },
            {
                "name": "Last", "collection": "test_xenia_data", "return": true,
                "commands": [{"$match": {"station_id": "46026"}}, {"$project": {"_id": 0, "station_id": 1}}]
            }
        ]
    }"##)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r#"{"results":[{"Name":"Last","Docs":[{"station_id":"46026"}]}]}"#
    );
    Ok(())
}

#[test]
fn store_failure_reports_rendered_commands() -> Result<()> {
    let fx = fixture()?;
    let set = set(r##"{
        "name": "QTEST_failure", "enabled": true,
        "params": [{"name": "station_id", "default": "42021"}],
        "queries": [{
            "name": "Broken", "collection": "test_xenia_data", "return": true,
            "commands": [{"$match": {"station_id": "#string:station_id"}}, {"$lookup": {"from": "x"}}]
        }]
    }"##)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r#"{"results":{"commands":[{"$match":{"station_id":"42021"}},{"$lookup":{"from":"x"}}],"error":"Unrecognized pipeline stage name: '$lookup'"}}"#
    );
    Ok(())
}

#[test]
fn render_failure_reports_original_commands() -> Result<()> {
    let fx = fixture()?;
    let set = set(r##"{
        "name": "QTEST_render", "enabled": true,
        "queries": [{
            "name": "Broken", "collection": "test_xenia_data", "return": true,
            "commands": [{"$match": {"station_id": "#data.0:nothing.station_id"}}]
        }]
    }"##)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r##"{"results":{"commands":[{"$match":{"station_id":"#data.0:nothing.station_id"}}],"error":"Key nothing not found"}}"##
    );
    Ok(())
}

#[test]
fn explain_returns_query_plans() -> Result<()> {
    let fx = fixture()?;
    let set = set(r#"{
        "name": "QTEST_explain", "enabled": true, "explain": true,
        "queries": [{
            "name": "Plan", "collection": "test_xenia_data", "return": true,
            "commands": [{"$match": {"station_id": "42021"}}],
            "indexes": [{"key": ["station_id"], "unique": true}]
        }]
    }"#)?;
    let result = fx.executor.exec(&set, Vars::new());
    let SetResult::Success(results) = result else {
        panic!("explain failed: {result:?}");
    };
    assert_eq!(results.len(), 1);
    let plan = &results[0].docs[0];
    assert_eq!(
        plan.get_path("queryPlanner.namespace"),
        Some(&Value::from(COLLECTION))
    );
    assert!(plan.get_path("queryPlanner.winningPlan.stage").is_some());
    Ok(())
}

#[test]
fn disabled_and_empty_sets_fail() -> Result<()> {
    let fx = fixture()?;
    let disabled = set(r#"{
        "name": "QTEST_off",
        "queries": [{"name": "q", "collection": "test_xenia_data", "commands": [{"$limit": 1}]}]
    }"#)?;
    assert_eq!(
        json(&fx.executor.exec(&disabled, Vars::new())),
        r#"{"results":{"error":"Set QTEST_off is disabled"}}"#
    );

    let empty = set(r#"{"name": "QTEST_empty", "enabled": true}"#)?;
    assert_eq!(fx.executor.exec(&empty, Vars::new()).error(), Some("Set QTEST_empty has no queries"));
    Ok(())
}

#[test]
fn unsupported_query_type_fails_the_query() -> Result<()> {
    let fx = fixture()?;
    let set = set(r#"{
        "name": "QTEST_type", "enabled": true,
        "queries": [{
            "name": "Template", "type": "template", "collection": "test_xenia_data", "return": true,
            "commands": [{"$limit": 1}]
        }]
    }"#)?;
    assert_eq!(
        fx.executor.exec(&set, Vars::new()).error(),
        Some("Query Template has unsupported type template")
    );
    Ok(())
}

#[test]
fn pre_script_saves_for_queries_and_post_script_failures_are_fatal() -> Result<()> {
    let fx = fixture()?;
    fx.registry.upsert_script(Script {
        name: "QTEST_pre".into(),
        desc: String::new(),
        commands: documents_from_json_str(
            r#"[{"$match": {"station_id": "42036"}}, {"$project": {"_id": 0, "station_id": 1}}, {"$save": {"$map": "pre"}}]"#,
        )?,
    })?;
    let json_set = |post: &str| {
        format!(
            r##"{{
                "name": "QTEST_scripts", "enabled": true,
                "pre_script": "QTEST_pre", "pst_script": "{post}",
                "queries": [{{
                    "name": "FromScript", "collection": "test_xenia_data", "return": true,
                    "commands": [
                        {{"$match": {{"station_id": "#data.0:pre.station_id"}}}},
                        {{"$project": {{"_id": 0, "name": 1}}}}
                    ]
                }}]
            }}"##
        )
    };

    let ok = set(&json_set(""))?;
    assert_eq!(
        json(&fx.executor.exec(&ok, Vars::new())),
        r#"{"results":[{"Name":"FromScript","Docs":[{"name":"West Tampa"}]}]}"#
    );

    let broken = set(&json_set("QTEST_missing_post"))?;
    assert_eq!(
        json(&fx.executor.exec(&broken, Vars::new())),
        r#"{"results":{"error":"script QTEST_missing_post not found"}}"#
    );
    Ok(())
}

#[test]
fn wildcard_data_builds_in_lists() -> Result<()> {
    let fx = fixture()?;
    let set = set(r##"{
        "name": "QTEST_in", "enabled": true,
        "queries": [
            {
                "name": "Ids", "collection": "test_xenia_data",
                "commands": [{"$sort": {"station_id": -1}}, {"$limit": 2}, {"$save": {"$map": "ids"}}]
            },
            {
                "name": "Count", "collection": "test_xenia_data", "return": true,
                "commands": [
                    {"$match": {"station_id": {"$in": "#data.*:ids.station_id"}}},
                    {"$count": "n"}
                ]
            }
        ]
    }"##)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r#"{"results":[{"Name":"Count","Docs":[{"n":2}]}]}"#
    );
    Ok(())
}

#[test]
fn typed_directives_reach_the_store() -> Result<()> {
    let fx = fixture()?;
    fx.store.insert(
        "oids",
        documents_from_json_str(r#"[{"_id": {"$oid": "5660bc6e16908cae692e0593"}, "n": 1}, {"n": 2}]"#)?,
    )?;
    let set = set(r##"{
        "name": "QTEST_typed", "enabled": true,
        "queries": [
            {
                "name": "ById", "collection": "oids", "return": true,
                "commands": [{"$match": {"_id": "#objid:5660bc6e16908cae692e0593"}}]
            },
            {
                "name": "ByRegex", "collection": "test_xenia_data", "return": true,
                "commands": [{"$match": {"name": "#regex:/^c14/i"}}, {"$project": {"_id": 0, "station_id": 1}}]
            },
            {
                "name": "ByDate", "collection": "test_xenia_data", "return": true,
                "commands": [
                    {"$match": {"condition.date": {"$gt": "#date:since"}}},
                    {"$count": "n"}
                ]
            }
        ]
    }"##)?;
    let result = fx
        .executor
        .exec(&set, vars(&[("since", "2013-01-16T12:00:00Z")]));
    let SetResult::Success(results) = result else {
        panic!("typed directives failed: {result:?}");
    };

    let by_id = &results[0].docs;
    assert_eq!(by_id.len(), 1);
    assert!(matches!(
        by_id[0].get("_id"),
        Some(Value::ObjectId(id)) if id.to_hex() == "5660bc6e16908cae692e0593"
    ));
    assert_eq!(results[1].docs[0].get("station_id"), Some(&Value::from("42021")));
    assert_eq!(results[2].docs[0].get("n"), Some(&Value::Int(2)));
    Ok(())
}

#[test]
fn executions_do_not_share_data_bags() -> Result<()> {
    let fx = fixture()?;
    let saver = set(r#"{
        "name": "QTEST_saver", "enabled": true,
        "queries": [{
            "name": "Save", "collection": "test_xenia_data",
            "commands": [{"$limit": 1}, {"$save": {"$map": "shared"}}]
        }]
    }"#)?;
    let reader = set(r##"{
        "name": "QTEST_reader", "enabled": true,
        "queries": [{
            "name": "Read", "collection": "test_xenia_data", "return": true,
            "commands": [{"$match": {"station_id": "#data.0:shared.station_id"}}]
        }]
    }"##)?;
    assert!(fx.executor.exec(&saver, Vars::new()).is_success());
    assert_eq!(
        fx.executor.exec(&reader, Vars::new()).error(),
        Some("Key shared not found")
    );
    Ok(())
}

#[test]
fn sets_load_through_the_registry() -> Result<()> {
    let fx = fixture()?;
    assert_eq!(
        json(&fx.executor.exec_name("QTEST_nope", Vars::new())),
        r#"{"results":{"error":"set QTEST_nope not found"}}"#
    );

    fx.registry.upsert_set(set(r#"{
        "name": "QTEST_stored", "enabled": true,
        "queries": [{
            "name": "Basic", "collection": "test_xenia_data", "return": true,
            "commands": [{"$match": {"station_id": "42021"}}, {"$project": {"_id": 0, "name": 1}}]
        }]
    }"#)?)?;
    assert_eq!(json(&fx.executor.exec_name("QTEST_stored", Vars::new())), BASIC_RESULT);
    Ok(())
}

#[test]
fn saved_documents_without_the_field_do_not_widen_in_lists() -> Result<()> {
    let fx = fixture()?;
    fx.store.insert(
        "sparse",
        documents_from_json_str(r#"[{"station_id": "42021"}, {"other": 1}, {"other": 2}]"#)?,
    )?;
    let set = set(r##"{
        "name": "QTEST_sparse", "enabled": true,
        "queries": [
            {
                "name": "Mixed", "collection": "sparse",
                "commands": [{"$project": {"_id": 0}}, {"$save": {"$map": "ids"}}]
            },
            {
                "name": "Count", "collection": "sparse", "return": true,
                "commands": [
                    {"$match": {"station_id": {"$in": "#data.*:ids.station_id"}}},
                    {"$count": "n"}
                ]
            }
        ]
    }"##)?;
    assert_eq!(
        json(&fx.executor.exec(&set, Vars::new())),
        r#"{"results":[{"Name":"Count","Docs":[{"n":1}]}]}"#
    );
    Ok(())
}

#[test]
fn concurrent_executions_share_the_registry_but_not_the_bag() -> Result<()> {
    let fx = fixture()?;
    fx.registry.upsert_set(set(r##"{
        "name": "QTEST_concurrent", "enabled": true,
        "params": [{"name": "station_id"}],
        "queries": [
            {
                "name": "Save", "collection": "test_xenia_data",
                "commands": [
                    {"$match": {"station_id": "#string:station_id"}},
                    {"$project": {"_id": 0, "station_id": 1}},
                    {"$save": {"$map": "me"}}
                ]
            },
            {
                "name": "Read", "collection": "test_xenia_data", "return": true,
                "commands": [
                    {"$match": {"station_id": "#data.0:me.station_id"}},
                    {"$project": {"_id": 0, "station_id": 1}}
                ]
            }
        ]
    }"##)?)?;

    let stations = ["42021", "42036", "46026"];
    std::thread::scope(|scope| {
        for n in 0..9 {
            let station = stations[n % stations.len()];
            let executor = &fx.executor;
            scope.spawn(move || {
                let expected = format!(
                    r#"{{"results":[{{"Name":"Read","Docs":[{{"station_id":"{station}"}}]}}]}}"#
                );
                for _ in 0..20 {
                    let result = executor.exec_name("QTEST_concurrent", vars(&[("station_id", station)]));
                    assert_eq!(json(&result), expected);
                }
            });
        }
    });
    Ok(())
}
