//! Model parser

use quarry_core::spec::{ModelChangeMode, ModelTest, RetryPolicy};
use quarry_core::yaml;
use quarry_core::{Properties, ResourceKind};
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::{
    DataYaml, ParseContext, Resolver, ScheduleYaml, check_embedded, commit_embedded, decode,
    duration_secs,
};
use crate::error::{Error, Result};
use crate::node::Node;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_SECONDS: u32 = 5;
const DEFAULT_GLOB_WATERMARK: &str = "updated_on";

// ============================================================================
// Raw YAML structures (for serde deserialization)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelYaml {
    #[serde(default)]
    materialize: Option<bool>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    refresh: Option<ScheduleYaml>,
    #[serde(default)]
    incremental: Option<bool>,
    #[serde(default)]
    state: Option<DataYaml>,
    #[serde(default)]
    partitions: Option<DataYaml>,
    #[serde(default)]
    splits: Option<DataYaml>,
    #[serde(default)]
    partitions_watermark: Option<String>,
    #[serde(default)]
    splits_watermark: Option<String>,
    #[serde(default)]
    partitions_concurrency: Option<u32>,
    #[serde(default)]
    splits_concurrency: Option<u32>,
    #[serde(default)]
    input_properties: Option<Mapping>,
    #[serde(default)]
    stage: Option<Mapping>,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    change_mode: Option<String>,
    #[serde(default)]
    retry: Option<RetryYaml>,
    #[serde(default)]
    tests: Vec<TestYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryYaml {
    #[serde(default)]
    attempts: Option<u32>,
    #[serde(default)]
    delay: Option<Value>,
    #[serde(default)]
    exponential_backoff: bool,
    #[serde(default)]
    if_error_matches: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestYaml {
    #[serde(default)]
    name: String,
    #[serde(rename = "assert", default)]
    assertion: Option<String>,
    #[serde(default)]
    sql: Option<String>,
}

/// Connector plus properties (`stage:` and the map form of `output:`)
#[derive(Debug, Default)]
struct ConnectorProps {
    connector: Option<String>,
    properties: Properties,
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    let yaml: ModelYaml = decode(&node.yaml)?;

    let timeout = yaml.timeout.as_ref().map(duration_secs).transpose()?;
    let refresh = yaml
        .refresh
        .as_ref()
        .map(|r| r.parse(ctx, true))
        .transpose()?;

    if yaml.partitions.is_some() && yaml.splits.is_some() {
        return Err(Error::invalid("cannot set both partitions and splits"));
    }
    let partitions_yaml = yaml.partitions.as_ref().or(yaml.splits.as_ref());
    let partitions = partitions_yaml.map(DataYaml::resolve).transpose()?;
    let state = yaml.state.as_ref().map(DataYaml::resolve).transpose()?;
    let watermark = yaml
        .partitions_watermark
        .clone()
        .or_else(|| yaml.splits_watermark.clone())
        .or_else(|| match &partitions {
            Some(p) if p.name == "glob" => Some(DEFAULT_GLOB_WATERMARK.to_string()),
            _ => None,
        });
    let concurrency = yaml.partitions_concurrency.or(yaml.splits_concurrency);

    let mut input_properties = match &yaml.input_properties {
        Some(map) => yaml::to_properties(Value::Mapping(map.clone()))?,
        None => Properties::new(),
    };
    if !node.sql.is_empty() {
        input_properties.insert("sql".into(), node.sql.clone().into());
    }
    if !node.settings_only && !input_properties.contains_key("sql") && yaml.input_properties.is_none() {
        return Err(Error::invalid("model has no SQL or input properties"));
    }

    let stage = yaml
        .stage
        .map(|map| connector_props(Value::Mapping(map), "stage"))
        .transpose()?;
    if stage.as_ref().is_some_and(|s| s.connector.is_none()) {
        return Err(Error::invalid("stage.connector is required"));
    }

    let mut materialize = yaml.materialize;
    let output = yaml.output.map(|v| connector_props(v, "output")).transpose()?;
    if let Some(serde_json::Value::Bool(b)) = output.as_ref().and_then(|o| o.properties.get("materialize")) {
        materialize = Some(*b);
    }

    let change_mode = yaml.change_mode.as_deref().map(parse_change_mode).transpose()?;
    let retry = yaml.retry.as_ref().map(parse_retry).transpose()?;
    let tests = parse_tests(&node.name, &yaml.tests)?;

    check_embedded(ctx, node)?;

    let resource = ctx.registry.upsert(ResourceKind::Model, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    for resolver in state.iter().chain(partitions.iter()) {
        resource.add_refs(resolver.refs.iter().cloned());
    }

    if let Some(model) = resource.spec.as_model_mut() {
        if let Some(refresh) = refresh {
            model.refresh_schedule = Some(refresh);
        }
        if let Some(timeout) = timeout {
            model.timeout_seconds = timeout;
        }
        if let Some(incremental) = yaml.incremental {
            model.incremental = incremental;
        }
        if let Some(Resolver { name, properties, .. }) = state {
            model.state_resolver = name;
            model.state_resolver_properties = properties;
        }
        if let Some(Resolver { name, properties, .. }) = partitions {
            model.partitions_resolver = name;
            model.partitions_resolver_properties = properties;
        }
        if let Some(watermark) = watermark {
            model.partitions_watermark_field = watermark;
        }
        if let Some(concurrency) = concurrency {
            model.partitions_concurrency_limit = concurrency;
        }
        if !node.connector_inferred {
            model.input_connector = node.connector.clone();
        }
        model.input_properties.extend(input_properties);
        if let Some(stage) = stage {
            model.stage_connector = stage.connector.unwrap_or_default();
            model.stage_properties = stage.properties;
        }
        if let Some(mut output) = output {
            output.properties.remove("materialize");
            if let Some(connector) = output.connector {
                model.output_connector = connector;
            }
            model.output_properties.extend(output.properties);
        }
        if materialize.is_some() {
            model.materialize = materialize;
        }
        if let Some(change_mode) = change_mode {
            model.change_mode = change_mode;
        }
        if retry.is_some() {
            model.retry = retry;
        }
        if !tests.is_empty() {
            model.tests = tests;
        }
    }

    commit_embedded(ctx, node, timeout.unwrap_or(0));
    Ok(())
}

/// A connector name, or a map with `connector` and properties
fn connector_props(value: Value, key: &str) -> Result<ConnectorProps> {
    match value {
        Value::String(connector) => Ok(ConnectorProps {
            connector: Some(connector),
            properties: Properties::new(),
        }),
        Value::Mapping(mut map) => {
            let connector = match map.remove("connector") {
                Some(Value::String(c)) => Some(c),
                Some(_) => return Err(Error::invalid(format!("{key}.connector must be a string"))),
                None => None,
            };
            Ok(ConnectorProps {
                connector,
                properties: yaml::to_properties(Value::Mapping(map))?,
            })
        }
        _ => Err(Error::invalid(format!(
            "{key} must be a connector name or a mapping"
        ))),
    }
}

fn parse_change_mode(mode: &str) -> Result<ModelChangeMode> {
    match mode.to_lowercase().as_str() {
        "reset" => Ok(ModelChangeMode::Reset),
        "manual" => Ok(ModelChangeMode::Manual),
        "patch" => Ok(ModelChangeMode::Patch),
        _ => Err(Error::invalid(format!(
            "invalid change_mode {mode:?}, expected 'reset', 'manual' or 'patch'"
        ))),
    }
}

fn parse_retry(yaml: &RetryYaml) -> Result<RetryPolicy> {
    for pattern in &yaml.if_error_matches {
        Regex::new(pattern)
            .map_err(|e| Error::invalid(format!("invalid retry.if_error_matches {pattern:?}: {e}")))?;
    }
    let delay_seconds = match &yaml.delay {
        Some(delay) => duration_secs(delay)?,
        None => DEFAULT_RETRY_DELAY_SECONDS,
    };
    Ok(RetryPolicy {
        attempts: yaml.attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
        delay_seconds,
        exponential_backoff: yaml.exponential_backoff,
        if_error_matches: yaml.if_error_matches.clone(),
    })
}

fn parse_tests(model: &str, tests: &[TestYaml]) -> Result<Vec<ModelTest>> {
    let mut out: Vec<ModelTest> = Vec::with_capacity(tests.len());
    for (i, test) in tests.iter().enumerate() {
        if test.name.is_empty() {
            return Err(Error::invalid(format!("test at index {i} is missing a name")));
        }
        if out.iter().any(|t| t.name.eq_ignore_ascii_case(&test.name)) {
            return Err(Error::invalid(format!("duplicate test name {:?}", test.name)));
        }
        let sql = match (&test.assertion, &test.sql) {
            (Some(assertion), None) => format!("SELECT * FROM {model} WHERE NOT ({assertion})"),
            (None, Some(sql)) => sql.clone(),
            _ => {
                return Err(Error::invalid(format!(
                    "test {:?} must set exactly one of assert or sql",
                    test.name
                )));
            }
        };
        out.push(ModelTest {
            name: test.name.clone(),
            resolver: "sql".into(),
            sql,
        });
    }
    Ok(out)
}
