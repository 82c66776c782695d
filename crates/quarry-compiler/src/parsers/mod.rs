//! Kind-specific parsers
//!
//! Each parser decodes the kind-specific keys of a [`Node`] into a strict
//! schema, validates them, and only then inserts or upserts the resource.
//! Nothing may fail once the registry has been mutated.

mod alert;
mod api;
mod canvas;
mod chart;
mod component;
mod connector;
mod dashboard;
mod explore;
mod metrics_view;
mod migration;
mod model;
mod report;
mod source;
mod theme;

pub(crate) use connector::parse_manifest_connector;

use quarry_core::manifest::Manifest;
use quarry_core::spec::{ComparisonMode, ComparisonTimeRange, ExploreTimeRange, Notifier, Schedule};
use quarry_core::template;
use quarry_core::timeutil;
use quarry_core::yaml;
use quarry_core::{Properties, ResourceKind, ResourceName, ResourceRef};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::node::Node;
use crate::parser::ParserOptions;
use crate::registry::Registry;

/// State handed to every kind parser
pub(crate) struct ParseContext<'a> {
    pub registry: &'a mut Registry,
    pub options: &'a ParserOptions,
    pub manifest: &'a Manifest,
}

impl ParseContext<'_> {
    pub fn is_dev(&self) -> bool {
        self.options.environment == "dev"
    }

    pub fn olap_connector(&self) -> &str {
        if self.manifest.olap_connector.is_empty() {
            &self.options.default_olap_connector
        } else {
            &self.manifest.olap_connector
        }
    }
}

/// Dispatch a node to the parser for its kind
pub(crate) fn parse_node(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    tracing::debug!(path = %node.path, kind = %node.kind, name = %node.name, "Parsing resource");
    match node.kind {
        ResourceKind::Source => source::parse(ctx, node),
        ResourceKind::Model => model::parse(ctx, node),
        ResourceKind::MetricsView => metrics_view::parse(ctx, node),
        ResourceKind::Explore => explore::parse(ctx, node),
        ResourceKind::Migration => migration::parse(ctx, node),
        ResourceKind::Report => report::parse(ctx, node),
        ResourceKind::Alert => alert::parse(ctx, node),
        ResourceKind::Theme => theme::parse(ctx, node),
        ResourceKind::Component => component::parse(ctx, node),
        ResourceKind::Canvas => canvas::parse(ctx, node),
        ResourceKind::Api => api::parse(ctx, node),
        ResourceKind::Connector => connector::parse(ctx, node),
        ResourceKind::Dashboard => dashboard::parse(ctx, node),
        ResourceKind::Chart => chart::parse(ctx, node),
    }
}

/// Fill defaults that depend on every layer of a resource
///
/// Runs over the resources committed in a pass, after all files have been
/// parsed, so the result does not depend on the order layers were applied.
pub(crate) fn finalize(registry: &mut Registry, names: &[ResourceName], olap_connector: &str) {
    for name in names {
        let Some(resource) = registry.get_mut(name) else {
            continue;
        };
        if let Some(model) = resource.spec.as_model_mut() {
            if model.refresh_schedule.is_none() {
                model.refresh_schedule = Some(ref_update_schedule());
            }
            if model.input_connector.is_empty() {
                model.input_connector = olap_connector.to_string();
            }
            if model.output_connector.is_empty() {
                model.output_connector = olap_connector.to_string();
            }
            if model.defined_as_source && model.materialize.is_none() {
                model.materialize = Some(true);
            }
        } else if let Some(source) = resource.spec.as_source_mut() {
            if source.sink_connector.is_empty() {
                source.sink_connector = olap_connector.to_string();
            }
            if source.refresh_schedule.is_none() {
                source.refresh_schedule = Some(ref_update_schedule());
            }
        } else if let Some(migration) = resource.spec.as_migration_mut() {
            if migration.connector.is_empty() {
                migration.connector = olap_connector.to_string();
            }
        } else if let Some(mv) = resource.spec.as_metrics_view_mut() {
            if mv.connector.is_empty() {
                mv.connector = olap_connector.to_string();
            }
        }
    }
}

fn ref_update_schedule() -> Schedule {
    Schedule {
        ref_update: true,
        ..Default::default()
    }
}

// ============================================================================
// Shared decoding helpers
// ============================================================================

/// Decode kind-specific keys into a strict schema
pub(crate) fn decode<T: DeserializeOwned>(map: &Mapping) -> Result<T> {
    Ok(serde_yaml::from_value(Value::Mapping(map.clone()))?)
}

/// Kinds whose query and connector are implied by their resolver
pub(crate) fn reject_sql_and_connector(node: &Node) -> Result<()> {
    if !node.sql.is_empty() || !node.connector_inferred {
        return Err(Error::invalid(format!(
            "{} resources cannot have a connector or SQL",
            node.kind.label()
        )));
    }
    Ok(())
}

/// Parse a duration into whole seconds
pub(crate) fn duration_secs(value: &Value) -> Result<u32> {
    let secs = timeutil::parse_duration(value)?.as_secs();
    u32::try_from(secs).map_err(|_| Error::invalid(format!("duration of {secs}s is too large")))
}

/// `refresh:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ScheduleYaml {
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub every: Option<Value>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub ref_update: Option<bool>,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub run_in_dev: bool,
}

impl ScheduleYaml {
    /// Validate and convert. With `clear_in_dev`, timed triggers are dropped
    /// in the dev environment unless `run_in_dev` is set.
    pub fn parse(&self, ctx: &ParseContext<'_>, clear_in_dev: bool) -> Result<Schedule> {
        let mut schedule = Schedule {
            disable: self.disable,
            ..Default::default()
        };
        if let Some(cron) = &self.cron {
            timeutil::validate_cron(cron)?;
            schedule.cron = cron.clone();
        }
        if let Some(every) = &self.every {
            schedule.ticker_seconds = duration_secs(every)?;
        }
        if let Some(tz) = &self.time_zone {
            timeutil::validate_time_zone(tz)?;
            schedule.time_zone = tz.clone();
        }
        if clear_in_dev && ctx.is_dev() && !self.run_in_dev {
            schedule.cron.clear();
            schedule.ticker_seconds = 0;
        }
        schedule.ref_update = self
            .ref_update
            .unwrap_or(schedule.cron.is_empty() && schedule.ticker_seconds == 0);
        Ok(schedule)
    }
}

/// Resolver name, its properties and the references it implies
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Resolver {
    pub name: String,
    pub properties: Properties,
    pub refs: Vec<ResourceRef>,
}

/// `data:` block naming a resolver
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DataYaml {
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub connector: Option<String>,
    #[serde(default)]
    pub metrics_sql: Option<String>,
    #[serde(default)]
    pub api: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub glob: Option<Value>,
    #[serde(default)]
    pub resource_status: Option<Value>,
}

impl DataYaml {
    /// Exactly one resolver must be declared
    pub fn resolve(&self) -> Result<Resolver> {
        let declared = [
            self.sql.is_some(),
            self.metrics_sql.is_some(),
            self.api.is_some(),
            self.glob.is_some(),
            self.resource_status.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if declared != 1 {
            return Err(Error::invalid(
                "data must declare exactly one of sql, metrics_sql, api, glob or resource_status",
            ));
        }
        if self.connector.is_some() && self.sql.is_none() && self.glob.is_none() {
            return Err(Error::invalid("data.connector can only be used with sql or glob"));
        }

        let mut out = Resolver::default();
        if let Some(sql) = &self.sql {
            out.name = "sql".into();
            out.properties.insert("sql".into(), sql.clone().into());
            out.refs = template_refs(sql)?;
        } else if let Some(sql) = &self.metrics_sql {
            out.name = "metrics_sql".into();
            out.properties.insert("sql".into(), sql.clone().into());
            out.refs = template_refs(sql)?;
        } else if let Some(api) = &self.api {
            out.name = "api".into();
            out.properties.insert("api".into(), api.clone().into());
            out.refs.push(ResourceRef::typed(ResourceKind::Api, api.clone()));
        } else if let Some(glob) = &self.glob {
            out.name = "glob".into();
            match glob {
                Value::String(path) => {
                    out.properties.insert("path".into(), path.clone().into());
                }
                other => out.properties = yaml::to_properties(other.clone())?,
            }
        } else if let Some(status) = &self.resource_status {
            out.name = "resource_status".into();
            out.properties = yaml::to_properties(status.clone())?;
        }

        if let Some(connector) = &self.connector {
            out.properties.insert("connector".into(), connector.clone().into());
        }
        if let Some(args) = &self.args {
            out.properties.insert("args".into(), yaml::to_json(args.clone())?);
        }
        Ok(out)
    }
}

/// References collected by analyzing a templated string
pub(crate) fn template_refs(text: &str) -> Result<Vec<ResourceRef>> {
    if !template::uses_templating(text) {
        return Ok(Vec::new());
    }
    Ok(template::analyze(text)?.refs)
}

/// `email:` recipients block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct EmailYaml {
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// `slack:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SlackYaml {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub webhooks: Vec<String>,
}

/// `notify:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NotifyYaml {
    #[serde(default)]
    pub email: Option<EmailYaml>,
    #[serde(default)]
    pub slack: Option<SlackYaml>,
}

/// Build notifiers from `notify:` and the legacy top-level recipients
pub(crate) fn notifiers(notify: Option<&NotifyYaml>, legacy_recipients: &[String]) -> Result<Vec<Notifier>> {
    let mut recipients = notify
        .and_then(|n| n.email.as_ref())
        .map(|e| e.recipients.clone())
        .unwrap_or_default();
    if !legacy_recipients.is_empty() {
        if !recipients.is_empty() {
            return Err(Error::invalid(
                "cannot set both legacy email.recipients and notify.email.recipients",
            ));
        }
        recipients = legacy_recipients.to_vec();
    }

    let mut out = Vec::new();
    if !recipients.is_empty() {
        let mut properties = Properties::new();
        properties.insert("recipients".into(), recipients.into());
        out.push(Notifier {
            connector: "email".into(),
            properties,
        });
    }
    if let Some(slack) = notify.and_then(|n| n.slack.as_ref()) {
        if !slack.users.is_empty() || !slack.channels.is_empty() || !slack.webhooks.is_empty() {
            let mut properties = Properties::new();
            properties.insert("users".into(), slack.users.clone().into());
            properties.insert("channels".into(), slack.channels.clone().into());
            properties.insert("webhooks".into(), slack.webhooks.clone().into());
            out.push(Notifier {
                connector: "slack".into(),
                properties,
            });
        }
    }
    Ok(out)
}

/// `intervals:` block of alerts and reports
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct IntervalsYaml {
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub check_unclosed: bool,
}

impl IntervalsYaml {
    pub fn validate(&self) -> Result<()> {
        if let Some(duration) = &self.duration {
            timeutil::validate_iso8601(duration)?;
        }
        Ok(())
    }
}

/// Whether `watermark:` asks to inherit the upstream watermark
pub(crate) fn parse_watermark(watermark: Option<&str>) -> Result<bool> {
    match watermark {
        None | Some("") | Some("trigger_time") => Ok(false),
        Some("inherit") => Ok(true),
        Some(other) => Err(Error::invalid(format!(
            "invalid watermark {other:?}, expected 'trigger_time' or 'inherit'"
        ))),
    }
}

/// A time range given as a string or as `{range, comparison_offsets}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum TimeRangeYaml {
    Range(String),
    WithComparisons {
        range: String,
        #[serde(default)]
        comparison_offsets: Vec<ComparisonOffsetYaml>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ComparisonOffsetYaml {
    Offset(String),
    WithRange {
        offset: String,
        #[serde(default)]
        range: Option<String>,
    },
}

/// Validate and convert the time ranges offered by an explore or canvas
pub(crate) fn time_ranges(ranges: &[TimeRangeYaml]) -> Result<Vec<ExploreTimeRange>> {
    ranges
        .iter()
        .map(|r| match r {
            TimeRangeYaml::Range(range) => {
                timeutil::validate_iso8601(range)?;
                Ok(ExploreTimeRange {
                    range: range.clone(),
                    comparison_time_ranges: Vec::new(),
                })
            }
            TimeRangeYaml::WithComparisons {
                range,
                comparison_offsets,
            } => {
                timeutil::validate_iso8601(range)?;
                let comparison_time_ranges = comparison_offsets
                    .iter()
                    .map(|o| {
                        let (offset, range) = match o {
                            ComparisonOffsetYaml::Offset(offset) => (offset.clone(), String::new()),
                            ComparisonOffsetYaml::WithRange { offset, range } => {
                                (offset.clone(), range.clone().unwrap_or_default())
                            }
                        };
                        timeutil::validate_iso8601(&offset)?;
                        if !range.is_empty() {
                            timeutil::validate_iso8601(&range)?;
                        }
                        Ok(ComparisonTimeRange { offset, range })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ExploreTimeRange {
                    range: range.clone(),
                    comparison_time_ranges,
                })
            }
        })
        .collect()
}

/// Validate a list of time zone names
pub(crate) fn time_zones(zones: &[String]) -> Result<Vec<String>> {
    for zone in zones {
        timeutil::validate_time_zone(zone)?;
    }
    Ok(zones.to_vec())
}

/// Parse a comparison mode together with its dimension
pub(crate) fn comparison(mode: Option<&str>, dimension: Option<&str>) -> Result<ComparisonMode> {
    let mode = match mode.unwrap_or("none") {
        "" | "none" => ComparisonMode::None,
        "time" => ComparisonMode::Time,
        "dimension" => ComparisonMode::Dimension,
        other => {
            return Err(Error::invalid(format!(
                "invalid comparison_mode {other:?}, expected 'none', 'time' or 'dimension'"
            )));
        }
    };
    if dimension.is_some_and(|d| !d.is_empty()) && mode != ComparisonMode::Dimension {
        return Err(Error::invalid(
            "comparison_dimension can only be set when comparison_mode is 'dimension'",
        ));
    }
    Ok(mode)
}

/// Smaller of two timeouts where 0 means unset
pub(crate) fn min_timeout(a: u32, b: u32) -> u32 {
    match (a, b) {
        (0, b) => b,
        (a, 0) => a,
        (a, b) => a.min(b),
    }
}

/// Check that every embedded source of a node can be committed
pub(crate) fn check_embedded(ctx: &ParseContext<'_>, node: &Node) -> Result<()> {
    for source in &node.embedded {
        ctx.registry
            .dry_run_upsert_shared(ResourceKind::Source, &source.name, &node.path)?;
    }
    Ok(())
}

/// Commit the embedded sources of a node after its resource was committed
pub(crate) fn commit_embedded(ctx: &mut ParseContext<'_>, node: &Node, timeout_seconds: u32) {
    for embedded in &node.embedded {
        let resource = match ctx
            .registry
            .upsert_shared(ResourceKind::Source, &embedded.name, &node.path)
        {
            Ok(resource) => resource,
            Err(e) => {
                tracing::warn!(path = %node.path, error = %e, "Failed to commit embedded source");
                continue;
            }
        };
        let Some(spec) = resource.spec.as_source_mut() else {
            continue;
        };
        if spec.source_connector.is_empty() {
            *spec = embedded.spec.clone();
            spec.timeout_seconds = timeout_seconds;
        } else {
            spec.timeout_seconds = min_timeout(spec.timeout_seconds, timeout_seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ctx_parts(environment: &str) -> (Registry, ParserOptions, Manifest) {
        let options = ParserOptions {
            environment: environment.into(),
            ..Default::default()
        };
        (Registry::default(), options, Manifest::default())
    }

    fn schedule(text: &str, environment: &str, clear_in_dev: bool) -> Result<Schedule> {
        let (mut registry, options, manifest) = ctx_parts(environment);
        let ctx = ParseContext {
            registry: &mut registry,
            options: &options,
            manifest: &manifest,
        };
        let yaml: ScheduleYaml = serde_yaml::from_str(text)?;
        yaml.parse(&ctx, clear_in_dev)
    }

    #[test]
    fn test_schedule() {
        let s = schedule("cron: '0 * * * *'\ntime_zone: America/New_York", "", true).unwrap();
        assert_eq!(s.cron, "0 * * * *");
        assert!(!s.ref_update);

        let s = schedule("every: 1h", "", true).unwrap();
        assert_eq!(s.ticker_seconds, 3600);

        let s = schedule("ref_update: false", "", true).unwrap();
        assert!(!s.ref_update);
    }

    #[test]
    fn test_schedule_cleared_in_dev() {
        let s = schedule("cron: '0 * * * *'", "dev", true).unwrap();
        assert!(s.cron.is_empty());
        assert!(s.ref_update);

        let s = schedule("cron: '0 * * * *'\nrun_in_dev: true", "dev", true).unwrap();
        assert_eq!(s.cron, "0 * * * *");

        let s = schedule("cron: '0 * * * *'", "dev", false).unwrap();
        assert_eq!(s.cron, "0 * * * *");
    }

    #[test]
    fn test_schedule_invalid_cron() {
        assert!(schedule("cron: 'every day'", "", true).is_err());
    }

    #[rstest]
    #[case("sql: SELECT 1", "sql")]
    #[case("metrics_sql: SELECT total FROM mv", "metrics_sql")]
    #[case("api: my_api", "api")]
    #[case("glob: s3://bucket/*.csv", "glob")]
    #[case("resource_status: {where_error: true}", "resource_status")]
    fn test_data_resolvers(#[case] text: &str, #[case] resolver: &str) {
        let data: DataYaml = serde_yaml::from_str(text).unwrap();
        assert_eq!(data.resolve().unwrap().name, resolver);
    }

    #[test]
    fn test_data_resolver_refs() {
        let data: DataYaml = serde_yaml::from_str("sql: SELECT * FROM {{ ref('m1') }}").unwrap();
        assert_eq!(data.resolve().unwrap().refs, vec![ResourceRef::untyped("m1")]);

        let data: DataYaml = serde_yaml::from_str("api: a\nargs: {x: 1}").unwrap();
        let resolver = data.resolve().unwrap();
        assert_eq!(resolver.refs, vec![ResourceRef::typed(ResourceKind::Api, "a")]);
        assert_eq!(resolver.properties["args"]["x"], 1);
    }

    #[test]
    fn test_data_requires_one_resolver() {
        let data: DataYaml = serde_yaml::from_str("sql: SELECT 1\napi: a").unwrap();
        assert!(data.resolve().is_err());
        assert!(DataYaml::default().resolve().is_err());
        let data: DataYaml = serde_yaml::from_str("api: a\nconnector: duckdb").unwrap();
        assert!(data.resolve().is_err());
    }

    #[test]
    fn test_notifiers() {
        let notify: NotifyYaml =
            serde_yaml::from_str("email: {recipients: [a@x.com]}\nslack: {channels: ['#ops']}").unwrap();
        let out = notifiers(Some(&notify), &[]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].connector, "email");
        assert_eq!(out[1].connector, "slack");

        let out = notifiers(None, &["b@x.com".to_string()]).unwrap();
        assert_eq!(out[0].properties["recipients"][0], "b@x.com");

        let err = notifiers(Some(&notify), &["b@x.com".to_string()]).unwrap_err();
        assert!(err.to_string().contains("cannot set both"));
    }

    #[test]
    fn test_time_ranges() {
        let ranges: Vec<TimeRangeYaml> = serde_yaml::from_str(
            "- PT6H\n- range: P7D\n  comparison_offsets: [P1D, {offset: P1W, range: P2W}]",
        )
        .unwrap();
        let out = time_ranges(&ranges).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].comparison_time_ranges[1].range, "P2W");

        let bad: Vec<TimeRangeYaml> = serde_yaml::from_str("- 7 days").unwrap();
        assert!(time_ranges(&bad).is_err());
    }

    #[test]
    fn test_comparison() {
        assert_eq!(comparison(None, None).unwrap(), ComparisonMode::None);
        assert_eq!(
            comparison(Some("dimension"), Some("country")).unwrap(),
            ComparisonMode::Dimension
        );
        assert!(comparison(Some("time"), Some("country")).is_err());
        assert!(comparison(Some("sideways"), None).is_err());
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(0, 30, 30)]
    #[case(60, 0, 60)]
    #[case(60, 30, 30)]
    fn test_min_timeout(#[case] a: u32, #[case] b: u32, #[case] expected: u32) {
        assert_eq!(min_timeout(a, b), expected);
    }

    #[test]
    fn test_watermark() {
        assert!(!parse_watermark(None).unwrap());
        assert!(parse_watermark(Some("inherit")).unwrap());
        assert!(parse_watermark(Some("latest")).is_err());
    }
}
