//! Report parser

use quarry_core::spec::{ExportFormat, ReportSpec};
use quarry_core::{ResourceKind, ResourceRef, yaml};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use super::{
    EmailYaml, IntervalsYaml, NotifyYaml, ParseContext, ScheduleYaml, decode, duration_secs,
    notifiers, parse_watermark, reject_sql_and_connector,
};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReportYaml {
    #[serde(default, alias = "title")]
    display_name: Option<String>,
    #[serde(default)]
    refresh: Option<ScheduleYaml>,
    #[serde(default)]
    watermark: Option<String>,
    #[serde(default)]
    intervals: Option<IntervalsYaml>,
    #[serde(default)]
    timeout: Option<Value>,
    #[serde(default)]
    query: QueryYaml,
    #[serde(default)]
    export: ExportYaml,
    #[serde(default)]
    notify: Option<NotifyYaml>,
    #[serde(default)]
    email: Option<EmailYaml>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExportYaml {
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    include_header: bool,
    #[serde(default)]
    limit: u64,
}

/// Named query with arguments, shared by reports and legacy alerts
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct QueryYaml {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Option<Mapping>,
    #[serde(default)]
    pub args_json: Option<String>,
}

impl QueryYaml {
    /// Arguments encoded as JSON, from `args` or `args_json`
    pub fn args(&self) -> Result<serde_json::Value> {
        match (&self.args, &self.args_json) {
            (Some(_), Some(_)) => Err(Error::invalid("cannot set both query.args and query.args_json")),
            (Some(args), None) => Ok(yaml::to_json(Value::Mapping(args.clone()))?),
            (None, Some(json)) => serde_json::from_str(json)
                .map_err(|e| Error::invalid(format!("query.args_json is not valid JSON: {e}"))),
            (None, None) => Ok(serde_json::Value::Object(Default::default())),
        }
    }

    /// Metrics view the query targets
    pub fn metrics_view_ref(args: &serde_json::Value) -> Option<ResourceRef> {
        ["metrics_view", "metricsView", "metricsViewName"]
            .iter()
            .find_map(|key| args.get(key).and_then(serde_json::Value::as_str))
            .filter(|name| !name.is_empty())
            .map(|name| ResourceRef::typed(ResourceKind::MetricsView, name))
    }
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let yaml: ReportYaml = decode(&node.yaml)?;

    let schedule = match &yaml.refresh {
        Some(refresh) if refresh.cron.is_some() => refresh.parse(ctx, false)?,
        _ => return Err(Error::invalid("report must have a refresh schedule with a cron expression")),
    };

    if yaml.query.name.is_empty() {
        return Err(Error::invalid("report must set query.name"));
    }
    let args = yaml.query.args()?;
    let mut refs = Vec::new();
    refs.extend(QueryYaml::metrics_view_ref(&args));

    let export_format = match yaml.export.format.as_deref() {
        Some("csv") => ExportFormat::Csv,
        Some("xlsx") => ExportFormat::Xlsx,
        Some("parquet") => ExportFormat::Parquet,
        Some(other) => {
            return Err(Error::invalid(format!(
                "invalid export format {other:?}, expected csv, xlsx or parquet"
            )));
        }
        None => return Err(Error::invalid("report must set export.format")),
    };

    let intervals = yaml.intervals.unwrap_or_default();
    intervals.validate()?;
    let legacy_recipients = yaml.email.map(|e| e.recipients).unwrap_or_default();

    let spec = ReportSpec {
        display_name: yaml.display_name.unwrap_or_default(),
        refresh_schedule: Some(schedule),
        watermark_inherit: parse_watermark(yaml.watermark.as_deref())?,
        intervals_iso_duration: intervals.duration.unwrap_or_default(),
        intervals_limit: intervals.limit,
        intervals_check_unclosed: intervals.check_unclosed,
        timeout_seconds: yaml.timeout.as_ref().map(duration_secs).transpose()?.unwrap_or(0),
        query_name: yaml.query.name.clone(),
        query_args_json: args.to_string(),
        export_format,
        export_include_header: yaml.export.include_header,
        export_limit: yaml.export.limit,
        notifiers: notifiers(yaml.notify.as_ref(), &legacy_recipients)?,
        annotations: yaml.annotations,
    };

    let resource = ctx.registry.insert(ResourceKind::Report, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(refs);
    if let Some(report) = resource.spec.as_report_mut() {
        *report = spec;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::test_support::parse_files;
    use quarry_core::spec::ExportFormat;
    use quarry_core::{ResourceKind, ResourceName};

    #[test]
    fn test_report() {
        let parser = parse_files(&[(
            "/reports/weekly.yaml",
            r#"
type: report
title: Weekly sales
refresh:
  cron: 0 9 * * 1
  time_zone: America/New_York
query:
  name: MetricsViewAggregation
  args:
    metrics_view: sales
    measures: [{name: total}]
export:
  format: csv
  include_header: true
  limit: 1000
email:
  recipients: [ops@example.com]
annotations:
  owner: finance
"#,
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let resource = parser
            .resource(&ResourceName::new(ResourceKind::Report, "weekly"))
            .unwrap();
        let report = resource.spec.as_report().unwrap();
        assert_eq!(report.display_name, "Weekly sales");
        assert_eq!(report.export_format, ExportFormat::Csv);
        assert_eq!(report.export_limit, 1000);
        assert!(report.query_args_json.contains("\"metrics_view\":\"sales\""));
        assert_eq!(report.notifiers.len(), 1);
        assert_eq!(report.notifiers[0].connector, "email");
        assert_eq!(report.annotations["owner"], "finance");
        let schedule = report.refresh_schedule.as_ref().unwrap();
        assert!(!schedule.ref_update);
        assert_eq!(schedule.cron, "0 9 * * 1");
    }

    #[test]
    fn test_report_requires_cron_and_format() {
        let parser = parse_files(&[
            (
                "/reports/a.yaml",
                "type: report\nquery: {name: Q}\nexport: {format: csv}",
            ),
            (
                "/reports/b.yaml",
                "type: report\nrefresh: {cron: '0 * * * *'}\nquery: {name: Q}",
            ),
            (
                "/reports/c.yaml",
                "type: report\nrefresh: {cron: '0 * * * *'}\nquery: {name: Q}\nexport: {format: pdf}",
            ),
        ]);
        assert_eq!(parser.errors().len(), 3, "{:?}", parser.errors());
        assert!(parser.resources().is_empty());
    }
}
