//! Alert parser
//!
//! An alert runs a resolver on a schedule and notifies when it returns rows.
//! The resolver comes from `data:` or, for older files, from a named
//! `query:` which is wrapped in the `legacy_metrics` resolver.

use quarry_core::spec::{AlertSpec, QueryFor, Schedule};
use quarry_core::{Properties, ResourceKind, yaml};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use super::report::QueryYaml;
use super::{
    DataYaml, IntervalsYaml, NotifyYaml, ParseContext, Resolver, ScheduleYaml, decode,
    duration_secs, notifiers, parse_watermark, reject_sql_and_connector,
};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AlertYaml {
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
    data: Option<DataYaml>,
    #[serde(default)]
    query: Option<QueryYaml>,
    #[serde(default, rename = "for")]
    query_for: Option<QueryForYaml>,
    #[serde(default)]
    on_recover: Option<bool>,
    #[serde(default)]
    on_fail: Option<bool>,
    #[serde(default)]
    on_error: Option<bool>,
    #[serde(default)]
    renotify: Option<bool>,
    #[serde(default)]
    renotify_after: Option<Value>,
    #[serde(default)]
    notify: Option<NotifyYaml>,
    #[serde(default)]
    email: Option<LegacyEmailYaml>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryForYaml {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_email: Option<String>,
    #[serde(default)]
    attributes: Option<Mapping>,
}

impl QueryForYaml {
    fn to_query_for(&self) -> Result<QueryFor> {
        match (&self.user_id, &self.user_email, &self.attributes) {
            (Some(id), None, None) => Ok(QueryFor::UserId(id.clone())),
            (None, Some(email), None) => Ok(QueryFor::UserEmail(email.clone())),
            (None, None, Some(attrs)) => Ok(QueryFor::Attributes(yaml::to_properties(
                Value::Mapping(attrs.clone()),
            )?)),
            _ => Err(Error::invalid(
                "'for' must set exactly one of user_id, user_email or attributes",
            )),
        }
    }
}

/// Notification settings of older alert files
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyEmailYaml {
    #[serde(default)]
    recipients: Vec<String>,
    #[serde(default)]
    on_recover: Option<bool>,
    #[serde(default)]
    on_fail: Option<bool>,
    #[serde(default)]
    on_error: Option<bool>,
    #[serde(default)]
    renotify: Option<bool>,
    #[serde(default)]
    renotify_after: Option<Value>,
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let yaml: AlertYaml = decode(&node.yaml)?;

    let resolver = match (&yaml.data, &yaml.query) {
        (Some(data), None) => data.resolve()?,
        (None, Some(query)) => legacy_resolver(query)?,
        _ => return Err(Error::invalid("alert must declare exactly one of data or query")),
    };

    let refresh_schedule = match &yaml.refresh {
        Some(refresh) => refresh.parse(ctx, false)?,
        None => Schedule {
            ref_update: true,
            ..Default::default()
        },
    };

    let intervals = yaml.intervals.unwrap_or_default();
    intervals.validate()?;

    let email = yaml.email.unwrap_or_default();
    let notifiers = notifiers(yaml.notify.as_ref(), &email.recipients)?;
    let renotify_after = yaml.renotify_after.as_ref().or(email.renotify_after.as_ref());

    let spec = AlertSpec {
        display_name: yaml.display_name.unwrap_or_default(),
        refresh_schedule: Some(refresh_schedule),
        watermark_inherit: parse_watermark(yaml.watermark.as_deref())?,
        intervals_iso_duration: intervals.duration.unwrap_or_default(),
        intervals_limit: intervals.limit,
        intervals_check_unclosed: intervals.check_unclosed,
        timeout_seconds: yaml.timeout.as_ref().map(duration_secs).transpose()?.unwrap_or(0),
        resolver: resolver.name,
        resolver_properties: resolver.properties,
        query_for: yaml.query_for.as_ref().map(QueryForYaml::to_query_for).transpose()?,
        notify_on_recover: yaml.on_recover.or(email.on_recover).unwrap_or(false),
        notify_on_fail: yaml.on_fail.or(email.on_fail).unwrap_or(true),
        notify_on_error: yaml.on_error.or(email.on_error).unwrap_or(false),
        renotify: yaml.renotify.or(email.renotify).unwrap_or(false),
        renotify_after_seconds: renotify_after.map(duration_secs).transpose()?.unwrap_or(0),
        notifiers,
        annotations: yaml.annotations,
    };

    let resource = ctx.registry.insert(ResourceKind::Alert, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(resolver.refs);
    if let Some(alert) = resource.spec.as_alert_mut() {
        *alert = spec;
    }
    Ok(())
}

fn legacy_resolver(query: &QueryYaml) -> Result<Resolver> {
    if query.name.is_empty() {
        return Err(Error::invalid("query.name is required"));
    }
    let args = query.args()?;
    let mut properties = Properties::new();
    properties.insert("query_name".into(), query.name.clone().into());
    properties.insert("query_args_json".into(), args.to_string().into());
    Ok(Resolver {
        name: "legacy_metrics".into(),
        properties,
        refs: QueryYaml::metrics_view_ref(&args).into_iter().collect(),
    })
}
