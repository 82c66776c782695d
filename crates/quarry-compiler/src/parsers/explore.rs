//! Explore parser

use quarry_core::security::{self, SecurityOptions, SecurityPolicyYaml};
use quarry_core::spec::{ExplorePreset, ExploreSpec};
use quarry_core::timeutil;
use quarry_core::{FieldSelector, ResourceKind, ResourceRef};
use serde::Deserialize;
use serde_yaml::Value;

use super::theme::theme_ref;
use super::{ParseContext, TimeRangeYaml, comparison, decode, reject_sql_and_connector, time_ranges, time_zones};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExploreYaml {
    #[serde(default, alias = "title")]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metrics_view: String,
    #[serde(default)]
    dimensions: Option<Value>,
    #[serde(default)]
    measures: Option<Value>,
    #[serde(default)]
    theme: Option<Value>,
    #[serde(default)]
    time_ranges: Vec<TimeRangeYaml>,
    #[serde(default)]
    time_zones: Vec<String>,
    #[serde(default)]
    defaults: Option<PresetYaml>,
    #[serde(default)]
    lock_time_zone: bool,
    #[serde(default)]
    allow_custom_time_range: Option<bool>,
    #[serde(default)]
    banner: Option<String>,
    #[serde(default)]
    security: Option<SecurityPolicyYaml>,
}

/// `defaults:` block of an explore
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PresetYaml {
    #[serde(default)]
    pub dimensions: Option<Value>,
    #[serde(default)]
    pub measures: Option<Value>,
    #[serde(default)]
    pub time_range: Option<String>,
    #[serde(default)]
    pub comparison_mode: Option<String>,
    #[serde(default)]
    pub comparison_dimension: Option<String>,
}

impl PresetYaml {
    pub fn to_preset(&self) -> Result<ExplorePreset> {
        if let Some(range) = &self.time_range {
            timeutil::validate_iso8601(range)?;
        }
        Ok(ExplorePreset {
            dimensions: self.dimensions.as_ref().map(FieldSelector::parse).transpose()?,
            measures: self.measures.as_ref().map(FieldSelector::parse).transpose()?,
            time_range: self.time_range.clone(),
            comparison_mode: comparison(
                self.comparison_mode.as_deref(),
                self.comparison_dimension.as_deref(),
            )?,
            comparison_dimension: self.comparison_dimension.clone(),
        })
    }
}

fn selector(value: Option<&Value>) -> Result<FieldSelector> {
    Ok(value.map(FieldSelector::parse).transpose()?.unwrap_or_default())
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let yaml: ExploreYaml = decode(&node.yaml)?;

    if yaml.metrics_view.is_empty() {
        return Err(Error::invalid("explore must reference a metrics_view"));
    }
    let mut refs = vec![ResourceRef::typed(ResourceKind::MetricsView, yaml.metrics_view.clone())];

    let (theme, embedded_theme) = match &yaml.theme {
        Some(value) => theme_ref(value)?,
        None => (String::new(), None),
    };
    if !theme.is_empty() {
        refs.push(ResourceRef::typed(ResourceKind::Theme, theme.clone()));
    }

    let security_rules = match &yaml.security {
        Some(policy) => security::compile(policy, SecurityOptions { access_only: true })?.rules,
        None => Vec::new(),
    };

    let spec = ExploreSpec {
        display_name: yaml.display_name.clone().unwrap_or_default(),
        description: yaml.description.clone().unwrap_or_default(),
        metrics_view: yaml.metrics_view.clone(),
        dimensions: selector(yaml.dimensions.as_ref())?,
        measures: selector(yaml.measures.as_ref())?,
        theme,
        embedded_theme,
        time_ranges: time_ranges(&yaml.time_ranges)?,
        time_zones: time_zones(&yaml.time_zones)?,
        default_preset: yaml.defaults.as_ref().map(PresetYaml::to_preset).transpose()?,
        lock_time_zone: yaml.lock_time_zone,
        allow_custom_time_range: yaml.allow_custom_time_range.unwrap_or(true),
        banner: yaml.banner.clone().unwrap_or_default(),
        defined_in_metrics_view: false,
        security_rules,
    };

    let resource = ctx.registry.insert(ResourceKind::Explore, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(refs);
    if let Some(explore) = resource.spec.as_explore_mut() {
        *explore = spec;
    }
    Ok(())
}
