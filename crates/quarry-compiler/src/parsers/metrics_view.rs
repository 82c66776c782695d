//! Metrics view parser
//!
//! Dimension and measure names share one case-insensitive namespace. Derived
//! measures may only reference measures declared before them, and every
//! dimension named by a window, `per` or `requires` must exist.
//!
//! Metrics views older than version 1 also carried dashboard settings
//! (`default_dimensions`, `available_time_ranges`, ...). For those files an
//! explore with the same name is emitted next to the metrics view, unless an
//! explore with that name already exists. An `explore:` block declares the
//! explore inline instead, for any version.

use once_cell::sync::Lazy;
use quarry_core::security::{self, SecurityPolicyYaml, SecurityRule};
use quarry_core::spec::{
    CacheConfig, Dimension, DimensionSelector, DimensionType, ExplorePreset, ExploreSpec, Measure,
    MeasureType, MeasureWindow, MetricsViewSpec,
};
use quarry_core::resource::to_display_name;
use quarry_core::timeutil::{self, TimeGrain};
use quarry_core::{FieldSelector, ResourceKind, ResourceRef, yaml};
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;

use super::explore::PresetYaml;
use super::theme::theme_ref;
use super::{ParseContext, TimeRangeYaml, comparison, decode, duration_secs, time_ranges, time_zones};
use crate::error::{Error, Result};
use crate::node::Node;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("identifier regex"));

// ============================================================================
// Raw YAML structures (for serde deserialization)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricsViewYaml {
    #[serde(default, alias = "title")]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    ai_instructions: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    database_schema: Option<String>,
    #[serde(default, alias = "time_dimension")]
    timeseries: Option<String>,
    #[serde(default)]
    smallest_time_grain: Option<String>,
    #[serde(default)]
    watermark: Option<String>,
    #[serde(default)]
    first_day_of_week: Option<u32>,
    #[serde(default)]
    first_month_of_year: Option<u32>,
    #[serde(default)]
    dimensions: Vec<DimensionYaml>,
    #[serde(default)]
    measures: Vec<MeasureYaml>,
    #[serde(default)]
    security: Option<SecurityPolicyYaml>,
    #[serde(default)]
    cache: Option<CacheYaml>,
    #[serde(default)]
    default_comparison: Option<DefaultComparisonYaml>,
    #[serde(default)]
    explore: Option<InlineExploreYaml>,

    // Dashboard settings of version 0 files
    #[serde(default)]
    default_dimensions: Option<Value>,
    #[serde(default)]
    default_measures: Option<Value>,
    #[serde(default)]
    default_time_range: Option<String>,
    #[serde(default)]
    available_time_zones: Vec<String>,
    #[serde(default)]
    available_time_ranges: Vec<TimeRangeYaml>,
    #[serde(default)]
    default_theme: Option<String>,
}

impl MetricsViewYaml {
    fn has_explore_fields(&self) -> bool {
        self.default_dimensions.is_some()
            || self.default_measures.is_some()
            || self.default_time_range.is_some()
            || !self.available_time_zones.is_empty()
            || !self.available_time_ranges.is_empty()
            || self.default_theme.is_some()
    }
}

/// `explore:` block of a metrics view
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InlineExploreYaml {
    #[serde(default)]
    skip: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "title")]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    banner: Option<String>,
    #[serde(default)]
    theme: Option<Value>,
    #[serde(default)]
    time_ranges: Vec<TimeRangeYaml>,
    #[serde(default)]
    time_zones: Vec<String>,
    #[serde(default)]
    lock_time_zone: bool,
    #[serde(default)]
    allow_custom_time_range: Option<bool>,
    #[serde(default)]
    defaults: Option<PresetYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DimensionYaml {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "label")]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    column: Option<String>,
    #[serde(default)]
    property: Option<String>,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default, rename = "type")]
    dimension_type: Option<String>,
    #[serde(default)]
    unnest: bool,
    #[serde(default)]
    uri: Option<Value>,
    #[serde(default)]
    lookup_table: Option<String>,
    #[serde(default)]
    lookup_key_column: Option<String>,
    #[serde(default)]
    lookup_value_column: Option<String>,
    #[serde(default)]
    lookup_default_expression: Option<String>,
    #[serde(default)]
    ignore: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MeasureYaml {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "label")]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default, rename = "type")]
    measure_type: Option<String>,
    #[serde(default)]
    window: Option<Value>,
    #[serde(default)]
    per: Option<Value>,
    #[serde(default)]
    requires: Option<Value>,
    #[serde(default)]
    format_preset: Option<String>,
    #[serde(default)]
    format_d3: Option<String>,
    #[serde(default)]
    format_d3_locale: Option<Mapping>,
    #[serde(default)]
    valid_percent_of_total: bool,
    #[serde(default)]
    treat_nulls_as: Option<String>,
    #[serde(default)]
    ignore: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheYaml {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    key_sql: Option<String>,
    #[serde(default)]
    key_ttl: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefaultComparisonYaml {
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    dimension: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WindowYaml {
    #[serde(default)]
    partition: Option<bool>,
    #[serde(default)]
    order: Option<Value>,
    #[serde(default)]
    frame: Option<String>,
}

// ============================================================================
// Parsing
// ============================================================================

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    if !node.sql.is_empty() {
        return Err(Error::invalid("metrics views cannot have SQL"));
    }
    let yaml: MetricsViewYaml = decode(&node.yaml)?;
    let legacy = node.version < 1;
    if !legacy && yaml.has_explore_fields() {
        return Err(Error::invalid(
            "dashboard settings like default_dimensions are only supported before version 1, declare an explore instead",
        ));
    }
    if yaml.explore.is_some() && yaml.has_explore_fields() {
        return Err(Error::invalid(
            "dashboard settings like default_dimensions cannot be combined with an explore block, set them under explore",
        ));
    }

    let mut refs = Vec::new();
    if yaml.model.is_some() && yaml.table.is_some() {
        return Err(Error::invalid("cannot set both model and table"));
    }
    match (&yaml.model, &yaml.table, &yaml.parent) {
        (Some(model), _, _) => refs.push(ResourceRef::untyped(model.clone())),
        (_, Some(table), _) => refs.push(ResourceRef::untyped(table.clone())),
        (None, None, Some(_)) => {}
        (None, None, None) => {
            return Err(Error::invalid("metrics view must reference a model or table"));
        }
    }
    if let Some(parent) = &yaml.parent {
        refs.push(ResourceRef::typed(ResourceKind::MetricsView, parent.clone()));
    }

    let smallest_time_grain = yaml
        .smallest_time_grain
        .as_deref()
        .map(timeutil::parse_time_grain)
        .transpose()?
        .unwrap_or_default();
    let first_day_of_week = yaml.first_day_of_week.unwrap_or(0);
    if yaml.first_day_of_week.is_some() && !(1..=7).contains(&first_day_of_week) {
        return Err(Error::invalid("first_day_of_week must be between 1 and 7"));
    }
    let first_month_of_year = yaml.first_month_of_year.unwrap_or(0);
    if yaml.first_month_of_year.is_some() && !(1..=12).contains(&first_month_of_year) {
        return Err(Error::invalid("first_month_of_year must be between 1 and 12"));
    }

    let mut names = BTreeSet::new();
    let timeseries = yaml.timeseries.clone().unwrap_or_default();
    if !timeseries.is_empty() {
        names.insert(timeseries.to_lowercase());
    }
    let (mut dimensions, time_listed) = parse_dimensions(&yaml.dimensions, &timeseries, &mut names, &mut refs)?;
    if !timeseries.is_empty() && !time_listed {
        dimensions.insert(
            0,
            Dimension {
                name: timeseries.clone(),
                display_name: to_display_name(&timeseries),
                column: timeseries.clone(),
                dimension_type: DimensionType::Time,
                ..Default::default()
            },
        );
    }

    let mut known_dimensions: BTreeSet<String> = dimensions.iter().map(|d| d.name.to_lowercase()).collect();
    if !timeseries.is_empty() {
        known_dimensions.insert(timeseries.to_lowercase());
    }
    let measures = parse_measures(&yaml.measures, &known_dimensions, &mut names)?;
    if measures.is_empty() && yaml.parent.is_none() {
        return Err(Error::invalid("metrics view must define at least one measure"));
    }

    let (security_rules, security_refs) = match &yaml.security {
        Some(policy) => {
            let compiled = security::compile(policy, Default::default())?;
            (compiled.rules, compiled.refs)
        }
        None => (Vec::new(), Vec::new()),
    };
    refs.extend(security_refs);

    let cache = match &yaml.cache {
        Some(cache) => CacheConfig {
            enabled: cache.enabled,
            key_sql: cache.key_sql.clone().unwrap_or_default(),
            key_ttl_seconds: cache.key_ttl.as_ref().map(duration_secs).transpose()?.unwrap_or(0),
        },
        None => CacheConfig::default(),
    };

    let comparison_yaml = yaml.default_comparison.as_ref();
    let default_comparison_mode = comparison(
        comparison_yaml.and_then(|c| c.mode.as_deref()),
        comparison_yaml.and_then(|c| c.dimension.as_deref()),
    )?;
    let default_comparison_dimension = comparison_yaml
        .and_then(|c| c.dimension.clone())
        .unwrap_or_default();
    if !default_comparison_dimension.is_empty()
        && !known_dimensions.contains(&default_comparison_dimension.to_lowercase())
    {
        return Err(Error::invalid(format!(
            "default comparison dimension {default_comparison_dimension:?} is not a dimension"
        )));
    }

    let display_name = yaml
        .display_name
        .clone()
        .unwrap_or_else(|| to_display_name(&node.name));
    let explore = match &yaml.explore {
        Some(inline) if inline.skip => None,
        Some(inline) => Some(inline_explore(inline, &node.name, &security_rules)?),
        None if legacy => Some(legacy_explore(&yaml, &node.name, &display_name, &security_rules)?),
        None => None,
    };

    let spec = MetricsViewSpec {
        parent: yaml.parent.clone().unwrap_or_default(),
        connector: if node.connector_inferred {
            String::new()
        } else {
            node.connector.clone()
        },
        database: yaml.database.clone().unwrap_or_default(),
        database_schema: yaml.database_schema.clone().unwrap_or_default(),
        table: yaml.table.clone().unwrap_or_default(),
        model: yaml.model.clone().unwrap_or_default(),
        display_name,
        description: yaml.description.clone().unwrap_or_default(),
        ai_instructions: yaml.ai_instructions.clone().unwrap_or_default(),
        time_dimension: timeseries,
        smallest_time_grain,
        watermark_expression: yaml.watermark.clone().unwrap_or_default(),
        first_day_of_week,
        first_month_of_year,
        dimensions,
        measures,
        security_rules,
        cache,
        default_comparison_mode,
        default_comparison_dimension,
    };

    if let Some(explore) = explore.as_ref().filter(|e| e.inline) {
        ctx.registry.dry_run_insert(ResourceKind::MetricsView, &node.name)?;
        ctx.registry.dry_run_insert(ResourceKind::Explore, &explore.name)?;
    }

    let resource = ctx.registry.insert(ResourceKind::MetricsView, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(refs);
    if let Some(mv) = resource.spec.as_metrics_view_mut() {
        *mv = spec;
    }

    if let Some(explore) = explore {
        match ctx.registry.insert(ResourceKind::Explore, &explore.name, &node.path) {
            Ok(resource) => {
                resource.add_refs(explore.refs);
                if let Some(spec) = resource.spec.as_explore_mut() {
                    *spec = explore.spec;
                }
            }
            Err(e) => {
                tracing::debug!(path = %node.path, error = %e, "Explore already defined, not emitting one for metrics view");
            }
        }
    }
    Ok(())
}

/// Explore committed next to a metrics view
struct EmittedExplore {
    name: String,
    spec: ExploreSpec,
    refs: Vec<ResourceRef>,
    /// Declared with an `explore:` block rather than back-filled
    inline: bool,
}

fn claim_name(names: &mut BTreeSet<String>, name: &str) -> Result<()> {
    if !names.insert(name.to_lowercase()) {
        return Err(Error::invalid(format!(
            "found duplicate dimension or measure name {name:?}"
        )));
    }
    Ok(())
}

/// Parse the dimension list; also returns whether the time dimension was listed
fn parse_dimensions(
    dims: &[DimensionYaml],
    timeseries: &str,
    names: &mut BTreeSet<String>,
    refs: &mut Vec<ResourceRef>,
) -> Result<(Vec<Dimension>, bool)> {
    let mut out = Vec::with_capacity(dims.len());
    let mut time_listed = false;
    for (i, dim) in dims.iter().enumerate() {
        if dim.ignore {
            continue;
        }
        let column = dim.column.clone().or_else(|| dim.property.clone());
        let name = dim
            .name
            .clone()
            .or_else(|| column.clone())
            .ok_or_else(|| Error::invalid(format!("dimension at index {i} must have a name")))?;
        if !timeseries.is_empty() && name.eq_ignore_ascii_case(timeseries) {
            if time_listed {
                return Err(Error::invalid(format!(
                    "time dimension {timeseries:?} defined multiple times"
                )));
            }
            if name != timeseries {
                return Err(Error::invalid(format!(
                    "dimension name {name:?} does not match the case of time dimension {timeseries:?}"
                )));
            }
            time_listed = true;
        } else {
            claim_name(names, &name)?;
        }

        if column.is_some() && dim.expression.is_some() {
            return Err(Error::invalid(format!(
                "dimension {name:?} cannot have both a column and an expression"
            )));
        }
        let column = match (&column, &dim.expression) {
            (None, None) => name.clone(),
            (Some(c), _) => c.clone(),
            _ => String::new(),
        };
        let expression = dim.expression.clone().unwrap_or_default();

        let lookup = [&dim.lookup_table, &dim.lookup_key_column, &dim.lookup_value_column];
        let lookup_set = lookup.iter().filter(|v| v.is_some()).count();
        if lookup_set != 0 && lookup_set != lookup.len() {
            return Err(Error::invalid(format!(
                "dimension {name:?} must set lookup_table, lookup_key_column and lookup_value_column together"
            )));
        }
        if let Some(table) = &dim.lookup_table {
            refs.push(ResourceRef::untyped(table.clone()));
        }

        let dimension_type = match dim.dimension_type.as_deref() {
            None | Some("") => {
                if name.eq_ignore_ascii_case(timeseries) {
                    DimensionType::Time
                } else {
                    DimensionType::Categorical
                }
            }
            Some("categorical") => DimensionType::Categorical,
            Some("time") => DimensionType::Time,
            Some(other) => {
                return Err(Error::invalid(format!(
                    "dimension {name:?} has invalid type {other:?}"
                )));
            }
        };

        let uri = match &dim.uri {
            None | Some(Value::Bool(false)) => String::new(),
            Some(Value::Bool(true)) => {
                if expression.is_empty() {
                    column.clone()
                } else {
                    expression.clone()
                }
            }
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(Error::invalid(format!(
                    "dimension {name:?}: uri must be a boolean or an expression"
                )));
            }
        };

        out.push(Dimension {
            display_name: dim
                .display_name
                .clone()
                .unwrap_or_else(|| to_display_name(&name)),
            description: dim.description.clone().unwrap_or_default(),
            column,
            expression,
            dimension_type,
            unnest: dim.unnest,
            uri,
            lookup_table: dim.lookup_table.clone().unwrap_or_default(),
            lookup_key_column: dim.lookup_key_column.clone().unwrap_or_default(),
            lookup_value_column: dim.lookup_value_column.clone().unwrap_or_default(),
            lookup_default_expression: dim.lookup_default_expression.clone().unwrap_or_default(),
            name,
        });
    }
    Ok((out, time_listed))
}

fn parse_measures(
    measures: &[MeasureYaml],
    dimensions: &BTreeSet<String>,
    names: &mut BTreeSet<String>,
) -> Result<Vec<Measure>> {
    let all_measures: Vec<(usize, String)> = measures
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.ignore)
        .map(|(i, m)| (i, measure_name(i, m).to_lowercase()))
        .collect();

    let mut out: Vec<Measure> = Vec::with_capacity(measures.len());
    for (i, m) in measures.iter().enumerate() {
        if m.ignore {
            continue;
        }
        let name = measure_name(i, m);
        claim_name(names, &name)?;

        let expression = m
            .expression
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| Error::invalid(format!("measure {name:?} must have an expression")))?;
        if m.format_preset.is_some() && m.format_d3.is_some() {
            return Err(Error::invalid(format!(
                "measure {name:?} cannot have both format_preset and format_d3"
            )));
        }

        let window = m.window.as_ref().map(parse_window).transpose()?.flatten();
        let per = m.per.as_ref().map(parse_dimension_selectors).transpose()?.unwrap_or_default();
        let required = m
            .requires
            .as_ref()
            .map(parse_dimension_selectors)
            .transpose()?
            .unwrap_or_default();
        let window_order = window.iter().flat_map(|w| w.order_by.iter());
        for selector in per.iter().chain(required.iter()).chain(window_order) {
            if !dimensions.contains(&selector.name.to_lowercase()) {
                return Err(Error::invalid(format!(
                    "measure {name:?} references unknown dimension {:?}",
                    selector.name
                )));
            }
        }

        let measure_type = match m.measure_type.as_deref() {
            Some("simple") => MeasureType::Simple,
            Some("derived") => MeasureType::Derived,
            Some("time_comparison") => MeasureType::TimeComparison,
            None | Some("") => {
                if window.is_some() || !per.is_empty() || !required.is_empty() {
                    MeasureType::Derived
                } else {
                    MeasureType::Simple
                }
            }
            Some(other) => {
                return Err(Error::invalid(format!(
                    "measure {name:?} has invalid type {other:?}"
                )));
            }
        };

        let mut referenced_measures = Vec::new();
        if measure_type != MeasureType::Simple {
            for ident in IDENTIFIER.find_iter(&expression).map(|m| m.as_str()) {
                let lower = ident.to_lowercase();
                let Some((index, _)) = all_measures.iter().find(|(_, n)| *n == lower) else {
                    continue;
                };
                if *index >= i {
                    return Err(Error::invalid(format!(
                        "measure {name:?} references measure {ident:?} which is not declared before it"
                    )));
                }
                if !referenced_measures.iter().any(|r: &String| r.eq_ignore_ascii_case(ident)) {
                    let declared = out
                        .iter()
                        .find(|o| o.name.eq_ignore_ascii_case(ident))
                        .map(|o| o.name.clone())
                        .unwrap_or_else(|| ident.to_string());
                    referenced_measures.push(declared);
                }
            }
        }

        let format_d3_locale = match &m.format_d3_locale {
            Some(map) => yaml::to_properties(Value::Mapping(map.clone()))?,
            None => Default::default(),
        };

        out.push(Measure {
            display_name: m
                .display_name
                .clone()
                .unwrap_or_else(|| to_display_name(&name)),
            description: m.description.clone().unwrap_or_default(),
            expression,
            measure_type,
            window,
            per_dimensions: per,
            required_dimensions: required,
            referenced_measures,
            format_preset: m.format_preset.clone().unwrap_or_default(),
            format_d3: m.format_d3.clone().unwrap_or_default(),
            format_d3_locale,
            valid_percent_of_total: m.valid_percent_of_total,
            treat_nulls_as: m.treat_nulls_as.clone().unwrap_or_default(),
            name,
        });
    }
    Ok(out)
}

fn measure_name(index: usize, m: &MeasureYaml) -> String {
    m.name.clone().unwrap_or_else(|| format!("measure_{index}"))
}

/// `window: true` or `window: {partition, order, frame}`
fn parse_window(value: &Value) -> Result<Option<MeasureWindow>> {
    match value {
        Value::Bool(false) => Ok(None),
        Value::Bool(true) => Ok(Some(MeasureWindow {
            partition: true,
            ..Default::default()
        })),
        Value::Mapping(map) => {
            let window: WindowYaml = decode(map)?;
            Ok(Some(MeasureWindow {
                partition: window.partition.unwrap_or(true),
                order_by: window
                    .order
                    .as_ref()
                    .map(parse_dimension_selectors)
                    .transpose()?
                    .unwrap_or_default(),
                frame_expression: window.frame.unwrap_or_default(),
            }))
        }
        _ => Err(Error::invalid("window must be a boolean or a mapping")),
    }
}

/// A dimension name, a list of names, or a list of `{name, time_grain, desc}`
fn parse_dimension_selectors(value: &Value) -> Result<Vec<DimensionSelector>> {
    let items = match value {
        Value::String(_) | Value::Mapping(_) => std::slice::from_ref(value),
        Value::Sequence(items) => items.as_slice(),
        _ => return Err(Error::invalid("expected a dimension name or a list of dimensions")),
    };
    items.iter().map(parse_dimension_selector).collect()
}

fn parse_dimension_selector(item: &Value) -> Result<DimensionSelector> {
    match item {
        Value::String(name) => Ok(DimensionSelector {
            name: name.clone(),
            time_grain: TimeGrain::Unspecified,
            desc: false,
        }),
        Value::Mapping(map) => {
            let name = map
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::invalid("dimension selector is missing a name"))?;
            let time_grain = match map.get("time_grain").and_then(Value::as_str) {
                Some(grain) => timeutil::parse_time_grain(grain)?,
                None => TimeGrain::Unspecified,
            };
            Ok(DimensionSelector {
                name: name.to_string(),
                time_grain,
                desc: map.get("desc").and_then(Value::as_bool).unwrap_or(false),
            })
        }
        _ => Err(Error::invalid("invalid dimension selector")),
    }
}

/// Explore emitted next to a version 0 metrics view
fn legacy_explore(
    yaml: &MetricsViewYaml,
    name: &str,
    display_name: &str,
    rules: &[SecurityRule],
) -> Result<EmittedExplore> {
    let mut refs = vec![ResourceRef::typed(ResourceKind::MetricsView, name)];
    let theme = yaml.default_theme.clone().unwrap_or_default();
    if !theme.is_empty() {
        refs.push(ResourceRef::typed(ResourceKind::Theme, theme.clone()));
    }

    let has_preset = yaml.default_dimensions.is_some()
        || yaml.default_measures.is_some()
        || yaml.default_time_range.is_some()
        || yaml.default_comparison.is_some();
    let default_preset = if has_preset {
        if let Some(range) = &yaml.default_time_range {
            timeutil::validate_iso8601(range)?;
        }
        let comparison_yaml = yaml.default_comparison.as_ref();
        Some(ExplorePreset {
            dimensions: yaml.default_dimensions.as_ref().map(FieldSelector::parse).transpose()?,
            measures: yaml.default_measures.as_ref().map(FieldSelector::parse).transpose()?,
            time_range: yaml.default_time_range.clone(),
            comparison_mode: comparison(
                comparison_yaml.and_then(|c| c.mode.as_deref()),
                comparison_yaml.and_then(|c| c.dimension.as_deref()),
            )?,
            comparison_dimension: comparison_yaml.and_then(|c| c.dimension.clone()),
        })
    } else {
        None
    };

    let spec = ExploreSpec {
        display_name: display_name.to_string(),
        description: yaml.description.clone().unwrap_or_default(),
        metrics_view: name.to_string(),
        dimensions: FieldSelector::all(),
        measures: FieldSelector::all(),
        theme,
        embedded_theme: None,
        time_ranges: time_ranges(&yaml.available_time_ranges)?,
        time_zones: time_zones(&yaml.available_time_zones)?,
        default_preset,
        lock_time_zone: false,
        allow_custom_time_range: true,
        banner: String::new(),
        defined_in_metrics_view: true,
        security_rules: access_rules(rules),
    };
    Ok(EmittedExplore {
        name: name.to_string(),
        spec,
        refs,
        inline: false,
    })
}

/// Explore declared by the `explore:` block of a metrics view
fn inline_explore(inline: &InlineExploreYaml, mv_name: &str, rules: &[SecurityRule]) -> Result<EmittedExplore> {
    let name = inline
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| mv_name.to_string());
    let mut refs = vec![ResourceRef::typed(ResourceKind::MetricsView, mv_name)];
    let (theme, embedded_theme) = match &inline.theme {
        Some(value) => theme_ref(value)?,
        None => (String::new(), None),
    };
    if !theme.is_empty() {
        refs.push(ResourceRef::typed(ResourceKind::Theme, theme.clone()));
    }

    let spec = ExploreSpec {
        display_name: inline
            .display_name
            .clone()
            .unwrap_or_else(|| to_display_name(&name)),
        description: inline.description.clone().unwrap_or_default(),
        metrics_view: mv_name.to_string(),
        dimensions: FieldSelector::all(),
        measures: FieldSelector::all(),
        theme,
        embedded_theme,
        time_ranges: time_ranges(&inline.time_ranges)?,
        time_zones: time_zones(&inline.time_zones)?,
        default_preset: inline.defaults.as_ref().map(PresetYaml::to_preset).transpose()?,
        lock_time_zone: inline.lock_time_zone,
        allow_custom_time_range: inline.allow_custom_time_range.unwrap_or(true),
        banner: inline.banner.clone().unwrap_or_default(),
        defined_in_metrics_view: true,
        security_rules: access_rules(rules),
    };
    Ok(EmittedExplore {
        name,
        spec,
        refs,
        inline: true,
    })
}

fn access_rules(rules: &[SecurityRule]) -> Vec<SecurityRule> {
    rules
        .iter()
        .filter(|r| matches!(r, SecurityRule::Access { .. }))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::test_support::parse_files;
    use quarry_core::spec::{DimensionType, MeasureType, MetricsViewSpec};
    use quarry_core::timeutil::TimeGrain;
    use quarry_core::{ResourceKind, ResourceName};

    const BASE: &str = r#"
version: 1
type: metrics_view
model: orders
timeseries: created_at
smallest_time_grain: day
dimensions:
  - column: country
  - name: domain
    expression: regexp_extract(url, '//([^/]+)')
    label: Domain
measures:
  - name: total
    expression: SUM(amount)
  - name: orders
    expression: COUNT(*)
  - name: avg_order
    type: derived
    expression: total / orders
  - name: running_total
    expression: total
    window:
      order: [{name: created_at, time_grain: day}]
"#;

    fn mv(parser: &crate::Parser, name: &str) -> MetricsViewSpec {
        parser
            .resource(&ResourceName::new(ResourceKind::MetricsView, name))
            .unwrap()
            .spec
            .as_metrics_view()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_metrics_view() {
        let parser = parse_files(&[("/metrics/sales.yaml", BASE)]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let spec = mv(&parser, "sales");
        assert_eq!(spec.model, "orders");
        assert_eq!(spec.connector, "duckdb");
        assert_eq!(spec.smallest_time_grain, TimeGrain::Day);
        assert_eq!(spec.display_name, "Sales");
        // The timeseries column is prepended when not listed
        assert_eq!(spec.dimensions.len(), 3);
        assert_eq!(spec.dimensions[0].name, "created_at");
        assert_eq!(spec.dimensions[0].column, "created_at");
        assert_eq!(spec.dimensions[0].dimension_type, DimensionType::Time);
        assert_eq!(spec.dimensions[1].name, "country");
        assert_eq!(spec.dimensions[1].display_name, "Country");
        assert_eq!(spec.dimensions[1].dimension_type, DimensionType::Categorical);
        assert_eq!(spec.dimensions[2].display_name, "Domain");
        assert_eq!(spec.measures[2].measure_type, MeasureType::Derived);
        assert_eq!(spec.measures[2].referenced_measures, vec!["total", "orders"]);
        assert_eq!(spec.measures[3].measure_type, MeasureType::Derived);
        assert!(spec.measures[3].window.as_ref().unwrap().partition);
        // Version 1 files do not emit an explore
        assert!(
            parser
                .resource(&ResourceName::new(ResourceKind::Explore, "sales"))
                .is_none()
        );
    }

    #[test]
    fn test_legacy_metrics_view_emits_explore() {
        let parser = parse_files(&[(
            "/dashboards/sales.yaml",
            r#"
model: orders
title: Sales
dimensions:
  - column: country
measures:
  - expression: SUM(amount)
default_time_range: P7D
available_time_zones: [UTC]
security:
  access: true
  row_filter: country = 'US'
"#,
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let spec = mv(&parser, "sales");
        assert_eq!(spec.measures[0].name, "measure_0");
        assert_eq!(spec.security_rules.len(), 2);

        let explore = parser
            .resource(&ResourceName::new(ResourceKind::Explore, "sales"))
            .unwrap();
        assert_eq!(explore.paths, vec!["/dashboards/sales.yaml"]);
        let explore = explore.spec.as_explore().unwrap();
        assert!(explore.defined_in_metrics_view);
        assert_eq!(explore.display_name, "Sales");
        assert_eq!(explore.metrics_view, "sales");
        assert_eq!(explore.time_zones, vec!["UTC"]);
        assert_eq!(explore.security_rules.len(), 1);
        assert_eq!(
            explore.default_preset.as_ref().unwrap().time_range.as_deref(),
            Some("P7D")
        );
    }

    #[test]
    fn test_listed_time_dimension_is_not_prepended() {
        let parser = parse_files(&[(
            "/metrics/sales.yaml",
            "version: 1\ntype: metrics_view\nmodel: orders\ntimeseries: created_at\ndimensions: [{column: country}, {column: created_at}]\nmeasures: [{name: total, expression: SUM(amount)}]",
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let names: Vec<String> = mv(&parser, "sales").dimensions.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["country", "created_at"]);
    }

    #[test]
    fn test_inline_explore() {
        let parser = parse_files(&[(
            "/metrics/sales.yaml",
            r#"
version: 1
type: metrics_view
model: orders
dimensions: [{column: country}]
measures: [{name: total, expression: SUM(amount)}]
explore:
  name: sales_explore
  theme: dark
  time_ranges: [P7D, {range: P4W, comparison_offsets: [P4W]}]
  time_zones: [UTC, Europe/Berlin]
  lock_time_zone: true
  defaults:
    measures: [total]
    time_range: P7D
"#,
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        assert!(parser.resource(&ResourceName::new(ResourceKind::MetricsView, "sales")).is_some());
        assert!(parser.resource(&ResourceName::new(ResourceKind::Explore, "sales")).is_none());

        let resource = parser
            .resource(&ResourceName::new(ResourceKind::Explore, "sales_explore"))
            .unwrap();
        assert_eq!(resource.paths, vec!["/metrics/sales.yaml"]);
        let explore = resource.spec.as_explore().unwrap();
        assert!(explore.defined_in_metrics_view);
        assert_eq!(explore.metrics_view, "sales");
        assert_eq!(explore.display_name, "Sales Explore");
        assert_eq!(explore.theme, "dark");
        assert_eq!(explore.time_ranges.len(), 2);
        assert_eq!(explore.time_zones, vec!["UTC", "Europe/Berlin"]);
        assert!(explore.lock_time_zone);
        assert!(explore.allow_custom_time_range);
        let preset = explore.default_preset.as_ref().unwrap();
        assert_eq!(preset.time_range.as_deref(), Some("P7D"));
        assert!(preset.measures.is_some());
    }

    #[test]
    fn test_inline_explore_skip() {
        let parser = parse_files(&[(
            "/dashboards/sales.yaml",
            "model: orders\nmeasures: [{expression: COUNT(*)}]\nexplore:\n  skip: true",
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        assert!(parser.resource(&ResourceName::new(ResourceKind::MetricsView, "sales")).is_some());
        assert!(parser.resource(&ResourceName::new(ResourceKind::Explore, "sales")).is_none());
    }

    #[test]
    fn test_inline_explore_name_collision_rejects_metrics_view() {
        let parser = parse_files(&[
            ("/connectors/sales_explore.yaml", "type: connector\ndriver: duckdb"),
            (
                "/metrics/sales.yaml",
                "version: 1\ntype: metrics_view\nmodel: orders\nmeasures: [{expression: COUNT(*)}]\nexplore:\n  name: sales_explore",
            ),
        ]);
        assert_eq!(parser.errors().len(), 1, "{:?}", parser.errors());
        assert_eq!(parser.errors()[0].path, "/metrics/sales.yaml");
        assert!(parser.resource(&ResourceName::new(ResourceKind::MetricsView, "sales")).is_none());
    }

    #[test]
    fn test_legacy_metrics_view_yields_to_defined_explore() {
        let parser = parse_files(&[
            ("/explores/sales.yaml", "type: explore\nmetrics_view: sales"),
            ("/metrics/sales.yaml", "type: metrics_view\nmodel: orders\nmeasures: [{expression: COUNT(*)}]"),
        ]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        assert!(parser.resource(&ResourceName::new(ResourceKind::MetricsView, "sales")).is_some());
        let explore = parser
            .resource(&ResourceName::new(ResourceKind::Explore, "sales"))
            .unwrap();
        assert_eq!(explore.paths, vec!["/explores/sales.yaml"]);
        assert!(!explore.spec.as_explore().unwrap().defined_in_metrics_view);
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "version: 1\ntype: metrics_view\nmodel: m\ntable: t\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m",
            "version: 1\ntype: metrics_view\nmodel: m\ndimensions: [{column: a}]\nmeasures: [{name: A, expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\nmeasures: [{name: x, expression: y * 2, type: derived}, {name: y, expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\nmeasures: [{name: x, expression: COUNT(*), per: [missing]}]",
            "version: 1\ntype: metrics_view\nmodel: m\ndimensions: [{name: a, column: a, expression: a}]\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\ndimensions: [{column: a, lookup_table: t}]\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\nfirst_day_of_week: 8\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\nmeasures: [{expression: COUNT(*), format_preset: humanize, format_d3: '.2f'}]",
            "version: 1\ntype: metrics_view\nmodel: m\ndefault_time_range: P1D\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\ntimeseries: ts\ndimensions: [{column: ts}, {name: ts, expression: now()}]\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\ntimeseries: ts\ndimensions: [{column: TS}]\nmeasures: [{expression: COUNT(*)}]",
            "version: 1\ntype: metrics_view\nmodel: m\ntimeseries: ts\nmeasures: [{name: ts, expression: COUNT(*)}]",
            "type: metrics_view\nmodel: m\ndefault_time_range: P1D\nmeasures: [{expression: COUNT(*)}]\nexplore:\n  name: e",
        ];
        let files: Vec<(String, &str)> = cases
            .iter()
            .enumerate()
            .map(|(i, c)| (format!("/metrics/mv{i}.yaml"), *c))
            .collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), *c)).collect();
        let parser = parse_files(&refs);
        assert_eq!(parser.errors().len(), cases.len(), "{:?}", parser.errors());
        assert!(parser.resources().is_empty());
    }
}
