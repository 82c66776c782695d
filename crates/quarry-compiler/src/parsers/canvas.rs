//! Canvas parser
//!
//! Row items either name a component or declare one inline. Inline components
//! become their own resources named `<canvas>--component-<row>-<item>` and are
//! committed after the canvas itself.

use quarry_core::security::{self, SecurityOptions, SecurityPolicyYaml};
use quarry_core::spec::{CanvasItem, CanvasPreset, CanvasRow, CanvasSpec, ComponentSpec};
use quarry_core::{ResourceKind, ResourceRef, timeutil};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::component::{VariableYaml, component_spec};
use super::theme::theme_ref;
use super::{ParseContext, TimeRangeYaml, comparison, decode, reject_sql_and_connector, time_ranges, time_zones};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CanvasYaml {
    #[serde(default, alias = "title")]
    display_name: Option<String>,
    #[serde(default)]
    banner: Option<String>,
    #[serde(default)]
    max_width: u32,
    #[serde(default)]
    gap_x: u32,
    #[serde(default)]
    gap_y: u32,
    #[serde(default)]
    theme: Option<Value>,
    #[serde(default)]
    time_ranges: Vec<TimeRangeYaml>,
    #[serde(default)]
    time_zones: Vec<String>,
    #[serde(default)]
    allow_custom_time_range: Option<bool>,
    #[serde(default)]
    filters: Option<FiltersYaml>,
    #[serde(default)]
    defaults: Option<DefaultsYaml>,
    #[serde(default)]
    variables: Vec<VariableYaml>,
    #[serde(default)]
    rows: Vec<RowYaml>,
    #[serde(default)]
    security: Option<SecurityPolicyYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FiltersYaml {
    #[serde(default)]
    enable: Option<bool>,
    #[serde(default)]
    pinned: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefaultsYaml {
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    comparison_mode: Option<String>,
    #[serde(default)]
    comparison_dimension: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RowYaml {
    #[serde(default)]
    height: Option<Value>,
    #[serde(default)]
    items: Vec<Mapping>,
}

/// Inline component waiting to be committed
struct InlineComponent {
    name: String,
    spec: ComponentSpec,
    refs: Vec<ResourceRef>,
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let yaml: CanvasYaml = decode(&node.yaml)?;

    let mut refs = Vec::new();
    let (theme, embedded_theme) = match &yaml.theme {
        Some(value) => theme_ref(value)?,
        None => (String::new(), None),
    };
    if !theme.is_empty() {
        refs.push(ResourceRef::typed(ResourceKind::Theme, theme.clone()));
    }

    let mut inline = Vec::new();
    let mut rows = Vec::with_capacity(yaml.rows.len());
    for (row_index, row) in yaml.rows.iter().enumerate() {
        let (height, height_unit) = match &row.height {
            Some(value) => parse_height(value)?,
            None => (None, String::new()),
        };
        let mut items = Vec::with_capacity(row.items.len());
        for (item_index, item) in row.items.iter().enumerate() {
            let mut item = item.clone();
            let width = item.remove("width").map(|w| parse_width(&w)).transpose()?;

            let canvas_item = match item.remove("component") {
                Some(Value::String(component)) => {
                    if !item.is_empty() {
                        return Err(Error::invalid(format!(
                            "row {row_index} item {item_index} cannot name a component and declare one inline"
                        )));
                    }
                    CanvasItem {
                        component,
                        defined_in_canvas: false,
                        width,
                        width_unit: String::new(),
                    }
                }
                Some(_) => return Err(Error::invalid("component must be a component name")),
                None => {
                    let (spec, component_refs) = component_spec(&item, true)?;
                    let name = inline_name(ctx, &node.name, row_index, item_index)?;
                    inline.push(InlineComponent {
                        name: name.clone(),
                        spec,
                        refs: component_refs,
                    });
                    CanvasItem {
                        component: name,
                        defined_in_canvas: true,
                        width,
                        width_unit: String::new(),
                    }
                }
            };
            refs.push(ResourceRef::typed(ResourceKind::Component, canvas_item.component.clone()));
            items.push(canvas_item);
        }
        rows.push(CanvasRow {
            height,
            height_unit,
            items,
        });
    }

    let default_preset = match &yaml.defaults {
        Some(defaults) => {
            if let Some(range) = &defaults.time_range {
                timeutil::validate_iso8601(range)?;
            }
            Some(CanvasPreset {
                time_range: defaults.time_range.clone(),
                comparison_mode: comparison(
                    defaults.comparison_mode.as_deref(),
                    defaults.comparison_dimension.as_deref(),
                )?,
                comparison_dimension: defaults.comparison_dimension.clone(),
            })
        }
        None => None,
    };

    let security_rules = match &yaml.security {
        Some(policy) => security::compile(policy, SecurityOptions { access_only: true })?.rules,
        None => Vec::new(),
    };
    let filters = yaml.filters.unwrap_or_default();

    let spec = CanvasSpec {
        display_name: yaml.display_name.unwrap_or_default(),
        banner: yaml.banner.unwrap_or_default(),
        max_width: yaml.max_width,
        gap_x: yaml.gap_x,
        gap_y: yaml.gap_y,
        theme,
        embedded_theme,
        time_ranges: time_ranges(&yaml.time_ranges)?,
        time_zones: time_zones(&yaml.time_zones)?,
        allow_custom_time_range: yaml.allow_custom_time_range.unwrap_or(true),
        filters_enabled: filters.enable.unwrap_or(true),
        pinned_filters: filters.pinned,
        default_preset,
        variables: yaml
            .variables
            .iter()
            .map(VariableYaml::to_variable)
            .collect::<Result<_>>()?,
        rows,
        security_rules,
    };

    let resource = ctx.registry.insert(ResourceKind::Canvas, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(refs);
    if let Some(canvas) = resource.spec.as_canvas_mut() {
        *canvas = spec;
    }

    for component in inline {
        match ctx.registry.insert(ResourceKind::Component, &component.name, &node.path) {
            Ok(resource) => {
                resource.add_refs(component.refs);
                if let Some(spec) = resource.spec.as_component_mut() {
                    *spec = component.spec;
                }
            }
            Err(e) => tracing::warn!(
                path = %node.path,
                component = %component.name,
                error = %e,
                "Failed to commit inline component"
            ),
        }
    }
    Ok(())
}

/// Name for an inline component, salted when the plain name is taken
fn inline_name(ctx: &ParseContext<'_>, canvas: &str, row: usize, item: usize) -> Result<String> {
    let name = format!("{canvas}--component-{row}-{item}");
    if ctx.registry.dry_run_insert(ResourceKind::Component, &name).is_ok() {
        return Ok(name);
    }
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let salted = format!("{name}-{}", &salt[..8]);
    ctx.registry.dry_run_insert(ResourceKind::Component, &salted)?;
    Ok(salted)
}

/// Row height: a pixel value such as `240px` or a bare number of pixels
fn parse_height(value: &Value) -> Result<(Option<u32>, String)> {
    let invalid = || Error::invalid(format!("invalid row height {value:?}, expected a value like '240px'"));
    match value {
        Value::Number(n) => {
            let n = n.as_u64().and_then(|n| u32::try_from(n).ok()).ok_or_else(invalid)?;
            Ok((Some(n), "px".into()))
        }
        Value::String(s) => {
            let digits = s.trim().strip_suffix("px").ok_or_else(invalid)?;
            let n = digits.trim().parse::<u32>().map_err(|_| invalid())?;
            Ok((Some(n), "px".into()))
        }
        _ => Err(invalid()),
    }
}

/// Item width in grid units
fn parse_width(value: &Value) -> Result<u32> {
    let invalid = || Error::invalid(format!("invalid item width {value:?}, expected a unitless number"));
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).ok_or_else(invalid),
        Value::String(s) => s.trim().parse::<u32>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::parse_files;
    use quarry_core::ResourceName;
    use rstest::rstest;

    const CANVAS: &str = r##"
type: canvas
title: Overview
max_width: 1200
filters:
  pinned: [country]
defaults:
  time_range: P30D
rows:
  - height: 240px
    items:
      - component: revenue
        width: 6
      - width: 6
        markdown:
          content: "# Notes"
  - items:
      - kpi:
          metrics_view: sales
          measure: total
"##;

    #[test]
    fn test_canvas_with_inline_components() {
        let parser = parse_files(&[
            ("/components/revenue.yaml", "type: component\nkpi:\n  metrics_view: sales"),
            ("/canvases/overview.yaml", CANVAS),
        ]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());

        let canvas = parser
            .resource(&ResourceName::new(ResourceKind::Canvas, "overview"))
            .unwrap();
        let spec = canvas.spec.as_canvas().unwrap();
        assert_eq!(spec.display_name, "Overview");
        assert!(spec.filters_enabled);
        assert_eq!(spec.pinned_filters, vec!["country"]);
        assert_eq!(spec.rows[0].height, Some(240));
        assert_eq!(spec.rows[0].height_unit, "px");
        assert_eq!(spec.rows[0].items[0].component, "revenue");
        assert_eq!(spec.rows[0].items[1].component, "overview--component-0-1");
        assert!(spec.rows[0].items[1].defined_in_canvas);
        assert_eq!(spec.rows[1].items[0].component, "overview--component-1-0");
        assert!(canvas.refs.contains(&ResourceName::new(ResourceKind::Component, "revenue")));
        assert!(
            canvas
                .refs
                .contains(&ResourceName::new(ResourceKind::Component, "overview--component-0-1"))
        );

        let inline = parser
            .resource(&ResourceName::new(ResourceKind::Component, "overview--component-1-0"))
            .unwrap();
        assert_eq!(inline.paths, vec!["/canvases/overview.yaml"]);
        let inline = inline.spec.as_component().unwrap();
        assert!(inline.defined_in_canvas);
        assert_eq!(inline.renderer, "kpi");
    }

    #[test]
    fn test_inline_component_name_is_salted_when_taken() {
        let parser = parse_files(&[
            (
                "/a.yaml",
                "type: component\nname: overview--component-0-1\nmarkdown:\n  content: taken",
            ),
            ("/components/revenue.yaml", "type: component\nkpi:\n  metrics_view: sales"),
            ("/canvases/overview.yaml", CANVAS),
        ]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());

        let canvas = parser
            .resource(&ResourceName::new(ResourceKind::Canvas, "overview"))
            .unwrap();
        let component = &canvas.spec.as_canvas().unwrap().rows[0].items[1].component;
        let salt = component.strip_prefix("overview--component-0-1-").unwrap();
        assert_eq!(salt.len(), 8);

        let inline = parser
            .resource(&ResourceName::new(ResourceKind::Component, component))
            .unwrap();
        assert_eq!(inline.paths, vec!["/canvases/overview.yaml"]);
        assert!(inline.spec.as_component().unwrap().defined_in_canvas);
        let taken = parser
            .resource(&ResourceName::new(ResourceKind::Component, "overview--component-0-1"))
            .unwrap();
        assert_eq!(taken.paths, vec!["/a.yaml"]);
    }

    #[test]
    fn test_canvas_errors_leave_no_components() {
        let parser = parse_files(&[(
            "/canvases/bad.yaml",
            "type: canvas\nrows:\n  - height: tall\n    items:\n      - markdown: {content: x}",
        )]);
        assert_eq!(parser.errors().len(), 1);
        assert!(parser.resources().is_empty());
    }

    #[rstest]
    #[case(Value::from(120), Some(120))]
    #[case(Value::from("80px"), Some(80))]
    #[case(Value::from("80em"), None)]
    fn test_parse_height(#[case] value: Value, #[case] expected: Option<u32>) {
        assert_eq!(parse_height(&value).ok().and_then(|(h, _)| h), expected);
    }

    #[test]
    fn test_width_is_unitless() {
        assert_eq!(parse_width(&Value::from(4)).unwrap(), 4);
        assert!(parse_width(&Value::from("4px")).is_err());
    }
}
