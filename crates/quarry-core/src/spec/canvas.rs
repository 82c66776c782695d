//! Canvas, component, theme and legacy dashboard specs

use serde::Serialize;

use super::metrics::{ComparisonMode, ExploreTimeRange};
use super::Properties;
use crate::security::SecurityRule;

/// RGBA color with channels in `0.0..=1.0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

/// Colors and styling
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThemeSpec {
    /// Parsed primary color
    pub primary_color: Option<Color>,
    /// Parsed secondary color
    pub secondary_color: Option<Color>,
    /// Primary color as written
    pub primary_color_raw: String,
    /// Secondary color as written
    pub secondary_color_raw: String,
    /// Extra CSS
    pub css: String,
}

/// Input or output variable of a component or canvas
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentVariable {
    /// Variable name
    pub name: String,
    /// Variable type
    #[serde(rename = "type")]
    pub variable_type: String,
    /// Default value
    pub default_value: serde_json::Value,
}

/// Visual building block
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentSpec {
    /// Title
    pub display_name: String,
    /// Description
    pub description: String,
    /// Renderer identifier (`kpi`, `markdown`, `vega_lite`, ...)
    pub renderer: String,
    /// Renderer properties
    pub renderer_properties: Properties,
    /// Input variables
    pub input: Vec<ComponentVariable>,
    /// Output variable
    pub output: Option<ComponentVariable>,
    /// Component was declared inline in a canvas
    pub defined_in_canvas: bool,
}

/// One item in a canvas row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanvasItem {
    /// Component name
    pub component: String,
    /// Component was declared inline
    pub defined_in_canvas: bool,
    /// Width in grid units
    pub width: Option<u32>,
    /// Unit of the width
    pub width_unit: String,
}

/// One row of a canvas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CanvasRow {
    /// Height value
    pub height: Option<u32>,
    /// Unit of the height
    pub height_unit: String,
    /// Items in the row
    pub items: Vec<CanvasItem>,
}

/// Default state of a canvas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct CanvasPreset {
    pub time_range: Option<String>,
    pub comparison_mode: ComparisonMode,
    pub comparison_dimension: Option<String>,
}

/// Grid of components
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct CanvasSpec {
    pub display_name: String,
    pub banner: String,
    pub max_width: u32,
    pub gap_x: u32,
    pub gap_y: u32,
    pub theme: String,
    pub embedded_theme: Option<ThemeSpec>,
    pub time_ranges: Vec<ExploreTimeRange>,
    pub time_zones: Vec<String>,
    pub allow_custom_time_range: bool,
    pub filters_enabled: bool,
    pub pinned_filters: Vec<String>,
    pub default_preset: Option<CanvasPreset>,
    pub variables: Vec<ComponentVariable>,
    pub rows: Vec<CanvasRow>,
    pub security_rules: Vec<SecurityRule>,
}

/// Item placed on a legacy dashboard grid
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct DashboardItem {
    pub component: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Legacy custom dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct DashboardSpec {
    pub display_name: String,
    pub columns: u32,
    pub gap: u32,
    pub items: Vec<DashboardItem>,
}

/// Legacy chart
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct ChartSpec {
    pub display_name: String,
    pub resolver: String,
    pub resolver_properties: Properties,
    pub vega_lite_spec: String,
}
