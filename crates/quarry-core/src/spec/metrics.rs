//! Metrics view and explore specs

use serde::Serialize;

use super::canvas::ThemeSpec;
use super::Properties;
use crate::security::SecurityRule;
use crate::selector::FieldSelector;
use crate::timeutil::TimeGrain;

/// Whether a dimension is categorical or a timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    /// Plain categorical dimension
    #[default]
    Categorical,
    /// Time dimension
    Time,
}

/// A dimension of a metrics view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct Dimension {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub column: String,
    pub expression: String,
    pub dimension_type: DimensionType,
    pub unnest: bool,
    pub uri: String,
    pub lookup_table: String,
    pub lookup_key_column: String,
    pub lookup_value_column: String,
    pub lookup_default_expression: String,
}

/// Aggregation type of a measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureType {
    /// Plain aggregate
    #[default]
    Simple,
    /// Computed from other measures
    Derived,
    /// Compares a measure against a shifted time range
    TimeComparison,
}

/// Dimension reference with an optional time grain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DimensionSelector {
    /// Dimension name
    pub name: String,
    /// Grain for time dimensions
    pub time_grain: TimeGrain,
    /// Sort descending
    pub desc: bool,
}

/// Window function settings for a measure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MeasureWindow {
    /// Partition by the non-ordered dimensions
    pub partition: bool,
    /// Dimensions to order by
    pub order_by: Vec<DimensionSelector>,
    /// Raw frame clause
    pub frame_expression: String,
}

/// A measure of a metrics view
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct Measure {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub expression: String,
    pub measure_type: MeasureType,
    pub window: Option<MeasureWindow>,
    pub per_dimensions: Vec<DimensionSelector>,
    pub required_dimensions: Vec<DimensionSelector>,
    pub referenced_measures: Vec<String>,
    pub format_preset: String,
    pub format_d3: String,
    pub format_d3_locale: Properties,
    pub valid_percent_of_total: bool,
    pub treat_nulls_as: String,
}

/// Query result cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    /// Cache toggle (unset uses the connector default)
    pub enabled: Option<bool>,
    /// SQL returning a cache key
    pub key_sql: String,
    /// Cache key lifetime in seconds
    pub key_ttl_seconds: u32,
}

/// Comparison shown by default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// No comparison
    #[default]
    None,
    /// Compare against a previous time range
    Time,
    /// Compare dimension values
    Dimension,
}

/// Dimensions and measures over a table or model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct MetricsViewSpec {
    pub parent: String,
    pub connector: String,
    pub database: String,
    pub database_schema: String,
    pub table: String,
    pub model: String,
    pub display_name: String,
    pub description: String,
    pub ai_instructions: String,
    pub time_dimension: String,
    pub smallest_time_grain: TimeGrain,
    pub watermark_expression: String,
    pub first_day_of_week: u32,
    pub first_month_of_year: u32,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
    pub security_rules: Vec<SecurityRule>,
    pub cache: CacheConfig,
    pub default_comparison_mode: ComparisonMode,
    pub default_comparison_dimension: String,
}

/// Comparison offset for an explore time range
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonTimeRange {
    /// ISO 8601 offset
    pub offset: String,
    /// ISO 8601 range (empty means same as the base range)
    pub range: String,
}

/// Time range offered in an explore or canvas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExploreTimeRange {
    /// ISO 8601 duration
    pub range: String,
    /// Comparison offsets offered for the range
    pub comparison_time_ranges: Vec<ComparisonTimeRange>,
}

/// Default state of an explore
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct ExplorePreset {
    pub dimensions: Option<FieldSelector>,
    pub measures: Option<FieldSelector>,
    pub time_range: Option<String>,
    pub comparison_mode: ComparisonMode,
    pub comparison_dimension: Option<String>,
}

/// Explorable dashboard over a metrics view
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct ExploreSpec {
    pub display_name: String,
    pub description: String,
    pub metrics_view: String,
    pub dimensions: FieldSelector,
    pub measures: FieldSelector,
    pub theme: String,
    pub embedded_theme: Option<ThemeSpec>,
    pub time_ranges: Vec<ExploreTimeRange>,
    pub time_zones: Vec<String>,
    pub default_preset: Option<ExplorePreset>,
    pub lock_time_zone: bool,
    pub allow_custom_time_range: bool,
    pub banner: String,
    pub defined_in_metrics_view: bool,
    pub security_rules: Vec<SecurityRule>,
}
