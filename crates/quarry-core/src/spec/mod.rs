//! Kind-specific resource specifications
//!
//! [`ResourceSpec`] is a closed sum over every [`ResourceKind`]. A resource's
//! variant is chosen when it is created and never changes afterwards.

mod canvas;
mod connector;
mod metrics;
mod model;
mod notify;

pub use canvas::{
    CanvasItem, CanvasPreset, CanvasRow, CanvasSpec, ChartSpec, Color, ComponentSpec,
    ComponentVariable, DashboardItem, DashboardSpec, ThemeSpec,
};
pub use connector::{ApiSpec, ConnectorSpec};
pub use metrics::{
    CacheConfig, ComparisonMode, ComparisonTimeRange, Dimension, DimensionSelector, DimensionType,
    ExplorePreset, ExploreSpec, ExploreTimeRange, Measure, MeasureType, MeasureWindow,
    MetricsViewSpec,
};
pub use model::{
    MigrationSpec, ModelChangeMode, ModelSpec, ModelTest, RetryPolicy, Schedule, SourceSpec,
};
pub use notify::{AlertSpec, ExportFormat, Notifier, QueryFor, ReportSpec};

use serde::Serialize;

use crate::resource::ResourceKind;

/// Free-form properties carried by a spec
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Exactly one populated specification per resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "spec")]
#[allow(missing_docs)]
pub enum ResourceSpec {
    Source(SourceSpec),
    Model(ModelSpec),
    MetricsView(MetricsViewSpec),
    Explore(ExploreSpec),
    Migration(MigrationSpec),
    Report(ReportSpec),
    Alert(AlertSpec),
    Theme(ThemeSpec),
    Component(ComponentSpec),
    Canvas(CanvasSpec),
    Api(ApiSpec),
    Connector(ConnectorSpec),
    Dashboard(DashboardSpec),
    Chart(ChartSpec),
}

impl ResourceSpec {
    /// Zero-valued spec for a kind
    pub fn empty(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Source => ResourceSpec::Source(SourceSpec::default()),
            ResourceKind::Model => ResourceSpec::Model(ModelSpec::default()),
            ResourceKind::MetricsView => ResourceSpec::MetricsView(MetricsViewSpec::default()),
            ResourceKind::Explore => ResourceSpec::Explore(ExploreSpec::default()),
            ResourceKind::Migration => ResourceSpec::Migration(MigrationSpec::default()),
            ResourceKind::Report => ResourceSpec::Report(ReportSpec::default()),
            ResourceKind::Alert => ResourceSpec::Alert(AlertSpec::default()),
            ResourceKind::Theme => ResourceSpec::Theme(ThemeSpec::default()),
            ResourceKind::Component => ResourceSpec::Component(ComponentSpec::default()),
            ResourceKind::Canvas => ResourceSpec::Canvas(CanvasSpec::default()),
            ResourceKind::Api => ResourceSpec::Api(ApiSpec::default()),
            ResourceKind::Connector => ResourceSpec::Connector(ConnectorSpec::default()),
            ResourceKind::Dashboard => ResourceSpec::Dashboard(DashboardSpec::default()),
            ResourceKind::Chart => ResourceSpec::Chart(ChartSpec::default()),
        }
    }

    /// Kind of the populated variant
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Source(_) => ResourceKind::Source,
            ResourceSpec::Model(_) => ResourceKind::Model,
            ResourceSpec::MetricsView(_) => ResourceKind::MetricsView,
            ResourceSpec::Explore(_) => ResourceKind::Explore,
            ResourceSpec::Migration(_) => ResourceKind::Migration,
            ResourceSpec::Report(_) => ResourceKind::Report,
            ResourceSpec::Alert(_) => ResourceKind::Alert,
            ResourceSpec::Theme(_) => ResourceKind::Theme,
            ResourceSpec::Component(_) => ResourceKind::Component,
            ResourceSpec::Canvas(_) => ResourceKind::Canvas,
            ResourceSpec::Api(_) => ResourceKind::Api,
            ResourceSpec::Connector(_) => ResourceKind::Connector,
            ResourceSpec::Dashboard(_) => ResourceKind::Dashboard,
            ResourceSpec::Chart(_) => ResourceKind::Chart,
        }
    }
}

macro_rules! spec_accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident;)*) => {
        impl ResourceSpec {
            $(
                #[doc = concat!("Borrow the spec as a [`", stringify!($ty), "`]")]
                pub fn $get(&self) -> Option<&$ty> {
                    match self {
                        ResourceSpec::$variant(spec) => Some(spec),
                        _ => None,
                    }
                }

                #[doc = concat!("Mutably borrow the spec as a [`", stringify!($ty), "`]")]
                pub fn $get_mut(&mut self) -> Option<&mut $ty> {
                    match self {
                        ResourceSpec::$variant(spec) => Some(spec),
                        _ => None,
                    }
                }
            )*
        }
    };
}

spec_accessors! {
    Source => SourceSpec, as_source, as_source_mut;
    Model => ModelSpec, as_model, as_model_mut;
    MetricsView => MetricsViewSpec, as_metrics_view, as_metrics_view_mut;
    Explore => ExploreSpec, as_explore, as_explore_mut;
    Migration => MigrationSpec, as_migration, as_migration_mut;
    Report => ReportSpec, as_report, as_report_mut;
    Alert => AlertSpec, as_alert, as_alert_mut;
    Theme => ThemeSpec, as_theme, as_theme_mut;
    Component => ComponentSpec, as_component, as_component_mut;
    Canvas => CanvasSpec, as_canvas, as_canvas_mut;
    Api => ApiSpec, as_api, as_api_mut;
    Connector => ConnectorSpec, as_connector, as_connector_mut;
    Dashboard => DashboardSpec, as_dashboard, as_dashboard_mut;
    Chart => ChartSpec, as_chart, as_chart_mut;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_spec_matches_kind() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceSpec::empty(kind).kind(), kind);
        }
    }

    #[test]
    fn test_accessors() {
        let mut spec = ResourceSpec::empty(ResourceKind::Model);
        assert!(spec.as_model().is_some());
        assert!(spec.as_source().is_none());
        spec.as_model_mut().unwrap().materialize = Some(true);
        assert_eq!(spec.as_model().unwrap().materialize, Some(true));
    }
}
