//! Resource identity
//!
//! Every compiled resource is identified by a [`ResourceName`]: a closed
//! [`ResourceKind`] plus a name. Names compare case-insensitively but keep
//! their original casing for display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Kind of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Data ingested from an external connector
    Source,
    /// SQL transformation
    Model,
    /// Dimensions and measures over a model or table
    MetricsView,
    /// Explorable dashboard over a metrics view
    Explore,
    /// One-off SQL run against a connector
    Migration,
    /// Scheduled export
    Report,
    /// Scheduled check with notifications
    Alert,
    /// Colors and styling
    Theme,
    /// Visual building block of a canvas
    Component,
    /// Grid of components
    Canvas,
    /// Custom HTTP endpoint
    Api,
    /// Connector configuration
    Connector,
    /// Legacy custom dashboard
    Dashboard,
    /// Legacy chart
    Chart,
}

impl ResourceKind {
    /// All kinds, in the order untyped references are resolved
    pub const ALL: [ResourceKind; 14] = [
        ResourceKind::Source,
        ResourceKind::Model,
        ResourceKind::MetricsView,
        ResourceKind::Explore,
        ResourceKind::Migration,
        ResourceKind::Report,
        ResourceKind::Alert,
        ResourceKind::Theme,
        ResourceKind::Component,
        ResourceKind::Canvas,
        ResourceKind::Api,
        ResourceKind::Connector,
        ResourceKind::Dashboard,
        ResourceKind::Chart,
    ];

    /// Canonical display string
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Source => "Source",
            ResourceKind::Model => "Model",
            ResourceKind::MetricsView => "MetricsView",
            ResourceKind::Explore => "Explore",
            ResourceKind::Migration => "Migration",
            ResourceKind::Report => "Report",
            ResourceKind::Alert => "Alert",
            ResourceKind::Theme => "Theme",
            ResourceKind::Component => "Component",
            ResourceKind::Canvas => "Canvas",
            ResourceKind::Api => "API",
            ResourceKind::Connector => "Connector",
            ResourceKind::Dashboard => "Dashboard",
            ResourceKind::Chart => "Chart",
        }
    }

    /// Lowercase identifier used in messages
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Source => "source",
            ResourceKind::Model => "model",
            ResourceKind::MetricsView => "metrics view",
            ResourceKind::Explore => "explore",
            ResourceKind::Migration => "migration",
            ResourceKind::Report => "report",
            ResourceKind::Alert => "alert",
            ResourceKind::Theme => "theme",
            ResourceKind::Component => "component",
            ResourceKind::Canvas => "canvas",
            ResourceKind::Api => "api",
            ResourceKind::Connector => "connector",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::Chart => "chart",
        }
    }

    /// Whether two kinds may share a name.
    ///
    /// A legacy metrics view emits an explore under its own name, so that
    /// pair is the only exception to cross-kind name uniqueness.
    pub fn may_share_name(self, other: ResourceKind) -> bool {
        self == other
            || matches!(
                (self, other),
                (ResourceKind::MetricsView, ResourceKind::Explore)
                    | (ResourceKind::Explore, ResourceKind::MetricsView)
            )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        let kind = match normalized.as_str() {
            "source" | "sources" => ResourceKind::Source,
            "model" | "models" => ResourceKind::Model,
            "metricsview" | "metrics_view" | "metrics_views" | "metrics" => ResourceKind::MetricsView,
            "explore" | "explores" => ResourceKind::Explore,
            "migration" | "migrations" => ResourceKind::Migration,
            "report" | "reports" => ResourceKind::Report,
            "alert" | "alerts" => ResourceKind::Alert,
            "theme" | "themes" => ResourceKind::Theme,
            "component" | "components" => ResourceKind::Component,
            "canvas" | "canvases" | "canvas_dashboard" => ResourceKind::Canvas,
            "api" | "apis" => ResourceKind::Api,
            "connector" | "connectors" => ResourceKind::Connector,
            "dashboard" | "dashboards" | "custom_dashboard" => ResourceKind::Dashboard,
            "chart" | "charts" => ResourceKind::Chart,
            _ => {
                return Err(Error::InvalidKind {
                    kind: s.to_string(),
                });
            }
        };
        Ok(kind)
    }
}

/// Typed identity of a resource
///
/// Equality and hashing use the normalized (lowercase) name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceName {
    /// Resource kind
    pub kind: ResourceKind,
    /// Name as declared
    pub name: String,
}

impl ResourceName {
    /// Create a new resource name
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Normalized key used for map lookups
    pub fn normalized(&self) -> (ResourceKind, String) {
        (self.kind, self.name.to_lowercase())
    }
}

impl PartialEq for ResourceName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for ResourceName {}

impl Hash for ResourceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.name.to_lowercase().hash(state);
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A dependency edge as written by the user
///
/// The kind is absent when the reference comes from a template `ref` call
/// with a single argument or from a table name in SQL. Untyped references
/// are linked to concrete resources after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Declared kind, if any
    pub kind: Option<ResourceKind>,
    /// Referenced name
    pub name: String,
}

impl ResourceRef {
    /// Reference with a known kind
    pub fn typed(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            name: name.into(),
        }
    }

    /// Reference to be resolved by name
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            kind: None,
            name: name.into(),
        }
    }

    /// Parse `name` or `Kind/name`
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((kind, name)) => {
                let kind: ResourceKind = kind.parse()?;
                Ok(Self::typed(kind, name.trim()))
            }
            None => Ok(Self::untyped(s.trim())),
        }
    }

    /// Convert into a [`ResourceName`] if the kind is known
    pub fn to_name(&self) -> Option<ResourceName> {
        self.kind.map(|kind| ResourceName::new(kind, self.name.clone()))
    }
}

impl From<ResourceName> for ResourceRef {
    fn from(n: ResourceName) -> Self {
        Self::typed(n.kind, n.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{}/{}", kind, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Derive a human readable title from an identifier (`total_sales` -> `Total Sales`)
pub fn to_display_name(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
