//! Alert and report specs

use serde::Serialize;
use std::collections::BTreeMap;

use super::model::Schedule;
use super::Properties;

/// Destination for notifications
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Notifier {
    /// Notifier connector (`email`, `slack`)
    pub connector: String,
    /// Connector-specific properties (recipients, channels, ...)
    pub properties: Properties,
}

/// Identity an alert query runs as
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFor {
    /// Run as a user ID
    UserId(String),
    /// Run as a user email
    UserEmail(String),
    /// Run with explicit attributes
    Attributes(Properties),
}

/// File format of a report export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Unspecified
    #[default]
    Unspecified,
    /// Comma separated values
    Csv,
    /// Excel workbook
    Xlsx,
    /// Parquet file
    Parquet,
}

/// Scheduled check with notifications
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct AlertSpec {
    pub display_name: String,
    pub refresh_schedule: Option<Schedule>,
    pub watermark_inherit: bool,
    pub intervals_iso_duration: String,
    pub intervals_limit: u32,
    pub intervals_check_unclosed: bool,
    pub timeout_seconds: u32,
    pub resolver: String,
    pub resolver_properties: Properties,
    pub query_for: Option<QueryFor>,
    pub notify_on_recover: bool,
    pub notify_on_fail: bool,
    pub notify_on_error: bool,
    pub renotify: bool,
    pub renotify_after_seconds: u32,
    pub notifiers: Vec<Notifier>,
    pub annotations: BTreeMap<String, String>,
}

/// Scheduled export
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct ReportSpec {
    pub display_name: String,
    pub refresh_schedule: Option<Schedule>,
    pub watermark_inherit: bool,
    pub intervals_iso_duration: String,
    pub intervals_limit: u32,
    pub intervals_check_unclosed: bool,
    pub timeout_seconds: u32,
    pub query_name: String,
    pub query_args_json: String,
    pub export_format: ExportFormat,
    pub export_include_header: bool,
    pub export_limit: u64,
    pub notifiers: Vec<Notifier>,
    pub annotations: BTreeMap<String, String>,
}
