//! Source, model and migration specs

use serde::Serialize;

use super::Properties;

/// When a resource should be refreshed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schedule {
    /// Refresh whenever a referenced resource refreshes
    pub ref_update: bool,
    /// Cron expression
    pub cron: String,
    /// Fixed interval in seconds
    pub ticker_seconds: u32,
    /// Time zone for the cron expression
    pub time_zone: String,
    /// Schedule is turned off
    pub disable: bool,
}

/// Data ingested through a connector into the OLAP connector
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceSpec {
    /// Connector the data is read from
    pub source_connector: String,
    /// Connector the data is written to
    pub sink_connector: String,
    /// Connector-specific properties
    pub properties: Properties,
    /// Timeout in seconds (0 means unset)
    pub timeout_seconds: u32,
    /// Refresh schedule
    pub refresh_schedule: Option<Schedule>,
}

/// How a model reacts to changes of its own definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelChangeMode {
    /// Drop and rebuild
    #[default]
    Reset,
    /// Leave the data until the next manual refresh
    Manual,
    /// Apply the new definition to new data only
    Patch,
}

/// Retry behavior for failed model executions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Maximum attempts
    pub attempts: u32,
    /// Delay between attempts in seconds
    pub delay_seconds: u32,
    /// Double the delay after each attempt
    pub exponential_backoff: bool,
    /// Only retry errors matching one of these regular expressions
    pub if_error_matches: Vec<String>,
}

/// A data test attached to a model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModelTest {
    /// Test name
    pub name: String,
    /// Resolver that runs the test
    pub resolver: String,
    /// Query that must return no rows
    pub sql: String,
}

/// SQL transformation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelSpec {
    /// Refresh schedule
    pub refresh_schedule: Option<Schedule>,
    /// Timeout in seconds (0 means unset)
    pub timeout_seconds: u32,
    /// Model is incremental
    pub incremental: bool,
    /// Resolver for incremental state
    pub state_resolver: String,
    /// Properties for the state resolver
    pub state_resolver_properties: Properties,
    /// Resolver producing partitions
    pub partitions_resolver: String,
    /// Properties for the partitions resolver
    pub partitions_resolver_properties: Properties,
    /// Field used as partition watermark
    pub partitions_watermark_field: String,
    /// Maximum partitions processed concurrently
    pub partitions_concurrency_limit: u32,
    /// Connector executing the input
    pub input_connector: String,
    /// Input properties, including `sql`
    pub input_properties: Properties,
    /// Optional staging connector
    pub stage_connector: String,
    /// Staging properties
    pub stage_properties: Properties,
    /// Connector receiving the output
    pub output_connector: String,
    /// Output properties
    pub output_properties: Properties,
    /// Whether the output should be materialized (unset leaves it to the connector)
    pub materialize: Option<bool>,
    /// Change handling
    pub change_mode: ModelChangeMode,
    /// Retry policy
    pub retry: Option<RetryPolicy>,
    /// Data tests
    pub tests: Vec<ModelTest>,
    /// Model was declared as a source
    pub defined_as_source: bool,
}

/// One-off SQL executed against a connector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSpec {
    /// Connector the SQL runs on
    pub connector: String,
    /// Statement text
    pub sql: String,
    /// Migration version
    pub version: u32,
}
