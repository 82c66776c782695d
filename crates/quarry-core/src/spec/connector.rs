//! Connector and API specs

use serde::Serialize;

use super::Properties;
use crate::security::SecurityRule;

/// Connector configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectorSpec {
    /// Driver name
    pub driver: String,
    /// Driver properties
    pub properties: Properties,
    /// Property keys whose values contain templating
    pub templated_properties: Vec<String>,
    /// Whether the connector should be provisioned
    pub provision: bool,
    /// Provisioning arguments
    pub provision_args: Properties,
}

/// Custom HTTP endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[allow(missing_docs)]
pub struct ApiSpec {
    pub resolver: String,
    pub resolver_properties: Properties,
    pub openapi_summary: String,
    pub openapi_parameters_json: String,
    pub openapi_request_schema_json: String,
    pub openapi_response_schema_json: String,
    pub security_rules: Vec<SecurityRule>,
    pub skip_nested_security: bool,
}
