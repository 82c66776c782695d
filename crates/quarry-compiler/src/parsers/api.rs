//! API parser

use quarry_core::security::{self, SecurityOptions, SecurityPolicyYaml};
use quarry_core::spec::ApiSpec;
use quarry_core::{Properties, ResourceKind, yaml};
use serde::Deserialize;
use serde_yaml::Value;

use super::{DataYaml, ParseContext, Resolver, decode, template_refs};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiYaml {
    #[serde(default)]
    data: Option<DataYaml>,
    #[serde(default)]
    metrics_sql: Option<String>,
    #[serde(default)]
    openapi: Option<OpenApiYaml>,
    #[serde(default)]
    security: Option<SecurityPolicyYaml>,
    #[serde(default)]
    skip_nested_security: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OpenApiYaml {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    request_schema: Option<Value>,
    #[serde(default)]
    response_schema: Option<Value>,
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    let yaml: ApiYaml = decode(&node.yaml)?;

    let declared = [yaml.data.is_some(), !node.sql.is_empty(), yaml.metrics_sql.is_some()]
        .into_iter()
        .filter(|set| *set)
        .count();
    if declared != 1 {
        return Err(Error::invalid("api must declare exactly one of data, sql or metrics_sql"));
    }
    if !node.connector_inferred && node.sql.is_empty() {
        return Err(Error::invalid("api can only set a connector together with sql"));
    }

    let resolver = if let Some(data) = &yaml.data {
        data.resolve()?
    } else if let Some(sql) = &yaml.metrics_sql {
        let mut properties = Properties::new();
        properties.insert("sql".into(), sql.clone().into());
        Resolver {
            name: "metrics_sql".into(),
            properties,
            refs: template_refs(sql)?,
        }
    } else {
        let mut properties = Properties::new();
        properties.insert("sql".into(), node.sql.clone().into());
        if !node.connector_inferred {
            properties.insert("connector".into(), node.connector.clone().into());
        }
        Resolver {
            name: "sql".into(),
            properties,
            refs: Vec::new(),
        }
    };

    let openapi = yaml.openapi.unwrap_or_default();
    if let Some(params) = &openapi.parameters
        && !params.is_sequence()
    {
        return Err(Error::invalid("openapi.parameters must be a list"));
    }
    for (key, schema) in [
        ("request_schema", &openapi.request_schema),
        ("response_schema", &openapi.response_schema),
    ] {
        if let Some(schema) = schema
            && !schema.is_mapping()
        {
            return Err(Error::invalid(format!("openapi.{key} must be a mapping")));
        }
    }

    let security_rules = match &yaml.security {
        Some(policy) => security::compile(policy, SecurityOptions { access_only: true })?.rules,
        None => Vec::new(),
    };

    let spec = ApiSpec {
        resolver: resolver.name,
        resolver_properties: resolver.properties,
        openapi_summary: openapi.summary.unwrap_or_default(),
        openapi_parameters_json: json_string(openapi.parameters)?,
        openapi_request_schema_json: json_string(openapi.request_schema)?,
        openapi_response_schema_json: json_string(openapi.response_schema)?,
        security_rules,
        skip_nested_security: yaml.skip_nested_security,
    };

    let resource = ctx.registry.insert(ResourceKind::Api, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(resolver.refs);
    if let Some(api) = resource.spec.as_api_mut() {
        *api = spec;
    }
    Ok(())
}

fn json_string(value: Option<Value>) -> Result<String> {
    match value {
        Some(value) => Ok(yaml::to_json(value)?.to_string()),
        None => Ok(String::new()),
    }
}
