//! Source parser
//!
//! A source reads data through a connector into the OLAP connector. A source
//! whose connector is the OLAP connector itself is really a query, and is
//! committed as a model with `defined_as_source` set.

use quarry_core::yaml;
use quarry_core::{Properties, ResourceKind};
use serde_yaml::Value;

use super::{ParseContext, ScheduleYaml, check_embedded, commit_embedded, duration_secs};
use crate::error::Result;
use crate::node::Node;
use crate::sql::embedded::connector_for_path;

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    let mut map = node.yaml.clone();
    let timeout = map.remove("timeout").map(|v| duration_secs(&v)).transpose()?;
    let refresh = match map.remove("refresh") {
        Some(v) => Some(serde_yaml::from_value::<ScheduleYaml>(v)?.parse(ctx, true)?),
        None => None,
    };

    let mut properties = yaml::to_properties(Value::Mapping(map))?;
    if !node.sql.is_empty() {
        properties.insert("sql".into(), node.sql.clone().into());
    }

    let connector = if node.connector_inferred {
        inferred_connector(&properties).unwrap_or(&node.connector).to_string()
    } else {
        node.connector.clone()
    };

    if connector == ctx.olap_connector() {
        check_embedded(ctx, node)?;
        let resource = ctx.registry.upsert(ResourceKind::Model, &node.name, &node.path)?;
        resource.add_refs(node.refs.iter().cloned());
        if let Some(model) = resource.spec.as_model_mut() {
            model.defined_as_source = true;
            model.input_connector = connector;
            model.input_properties.extend(properties);
            if let Some(refresh) = refresh {
                model.refresh_schedule = Some(refresh);
            }
            if let Some(timeout) = timeout {
                model.timeout_seconds = timeout;
            }
        }
        commit_embedded(ctx, node, timeout.unwrap_or(0));
        return Ok(());
    }

    let resource = ctx.registry.upsert(ResourceKind::Source, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    if let Some(source) = resource.spec.as_source_mut() {
        source.source_connector = connector;
        source.properties.extend(properties);
        if let Some(refresh) = refresh {
            source.refresh_schedule = Some(refresh);
        }
        if let Some(timeout) = timeout {
            source.timeout_seconds = timeout;
        }
    }
    Ok(())
}

/// Connector implied by the `path` or `uri` property
fn inferred_connector(properties: &Properties) -> Option<&'static str> {
    ["path", "uri"]
        .iter()
        .find_map(|key| properties.get(*key).and_then(|v| v.as_str()))
        .map(connector_for_path)
}

#[cfg(test)]
mod tests {
    use crate::test_support::parse_files;
    use quarry_core::{ResourceKind, ResourceName};

    #[test]
    fn test_source_with_path() {
        let parser = parse_files(&[(
            "/sources/orders.yaml",
            "connector: s3\npath: s3://bucket/orders.parquet\ntimeout: 10m\nrefresh: {cron: '0 * * * *'}",
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let source = parser
            .resource(&ResourceName::new(ResourceKind::Source, "orders"))
            .unwrap()
            .spec
            .as_source()
            .unwrap()
            .clone();
        assert_eq!(source.source_connector, "s3");
        assert_eq!(source.sink_connector, "duckdb");
        assert_eq!(source.timeout_seconds, 600);
        assert_eq!(source.properties["path"], "s3://bucket/orders.parquet");
        assert_eq!(source.refresh_schedule.unwrap().cron, "0 * * * *");
    }

    #[test]
    fn test_source_connector_inferred_from_path() {
        let parser = parse_files(&[("/sources/raw.yaml", "uri: gs://bucket/raw.csv")]);
        let source = parser
            .resource(&ResourceName::new(ResourceKind::Source, "raw"))
            .unwrap();
        assert_eq!(source.spec.as_source().unwrap().source_connector, "gcs");
    }

    #[test]
    fn test_source_on_olap_connector_becomes_model() {
        let parser = parse_files(&[("/sources/events.sql", "SELECT * FROM range(10)")]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        assert!(
            parser
                .resource(&ResourceName::new(ResourceKind::Source, "events"))
                .is_none()
        );
        let model = parser
            .resource(&ResourceName::new(ResourceKind::Model, "events"))
            .unwrap()
            .spec
            .as_model()
            .unwrap()
            .clone();
        assert!(model.defined_as_source);
        assert_eq!(model.materialize, Some(true));
        assert_eq!(model.input_connector, "duckdb");
        assert_eq!(model.input_properties["sql"], "SELECT * FROM range(10)");
    }
}
