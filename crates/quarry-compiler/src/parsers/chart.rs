//! Legacy chart parser

use quarry_core::ResourceKind;
use quarry_core::spec::ChartSpec;
use serde::Deserialize;

use super::{DataYaml, ParseContext, decode, reject_sql_and_connector};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChartYaml {
    #[serde(default, alias = "title")]
    display_name: Option<String>,
    #[serde(default)]
    data: Option<DataYaml>,
    #[serde(default)]
    vega_lite: Option<String>,
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let yaml: ChartYaml = decode(&node.yaml)?;

    let resolver = yaml
        .data
        .as_ref()
        .ok_or_else(|| Error::invalid("chart must declare data"))?
        .resolve()?;
    let vega_lite = yaml
        .vega_lite
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::invalid("chart must declare a vega_lite spec"))?;

    let resource = ctx.registry.insert(ResourceKind::Chart, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(resolver.refs);
    if let Some(chart) = resource.spec.as_chart_mut() {
        *chart = ChartSpec {
            display_name: yaml.display_name.unwrap_or_default(),
            resolver: resolver.name,
            resolver_properties: resolver.properties,
            vega_lite_spec: vega_lite,
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::test_support::parse_files;
    use quarry_core::{ResourceKind, ResourceName};

    #[test]
    fn test_chart() {
        let parser = parse_files(&[(
            "/charts/trend.yaml",
            "type: chart\ntitle: Trend\ndata:\n  metrics_sql: SELECT total FROM sales\nvega_lite: '{\"mark\": \"line\"}'",
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let chart = parser
            .resource(&ResourceName::new(ResourceKind::Chart, "trend"))
            .unwrap()
            .spec
            .as_chart()
            .unwrap()
            .clone();
        assert_eq!(chart.display_name, "Trend");
        assert_eq!(chart.resolver, "metrics_sql");
        assert!(chart.vega_lite_spec.contains("line"));
    }

    #[test]
    fn test_chart_rejects_top_level_sql() {
        let parser = parse_files(&[
            ("/charts/a.yaml", "type: chart\nsql: SELECT 1\nvega_lite: '{}'"),
            ("/charts/b.yaml", "type: chart\ndata:\n  sql: SELECT 1"),
        ]);
        assert_eq!(parser.errors().len(), 2);
    }
}
