//! Legacy dashboard parser

use quarry_core::spec::{DashboardItem, DashboardSpec};
use quarry_core::{ResourceKind, ResourceRef};
use serde::Deserialize;

use super::{ParseContext, decode, reject_sql_and_connector};
use crate::error::{Error, Result};
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DashboardYaml {
    #[serde(default, alias = "title")]
    display_name: Option<String>,
    #[serde(default)]
    columns: u32,
    #[serde(default)]
    gap: u32,
    #[serde(default, alias = "components")]
    items: Vec<ItemYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ItemYaml {
    #[serde(default)]
    component: String,
    #[serde(default)]
    x: u32,
    #[serde(default)]
    y: u32,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let yaml: DashboardYaml = decode(&node.yaml)?;

    let mut refs = Vec::with_capacity(yaml.items.len());
    let mut items = Vec::with_capacity(yaml.items.len());
    for (i, item) in yaml.items.into_iter().enumerate() {
        if item.component.is_empty() {
            return Err(Error::invalid(format!("item {i} must name a component")));
        }
        refs.push(ResourceRef::untyped(item.component.clone()));
        items.push(DashboardItem {
            component: item.component,
            x: item.x,
            y: item.y,
            width: item.width,
            height: item.height,
        });
    }

    let resource = ctx.registry.insert(ResourceKind::Dashboard, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(refs);
    if let Some(dashboard) = resource.spec.as_dashboard_mut() {
        *dashboard = DashboardSpec {
            display_name: yaml.display_name.unwrap_or_default(),
            columns: yaml.columns,
            gap: yaml.gap,
            items,
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::test_support::parse_files;
    use quarry_core::{ResourceKind, ResourceName};

    #[test]
    fn test_dashboard_links_components() {
        let parser = parse_files(&[
            (
                "/charts/revenue.yaml",
                "type: chart\ndata:\n  sql: SELECT 1\nvega_lite: '{}'",
            ),
            (
                "/custom/main.yaml",
                "type: dashboard\ncolumns: 12\ncomponents:\n  - component: revenue\n    width: 6\n    height: 4\n  - component: missing",
            ),
        ]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let resource = parser
            .resource(&ResourceName::new(ResourceKind::Dashboard, "main"))
            .unwrap();
        assert_eq!(resource.refs, vec![ResourceName::new(ResourceKind::Chart, "revenue")]);
        let dashboard = resource.spec.as_dashboard().unwrap();
        assert_eq!(dashboard.columns, 12);
        assert_eq!(dashboard.items.len(), 2);
        assert_eq!(dashboard.items[0].width, 6);
    }
}
