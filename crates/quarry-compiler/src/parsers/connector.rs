//! Connector parser
//!
//! Connectors come from `connectors/*.yaml` files and from the `connectors:`
//! list of the project manifest. Both layer onto the same resource, with file
//! properties taking precedence.

use quarry_core::manifest::ConnectorDef;
use quarry_core::spec::ConnectorSpec;
use quarry_core::{Properties, ResourceKind, template, yaml};
use serde_yaml::Value;

use super::{ParseContext, reject_sql_and_connector};
use crate::error::{Error, Result};
use crate::node::Node;
use crate::registry::Registry;

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let mut map = node.yaml.clone();

    let driver = match map.remove("driver") {
        Some(Value::String(driver)) if !driver.is_empty() => driver,
        Some(_) => return Err(Error::invalid("driver must be a string")),
        None => return Err(Error::invalid("connector must set a driver")),
    };
    let (provision, provision_args) = match map.remove("managed") {
        None | Some(Value::Null) => (false, Properties::new()),
        Some(Value::Bool(managed)) => (managed, Properties::new()),
        Some(args @ Value::Mapping(_)) => (true, yaml::to_properties(args)?),
        Some(_) => return Err(Error::invalid("managed must be a boolean or a mapping")),
    };

    let properties = yaml::to_properties(Value::Mapping(map))?;
    let templated = templated_keys(&properties);

    let resource = ctx.registry.upsert(ResourceKind::Connector, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    if let Some(connector) = resource.spec.as_connector_mut() {
        connector.driver = driver;
        connector.properties.extend(properties);
        for key in templated {
            if !connector.templated_properties.contains(&key) {
                connector.templated_properties.push(key);
            }
        }
        connector.provision |= provision;
        connector.provision_args.extend(provision_args);
    }
    Ok(())
}

/// Commit a connector declared in the project manifest
pub(crate) fn parse_manifest_connector(registry: &mut Registry, def: &ConnectorDef, path: &str) -> Result<()> {
    if def.name.is_empty() || def.driver.is_empty() {
        return Err(Error::invalid("manifest connectors must set a name and a driver"));
    }
    let templated = templated_keys(&def.defaults);
    let resource = registry.upsert_shared(ResourceKind::Connector, &def.name, path)?;
    if let Some(connector) = resource.spec.as_connector_mut() {
        *connector = ConnectorSpec {
            driver: def.driver.clone(),
            properties: def.defaults.clone(),
            templated_properties: templated,
            ..Default::default()
        };
    }
    Ok(())
}

/// Property keys whose string values use templating
fn templated_keys(properties: &Properties) -> Vec<String> {
    properties
        .iter()
        .filter(|(_, v)| v.as_str().is_some_and(template::uses_templating))
        .map(|(k, _)| k.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::test_support::parse_files;
    use quarry_core::{ResourceKind, ResourceName};

    #[test]
    fn test_connector_file() {
        let parser = parse_files(&[(
            "/connectors/warehouse.yaml",
            r#"
type: connector
driver: postgres
host: db.internal
password: "{{ env.PG_PASSWORD }}"
managed:
  size: small
"#,
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let connector = parser
            .resource(&ResourceName::new(ResourceKind::Connector, "warehouse"))
            .unwrap()
            .spec
            .as_connector()
            .unwrap()
            .clone();
        assert_eq!(connector.driver, "postgres");
        assert_eq!(connector.properties["host"], "db.internal");
        assert_eq!(connector.templated_properties, vec!["password"]);
        assert!(connector.provision);
        assert_eq!(connector.provision_args["size"], "small");
    }

    #[test]
    fn test_legacy_type_is_driver() {
        let parser = parse_files(&[("/connectors/s3.yaml", "type: s3\nregion: us-east-1")]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let connector = parser
            .resource(&ResourceName::new(ResourceKind::Connector, "s3"))
            .unwrap()
            .spec
            .as_connector()
            .unwrap()
            .clone();
        assert_eq!(connector.driver, "s3");
        assert!(!connector.provision);
    }

    #[test]
    fn test_connector_requires_driver() {
        let parser = parse_files(&[("/connectors/x.yaml", "type: connector\nhost: h")]);
        assert_eq!(parser.errors().len(), 1);
    }
}
