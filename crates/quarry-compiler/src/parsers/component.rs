//! Component parser
//!
//! A component names its renderer with a single top-level key whose value
//! holds the renderer properties:
//!
//! ```yaml
//! type: component
//! kpi:
//!   metrics_view: sales
//!   measure: total
//! ```
//!
//! The same shape is accepted inline in canvas rows.

use quarry_core::spec::{ComponentSpec, ComponentVariable};
use quarry_core::{ResourceKind, ResourceRef, yaml};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use super::{DataYaml, ParseContext, decode, reject_sql_and_connector};
use crate::error::{Error, Result};
use crate::node::Node;

/// Keys that are not the renderer
const RESERVED_KEYS: [&str; 7] = [
    "type",
    "display_name",
    "title",
    "description",
    "input",
    "output",
    "data",
];

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct VariableYaml {
    name: String,
    #[serde(rename = "type")]
    variable_type: String,
    #[serde(default)]
    value: Value,
}

impl VariableYaml {
    pub fn to_variable(&self) -> Result<ComponentVariable> {
        if self.name.is_empty() {
            return Err(Error::invalid("variable must have a name"));
        }
        Ok(ComponentVariable {
            name: self.name.clone(),
            variable_type: self.variable_type.clone(),
            default_value: yaml::to_json(self.value.clone())?,
        })
    }
}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    reject_sql_and_connector(node)?;
    let (spec, refs) = component_spec(&node.yaml, false)?;

    let resource = ctx.registry.insert(ResourceKind::Component, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    resource.add_refs(refs);
    if let Some(component) = resource.spec.as_component_mut() {
        *component = spec;
    }
    Ok(())
}

/// Build a component spec from a mapping and collect its references
pub(crate) fn component_spec(
    map: &Mapping,
    defined_in_canvas: bool,
) -> Result<(ComponentSpec, Vec<ResourceRef>)> {
    let text = |key: &str| -> Result<String> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(_) => Err(Error::invalid(format!("{key} must be a string"))),
        }
    };
    let mut spec = ComponentSpec {
        display_name: if map.contains_key("display_name") {
            text("display_name")?
        } else {
            text("title")?
        },
        description: text("description")?,
        defined_in_canvas,
        ..Default::default()
    };

    if let Some(input) = map.get("input") {
        let vars: Vec<VariableYaml> = serde_yaml::from_value(input.clone())?;
        spec.input = vars.iter().map(VariableYaml::to_variable).collect::<Result<_>>()?;
    }
    if let Some(output) = map.get("output") {
        let var: VariableYaml = serde_yaml::from_value(output.clone())?;
        spec.output = Some(var.to_variable()?);
    }

    let renderers: Vec<(&str, &Value)> = map
        .iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k, v)))
        .filter(|(k, _)| !RESERVED_KEYS.contains(k))
        .collect();

    let mut refs = Vec::new();
    match renderers.as_slice() {
        [] if map.contains_key("data") => {
            return Err(Error::invalid("component with data must also declare vega_lite"));
        }
        [] if spec.input.is_empty() && spec.output.is_none() => {
            return Err(Error::invalid("component must declare a renderer"));
        }
        [] => {}
        [("vega_lite", value)] if map.contains_key("data") => {
            let data: DataYaml = match map.get("data") {
                Some(Value::Mapping(data)) => decode(data)?,
                _ => return Err(Error::invalid("data must be a mapping")),
            };
            let resolver = data.resolve()?;
            let Value::String(vega_lite) = value else {
                return Err(Error::invalid("vega_lite must be a string"));
            };
            spec.renderer = "vega_lite".into();
            spec.renderer_properties
                .insert("spec".into(), vega_lite.clone().into());
            spec.renderer_properties
                .insert("resolver".into(), resolver.name.into());
            spec.renderer_properties.insert(
                "resolver_properties".into(),
                serde_json::Value::Object(resolver.properties),
            );
            refs.extend(resolver.refs);
        }
        [(renderer, value)] => {
            if map.contains_key("data") {
                return Err(Error::invalid("data can only be used with the vega_lite renderer"));
            }
            spec.renderer = (*renderer).to_string();
            spec.renderer_properties = match value {
                Value::Null => Default::default(),
                Value::Mapping(_) => yaml::to_properties((*value).clone())?,
                _ => return Err(Error::invalid(format!("properties of renderer {renderer:?} must be a mapping"))),
            };
        }
        many => {
            let keys: Vec<&str> = many.iter().map(|(k, _)| *k).collect();
            return Err(Error::invalid(format!(
                "component must declare exactly one renderer, found {}",
                keys.join(", ")
            )));
        }
    }

    if let Some(mv) = spec
        .renderer_properties
        .get("metrics_view")
        .and_then(serde_json::Value::as_str)
        .filter(|mv| !mv.is_empty())
    {
        refs.push(ResourceRef::typed(ResourceKind::MetricsView, mv));
    }
    Ok((spec, refs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::parse_files;
    use quarry_core::ResourceName;

    fn mapping(text: &str) -> Mapping {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_component_spec() {
        let (spec, refs) = component_spec(
            &mapping("title: Revenue\nkpi:\n  metrics_view: sales\n  measure: total"),
            true,
        )
        .unwrap();
        assert_eq!(spec.display_name, "Revenue");
        assert_eq!(spec.renderer, "kpi");
        assert_eq!(spec.renderer_properties["measure"], "total");
        assert!(spec.defined_in_canvas);
        assert_eq!(refs, vec![ResourceRef::typed(ResourceKind::MetricsView, "sales")]);
    }

    #[test]
    fn test_component_renderer_errors() {
        assert!(component_spec(&mapping("title: x"), false).is_err());
        assert!(component_spec(&mapping("kpi: {}\nmarkdown: {}"), false).is_err());
        assert!(component_spec(&mapping("markdown: text"), false).is_err());
    }

    #[test]
    fn test_vega_lite_component() {
        let (spec, _) = component_spec(
            &mapping("data:\n  metrics_sql: SELECT total FROM sales\nvega_lite: '{}'"),
            false,
        )
        .unwrap();
        assert_eq!(spec.renderer, "vega_lite");
        assert_eq!(spec.renderer_properties["resolver"], "metrics_sql");
    }

    #[test]
    fn test_component_resource() {
        let parser = parse_files(&[(
            "/components/notes.yaml",
            "type: component\nmarkdown:\n  content: hello\ninput:\n  - name: region\n    type: string\n    value: EU",
        )]);
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        let component = parser
            .resource(&ResourceName::new(ResourceKind::Component, "notes"))
            .unwrap()
            .spec
            .as_component()
            .unwrap()
            .clone();
        assert_eq!(component.renderer, "markdown");
        assert_eq!(component.input[0].default_value, "EU");
        assert!(!component.defined_in_canvas);
    }
}
