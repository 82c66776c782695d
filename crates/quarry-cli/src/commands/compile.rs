//! Compile project command

use anyhow::{Context, Result};
use quarry_compiler::Resource;
use quarry_core::ResourceKind;
use serde_json::{Value, json};

use super::{ProjectArgs, load_project};

/// Run the compile command
pub fn run(project: &ProjectArgs<'_>, kind: Option<&str>) -> Result<()> {
    let kind: Option<ResourceKind> = kind
        .map(|k| k.parse().with_context(|| format!("Unknown resource kind '{k}'")))
        .transpose()?;

    let parser = load_project(project)?;
    for error in parser.errors() {
        tracing::warn!(path = %error.path, "{}", error.message);
    }

    let resources = parser
        .resources()
        .values()
        .filter(|r| kind.is_none_or(|k| r.kind() == k))
        .map(to_json)
        .collect::<Result<Vec<_>>>()?;

    println!("{}", serde_json::to_string_pretty(&resources)?);
    tracing::info!("✓ Compiled {} resources", resources.len());
    Ok(())
}

fn to_json(resource: &Resource) -> Result<Value> {
    // Specs serialize as {"kind": .., "spec": {..}}
    let mut spec = serde_json::to_value(&resource.spec).context("Failed to serialize spec")?;
    let spec = spec.get_mut("spec").map(Value::take).unwrap_or(Value::Null);

    Ok(json!({
        "kind": resource.kind().as_str(),
        "name": resource.name.name,
        "paths": resource.paths,
        "refs": resource.refs.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
        "spec": spec,
    }))
}
