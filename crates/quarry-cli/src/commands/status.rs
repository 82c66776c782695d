//! Show project status

use anyhow::Result;
use quarry_core::ResourceKind;
use std::collections::BTreeMap;

use super::{ProjectArgs, load_project};

/// Run the status command
pub fn run(project: &ProjectArgs<'_>) -> Result<()> {
    let parser = load_project(project)?;
    let manifest = parser.manifest();

    let name = if manifest.display_name.is_empty() {
        project.path
    } else {
        manifest.display_name.as_str()
    };
    println!("Project: {name}");
    if let Some(environment) = project.environment {
        println!("Environment: {environment}");
    }
    if !manifest.olap_connector.is_empty() {
        println!("OLAP connector: {}", manifest.olap_connector);
    }

    let mut counts: BTreeMap<ResourceKind, usize> = BTreeMap::new();
    for resource in parser.resources().values() {
        *counts.entry(resource.kind()).or_default() += 1;
    }

    println!();
    println!("Resources:");
    if counts.is_empty() {
        println!("  (none)");
    }
    for (kind, count) in &counts {
        println!("  {:<12} {count}", kind.as_str());
    }
    println!();
    println!("Errors: {}", parser.errors().len());
    Ok(())
}
