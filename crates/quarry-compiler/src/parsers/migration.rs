//! Migration parser

use quarry_core::ResourceKind;
use serde::Deserialize;

use super::{ParseContext, decode};
use crate::error::Result;
use crate::node::Node;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MigrationYaml {}

pub(crate) fn parse(ctx: &mut ParseContext<'_>, node: &Node) -> Result<()> {
    let _: MigrationYaml = decode(&node.yaml)?;

    let resource = ctx.registry.upsert(ResourceKind::Migration, &node.name, &node.path)?;
    resource.add_refs(node.refs.iter().cloned());
    if let Some(migration) = resource.spec.as_migration_mut() {
        if !node.connector_inferred {
            migration.connector = node.connector.clone();
        }
        if !node.sql.is_empty() {
            migration.sql = node.sql.clone();
        }
        if node.version > 0 {
            migration.version = node.version;
        }
    }
    Ok(())
}
