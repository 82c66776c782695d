//! CLI command implementations

use anyhow::{Context, Result};
use quarry_compiler::{Parser, ParserOptions};
use quarry_core::LocalFileStore;
use std::path::Path;
use std::sync::Arc;

pub mod compile;
pub mod init;
pub mod status;
pub mod validate;

/// Global options selecting and configuring the project
pub struct ProjectArgs<'a> {
    pub path: &'a str,
    pub environment: Option<&'a str>,
    pub olap_connector: Option<&'a str>,
}

/// Parse the project with a local file store
pub fn load_project(args: &ProjectArgs<'_>) -> Result<Parser> {
    let root = Path::new(args.path);
    if !root.is_dir() {
        anyhow::bail!("Project directory '{}' does not exist", root.display());
    }

    let mut options = ParserOptions::default();
    if let Some(environment) = args.environment {
        options.environment = environment.to_string();
    }
    if let Some(olap) = args.olap_connector {
        options.default_olap_connector = olap.to_string();
    }

    tracing::debug!(project = %root.display(), ?options, "Loading project");
    let mut parser = Parser::new(Arc::new(LocalFileStore::new(root)), options);
    parser
        .parse()
        .with_context(|| format!("Failed to parse project at '{}'", root.display()))?;
    Ok(parser)
}
