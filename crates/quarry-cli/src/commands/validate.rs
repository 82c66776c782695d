//! Validate project command

use anyhow::Result;

use super::{ProjectArgs, load_project};

/// Run the validate command
pub fn run(project: &ProjectArgs<'_>) -> Result<()> {
    tracing::info!("Validating project: {}", project.path);
    let parser = load_project(project)?;

    let errors = parser.errors();
    if errors.is_empty() {
        tracing::info!("✓ {} resources", parser.resources().len());
        tracing::info!("✓ Project is valid");
        return Ok(());
    }

    let width = errors.iter().map(|e| e.path.len()).max().unwrap_or(0);
    for error in errors {
        println!("{:<width$}  {}", format!("{}:", error.path), error.message, width = width + 1);
    }
    anyhow::bail!("{} file(s) failed to parse", errors.len())
}
