//! Initialize a new Quarry project

use anyhow::{Context, Result};
use quarry_core::{FileStore, LocalFileStore};
use std::fs;
use std::path::Path;

/// Run the init command
pub fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }
    let abs_path = project_dir.canonicalize()?;

    // Derive project name from directory name if not provided
    let project_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine project name from path"))?,
    };

    if project_dir.join("quarry.yaml").exists() || project_dir.join("quarry.yml").exists() {
        anyhow::bail!(
            "Directory '{}' already contains a quarry.yaml",
            project_dir.display()
        );
    }

    tracing::info!("Creating new Quarry project: {}", project_name);
    let store = LocalFileStore::new(&abs_path);

    let manifest = format!(
        r#"# Quarry Project Manifest
display_name: {project_name}
olap_connector: duckdb

# Variable defaults; .env files override them
vars:
  region: us

models:
  materialize: true
"#
    );

    let files: [(&str, &str); 6] = [
        ("quarry.yaml", &manifest),
        (".env", ENV_FILE),
        ("data/orders.csv", ORDERS_CSV),
        ("models/orders.sql", ORDERS_MODEL),
        ("metrics/orders_metrics.yaml", ORDERS_METRICS),
        ("explores/orders_explore.yaml", ORDERS_EXPLORE),
    ];
    for (file, content) in files {
        store
            .put(file, content)
            .with_context(|| format!("Failed to write {file}"))?;
        tracing::debug!("Wrote {}", file);
    }

    tracing::info!("✓ Project created at {}", abs_path.display());
    tracing::info!("");
    tracing::info!("Next steps:");
    tracing::info!("  quarry --project {} validate", path);
    tracing::info!("  quarry --project {} compile", path);
    Ok(())
}

const ENV_FILE: &str = "# Local overrides for manifest vars\nregion=eu\n";

const ORDERS_CSV: &str = "\
order_id,order_date,country,amount
1,2024-01-01,US,120.50
2,2024-01-02,DE,80.00
3,2024-01-02,US,42.25
";

const ORDERS_MODEL: &str = "\
-- @refresh.cron: 0 * * * *
SELECT
    order_id,
    CAST(order_date AS DATE) AS order_date,
    country,
    amount
FROM read_csv('data/orders.csv')
";

const ORDERS_METRICS: &str = r#"# Metrics over the orders model
type: metrics_view
version: 1
display_name: Orders
model: orders
timeseries: order_date

dimensions:
  - column: country
    display_name: Country

measures:
  - name: total_revenue
    display_name: Total revenue
    expression: SUM(amount)
    format_preset: currency_usd
  - name: order_count
    expression: COUNT(*)
  - name: average_order
    expression: total_revenue / order_count
    type: derived
"#;

const ORDERS_EXPLORE: &str = r#"type: explore
display_name: Orders
metrics_view: orders_metrics
dimensions: '*'
measures: '*'
defaults:
  time_range: P7D
"#;
