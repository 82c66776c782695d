//! Integration tests for project configuration on disk
//!
//! Tests use temporary directories with real file fixtures to verify:
//! - Manifest loading through the local file store
//! - Environment overrides and layered `.env` files
//! - Variables flowing into template rendering

use quarry_core::manifest::{self, EnvLayers, is_env_path};
use quarry_core::template::{self, TemplateData};
use quarry_core::{FileStore, LocalFileStore, ResourceKind};
use tempfile::TempDir;

const MANIFEST: &str = r#"
display_name: Shop
olap_connector: duckdb
vars:
  region: us
  warehouse.size: small
models:
  materialize: false
dev:
  olap_connector: duckdb_dev
prod:
  vars:
    region: global
"#;

fn setup_project() -> (TempDir, LocalFileStore) {
    let dir = TempDir::new().unwrap();
    let store = LocalFileStore::new(dir.path());
    store.put("/quarry.yaml", MANIFEST).unwrap();
    store.put("/.env", "region=eu\nTOKEN=secret").unwrap();
    store.put("/models/.env", "region=apac").unwrap();
    store.put("/models/orders.sql", "SELECT 1").unwrap();
    (dir, store)
}

fn env_layers(store: &LocalFileStore) -> EnvLayers {
    let mut layers = EnvLayers::default();
    for file in store.list_recursive("/", "**/*.env").unwrap() {
        assert!(is_env_path(&file.path));
        let vars = manifest::parse_dotenv(&store.get(&file.path).unwrap()).unwrap();
        layers.set(&file.path, vars);
    }
    layers
}

#[test]
fn test_manifest_per_environment() {
    let (_dir, store) = setup_project();
    let text = store.get("/quarry.yaml").unwrap();

    let default = manifest::parse_manifest(&text, "").unwrap();
    assert_eq!(default.display_name, "Shop");
    assert_eq!(default.olap_connector, "duckdb");
    assert_eq!(default.variables["region"], "us");
    assert!(default.defaults_for(ResourceKind::Model).is_some());

    let dev = manifest::parse_manifest(&text, "dev").unwrap();
    assert_eq!(dev.olap_connector, "duckdb_dev");

    let prod = manifest::parse_manifest(&text, "prod").unwrap();
    assert_eq!(prod.olap_connector, "duckdb");
    assert_eq!(prod.variables["region"], "global");
}

#[test]
fn test_env_files_layer_over_variables() {
    let (_dir, store) = setup_project();
    let manifest = manifest::parse_manifest(&store.get("/quarry.yaml").unwrap(), "").unwrap();
    let mut layers = env_layers(&store);

    let vars = manifest.resolved_variables(&layers);
    assert_eq!(vars["region"], "apac");
    assert_eq!(vars["TOKEN"], "secret");
    assert_eq!(vars["warehouse.size"], "small");

    assert!(layers.remove("/models/.env"));
    assert_eq!(manifest.resolved_variables(&layers)["region"], "eu");
}

#[test]
fn test_variables_render_in_templates() {
    let (_dir, store) = setup_project();
    let manifest = manifest::parse_manifest(&store.get("/quarry.yaml").unwrap(), "prod").unwrap();

    let data = TemplateData {
        environment: "prod".into(),
        variables: manifest.variables.clone(),
        ..Default::default()
    };
    let sql = template::resolve(
        "SELECT '{{ vars.region }}' AS region, '{{ vars.warehouse.size }}' AS size, '{{ environment }}' AS env",
        &data,
    )
    .unwrap();
    assert_eq!(sql, "SELECT 'global' AS region, 'small' AS size, 'prod' AS env");
}

#[test]
fn test_invalid_manifest_is_rejected() {
    let (_dir, store) = setup_project();
    store.put("/quarry.yaml", "connectors: [{type: duckdb, name: admin}]").unwrap();
    let err = manifest::parse_manifest(&store.get("/quarry.yaml").unwrap(), "").unwrap_err();
    assert!(err.to_string().contains("reserved"));
}
