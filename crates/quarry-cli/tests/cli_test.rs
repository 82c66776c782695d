use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_init_validate_and_compile() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().to_str().unwrap();

    // Init project
    cargo_bin_cmd!("quarry")
        .args(["init", project])
        .assert()
        .success();

    // Verify generated files exist
    assert!(dir.path().join("quarry.yaml").exists());
    assert!(dir.path().join(".env").exists());
    assert!(dir.path().join("models/orders.sql").exists());
    assert!(dir.path().join("metrics/orders_metrics.yaml").exists());

    // The scaffold is valid
    cargo_bin_cmd!("quarry")
        .args(["--project", project, "validate"])
        .assert()
        .success();

    // Compile prints every resource as JSON
    let output = cargo_bin_cmd!("quarry")
        .args(["--project", project, "compile"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let resources: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();

    let find = |kind: &str, name: &str| {
        resources
            .iter()
            .find(|r| r["kind"] == kind && r["name"] == name)
            .unwrap_or_else(|| panic!("missing {kind}/{name}"))
    };
    let model = find("Model", "orders");
    assert_eq!(model["paths"][0], "/models/orders.sql");
    assert_eq!(model["spec"]["materialize"], true);
    assert_eq!(model["spec"]["refresh_schedule"]["cron"], "0 * * * *");

    let metrics = find("MetricsView", "orders_metrics");
    assert_eq!(metrics["refs"][0], "Model/orders");
    assert_eq!(metrics["spec"]["measures"].as_array().unwrap().len(), 3);

    let explore = find("Explore", "orders_explore");
    assert_eq!(explore["refs"][0], "MetricsView/orders_metrics");

    let sources: Vec<_> = resources.iter().filter(|r| r["kind"] == "Source").collect();
    assert_eq!(sources.len(), 1, "read_csv should produce one embedded source");
}

#[test]
fn test_init_refuses_existing_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("quarry.yaml"), "").unwrap();

    cargo_bin_cmd!("quarry")
        .args(["init", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already contains a quarry.yaml"));
}

#[test]
fn test_validate_reports_file_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("quarry.yaml"), "").unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    std::fs::write(dir.path().join("models/good.sql"), "SELECT 1").unwrap();
    std::fs::write(
        dir.path().join("models/bad.yaml"),
        "sql: SELECT 1\nchange_mode: sometimes",
    )
    .unwrap();

    cargo_bin_cmd!("quarry")
        .args(["--project", dir.path().to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("/models/bad.yaml:"))
        .stdout(predicate::str::contains("change_mode"))
        .stderr(predicate::str::contains("1 file(s) failed to parse"));
}

#[test]
fn test_missing_manifest_fails() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("quarry")
        .args(["--project", dir.path().to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("project manifest not found"));
}

#[test]
fn test_status_counts_per_kind() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("quarry.yaml"), "display_name: Shop").unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    std::fs::write(dir.path().join("models/a.sql"), "SELECT 1").unwrap();
    std::fs::write(dir.path().join("models/b.sql"), "SELECT * FROM a").unwrap();

    cargo_bin_cmd!("quarry")
        .args(["status"])
        .env("QUARRY_PROJECT", dir.path())
        .env("QUARRY_ENV", "dev")
        .assert()
        .success()
        .stdout(predicate::str::contains("Project: Shop"))
        .stdout(predicate::str::contains("Environment: dev"))
        .stdout(predicate::str::is_match(r"Model\s+2").unwrap())
        .stdout(predicate::str::contains("Errors: 0"));
}

#[test]
fn test_compile_filters_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("quarry.yaml"), "").unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    std::fs::write(dir.path().join("models/a.sql"), "SELECT * FROM read_parquet('s3://bucket/a.parquet')").unwrap();

    let output = cargo_bin_cmd!("quarry")
        .args(["--project", dir.path().to_str().unwrap(), "compile", "--kind", "source"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let resources: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0]["kind"], "Source");
    assert_eq!(resources[0]["spec"]["source_connector"], "s3");

    cargo_bin_cmd!("quarry")
        .args(["--project", dir.path().to_str().unwrap(), "compile", "--kind", "widget"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown resource kind"));
}
