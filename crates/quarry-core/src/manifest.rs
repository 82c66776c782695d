//! Project configuration
//!
//! This module handles the project manifest and environment files.
//!
//! # Configuration Files
//!
//! - `quarry.yaml` - Project root manifest (required)
//! - `.env` - Variables, one file per directory; deeper files win

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::resource::ResourceKind;
use crate::spec::Properties;

/// Path of the project manifest within a file store
pub const MANIFEST_PATH: &str = "/quarry.yaml";

/// Alternate extension accepted for the manifest
pub const MANIFEST_PATH_ALT: &str = "/quarry.yml";

/// Connector names managed by the platform
pub const RESERVED_CONNECTORS: [&str; 3] = ["admin", "repo", "metastore"];

/// Returns true if `path` is the project manifest
pub fn is_manifest_path(path: &str) -> bool {
    path == MANIFEST_PATH || path == MANIFEST_PATH_ALT
}

/// Returns true if `path` is an environment file
pub fn is_env_path(path: &str) -> bool {
    path.rsplit('/').next() == Some(".env")
}

/// A connector declared in the manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectorDef {
    /// Driver
    pub driver: String,
    /// Connector name
    pub name: String,
    /// Default properties
    pub defaults: Properties,
}

/// Parsed project manifest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    /// Project title
    pub display_name: String,
    /// Project description
    pub description: String,
    /// Instructions for AI assistants
    pub ai_instructions: String,
    /// OLAP connector override
    pub olap_connector: String,
    /// Declared connectors
    pub connectors: Vec<ConnectorDef>,
    /// Variable defaults
    pub variables: BTreeMap<String, String>,
    /// Per-kind YAML defaults
    pub defaults: BTreeMap<ResourceKind, serde_yaml::Mapping>,
    /// Feature flags (values may be templates)
    pub features: BTreeMap<String, String>,
    /// Paths served publicly
    pub public_paths: Vec<String>,
    /// Paths excluded from parsing
    pub ignore_paths: Vec<String>,
    /// Users for previewing security policies
    pub mock_users: Vec<serde_json::Value>,
}

impl Manifest {
    /// Defaults declared for a kind, if any
    pub fn defaults_for(&self, kind: ResourceKind) -> Option<&serde_yaml::Mapping> {
        self.defaults.get(&kind)
    }

    /// Variable defaults overlaid with environment files
    pub fn resolved_variables(&self, env: &EnvLayers) -> BTreeMap<String, String> {
        let mut vars = self.variables.clone();
        vars.extend(env.merged());
        vars
    }

    /// Whether `path` is under one of the ignored paths
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore_paths.iter().any(|p| {
            let p = if p.starts_with('/') {
                p.clone()
            } else {
                format!("/{p}")
            };
            path == p || path.starts_with(&format!("{}/", p.trim_end_matches('/')))
        })
    }
}

// ============================================================================
// Raw YAML structures (for serde deserialization)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestYaml {
    #[serde(default, alias = "title", alias = "name")]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    ai_instructions: Option<String>,
    #[serde(default)]
    compiler: Option<String>,
    #[serde(default)]
    olap_connector: Option<String>,
    #[serde(default)]
    connectors: Vec<ConnectorDefYaml>,
    #[serde(default)]
    env: serde_yaml::Mapping,
    #[serde(default)]
    vars: serde_yaml::Mapping,
    #[serde(default)]
    sources: Option<serde_yaml::Mapping>,
    #[serde(default)]
    models: Option<serde_yaml::Mapping>,
    #[serde(default, alias = "dashboards")]
    metrics_views: Option<serde_yaml::Mapping>,
    #[serde(default)]
    explores: Option<serde_yaml::Mapping>,
    #[serde(default)]
    canvases: Option<serde_yaml::Mapping>,
    #[serde(default)]
    migrations: Option<serde_yaml::Mapping>,
    #[serde(default)]
    apis: Option<serde_yaml::Mapping>,
    #[serde(default)]
    alerts: Option<serde_yaml::Mapping>,
    #[serde(default)]
    reports: Option<serde_yaml::Mapping>,
    #[serde(default)]
    themes: Option<serde_yaml::Mapping>,
    #[serde(default)]
    components: Option<serde_yaml::Mapping>,
    #[serde(default)]
    features: Option<serde_yaml::Value>,
    #[serde(default)]
    public_paths: Option<Vec<String>>,
    #[serde(default)]
    ignore_paths: Vec<String>,
    #[serde(default)]
    mock_users: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectorDefYaml {
    #[serde(rename = "type", alias = "driver")]
    driver: String,
    name: String,
    #[serde(default)]
    defaults: serde_yaml::Mapping,
}

/// Parse the manifest for the given environment
///
/// # Example
///
/// ```rust,ignore
/// let manifest = parse_manifest(&store.get("/quarry.yaml")?, "dev")?;
/// println!("Project: {}", manifest.display_name);
/// ```
pub fn parse_manifest(data: &str, environment: &str) -> Result<Manifest> {
    let mut root = match serde_yaml::from_str::<serde_yaml::Value>(data) {
        Ok(serde_yaml::Value::Mapping(m)) => m,
        Ok(serde_yaml::Value::Null) => serde_yaml::Mapping::new(),
        Ok(_) => return Err(invalid("manifest must be a mapping")),
        Err(e) => return Err(invalid(format!("YAML error: {e}"))),
    };

    let overrides = take_environment_overrides(&mut root)?;
    if let Some(active) = overrides.get(environment) {
        tracing::debug!(environment, "Applying manifest environment overrides");
        crate::yaml::merge_into(&mut root, active.clone());
    }

    let raw: ManifestYaml = serde_yaml::from_value(serde_yaml::Value::Mapping(root))
        .map_err(|e| invalid(e.to_string()))?;
    convert_manifest(raw)
}

/// Remove `environment_overrides`, top-level `dev`/`prod` blocks and legacy
/// non-scalar `env.dev`/`env.prod` entries, returning them by environment.
fn take_environment_overrides(
    root: &mut serde_yaml::Mapping,
) -> Result<BTreeMap<String, serde_yaml::Mapping>> {
    let mut out: BTreeMap<String, serde_yaml::Mapping> = BTreeMap::new();
    let mut add = |env: &str, value: serde_yaml::Value| -> Result<()> {
        let serde_yaml::Value::Mapping(m) = value else {
            return Err(invalid(format!("override for environment {env:?} must be a mapping")));
        };
        crate::yaml::merge_into(out.entry(env.to_string()).or_default(), m);
        Ok(())
    };

    // Legacy: `env: { dev: {...} }` meant overrides, not variables
    if let Some(serde_yaml::Value::Mapping(env)) = root.get_mut("env") {
        for name in ["dev", "prod"] {
            if matches!(env.get(name), Some(serde_yaml::Value::Mapping(_))) {
                if let Some(v) = env.remove(name) {
                    add(name, v)?;
                }
            }
        }
    }

    if let Some(v) = root.remove("environment_overrides") {
        let serde_yaml::Value::Mapping(envs) = v else {
            return Err(invalid("environment_overrides must be a mapping"));
        };
        for (k, v) in envs {
            let name = k
                .as_str()
                .ok_or_else(|| invalid("environment names must be strings"))?
                .to_string();
            add(&name, v)?;
        }
    }

    for name in ["dev", "prod"] {
        if let Some(v) = root.remove(name) {
            add(name, v)?;
        }
    }

    Ok(out)
}

fn convert_manifest(raw: ManifestYaml) -> Result<Manifest> {
    let mut connectors = Vec::with_capacity(raw.connectors.len());
    for c in raw.connectors {
        if RESERVED_CONNECTORS.contains(&c.name.as_str()) {
            return Err(invalid(format!("connector name {:?} is reserved", c.name)));
        }
        connectors.push(ConnectorDef {
            driver: c.driver,
            name: c.name,
            defaults: crate::yaml::to_properties(serde_yaml::Value::Mapping(c.defaults))
                .map_err(|e| invalid(e.to_string()))?,
        });
    }

    let mut variables = BTreeMap::new();
    for (section, map) in [("env", raw.env), ("vars", raw.vars)] {
        for (k, v) in map {
            let key = k
                .as_str()
                .ok_or_else(|| invalid(format!("{section}: keys must be strings")))?;
            let value = crate::yaml::scalar_to_string(&v)
                .ok_or_else(|| invalid(format!("{section}: value for {key:?} must be a scalar")))?;
            variables.insert(key.to_string(), value);
        }
    }

    let mut defaults = BTreeMap::new();
    let per_kind = [
        (ResourceKind::Source, raw.sources),
        (ResourceKind::Model, raw.models),
        (ResourceKind::MetricsView, raw.metrics_views),
        (ResourceKind::Explore, raw.explores),
        (ResourceKind::Canvas, raw.canvases),
        (ResourceKind::Migration, raw.migrations),
        (ResourceKind::Api, raw.apis),
        (ResourceKind::Alert, raw.alerts),
        (ResourceKind::Report, raw.reports),
        (ResourceKind::Theme, raw.themes),
        (ResourceKind::Component, raw.components),
    ];
    for (kind, map) in per_kind {
        if let Some(map) = map {
            defaults.insert(kind, map);
        }
    }

    let mut features = BTreeMap::new();
    match raw.features {
        None | Some(serde_yaml::Value::Null) => {}
        Some(serde_yaml::Value::Sequence(names)) => {
            for name in names {
                let name = name
                    .as_str()
                    .ok_or_else(|| invalid("features: list entries must be strings"))?;
                features.insert(name.to_string(), "true".to_string());
            }
        }
        Some(serde_yaml::Value::Mapping(map)) => {
            for (k, v) in map {
                let key = k.as_str().ok_or_else(|| invalid("features: keys must be strings"))?;
                let value = crate::yaml::scalar_to_string(&v)
                    .ok_or_else(|| invalid(format!("features: value for {key:?} must be a scalar")))?;
                features.insert(key.to_string(), value);
            }
        }
        Some(_) => return Err(invalid("features must be a list or a mapping")),
    }

    let mock_users = raw
        .mock_users
        .into_iter()
        .map(|u| serde_json::to_value(u).map_err(|e| invalid(format!("mock_users: {e}"))))
        .collect::<Result<Vec<_>>>()?;

    Ok(Manifest {
        display_name: raw.display_name.unwrap_or_default(),
        description: raw.description.unwrap_or_default(),
        ai_instructions: raw.ai_instructions.unwrap_or_default(),
        olap_connector: raw.olap_connector.unwrap_or_default(),
        connectors,
        variables,
        defaults,
        features,
        public_paths: raw.public_paths.unwrap_or_else(|| vec!["public".to_string()]),
        ignore_paths: raw.ignore_paths,
        mock_users,
    })
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ManifestInvalid {
        message: message.into(),
    }
}

/// Parse a dotenv file
///
/// Supports `KEY=VALUE` lines, `#` comments, an optional `export ` prefix
/// and single or double quoted values.
pub fn parse_dotenv(data: &str) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for (i, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::invalid_value(
                "environment file line",
                line,
                format!("line {}: expected KEY=VALUE", i + 1),
            ));
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(Error::invalid_value(
                "environment variable name",
                key,
                format!("line {}", i + 1),
            ));
        }
        vars.insert(key.to_string(), unquote(value.trim()));
    }
    Ok(vars)
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            let inner = &value[1..value.len() - 1];
            return if quote == '"' {
                inner.replace("\\n", "\n").replace("\\\"", "\"")
            } else {
                inner.to_string()
            };
        }
    }
    // Unquoted values may carry a trailing comment
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

/// Variables contributed by each environment file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvLayers {
    files: BTreeMap<String, BTreeMap<String, String>>,
}

impl EnvLayers {
    /// Replace the contribution of one file
    pub fn set(&mut self, path: &str, vars: BTreeMap<String, String>) {
        self.files.insert(path.to_string(), vars);
    }

    /// Remove the contribution of one file; returns true if it was present
    pub fn remove(&mut self, path: &str) -> bool {
        self.files.remove(path).is_some()
    }

    /// Known environment file paths
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Merge all files; for each key the deepest file wins
    pub fn merged(&self) -> BTreeMap<String, String> {
        let mut files: Vec<(&String, &BTreeMap<String, String>)> = self.files.iter().collect();
        files.sort_by_key(|(path, _)| (path.matches('/').count(), path.as_str()));
        let mut out = BTreeMap::new();
        for (_, vars) in files {
            out.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_manifest() {
        let manifest = parse_manifest("", "").unwrap();
        assert_eq!(manifest.public_paths, vec!["public"]);
        assert!(manifest.connectors.is_empty());
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = parse_manifest(
            r#"
title: Hello world
description: This project says hello to the world
connectors:
  - name: my-s3
    type: s3
    defaults:
      region: us-east-1
env:
  foo: bar
vars:
  limit: 10
models:
  materialize: true
features:
  - exports
  - alerts
"#,
            "",
        )
        .unwrap();

        assert_eq!(manifest.display_name, "Hello world");
        assert_eq!(manifest.connectors[0].driver, "s3");
        assert_eq!(manifest.connectors[0].defaults["region"], "us-east-1");
        assert_eq!(manifest.variables["foo"], "bar");
        assert_eq!(manifest.variables["limit"], "10");
        assert_eq!(
            manifest.defaults_for(ResourceKind::Model).unwrap().get("materialize"),
            Some(&serde_yaml::Value::Bool(true))
        );
        assert_eq!(manifest.features["exports"], "true");
    }

    #[test]
    fn test_environment_overrides() {
        let yaml = r#"
olap_connector: duckdb
vars:
  limit: 10
dev:
  olap_connector: clickhouse
environment_overrides:
  prod:
    vars:
      limit: 1000
"#;
        assert_eq!(parse_manifest(yaml, "").unwrap().olap_connector, "duckdb");
        assert_eq!(parse_manifest(yaml, "dev").unwrap().olap_connector, "clickhouse");
        assert_eq!(parse_manifest(yaml, "prod").unwrap().variables["limit"], "1000");
    }

    #[test]
    fn test_legacy_env_overrides() {
        let yaml = r#"
env:
  foo: bar
  dev:
    vars:
      foo: baz
"#;
        assert_eq!(parse_manifest(yaml, "").unwrap().variables["foo"], "bar");
        assert_eq!(parse_manifest(yaml, "dev").unwrap().variables["foo"], "baz");
    }

    #[test]
    fn test_reserved_connector() {
        let err = parse_manifest("connectors: [{type: duckdb, name: admin}]", "").unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_unknown_manifest_field() {
        assert!(parse_manifest("titel: typo", "").is_err());
    }

    #[test]
    fn test_features_map() {
        let manifest = parse_manifest("features: {exports: false, ai: '{{ dev() }}'}", "").unwrap();
        assert_eq!(manifest.features["exports"], "false");
        assert_eq!(manifest.features["ai"], "{{ dev() }}");
    }

    #[test]
    fn test_is_ignored() {
        let manifest = parse_manifest("ignore_paths: [tmp, /scratch/]", "").unwrap();
        assert!(manifest.is_ignored("/tmp/x.sql"));
        assert!(manifest.is_ignored("/scratch/y.yaml"));
        assert!(!manifest.is_ignored("/tmpfile.sql"));
    }

    #[test]
    fn test_parse_dotenv() {
        let vars = parse_dotenv(
            r#"
# comment
FOO=bar
export TOKEN="a b"
SINGLE='x # y'
TRAILING=value # note
"#,
        )
        .unwrap();
        assert_eq!(vars["FOO"], "bar");
        assert_eq!(vars["TOKEN"], "a b");
        assert_eq!(vars["SINGLE"], "x # y");
        assert_eq!(vars["TRAILING"], "value");
        assert!(parse_dotenv("NOVALUE").is_err());
    }

    #[test]
    fn test_env_layers_deepest_wins() {
        let mut layers = EnvLayers::default();
        layers.set(
            "/.env",
            BTreeMap::from([("a".into(), "root".into()), ("b".into(), "root".into())]),
        );
        layers.set("/nested/dir/.env", BTreeMap::from([("a".into(), "deep".into())]));
        let merged = layers.merged();
        assert_eq!(merged["a"], "deep");
        assert_eq!(merged["b"], "root");

        assert!(layers.remove("/nested/dir/.env"));
        assert_eq!(layers.merged()["a"], "root");
    }
}
