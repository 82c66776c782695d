//! Node extraction
//!
//! Every YAML or SQL file is turned into a [`Node`] before it is handed to
//! the parser for its kind. The node carries the keys shared by all kinds
//! (type, name, connector, SQL, refs) and leaves the kind-specific keys in
//! [`Node::yaml`].
//!
//! A resource can be split over a SQL file and a companion YAML file with
//! the same stem. The YAML file is then a settings layer; the SQL file only
//! reads the companion's common keys so both layers agree on kind, name and
//! connector.

use quarry_core::manifest::Manifest;
use quarry_core::store::FileStore;
use quarry_core::template::{self, TemplateMetadata};
use quarry_core::yaml;
use quarry_core::{ResourceKind, ResourceRef};
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::parser::ParserOptions;
use crate::sql::embedded::{self, EmbeddedSource};

/// Keys removed from every file before kind-specific decoding
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CommonKeys {
    pub type_name: Option<String>,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub refs: Vec<ResourceRef>,
    pub connector: Option<String>,
    pub sql: Option<String>,
    pub version: Option<u32>,
    pub templating: Option<bool>,
}

impl CommonKeys {
    /// Fill unset keys from `other`; refs are appended
    fn fill_from(&mut self, other: CommonKeys) {
        self.type_name = self.type_name.take().or(other.type_name);
        self.name = self.name.take().or(other.name);
        self.namespace = self.namespace.take().or(other.namespace);
        self.connector = self.connector.take().or(other.connector);
        self.sql = self.sql.take().or(other.sql);
        self.version = self.version.or(other.version);
        self.templating = self.templating.or(other.templating);
        for r in other.refs {
            if !self.refs.contains(&r) {
                self.refs.push(r);
            }
        }
    }
}

/// Pre-processed view of one file
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Resource kind
    pub kind: ResourceKind,
    /// Resource name
    pub name: String,
    /// File being parsed
    pub path: String,
    /// `version` key, 0 when absent
    pub version: u32,
    /// Connector, explicit or defaulted
    pub connector: String,
    /// The connector was not declared
    pub connector_inferred: bool,
    /// Query text, empty if none
    pub sql: String,
    /// The query text uses templating
    pub sql_uses_templating: bool,
    /// References from the `refs` key, templates and SQL analysis
    pub refs: Vec<ResourceRef>,
    /// Kind-specific keys
    pub yaml: Mapping,
    /// YAML layer whose query lives in a companion SQL file
    pub settings_only: bool,
    /// Sources synthesized from the query
    pub embedded: Vec<EmbeddedSource>,
}

/// Result of static analysis of a query
#[derive(Debug, Default)]
struct StaticAnalysis {
    sql: String,
    refs: Vec<ResourceRef>,
    annotations: Mapping,
    embedded: Vec<EmbeddedSource>,
}

/// Builds nodes from file contents
pub(crate) struct NodeBuilder<'a> {
    pub store: &'a dyn FileStore,
    pub options: &'a ParserOptions,
    pub manifest: &'a Manifest,
}

impl NodeBuilder<'_> {
    fn olap_connector(&self) -> &str {
        if self.manifest.olap_connector.is_empty() {
            &self.options.default_olap_connector
        } else {
            &self.manifest.olap_connector
        }
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.store.exists(path).map_err(Error::Store)
    }

    /// Build the node for a YAML file
    pub fn from_yaml(&self, path: &str, text: &str) -> Result<Node> {
        let mut map = parse_mapping(text)?;
        apply_environment_overrides(&mut map, &self.options.environment)?;
        let mut common = extract_common(&mut map)?;

        let companion = companion_sql_path(path);
        let companion = if self.exists(&companion)? {
            Some(companion)
        } else {
            None
        };
        if common.sql.is_some() && companion.is_some() {
            return Err(Error::invalid(
                "SQL provided using both a YAML key and a companion file",
            ));
        }

        let infer_from = companion.as_deref().unwrap_or(path);
        let kind = resolve_kind(common.type_name.take(), infer_from, &mut map)?;
        self.apply_manifest_defaults(kind, &mut map, &mut common)?;

        let (connector, connector_inferred) = match common.connector.take() {
            Some(c) => (c, false),
            None => (self.olap_connector().to_string(), true),
        };

        let mut refs = common.refs.clone();
        let mut sql = String::new();
        let mut sql_uses_templating = false;
        let mut embedded = Vec::new();
        if let Some(text) = common.sql.take() {
            let templating = common.templating.unwrap_or(true) && template::uses_templating(&text);
            sql = text;
            if templating {
                let meta = template::analyze(&sql)?;
                sql_uses_templating = true;
                push_refs(&mut refs, meta.refs);
                let mut config = yaml::expand_dotted(meta.config)?;
                extract_common(&mut config)?;
                yaml::apply_defaults(&mut map, &config);
            } else if self.is_dialect(&connector) {
                let analysis = self.analyze_static(&sql, &connector);
                sql = analysis.sql;
                push_refs(&mut refs, analysis.refs);
                embedded = analysis.embedded;
                let mut annotations = yaml::expand_dotted(analysis.annotations)?;
                extract_common(&mut annotations)?;
                yaml::apply_defaults(&mut map, &annotations);
            }
        }

        Ok(Node {
            kind,
            name: resource_name(&common, path),
            path: path.to_string(),
            version: common.version.unwrap_or(0),
            connector,
            connector_inferred,
            sql,
            sql_uses_templating,
            refs,
            yaml: map,
            settings_only: companion.is_some(),
            embedded,
        })
    }

    /// Build the node for a SQL file
    pub fn from_sql(&self, path: &str, text: &str) -> Result<Node> {
        let mut companion_common = CommonKeys::default();
        let mut has_companion = false;
        for companion in companion_yaml_paths(path) {
            if !self.exists(&companion)? {
                continue;
            }
            let contents = self.store.get(&companion).map_err(Error::Store)?;
            let mut map = parse_mapping(&contents)?;
            apply_environment_overrides(&mut map, &self.options.environment)?;
            companion_common = extract_common(&mut map)?;
            if companion_common.sql.is_some() {
                return Err(Error::invalid(
                    "SQL provided using both a YAML key and a companion file",
                ));
            }
            has_companion = true;
            break;
        }

        let templating =
            companion_common.templating.unwrap_or(true) && template::uses_templating(text);
        let meta = if templating {
            template::analyze(text)?
        } else {
            TemplateMetadata::default()
        };

        let mut config = yaml::expand_dotted(meta.config)?;
        let mut common = extract_common(&mut config)?;
        common.fill_from(companion_common);

        let mut refs = common.refs.clone();
        push_refs(&mut refs, meta.refs);

        let mut sql = text.to_string();
        let mut embedded = Vec::new();
        let mut connector = common.connector.clone();
        if !templating {
            let candidate = connector
                .clone()
                .unwrap_or_else(|| self.olap_connector().to_string());
            if self.is_dialect(&candidate) {
                let analysis = self.analyze_static(text, &candidate);
                let mut annotations = yaml::expand_dotted(analysis.annotations)?;
                let mut annotated = extract_common(&mut annotations)?;
                annotated.fill_from(std::mem::take(&mut common));
                common = annotated;
                connector = common.connector.clone();
                sql = analysis.sql;
                push_refs(&mut refs, analysis.refs);
                embedded = analysis.embedded;
                yaml::apply_defaults(&mut config, &annotations);
            }
        }

        let kind = resolve_kind(common.type_name.take(), path, &mut config)?;
        if !has_companion {
            self.apply_manifest_defaults(kind, &mut config, &mut common)?;
            connector = common.connector.clone();
        }
        let (connector, connector_inferred) = match connector {
            Some(c) => (c, false),
            None => (self.olap_connector().to_string(), true),
        };
        push_refs(&mut refs, std::mem::take(&mut common.refs));

        Ok(Node {
            kind,
            name: resource_name(&common, path),
            path: path.to_string(),
            version: common.version.unwrap_or(0),
            connector,
            connector_inferred,
            sql,
            sql_uses_templating: templating,
            refs,
            yaml: config,
            settings_only: false,
            embedded,
        })
    }

    fn apply_manifest_defaults(
        &self,
        kind: ResourceKind,
        map: &mut Mapping,
        common: &mut CommonKeys,
    ) -> Result<()> {
        let Some(defaults) = self.manifest.defaults_for(kind) else {
            return Ok(());
        };
        let mut defaults = defaults.clone();
        apply_environment_overrides(&mut defaults, &self.options.environment)?;
        let mut default_common = extract_common(&mut defaults)?;
        // Defaults never rename or retype a resource
        default_common.type_name = None;
        default_common.name = None;
        default_common.namespace = None;
        common.fill_from(default_common);
        yaml::apply_defaults(map, &defaults);
        Ok(())
    }

    fn is_dialect(&self, connector: &str) -> bool {
        self.options
            .sql_dialect_connectors
            .iter()
            .any(|c| c.eq_ignore_ascii_case(connector))
    }

    fn analyze_static(&self, sql: &str, connector: &str) -> StaticAnalysis {
        let mut ast = match self.options.analyzer.parse(sql) {
            Ok(ast) => ast,
            Err(e) => {
                tracing::debug!(error = %e, "Query analysis skipped");
                return StaticAnalysis {
                    sql: sql.to_string(),
                    annotations: crate::sql::annotations::to_yaml(
                        &crate::sql::annotations::extract(sql),
                    ),
                    ..Default::default()
                };
            }
        };

        let mut out = StaticAnalysis {
            annotations: crate::sql::annotations::to_yaml(&ast.annotations()),
            ..Default::default()
        };
        for table in ast.table_refs() {
            if table.local_alias {
                continue;
            }
            if let Some(source) = embedded::from_table_ref(&table, connector) {
                push_refs(
                    &mut out.refs,
                    [ResourceRef::typed(ResourceKind::Source, source.name.clone())],
                );
                if !out.embedded.iter().any(|e| e.name == source.name) {
                    out.embedded.push(source);
                }
            } else if table.function.is_none() {
                push_refs(&mut out.refs, [ResourceRef::untyped(table.name)]);
            }
        }

        out.sql = sql.to_string();
        if !out.embedded.is_empty() {
            let rewrite = ast
                .rewrite_table_refs(&mut |table| {
                    embedded::from_table_ref(table, connector).map(|source| source.name)
                })
                .and_then(|_| ast.format());
            match rewrite {
                Ok(text) => out.sql = text,
                Err(e) => tracing::debug!(error = %e, "Query rewrite skipped"),
            }
        }
        out
    }
}

fn push_refs(refs: &mut Vec<ResourceRef>, more: impl IntoIterator<Item = ResourceRef>) {
    for r in more {
        if !refs.contains(&r) {
            refs.push(r);
        }
    }
}

/// Decode a YAML document that must be a mapping (empty documents are allowed)
pub(crate) fn parse_mapping(text: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(Error::invalid("expected a YAML mapping at the top level")),
    }
}

/// Remove environment override blocks and merge the active one
pub(crate) fn apply_environment_overrides(map: &mut Mapping, environment: &str) -> Result<()> {
    let mut active = Mapping::new();
    let mut collect = |blocks: Value, what: &str| -> Result<()> {
        let Value::Mapping(blocks) = blocks else {
            return Err(Error::invalid(format!("{what} must be a mapping")));
        };
        if let Some(block) = blocks.get(environment) {
            let Value::Mapping(block) = block.clone() else {
                return Err(Error::invalid(format!(
                    "{what}: override for {environment:?} must be a mapping"
                )));
            };
            yaml::merge_into(&mut active, block);
        }
        Ok(())
    };

    if let Some(v) = map.remove("env") {
        collect(v, "env")?;
    }
    if let Some(v) = map.remove("environment_overrides") {
        collect(v, "environment_overrides")?;
    }
    for name in ["dev", "prod"] {
        if let Some(block) = map.remove(name) {
            let mut wrapper = Mapping::new();
            wrapper.insert(Value::String(name.to_string()), block);
            collect(Value::Mapping(wrapper), name)?;
        }
    }

    yaml::merge_into(map, active);
    Ok(())
}

/// Remove the common keys from `map`
pub(crate) fn extract_common(map: &mut Mapping) -> Result<CommonKeys> {
    let mut common = CommonKeys::default();

    let ty = map.remove("type");
    let kind = map.remove("kind");
    common.type_name = match (ty, kind) {
        (Some(v), _) | (None, Some(v)) => Some(string_key("type", v)?),
        (None, None) => None,
    };
    if let Some(v) = map.remove("name") {
        common.name = Some(string_key("name", v)?);
    }
    if let Some(v) = map.remove("namespace") {
        common.namespace = Some(string_key("namespace", v)?);
    }
    if let Some(v) = map.remove("connector") {
        common.connector = Some(string_key("connector", v)?);
    }
    if let Some(v) = map.remove("sql") {
        common.sql = Some(string_key("sql", v)?);
    }
    if let Some(v) = map.remove("version") {
        common.version = Some(match v {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| Error::invalid("version must be a non-negative integer"))?,
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::invalid(format!("invalid version {s:?}")))?,
            _ => return Err(Error::invalid("version must be an integer")),
        });
    }
    if let Some(v) = map.remove("parser") {
        let Value::Mapping(parser) = v else {
            return Err(Error::invalid("parser must be a mapping"));
        };
        match parser.get("templating") {
            Some(Value::Bool(b)) => common.templating = Some(*b),
            Some(_) => return Err(Error::invalid("parser.templating must be a boolean")),
            None => {}
        }
    }
    if let Some(v) = map.remove("refs") {
        common.refs = parse_refs(v)?;
    }

    Ok(common)
}

fn string_key(key: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) if key == "name" => Ok(n.to_string()),
        _ => Err(Error::invalid(format!("{key} must be a string"))),
    }
}

fn parse_refs(value: Value) -> Result<Vec<ResourceRef>> {
    let Value::Sequence(items) = value else {
        return Err(Error::invalid("refs must be a list"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(ResourceRef::parse(&s)?),
            Value::Mapping(m) => {
                let name = m
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid("ref is missing a name"))?;
                match m.get("type").or_else(|| m.get("kind")).and_then(Value::as_str) {
                    Some(kind) => Ok(ResourceRef::typed(kind.parse()?, name)),
                    None => Ok(ResourceRef::untyped(name)),
                }
            }
            _ => Err(Error::invalid("refs must be strings or mappings with a name")),
        })
        .collect()
}

/// Resolve the declared type, falling back to the file location
fn resolve_kind(type_name: Option<String>, path: &str, map: &mut Mapping) -> Result<ResourceKind> {
    let Some(type_name) = type_name else {
        return infer_kind(path);
    };
    match type_name.parse::<ResourceKind>() {
        Ok(kind) => Ok(kind),
        // Older connector files used `type` for the driver
        Err(_) if path.starts_with("/connectors/") => {
            map.insert(Value::String("driver".into()), Value::String(type_name));
            Ok(ResourceKind::Connector)
        }
        Err(e) => Err(e.into()),
    }
}

/// Infer a kind from a file location
pub(crate) fn infer_kind(path: &str) -> Result<ResourceKind> {
    if path.starts_with("/sources/") {
        Ok(ResourceKind::Source)
    } else if path.starts_with("/models/") {
        Ok(ResourceKind::Model)
    } else if path.starts_with("/dashboards/") {
        Ok(ResourceKind::MetricsView)
    } else if path.starts_with("/connectors/") {
        Ok(ResourceKind::Connector)
    } else if path == "/init.sql" {
        Ok(ResourceKind::Migration)
    } else if path.ends_with(".sql") {
        Ok(ResourceKind::Model)
    } else {
        Err(Error::invalid(
            "resource type not specified and could not be inferred from context",
        ))
    }
}

fn resource_name(common: &CommonKeys, path: &str) -> String {
    let name = common
        .name
        .clone()
        .unwrap_or_else(|| file_stem(path).to_string());
    match &common.namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}:{name}"),
        _ => name,
    }
}

/// File name without directory and extension
pub(crate) fn file_stem(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file)
}

fn without_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) => &path[..file_start + dot],
        None => path,
    }
}

/// SQL file accompanying a YAML file
pub(crate) fn companion_sql_path(path: &str) -> String {
    format!("{}.sql", without_extension(path))
}

/// YAML files that may accompany a SQL file, in lookup order
pub(crate) fn companion_yaml_paths(path: &str) -> [String; 2] {
    let base = without_extension(path);
    [format!("{base}.yaml"), format!("{base}.yml")]
}

/// Companion files of `path` in either direction
pub(crate) fn companion_paths(path: &str) -> Vec<String> {
    if path.ends_with(".sql") {
        companion_yaml_paths(path).to_vec()
    } else if path.ends_with(".yaml") || path.ends_with(".yml") {
        vec![companion_sql_path(path)]
    } else {
        Vec::new()
    }
}
