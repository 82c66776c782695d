//! Full and incremental project compilation
//!
//! A [`Parser`] owns the registry for one project. [`Parser::parse`] compiles
//! every file from scratch; [`Parser::reparse`] recompiles the files affected
//! by a set of changed paths and reports what changed as a [`Diff`].
//!
//! Files are always visited in the same order: environment files, the
//! manifest, YAML files sorted by path, then SQL files sorted by path. YAML
//! goes first so a companion settings file is known before its SQL file.

use indexmap::{IndexMap, IndexSet};
use quarry_core::manifest::{
    self, MANIFEST_PATH, MANIFEST_PATH_ALT, Manifest, is_env_path, is_manifest_path,
};
use quarry_core::store::{FileStore, normalize_path};
use quarry_core::{EnvLayers, ResourceKind, ResourceName};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{self, NodeBuilder};
use crate::parsers::{self, ParseContext};
use crate::registry::{ParseError, Registry, Resource};
use crate::sql::{QueryAnalyzer, SqlParserAnalyzer};

/// Files considered part of a project
const PROJECT_GLOB: &str = "**/*.{env,yaml,yml,sql}";

/// Options for a [`Parser`]
#[derive(Clone)]
pub struct ParserOptions {
    /// Active environment (`dev`, `prod`, or empty)
    pub environment: String,
    /// OLAP connector used when the manifest does not name one
    pub default_olap_connector: String,
    /// Connectors whose SQL is analyzed statically
    pub sql_dialect_connectors: Vec<String>,
    /// Query analyzer used for static analysis
    pub analyzer: Arc<dyn QueryAnalyzer>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            environment: String::new(),
            default_olap_connector: "duckdb".to_string(),
            sql_dialect_connectors: vec!["duckdb".to_string()],
            analyzer: Arc::new(SqlParserAnalyzer),
        }
    }
}

impl fmt::Debug for ParserOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserOptions")
            .field("environment", &self.environment)
            .field("default_olap_connector", &self.default_olap_connector)
            .field("sql_dialect_connectors", &self.sql_dialect_connectors)
            .finish_non_exhaustive()
    }
}

/// Changes produced by a reparse
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Resources that did not exist before
    pub added: Vec<ResourceName>,
    /// Resources that were rebuilt or whose links changed
    pub modified: Vec<ResourceName>,
    /// Resources that no longer exist
    pub deleted: Vec<ResourceName>,
    /// The manifest changed and the project was reloaded
    pub reloaded: bool,
    /// An environment file changed
    pub modified_env: bool,
}

impl Diff {
    /// Returns true if nothing changed
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && !self.reloaded
            && !self.modified_env
    }
}

/// Compiles a project into a registry of resources
pub struct Parser {
    store: Arc<dyn FileStore>,
    options: ParserOptions,
    manifest: Manifest,
    manifest_path: String,
    env: EnvLayers,
    registry: Registry,
}

impl Parser {
    /// Create a parser over a file store; nothing is read until [`Parser::parse`]
    pub fn new(store: Arc<dyn FileStore>, options: ParserOptions) -> Self {
        Self {
            store,
            options,
            manifest: Manifest::default(),
            manifest_path: MANIFEST_PATH.to_string(),
            env: EnvLayers::default(),
            registry: Registry::default(),
        }
    }

    /// Compile every file of the project from scratch
    ///
    /// Fails only on fatal errors (missing or invalid manifest, file store
    /// failures). Errors in individual files are available from
    /// [`Parser::errors`].
    pub fn parse(&mut self) -> Result<()> {
        self.registry = Registry::default();
        self.env = EnvLayers::default();

        let files = self
            .store
            .list_recursive("/", PROJECT_GLOB)
            .map_err(Error::Store)?;
        for file in files.iter().filter(|f| is_env_path(&f.path)) {
            self.load_env_file(&file.path)?;
        }

        self.load_manifest()?;
        self.parse_manifest_connectors();

        let paths: Vec<String> = files.into_iter().map(|f| f.path).collect();
        for path in self.parse_order(paths) {
            self.parse_path(&path)?;
        }
        let inserted = self.finish_pass();

        tracing::info!(
            resources = self.registry.resources().len(),
            errors = self.registry.errors().len(),
            committed = inserted.len(),
            "Parsed project"
        );
        Ok(())
    }

    /// Recompile the files affected by `paths` and report the changes
    pub fn reparse<S: AsRef<str>>(&mut self, paths: &[S]) -> Result<Diff> {
        let paths: BTreeSet<String> = paths.iter().map(|p| normalize_path(p.as_ref())).collect();

        if paths.iter().any(|p| is_manifest_path(p)) {
            return self.reload();
        }

        let mut diff = Diff::default();
        let mut changed = BTreeSet::new();
        for path in paths {
            if is_env_path(&path) {
                if self.store.exists(&path).map_err(Error::Store)? {
                    self.load_env_file(&path)?;
                } else {
                    self.env.remove(&path);
                }
                diff.modified_env = true;
            } else if is_parseable(&path) {
                changed.insert(path);
            }
        }
        if changed.is_empty() {
            return Ok(diff);
        }

        let before_refs = self.linked_refs();
        let closure = self.closure(changed);
        tracing::debug!(paths = ?closure, "Reparse closure");

        let mut candidates: IndexSet<ResourceName> = IndexSet::new();
        let mut from_manifest = HashSet::new();
        for path in &closure {
            for name in self.registry.resources_for_path(path).to_vec() {
                if let Some(resource) = self.registry.delete(&name) {
                    if resource.paths.iter().any(|p| p == &self.manifest_path) {
                        from_manifest.insert(name.clone());
                    }
                    candidates.insert(name);
                }
            }
            self.registry.remove_errors(path);
        }
        self.restore_manifest_connectors(&from_manifest);

        let mut queue = Vec::new();
        for path in closure {
            if self.store.exists(&path).map_err(Error::Store)? {
                queue.push(path);
            }
        }
        for path in self.parse_order(queue) {
            self.parse_path(&path)?;
        }
        let inserted = self.finish_pass();

        for name in &inserted {
            if candidates.contains(name) {
                diff.modified.push(name.clone());
            } else {
                diff.added.push(name.clone());
            }
        }
        let inserted: HashSet<&ResourceName> = inserted.iter().collect();
        diff.deleted = candidates
            .iter()
            .filter(|name| !inserted.contains(name))
            .cloned()
            .collect();
        for (name, resource) in self.registry.resources() {
            if inserted.contains(name) {
                continue;
            }
            if before_refs.get(name) != Some(&resource.refs) {
                diff.modified.push(name.clone());
            }
        }

        tracing::info!(
            added = diff.added.len(),
            modified = diff.modified.len(),
            deleted = diff.deleted.len(),
            errors = self.registry.errors().len(),
            "Reparsed project"
        );
        Ok(diff)
    }

    /// All resources, in commit order
    pub fn resources(&self) -> &IndexMap<ResourceName, Resource> {
        self.registry.resources()
    }

    /// Look up a resource
    pub fn resource(&self, name: &ResourceName) -> Option<&Resource> {
        self.registry.get(name)
    }

    /// Resources of one kind
    pub fn resources_of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources().values().filter(move |r| r.kind() == kind)
    }

    /// Per-file errors from the last pass
    pub fn errors(&self) -> &[ParseError] {
        self.registry.errors()
    }

    /// The registry backing this parser
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The project manifest
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Manifest variables overridden by environment files
    pub fn variables(&self) -> BTreeMap<String, String> {
        self.manifest.resolved_variables(&self.env)
    }

    /// Parser options
    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    fn reload(&mut self) -> Result<Diff> {
        let before: IndexSet<ResourceName> = self.registry.resources().keys().cloned().collect();
        self.parse()?;

        let mut diff = Diff {
            reloaded: true,
            ..Default::default()
        };
        for name in self.registry.resources().keys() {
            if before.contains(name) {
                diff.modified.push(name.clone());
            } else {
                diff.added.push(name.clone());
            }
        }
        diff.deleted = before
            .into_iter()
            .filter(|name| self.registry.get(name).is_none())
            .collect();
        tracing::info!(resources = self.registry.resources().len(), "Reloaded project after manifest change");
        Ok(diff)
    }

    fn load_manifest(&mut self) -> Result<()> {
        let mut found = None;
        for path in [MANIFEST_PATH, MANIFEST_PATH_ALT] {
            if self.store.exists(path).map_err(Error::Store)? {
                found = Some(path);
                break;
            }
        }
        let Some(path) = found else {
            return Err(Error::ManifestNotFound {
                path: MANIFEST_PATH.to_string(),
            });
        };
        let text = self.store.get(path).map_err(Error::Store)?;
        self.manifest = manifest::parse_manifest(&text, &self.options.environment).map_err(Error::Manifest)?;
        self.manifest_path = path.to_string();
        tracing::debug!(path, connectors = self.manifest.connectors.len(), "Loaded manifest");
        Ok(())
    }

    fn load_env_file(&mut self, path: &str) -> Result<()> {
        let text = self.store.get(path).map_err(Error::Store)?;
        match manifest::parse_dotenv(&text) {
            Ok(vars) => self.env.set(path, vars),
            Err(e) => {
                self.env.remove(path);
                self.registry.remove_errors(path);
                self.registry.add_error(path, &Error::Core(e));
            }
        }
        Ok(())
    }

    fn parse_manifest_connectors(&mut self) {
        for def in &self.manifest.connectors {
            if let Err(e) = parsers::parse_manifest_connector(&mut self.registry, def, &self.manifest_path) {
                self.registry.add_error(&self.manifest_path, &e);
            }
        }
    }

    /// Recommit the manifest layer of connectors deleted by a reparse
    fn restore_manifest_connectors(&mut self, names: &HashSet<ResourceName>) {
        if names.is_empty() {
            return;
        }
        for def in &self.manifest.connectors {
            if !names.contains(&ResourceName::new(ResourceKind::Connector, &def.name)) {
                continue;
            }
            if let Err(e) = parsers::parse_manifest_connector(&mut self.registry, def, &self.manifest_path) {
                self.registry.add_error(&self.manifest_path, &e);
            }
        }
    }

    /// Parseable paths ordered YAML first, then SQL, each sorted
    fn parse_order(&self, paths: Vec<String>) -> Vec<String> {
        let mut yaml = Vec::new();
        let mut sql = Vec::new();
        for path in paths {
            if !is_parseable(&path) || is_manifest_path(&path) || self.manifest.is_ignored(&path) {
                continue;
            }
            if path.ends_with(".sql") {
                sql.push(path);
            } else {
                yaml.push(path);
            }
        }
        yaml.sort();
        sql.sort();
        yaml.extend(sql);
        yaml
    }

    /// Parse one file; per-file errors are recorded, fatal errors returned
    fn parse_path(&mut self, path: &str) -> Result<()> {
        let text = self.store.get(path).map_err(Error::Store)?;
        let builder = NodeBuilder {
            store: self.store.as_ref(),
            options: &self.options,
            manifest: &self.manifest,
        };
        let node = if path.ends_with(".sql") {
            builder.from_sql(path, &text)
        } else {
            builder.from_yaml(path, &text)
        };

        let result = node.and_then(|node| {
            let mut ctx = ParseContext {
                registry: &mut self.registry,
                options: &self.options,
                manifest: &self.manifest,
            };
            parsers::parse_node(&mut ctx, &node)
        });
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::debug!(path, error = %e, "Failed to parse file");
                self.registry.add_error(path, &e);
                Ok(())
            }
        }
    }

    /// Fill layered defaults and link refs; returns the committed names
    fn finish_pass(&mut self) -> Vec<ResourceName> {
        let inserted = self.registry.take_inserted();
        let olap = if self.manifest.olap_connector.is_empty() {
            self.options.default_olap_connector.clone()
        } else {
            self.manifest.olap_connector.clone()
        };
        parsers::finalize(&mut self.registry, &inserted, &olap);
        self.registry.link_refs();
        inserted
    }

    /// Every path that must be revisited when `paths` change
    fn closure(&self, paths: BTreeSet<String>) -> BTreeSet<String> {
        let mut closure = paths;
        closure.extend(self.registry.collision_paths());
        loop {
            let mut next = closure.clone();
            for path in &closure {
                for name in self.registry.resources_for_path(path) {
                    if let Some(resource) = self.registry.get(name) {
                        next.extend(resource.paths.iter().cloned());
                    }
                }
                next.extend(node::companion_paths(path).into_iter().filter(|p| !is_manifest_path(p)));

                // A new file may take over a name held by another kind
                let stem = node::file_stem(path);
                for kind in ResourceKind::ALL {
                    if let Some(resource) = self.registry.get(&ResourceName::new(kind, stem)) {
                        next.extend(resource.paths.iter().cloned());
                    }
                }
            }
            next.retain(|p| !is_manifest_path(p));
            if next.len() == closure.len() {
                return closure;
            }
            closure = next;
        }
    }

    fn linked_refs(&self) -> HashMap<ResourceName, Vec<ResourceName>> {
        self.registry
            .resources()
            .iter()
            .map(|(name, resource)| (name.clone(), resource.refs.clone()))
            .collect()
    }
}

fn is_parseable(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml") || path.ends_with(".sql")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::MemoryStore;

    fn parser(files: &[(&str, &str)]) -> (Arc<MemoryStore>, Parser) {
        let store = Arc::new(MemoryStore::with_files(files.iter().copied()));
        let parser = Parser::new(store.clone(), ParserOptions::default());
        (store, parser)
    }

    #[test]
    fn test_missing_manifest_is_fatal() {
        let (_, mut parser) = parser(&[("/models/a.sql", "SELECT 1")]);
        let err = parser.parse().unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound { .. }));
    }

    #[test]
    fn test_invalid_manifest_is_fatal() {
        let (_, mut parser) = parser(&[("/quarry.yaml", "unknown_key: 1")]);
        assert!(matches!(parser.parse().unwrap_err(), Error::Manifest(_)));
    }

    #[test]
    fn test_alternate_manifest_extension() {
        let (_, mut parser) = parser(&[("/quarry.yml", "olap_connector: clickhouse"), ("/models/a.sql", "SELECT 1")]);
        parser.parse().unwrap();
        let model = parser
            .resource(&ResourceName::new(ResourceKind::Model, "a"))
            .unwrap()
            .spec
            .as_model()
            .unwrap()
            .clone();
        assert_eq!(model.output_connector, "clickhouse");
    }

    #[test]
    fn test_manifest_connectors_and_ignored_paths() {
        let (_, mut parser) = parser(&[
            (
                "/quarry.yaml",
                "connectors:\n  - type: postgres\n    name: pg\n    defaults:\n      host: localhost\nignore_paths: [/scratch]",
            ),
            ("/scratch/tmp.sql", "SELECT 1"),
            ("/connectors/pg.yaml", "type: connector\ndriver: postgres\nport: 5432"),
        ]);
        parser.parse().unwrap();
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());
        assert!(parser.resource(&ResourceName::new(ResourceKind::Model, "tmp")).is_none());

        let pg = parser
            .resource(&ResourceName::new(ResourceKind::Connector, "pg"))
            .unwrap();
        assert_eq!(pg.paths, vec!["/quarry.yaml", "/connectors/pg.yaml"]);
        let spec = pg.spec.as_connector().unwrap();
        assert_eq!(spec.properties["host"], "localhost");
        assert_eq!(spec.properties["port"], 5432);
    }

    #[test]
    fn test_out_of_range_duration_is_a_file_error() {
        let (_, mut parser) = parser(&[
            ("/quarry.yaml", ""),
            ("/models/a.yaml", "sql: SELECT 1\ntimeout: 99999999999999999999d"),
            ("/models/b.sql", "SELECT 1"),
        ]);
        parser.parse().unwrap();
        assert_eq!(parser.errors().len(), 1, "{:?}", parser.errors());
        assert_eq!(parser.errors()[0].path, "/models/a.yaml");
        assert!(parser.errors()[0].message.contains("out of range"));
        assert!(parser.resource(&ResourceName::new(ResourceKind::Model, "b")).is_some());
    }

    #[test]
    fn test_env_files_override_variables() {
        let (store, mut parser) = parser(&[
            ("/quarry.yaml", "vars:\n  region: us\n  tier: free"),
            ("/.env", "region=eu"),
        ]);
        parser.parse().unwrap();
        let vars = parser.variables();
        assert_eq!(vars["region"], "eu");
        assert_eq!(vars["tier"], "free");

        store.put("/.env", "region=ap").unwrap();
        let diff = parser.reparse(&["/.env"]).unwrap();
        assert!(diff.modified_env);
        assert!(diff.added.is_empty() && diff.modified.is_empty() && diff.deleted.is_empty());
        assert_eq!(parser.variables()["region"], "ap");
    }

    #[test]
    fn test_reparse_unknown_extension_is_noop() {
        let (_, mut parser) = parser(&[("/quarry.yaml", "")]);
        parser.parse().unwrap();
        assert!(parser.reparse(&["/README.md"]).unwrap().is_empty());
    }
}
