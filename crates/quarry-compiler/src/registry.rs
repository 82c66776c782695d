//! Resource registry
//!
//! The registry exclusively owns the compiled resources, the index from file
//! paths to the resources they contributed to, and the per-file errors. Kind
//! parsers only mutate it through [`Registry::insert`], [`Registry::upsert`]
//! and [`Registry::upsert_shared`].

use indexmap::{IndexMap, IndexSet};
use quarry_core::manifest::is_manifest_path;
use quarry_core::{ResourceKind, ResourceName, ResourceRef, ResourceSpec};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A compiled resource
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    /// Kind and name
    pub name: ResourceName,
    /// Linked dependencies
    pub refs: Vec<ResourceName>,
    /// Files that contributed to the resource
    pub paths: Vec<String>,
    /// Kind-specific specification
    pub spec: ResourceSpec,
    #[serde(skip)]
    declared_refs: Vec<ResourceRef>,
    #[serde(skip)]
    strict: bool,
    #[serde(skip)]
    shared_paths: Vec<String>,
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.name.name == other.name.name
            && self.name.kind == other.name.kind
            && self.refs == other.refs
            && self.paths == other.paths
            && self.spec == other.spec
    }
}

impl Resource {
    fn new(name: ResourceName) -> Self {
        let spec = ResourceSpec::empty(name.kind);
        Self {
            name,
            refs: Vec::new(),
            paths: Vec::new(),
            spec,
            declared_refs: Vec::new(),
            strict: false,
            shared_paths: Vec::new(),
        }
    }

    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        self.name.kind
    }

    /// References as declared, before linking
    pub fn declared_refs(&self) -> &[ResourceRef] {
        &self.declared_refs
    }

    /// Add declared references, skipping duplicates
    pub fn add_refs(&mut self, refs: impl IntoIterator<Item = ResourceRef>) {
        for r in refs {
            if !self.declared_refs.contains(&r) {
                self.declared_refs.push(r);
            }
        }
    }
}

/// A recoverable error scoped to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    /// File the error was raised for
    pub path: String,
    /// Error message
    pub message: String,
    #[serde(skip)]
    name_collision: bool,
}

impl ParseError {
    /// Whether the error was caused by a name collision
    pub fn is_name_collision(&self) -> bool {
        self.name_collision
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Strict,
    Lenient,
    Shared,
}

/// Registry of compiled resources
#[derive(Debug, Default)]
pub struct Registry {
    resources: IndexMap<ResourceName, Resource>,
    resources_for_path: BTreeMap<String, Vec<ResourceName>>,
    errors: Vec<ParseError>,
    inserted: IndexSet<ResourceName>,
}

impl Registry {
    /// All resources
    pub fn resources(&self) -> &IndexMap<ResourceName, Resource> {
        &self.resources
    }

    /// Look up a resource
    pub fn get(&self, name: &ResourceName) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// Mutable lookup, used when layering onto a committed resource
    pub fn get_mut(&mut self, name: &ResourceName) -> Option<&mut Resource> {
        self.resources.get_mut(name)
    }

    /// Recorded errors
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Resources a path contributed to
    pub fn resources_for_path(&self, path: &str) -> &[ResourceName] {
        self.resources_for_path
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Strict insert: fails if any resource with the name exists
    pub fn insert(&mut self, kind: ResourceKind, name: &str, path: &str) -> Result<&mut Resource> {
        self.check(kind, name, path, Mode::Strict)?;
        Ok(self.commit(kind, name, path, Mode::Strict))
    }

    /// Lenient upsert: creates the resource or returns the existing one so a
    /// second file can layer onto it
    pub fn upsert(&mut self, kind: ResourceKind, name: &str, path: &str) -> Result<&mut Resource> {
        self.check(kind, name, path, Mode::Lenient)?;
        Ok(self.commit(kind, name, path, Mode::Lenient))
    }

    /// Upsert for resources synthesized from several files (embedded sources)
    pub fn upsert_shared(&mut self, kind: ResourceKind, name: &str, path: &str) -> Result<&mut Resource> {
        self.check(kind, name, path, Mode::Shared)?;
        Ok(self.commit(kind, name, path, Mode::Shared))
    }

    /// Run the checks of [`Registry::insert`] without mutating anything
    pub fn dry_run_insert(&self, kind: ResourceKind, name: &str) -> Result<()> {
        self.check(kind, name, "", Mode::Strict)
    }

    /// Run the checks of [`Registry::upsert_shared`] without mutating anything
    pub fn dry_run_upsert_shared(&self, kind: ResourceKind, name: &str, path: &str) -> Result<()> {
        self.check(kind, name, path, Mode::Shared)
    }

    fn check(&self, kind: ResourceKind, name: &str, path: &str, mode: Mode) -> Result<()> {
        let key = ResourceName::new(kind, name);

        for other in ResourceKind::ALL {
            if kind.may_share_name(other) {
                continue;
            }
            if self.resources.contains_key(&ResourceName::new(other, name)) {
                return Err(Error::DuplicateResource {
                    name: key,
                    existing: other,
                });
            }
        }

        let Some(existing) = self.resources.get(&key) else {
            return Ok(());
        };
        let collides = match mode {
            Mode::Strict => true,
            Mode::Shared => existing.strict,
            Mode::Lenient => {
                existing.strict
                    || existing.paths.iter().any(|p| {
                        p != path
                            && !is_manifest_path(p)
                            && !existing.shared_paths.contains(p)
                            && extension_class(p) == extension_class(path)
                    })
            }
        };
        if collides {
            return Err(Error::DuplicateResource {
                name: key,
                existing: kind,
            });
        }
        Ok(())
    }

    fn commit(&mut self, kind: ResourceKind, name: &str, path: &str, mode: Mode) -> &mut Resource {
        let key = ResourceName::new(kind, name);

        let index = self.resources_for_path.entry(path.to_string()).or_default();
        if !index.contains(&key) {
            index.push(key.clone());
        }
        self.inserted.insert(key.clone());

        let resource = self
            .resources
            .entry(key.clone())
            .or_insert_with(|| Resource::new(key));
        if mode == Mode::Strict {
            resource.strict = true;
        }
        if !resource.paths.iter().any(|p| p == path) {
            resource.paths.push(path.to_string());
            if mode == Mode::Shared {
                resource.shared_paths.push(path.to_string());
            }
        }
        resource
    }

    /// Remove a resource and its path index entries
    pub(crate) fn delete(&mut self, name: &ResourceName) -> Option<Resource> {
        let resource = self.resources.shift_remove(name)?;
        for path in &resource.paths {
            if let Some(index) = self.resources_for_path.get_mut(path) {
                index.retain(|n| n != name);
                if index.is_empty() {
                    self.resources_for_path.remove(path);
                }
            }
        }
        self.inserted.shift_remove(name);
        Some(resource)
    }

    /// Record a per-file error
    pub(crate) fn add_error(&mut self, path: &str, err: &Error) {
        self.errors.push(ParseError {
            path: path.to_string(),
            message: err.to_string(),
            name_collision: err.is_name_collision(),
        });
    }

    /// Drop every error recorded against `path`
    pub(crate) fn remove_errors(&mut self, path: &str) {
        self.errors.retain(|e| e.path != path);
    }

    /// Paths whose last parse failed with a name collision
    pub(crate) fn collision_paths(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|e| e.name_collision)
            .map(|e| e.path.clone())
            .collect()
    }

    /// Resources committed since the last call
    pub(crate) fn take_inserted(&mut self) -> Vec<ResourceName> {
        std::mem::take(&mut self.inserted).into_iter().collect()
    }

    /// Resolve declared references into `refs`
    ///
    /// Typed references are kept as declared. Untyped references resolve to
    /// the first existing resource with the name, searching kinds in
    /// [`ResourceKind::ALL`] order, and are dropped when nothing matches.
    pub(crate) fn link_refs(&mut self) {
        let keys: Vec<ResourceName> = self.resources.keys().cloned().collect();
        for key in keys {
            let Some(declared) = self.resources.get(&key).map(|r| r.declared_refs.clone()) else {
                continue;
            };
            let mut refs: Vec<ResourceName> = Vec::new();
            for r in declared {
                let target = match r.kind {
                    Some(kind) => Some(ResourceName::new(kind, r.name)),
                    None => ResourceKind::ALL
                        .iter()
                        .map(|kind| ResourceName::new(*kind, r.name.clone()))
                        .find(|n| *n != key && self.resources.contains_key(n)),
                };
                let Some(target) = target else {
                    continue;
                };
                if target == key || refs.contains(&target) {
                    continue;
                }
                let target = self
                    .resources
                    .get_key_value(&target)
                    .map(|(k, _)| k.clone())
                    .unwrap_or(target);
                refs.push(target);
            }
            if let Some(resource) = self.resources.get_mut(&key) {
                resource.refs = refs;
            }
        }
    }
}

/// Extensions that count as the same kind of file for collisions
fn extension_class(path: &str) -> &str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("yaml") | Some("yml") => "yaml",
        Some(ext) => ext,
        None => "",
    }
}
