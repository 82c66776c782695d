//! File store capability
//!
//! The compiler reads project files through [`FileStore`] so it can run
//! against a directory on disk ([`LocalFileStore`]) or an in-memory tree
//! ([`MemoryStore`]). Paths are absolute within the store and use forward
//! slashes: `/models/orders.sql`.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Directories never listed
const SKIPPED_DIRS: [&str; 2] = [".git", "node_modules"];

/// Metadata about a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Store path
    pub path: String,
    /// Whether the path is a directory
    pub is_dir: bool,
    /// Last modification time, if known
    pub last_updated: Option<DateTime<Utc>>,
}

/// Read/write access to project files
pub trait FileStore: Send + Sync {
    /// Read a file
    fn get(&self, path: &str) -> Result<String>;

    /// Write a file, creating parent directories as needed
    fn put(&self, path: &str, content: &str) -> Result<()>;

    /// Stat a file
    fn stat(&self, path: &str) -> Result<FileInfo>;

    /// List files under `path` whose path relative to it matches `glob`
    fn list_recursive(&self, path: &str, glob: &str) -> Result<Vec<FileInfo>>;

    /// Whether `path` exists
    fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Normalize a store path to a leading slash and forward slashes
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    format!("/{trimmed}")
}

/// Compile a glob pattern into an anchored regex
///
/// Supports `**`, `*`, `?` and `{a,b}` alternation.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut re = String::from("^");
    let mut chars = glob.chars().peekable();
    let mut in_group = false;
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    re.push_str("(?:.*/)?");
                } else {
                    re.push_str(".*");
                }
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '{' => {
                in_group = true;
                re.push_str("(?:");
            }
            '}' if in_group => {
                in_group = false;
                re.push(')');
            }
            ',' if in_group => re.push('|'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::invalid_value("glob", glob, e.to_string()))
}

fn relative_to<'a>(root: &str, path: &'a str) -> Option<&'a str> {
    let root = root.trim_end_matches('/');
    path.strip_prefix(root)?.strip_prefix('/')
}

/// A project directory on local disk
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(normalize_path(path).trim_start_matches('/'))
    }

    fn map_io(path: &str, err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.to_string(),
            }
        } else {
            Error::Io(err)
        }
    }
}

impl FileStore for LocalFileStore {
    fn get(&self, path: &str) -> Result<String> {
        std::fs::read_to_string(self.resolve(path)).map_err(|e| Self::map_io(path, e))
    }

    fn put(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(full, content)?;
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let meta = std::fs::metadata(self.resolve(path)).map_err(|e| Self::map_io(path, e))?;
        Ok(FileInfo {
            path: normalize_path(path),
            is_dir: meta.is_dir(),
            last_updated: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn list_recursive(&self, path: &str, glob: &str) -> Result<Vec<FileInfo>> {
        let pattern = glob_to_regex(glob)?;
        let base = normalize_path(path);
        let dir = self.resolve(&base);
        let mut files = Vec::new();

        let walker = walkdir::WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                !(e.file_type().is_dir()
                    && e.file_name()
                        .to_str()
                        .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
            });

        for entry in walker {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => Error::Io(io),
                None => Error::invalid_value("directory", path, "filesystem loop"),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let store_path = normalize_path(&rel.to_string_lossy());
            let Some(rel_to_base) = relative_to(&base, &store_path) else {
                continue;
            };
            if !pattern.is_match(rel_to_base) {
                continue;
            }
            files.push(FileInfo {
                path: store_path,
                is_dir: false,
                last_updated: entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from),
            });
        }

        Ok(files)
    }
}

/// In-memory file store
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given files
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<String>,
    {
        let files = files
            .into_iter()
            .map(|(p, c)| (normalize_path(p.as_ref()), c.into()))
            .collect();
        Self {
            files: Mutex::new(files),
        }
    }

    /// Delete a file; returns true if it existed
    pub fn delete(&self, path: &str) -> bool {
        self.lock().remove(&normalize_path(path)).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FileStore for MemoryStore {
    fn get(&self, path: &str) -> Result<String> {
        self.lock()
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                path: path.to_string(),
            })
    }

    fn put(&self, path: &str, content: &str) -> Result<()> {
        self.lock().insert(normalize_path(path), content.to_string());
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<FileInfo> {
        let path = normalize_path(path);
        let files = self.lock();
        if files.contains_key(&path) {
            return Ok(FileInfo {
                path,
                is_dir: false,
                last_updated: None,
            });
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        if files.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(FileInfo {
                path,
                is_dir: true,
                last_updated: None,
            });
        }
        Err(Error::NotFound { path })
    }

    fn list_recursive(&self, path: &str, glob: &str) -> Result<Vec<FileInfo>> {
        let pattern = glob_to_regex(glob)?;
        let base = normalize_path(path);
        Ok(self
            .lock()
            .keys()
            .filter(|p| relative_to(&base, p).is_some_and(|rel| pattern.is_match(rel)))
            .map(|p| FileInfo {
                path: p.clone(),
                is_dir: false,
                last_updated: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const PROJECT_GLOB: &str = "**/*.{env,yaml,yml,sql}";

    #[rstest]
    #[case("models/m1.sql", true)]
    #[case("init.sql", true)]
    #[case(".env", true)]
    #[case("a/b/c/x.yml", true)]
    #[case("README.md", false)]
    #[case("models/m1.sql.bak", false)]
    fn test_glob(#[case] path: &str, #[case] matches: bool) {
        assert_eq!(glob_to_regex(PROJECT_GLOB).unwrap().is_match(path), matches);
    }

    #[test]
    fn test_glob_single_star() {
        let re = glob_to_regex("*.sql").unwrap();
        assert!(re.is_match("a.sql"));
        assert!(!re.is_match("dir/a.sql"));
    }

    #[rstest]
    #[case("models/a.sql", "/models/a.sql")]
    #[case("/models/a.sql", "/models/a.sql")]
    #[case("./a.sql", "/a.sql")]
    #[case("dir\\a.sql", "/dir/a.sql")]
    fn test_normalize_path(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_path(input), expected);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::with_files([
            ("quarry.yaml", ""),
            ("/models/m1.sql", "SELECT 1"),
            ("/models/m1.yaml", "materialize: true"),
            ("/README.md", "# hi"),
        ]);

        assert_eq!(store.get("/models/m1.sql").unwrap(), "SELECT 1");
        assert!(store.get("/missing.sql").unwrap_err().is_not_found());
        assert!(store.stat("/models").unwrap().is_dir);
        assert!(!store.exists("/nope").unwrap());

        let paths: Vec<String> = store
            .list_recursive("/", PROJECT_GLOB)
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["/models/m1.sql", "/models/m1.yaml", "/quarry.yaml"]);

        assert!(store.delete("/models/m1.yaml"));
        assert!(!store.exists("/models/m1.yaml").unwrap());
    }

    #[test]
    fn test_local_store() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileStore::new(dir.path());

        store.put("/quarry.yaml", "title: test").unwrap();
        store.put("/models/m1.sql", "SELECT 1").unwrap();
        store.put("/.git/config", "ignored").unwrap();
        store.put("/notes.txt", "ignored").unwrap();

        assert_eq!(store.get("/models/m1.sql").unwrap(), "SELECT 1");
        assert!(store.get("/models/m2.sql").unwrap_err().is_not_found());
        assert!(store.stat("/models").unwrap().is_dir);

        let paths: Vec<String> = store
            .list_recursive("/", PROJECT_GLOB)
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["/models/m1.sql", "/quarry.yaml"]);

        let models: Vec<String> = store
            .list_recursive("/models", "*.sql")
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(models, vec!["/models/m1.sql"]);
    }
}
