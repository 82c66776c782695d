//! Quarry Compiler
//!
//! This crate turns a project directory into a registry of typed resources:
//! - Node extraction (common keys, companion files, annotations)
//! - One parser per resource kind, with validation before commit
//! - SQL analysis for table references and embedded sources
//! - Full and incremental compilation with an added/modified/deleted diff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  FileStore  │────▶│    Node     │────▶│ Kind parser │────▶│  Registry   │
//! │ (YAML, SQL) │     │  Builder    │     │  (validate) │     │ (resources) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                                       │
//!                            ▼                                       ▼
//!                     ┌─────────────┐                         ┌─────────────┐
//!                     │    Query    │                         │  Reparse /  │
//!                     │  Analyzer   │                         │    Diff     │
//!                     └─────────────┘                         └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quarry_compiler::{Parser, ParserOptions};
//! use quarry_core::LocalFileStore;
//!
//! let mut parser = Parser::new(Arc::new(LocalFileStore::new("./project")), ParserOptions::default());
//! parser.parse()?;
//! for resource in parser.resources().values() {
//!     println!("{} <- {:?}", resource.name, resource.paths);
//! }
//!
//! let diff = parser.reparse(&["/models/orders.sql"])?;
//! println!("modified: {:?}", diff.modified);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
mod node;
pub mod parser;
mod parsers;
pub mod registry;
pub mod sql;

pub use error::{Error, Result};
pub use parser::{Diff, Parser, ParserOptions};
pub use registry::{ParseError, Registry, Resource};
pub use sql::{QueryAnalyzer, SqlParserAnalyzer};

#[cfg(test)]
pub(crate) mod test_support {
    use quarry_core::MemoryStore;
    use std::sync::Arc;

    use crate::{Parser, ParserOptions};

    /// Parse an in-memory project with an empty manifest
    pub fn parse_files(files: &[(&str, &str)]) -> Parser {
        parse_files_in("", files)
    }

    /// Parse an in-memory project for an environment
    pub fn parse_files_in(environment: &str, files: &[(&str, &str)]) -> Parser {
        let mut all = vec![("/quarry.yaml", "")];
        all.extend_from_slice(files);
        let store = Arc::new(MemoryStore::with_files(all));
        let options = ParserOptions {
            environment: environment.to_string(),
            ..Default::default()
        };
        let mut parser = Parser::new(store, options);
        parser.parse().expect("parse project");
        parser
    }
}
