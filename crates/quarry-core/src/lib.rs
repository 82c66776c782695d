//! Quarry Core Library
//!
//! This crate provides the building blocks the Quarry compiler is made of:
//! - Resource kinds, names and the kind-specific spec records
//! - Two-mode templating (analyze at parse time, resolve at run time)
//! - Field selectors, boolean expressions and security policies
//! - Project manifest and environment files
//! - The file store capability
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  FileStore  │────▶│  Manifest   │────▶│  Template   │
//! │ (YAML, SQL) │     │  + .env     │     │   Engine    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                     ┌─────────────┐     ┌──────▼──────┐
//!                     │ ResourceSpec│◀────│  Selectors  │
//!                     │  (14 kinds) │     │  Security   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_core::{template, LocalFileStore, FileStore};
//!
//! let store = LocalFileStore::new("./my-project");
//! let sql = store.get("/models/orders.sql")?;
//! let meta = template::analyze(&sql)?;
//! for r in &meta.refs {
//!     println!("depends on {}", r.name);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod expr;
pub mod manifest;
pub mod resource;
pub mod security;
pub mod selector;
pub mod spec;
pub mod store;
pub mod template;
pub mod timeutil;
pub mod yaml;

pub use error::{Error, Result};
pub use manifest::{EnvLayers, Manifest};
pub use resource::{ResourceKind, ResourceName, ResourceRef};
pub use selector::FieldSelector;
pub use spec::{Properties, ResourceSpec};
pub use store::{FileInfo, FileStore, LocalFileStore, MemoryStore};
