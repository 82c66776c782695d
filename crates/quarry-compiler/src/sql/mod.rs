//! SQL-context resolution
//!
//! The compiler never interprets SQL itself. It asks a [`QueryAnalyzer`] to
//! parse query text into a [`QueryAst`], which reports table references and
//! comment annotations and can rewrite table references in place. The
//! default analyzer is backed by `sqlparser` with the DuckDB dialect.

use quarry_core::Properties;
use std::collections::BTreeMap;

use crate::error::Result;

pub mod annotations;
pub mod embedded;
mod sqlparser_ast;

pub use sqlparser_ast::SqlParserAnalyzer;

/// A table reference found in a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRef {
    /// Table name (last part of a qualified name)
    pub name: String,
    /// Table function name, lowercased (`read_parquet`)
    pub function: Option<String>,
    /// String arguments of a table function
    pub paths: Vec<String>,
    /// Named arguments of a table function
    pub properties: Properties,
    /// The name was written as a quoted identifier
    pub quoted: bool,
    /// The name refers to a CTE defined in the same query
    pub local_alias: bool,
}

/// A parsed query
pub trait QueryAst {
    /// Table references in the order they appear
    fn table_refs(&self) -> Vec<TableRef>;

    /// Replace table references. The callback returns the new table name, or
    /// `None` to leave a reference untouched.
    fn rewrite_table_refs(&mut self, rewrite: &mut dyn FnMut(&TableRef) -> Option<String>) -> Result<()>;

    /// Render the (possibly rewritten) query
    fn format(&self) -> Result<String>;

    /// `-- @key: value` annotations
    fn annotations(&self) -> BTreeMap<String, String>;
}

/// Parses query text
pub trait QueryAnalyzer: Send + Sync {
    /// Parse `sql` into an AST
    fn parse(&self, sql: &str) -> Result<Box<dyn QueryAst>>;
}
