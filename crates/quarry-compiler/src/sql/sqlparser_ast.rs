//! `sqlparser`-backed query analysis

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, Ident, ObjectName, Query, Statement, TableFactor, Value,
    Visit, VisitMut, Visitor, VisitorMut,
};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

use super::{QueryAnalyzer, QueryAst, TableRef, annotations};
use crate::error::{Error, Result};

/// Analyzer using the DuckDB dialect of `sqlparser`
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlParserAnalyzer;

impl QueryAnalyzer for SqlParserAnalyzer {
    fn parse(&self, sql: &str) -> Result<Box<dyn QueryAst>> {
        let statements = Parser::parse_sql(&DuckDbDialect {}, sql).map_err(|e| Error::Sql {
            message: e.to_string(),
        })?;
        Ok(Box::new(ParsedQuery {
            source: sql.to_string(),
            statements,
            rewritten: false,
        }))
    }
}

struct ParsedQuery {
    source: String,
    statements: Vec<Statement>,
    rewritten: bool,
}

impl QueryAst for ParsedQuery {
    fn table_refs(&self) -> Vec<TableRef> {
        let mut collector = TableCollector::default();
        for statement in &self.statements {
            let _ = Visit::visit(statement, &mut collector);
        }
        let TableCollector { ctes, mut refs } = collector;
        for r in &mut refs {
            r.local_alias = r.function.is_none() && ctes.contains(&r.name.to_lowercase());
        }
        refs
    }

    fn rewrite_table_refs(&mut self, rewrite: &mut dyn FnMut(&TableRef) -> Option<String>) -> Result<()> {
        let mut rewriter = TableRewriter {
            rewrite,
            changed: false,
        };
        for statement in &mut self.statements {
            let _ = VisitMut::visit(statement, &mut rewriter);
        }
        self.rewritten |= rewriter.changed;
        Ok(())
    }

    fn format(&self) -> Result<String> {
        if !self.rewritten {
            return Ok(self.source.clone());
        }
        Ok(self
            .statements
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";\n"))
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        annotations::extract(&self.source)
    }
}

#[derive(Default)]
struct TableCollector {
    ctes: BTreeSet<String>,
    refs: Vec<TableRef>,
}

impl Visitor for TableCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let Some(r) = table_ref(factor) {
            self.refs.push(r);
        }
        ControlFlow::Continue(())
    }
}

struct TableRewriter<'a> {
    rewrite: &'a mut dyn FnMut(&TableRef) -> Option<String>,
    changed: bool,
}

impl VisitorMut for TableRewriter<'_> {
    type Break = ();

    fn pre_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        let Some(new_name) = table_ref(factor).and_then(|r| (self.rewrite)(&r)) else {
            return ControlFlow::Continue(());
        };
        if let TableFactor::Table { name, args, .. } = factor {
            *name = ObjectName(vec![Ident::new(new_name)]);
            *args = None;
            self.changed = true;
        }
        ControlFlow::Continue(())
    }
}

fn table_ref(factor: &TableFactor) -> Option<TableRef> {
    let TableFactor::Table { name, args, .. } = factor else {
        return None;
    };
    let ident = name.0.last()?;

    let Some(args) = args else {
        return Some(TableRef {
            name: ident.value.clone(),
            quoted: ident.quote_style.is_some(),
            ..Default::default()
        });
    };

    let mut r = TableRef {
        name: ident.value.clone(),
        function: Some(ident.value.to_lowercase()),
        ..Default::default()
    };
    for arg in &args.args {
        match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => match literal(expr) {
                Some(serde_json::Value::String(s)) => r.paths.push(s),
                Some(serde_json::Value::Array(items)) => {
                    r.paths
                        .extend(items.into_iter().filter_map(|v| v.as_str().map(str::to_string)));
                }
                _ => {}
            },
            FunctionArg::Named {
                name,
                arg: FunctionArgExpr::Expr(expr),
                ..
            } => {
                if let Some(value) = literal(expr) {
                    r.properties.insert(name.value.clone(), value);
                }
            }
            _ => {}
        }
    }
    Some(r)
}

fn literal(expr: &Expr) -> Option<serde_json::Value> {
    match expr {
        Expr::Value(Value::SingleQuotedString(s)) | Expr::Value(Value::DoubleQuotedString(s)) => {
            Some(serde_json::Value::String(s.clone()))
        }
        Expr::Value(Value::Boolean(b)) => Some(serde_json::Value::Bool(*b)),
        Expr::Value(Value::Number(n, _)) => n
            .parse::<i64>()
            .map(serde_json::Value::from)
            .ok()
            .or_else(|| n.parse::<f64>().ok().map(serde_json::Value::from)),
        Expr::Array(array) => Some(serde_json::Value::Array(
            array.elem.iter().filter_map(literal).collect(),
        )),
        _ => None,
    }
}
