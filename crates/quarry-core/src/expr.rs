//! Boolean expressions
//!
//! Access conditions and row filters are SQL-like boolean expressions. At
//! parse time they are rendered with dummy data and checked with
//! [`validate_bool_expr`]. Once rendered against real data, conditions that
//! only contain literals can be decided with [`evaluate_bool_expr`].

use regex::Regex;
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as SqlValue};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Parse a single expression, rejecting trailing input
pub fn parse_expr(text: &str) -> Result<Expr> {
    if text.trim().is_empty() {
        return Err(invalid(text, "expression is empty"));
    }

    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| invalid(text, e.to_string()))?;
    let expr = parser.parse_expr().map_err(|e| invalid(text, e.to_string()))?;
    if parser.peek_token().token != Token::EOF {
        return Err(invalid(text, "unexpected input after expression"));
    }
    Ok(expr)
}

/// Check that `text` parses as an expression that can yield a boolean
pub fn validate_bool_expr(text: &str) -> Result<()> {
    let expr = parse_expr(text)?;
    match strip_nesting(&expr) {
        Expr::Value(SqlValue::Number(..))
        | Expr::Value(SqlValue::SingleQuotedString(_))
        | Expr::Value(SqlValue::DoubleQuotedString(_)) => {
            Err(invalid(text, "expression is not a boolean"))
        }
        _ => Ok(()),
    }
}

/// Evaluate an expression made only of literals
pub fn evaluate_bool_expr(text: &str) -> Result<bool> {
    let expr = parse_expr(text)?;
    let value = eval(&expr).map_err(|message| invalid(text, message))?;
    truthy(&value).map_err(|message| invalid(text, message))
}

fn strip_nesting(expr: &Expr) -> &Expr {
    match expr {
        Expr::Nested(inner) => strip_nesting(inner),
        other => other,
    }
}

fn invalid(text: &str, message: impl Into<String>) -> Error {
    Error::InvalidExpression {
        expression: text.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

type EvalResult<T> = std::result::Result<T, String>;

fn truthy(value: &Literal) -> EvalResult<bool> {
    match value {
        Literal::Bool(b) => Ok(*b),
        Literal::Null => Ok(false),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

fn eval(expr: &Expr) -> EvalResult<Literal> {
    match expr {
        Expr::Value(v) => literal(v),
        Expr::Nested(inner) => eval(inner),
        Expr::UnaryOp { op, expr } => {
            let value = eval(expr)?;
            match (op, value) {
                (UnaryOperator::Not, Literal::Null) => Ok(Literal::Null),
                (UnaryOperator::Not, v) => Ok(Literal::Bool(!truthy(&v)?)),
                (UnaryOperator::Minus, Literal::Number(n)) => Ok(Literal::Number(-n)),
                (UnaryOperator::Plus, Literal::Number(n)) => Ok(Literal::Number(n)),
                (op, v) => Err(format!("operator {op} not supported for {v:?}")),
            }
        }
        Expr::BinaryOp { left, op, right } => {
            match op {
                BinaryOperator::And => {
                    let l = truthy(&eval(left)?)?;
                    Ok(Literal::Bool(l && truthy(&eval(right)?)?))
                }
                BinaryOperator::Or => {
                    let l = truthy(&eval(left)?)?;
                    Ok(Literal::Bool(l || truthy(&eval(right)?)?))
                }
                _ => {
                    let (l, r) = (eval(left)?, eval(right)?);
                    if l == Literal::Null || r == Literal::Null {
                        return Ok(Literal::Null);
                    }
                    let ord = compare(&l, &r)?;
                    let result = match op {
                        BinaryOperator::Eq => ord == Ordering::Equal,
                        BinaryOperator::NotEq => ord != Ordering::Equal,
                        BinaryOperator::Lt => ord == Ordering::Less,
                        BinaryOperator::LtEq => ord != Ordering::Greater,
                        BinaryOperator::Gt => ord == Ordering::Greater,
                        BinaryOperator::GtEq => ord != Ordering::Less,
                        other => return Err(format!("operator {other} not supported")),
                    };
                    Ok(Literal::Bool(result))
                }
            }
        }
        Expr::IsNull(e) => Ok(Literal::Bool(eval(e)? == Literal::Null)),
        Expr::IsNotNull(e) => Ok(Literal::Bool(eval(e)? != Literal::Null)),
        Expr::IsTrue(e) => Ok(Literal::Bool(eval(e)? == Literal::Bool(true))),
        Expr::IsNotTrue(e) => Ok(Literal::Bool(eval(e)? != Literal::Bool(true))),
        Expr::IsFalse(e) => Ok(Literal::Bool(eval(e)? == Literal::Bool(false))),
        Expr::IsNotFalse(e) => Ok(Literal::Bool(eval(e)? != Literal::Bool(false))),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let needle = eval(expr)?;
            let mut found = false;
            for item in list {
                if compare(&needle, &eval(item)?)? == Ordering::Equal {
                    found = true;
                    break;
                }
            }
            Ok(Literal::Bool(found != *negated))
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let v = eval(expr)?;
            let inside = compare(&v, &eval(low)?)? != Ordering::Less
                && compare(&v, &eval(high)?)? != Ordering::Greater;
            Ok(Literal::Bool(inside != *negated))
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => like(expr, pattern, *negated, false),
        Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => like(expr, pattern, *negated, true),
        Expr::Identifier(ident) => Err(format!("unknown identifier {:?}", ident.value)),
        other => Err(format!("unsupported expression {other}")),
    }
}

fn literal(v: &SqlValue) -> EvalResult<Literal> {
    match v {
        SqlValue::Null => Ok(Literal::Null),
        SqlValue::Boolean(b) => Ok(Literal::Bool(*b)),
        SqlValue::Number(n, _) => n
            .parse::<f64>()
            .map(Literal::Number)
            .map_err(|_| format!("invalid number {n}")),
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Literal::Text(s.clone()))
        }
        other => Err(format!("unsupported literal {other}")),
    }
}

fn compare(l: &Literal, r: &Literal) -> EvalResult<Ordering> {
    match (l, r) {
        (Literal::Number(a), Literal::Number(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| "cannot compare NaN".to_string()),
        (Literal::Text(a), Literal::Text(b)) => Ok(a.cmp(b)),
        (Literal::Bool(a), Literal::Bool(b)) => Ok(a.cmp(b)),
        (Literal::Null, Literal::Null) => Ok(Ordering::Equal),
        (a, b) => Err(format!("cannot compare {a:?} with {b:?}")),
    }
}

fn like(expr: &Expr, pattern: &Expr, negated: bool, case_insensitive: bool) -> EvalResult<Literal> {
    let (Literal::Text(value), Literal::Text(pattern)) = (eval(expr)?, eval(pattern)?) else {
        return Err("LIKE requires string operands".to_string());
    };
    let mut re = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    let re = Regex::new(&re).map_err(|e| e.to_string())?;
    Ok(Literal::Bool(re.is_match(&value) != negated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("true")]
    #[case("'example.com' = 'example.com'")]
    #[case("country = 'US' AND NOT deleted")]
    #[case("id IN (1, 2, 3)")]
    #[case("(a > 1) OR b IS NULL")]
    fn test_validate_ok(#[case] text: &str) {
        validate_bool_expr(text).unwrap();
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("'just a string'")]
    #[case("42")]
    #[case("a = ")]
    #[case("a = 1 b = 2")]
    fn test_validate_err(#[case] text: &str) {
        assert!(validate_bool_expr(text).is_err());
    }

    #[rstest]
    #[case("true", true)]
    #[case("false", false)]
    #[case("'a' = 'a'", true)]
    #[case("'example.com' = 'bad.com'", false)]
    #[case("1 < 2 AND 3 >= 3", true)]
    #[case("NOT (1 = 1)", false)]
    #[case("false OR 'x' IN ('y', 'x')", true)]
    #[case("'x' NOT IN ('y')", true)]
    #[case("NULL IS NULL", true)]
    #[case("NULL = 1", false)]
    #[case("'admin@example.org' LIKE '%@example.org'", true)]
    #[case("'ADMIN' ILIKE 'ad%'", true)]
    #[case("5 BETWEEN 1 AND 10", true)]
    fn test_evaluate(#[case] text: &str, #[case] expected: bool) {
        assert_eq!(evaluate_bool_expr(text).unwrap(), expected);
    }

    #[test]
    fn test_evaluate_unknown_identifier() {
        let err = evaluate_bool_expr("country = 'US'").unwrap_err();
        assert!(err.to_string().contains("unknown identifier"));
    }
}
