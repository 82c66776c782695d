//! Field selectors
//!
//! A selector picks a subset of named fields (dimensions or measures):
//!
//! ```yaml
//! dimensions: '*'                     # all
//! dimensions: [country, device]       # explicit list
//! dimensions: { regex: "^utm_" }      # regular expression
//! dimensions: { expr: "..." }         # raw expression
//! dimensions: { exclude: [country] }  # any of the above, inverted
//! ```

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

/// How fields are matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Selector {
    /// Every field
    All,
    /// Named fields
    Fields(Vec<String>),
    /// Fields matching a regular expression
    Regex(String),
    /// Fields matching a raw expression evaluated downstream
    Expr(String),
}

/// A parsed field selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSelector {
    /// Select the complement
    pub invert: bool,
    /// Matching rule
    pub selector: Selector,
}

impl Default for FieldSelector {
    fn default() -> Self {
        Self::all()
    }
}

impl FieldSelector {
    /// Selector matching every field
    pub fn all() -> Self {
        Self {
            invert: false,
            selector: Selector::All,
        }
    }

    /// Selector matching the given names
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            invert: false,
            selector: Selector::Fields(names.into_iter().map(Into::into).collect()),
        }
    }

    /// Parse a selector from YAML
    pub fn parse(value: &serde_yaml::Value) -> Result<Self> {
        use serde_yaml::Value;

        match value {
            Value::String(s) if s.trim() == "*" => Ok(Self::all()),
            Value::String(s) => Err(invalid(format!("unexpected string {s:?}, expected '*' or a list of names"))),
            Value::Sequence(items) => {
                let names = items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s.clone()),
                        other => Err(invalid(format!("expected a field name, got {other:?}"))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::fields(names))
            }
            Value::Mapping(map) => {
                if map.len() != 1 {
                    return Err(invalid("expected exactly one of 'regex', 'expr' or 'exclude'"));
                }
                let Some((key, inner)) = map.iter().next() else {
                    return Err(invalid("empty selector"));
                };
                match key.as_str() {
                    Some("regex") => {
                        let pattern = inner
                            .as_str()
                            .ok_or_else(|| invalid("'regex' must be a string"))?;
                        Regex::new(pattern).map_err(|e| invalid(format!("invalid regex {pattern:?}: {e}")))?;
                        Ok(Self {
                            invert: false,
                            selector: Selector::Regex(pattern.to_string()),
                        })
                    }
                    Some("expr") => {
                        let expr = inner.as_str().ok_or_else(|| invalid("'expr' must be a string"))?;
                        Ok(Self {
                            invert: false,
                            selector: Selector::Expr(expr.to_string()),
                        })
                    }
                    Some("exclude") => {
                        let mut selector = Self::parse(inner)?;
                        selector.invert = !selector.invert;
                        Ok(selector)
                    }
                    _ => Err(invalid(format!("unexpected key {key:?}"))),
                }
            }
            _ => Err(invalid("expected '*', a list of names or a mapping")),
        }
    }

    /// Resolve against a list of known names. Returns `None` for expression
    /// selectors, which can only be evaluated downstream.
    pub fn resolve(&self, names: &[String]) -> Option<Vec<String>> {
        let matches: Box<dyn Fn(&str) -> bool> = match &self.selector {
            Selector::All => Box::new(|_| true),
            Selector::Fields(fields) => {
                let fields = fields.clone();
                Box::new(move |n| fields.iter().any(|f| f.eq_ignore_ascii_case(n)))
            }
            Selector::Regex(pattern) => {
                let re = Regex::new(pattern).ok()?;
                Box::new(move |n| re.is_match(n))
            }
            Selector::Expr(_) => return None,
        };
        Some(
            names
                .iter()
                .filter(|n| matches(n.as_str()) != self.invert)
                .cloned()
                .collect(),
        )
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidSelector {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<FieldSelector> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        FieldSelector::parse(&value)
    }

    #[test]
    fn test_parse_all() {
        assert_eq!(parse("'*'").unwrap(), FieldSelector::all());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse("[a, b]").unwrap(), FieldSelector::fields(["a", "b"]));
    }

    #[test]
    fn test_parse_regex() {
        let sel = parse("regex: '^utm_'").unwrap();
        assert_eq!(sel.selector, Selector::Regex("^utm_".to_string()));
        assert!(!sel.invert);
    }

    #[test]
    fn test_parse_invalid_regex() {
        assert!(parse("regex: '(unclosed'").is_err());
    }

    #[test]
    fn test_parse_exclude() {
        let sel = parse("exclude: [a]").unwrap();
        assert!(sel.invert);
        assert_eq!(sel.selector, Selector::Fields(vec!["a".to_string()]));
    }

    #[test]
    fn test_double_exclude_cancels() {
        let double = parse("exclude: {exclude: [a]}").unwrap();
        assert_eq!(double, parse("[a]").unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("country").is_err());
        assert!(parse("{regex: a, expr: b}").is_err());
        assert!(parse("{other: x}").is_err());
        assert!(parse("[1, 2]").is_err());
    }

    #[test]
    fn test_resolve() {
        let names: Vec<String> = ["utm_source", "utm_medium", "country"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert_eq!(FieldSelector::all().resolve(&names).unwrap().len(), 3);
        assert_eq!(
            parse("regex: '^utm_'").unwrap().resolve(&names).unwrap(),
            vec!["utm_source", "utm_medium"]
        );
        assert_eq!(
            parse("exclude: [country]").unwrap().resolve(&names).unwrap(),
            vec!["utm_source", "utm_medium"]
        );
        assert!(parse("expr: x").unwrap().resolve(&names).is_none());
    }
}
