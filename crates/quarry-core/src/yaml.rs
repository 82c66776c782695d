//! YAML value helpers
//!
//! Layering of YAML documents (manifest defaults, environment overrides,
//! `configure` calls and SQL annotations) goes through [`merge_into`].

use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::spec::Properties;

/// Deep-merge `src` into `dst`. Nested mappings merge recursively; any other
/// value in `src` replaces the one in `dst`.
pub fn merge_into(dst: &mut Mapping, src: Mapping) {
    for (key, value) in src {
        match (dst.get_mut(&key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge_into(existing, incoming);
            }
            (_, value) => {
                dst.insert(key, value);
            }
        }
    }
}

/// Merge `defaults` underneath `dst`: keys already in `dst` win
pub fn apply_defaults(dst: &mut Mapping, defaults: &Mapping) {
    let mut merged = defaults.clone();
    merge_into(&mut merged, std::mem::take(dst));
    *dst = merged;
}

/// Expand dotted keys (`a.b: 1`) into nested mappings
pub fn expand_dotted(map: Mapping) -> Result<Mapping> {
    let mut out = Mapping::new();
    for (key, value) in map {
        let Some(path) = key.as_str().filter(|k| k.contains('.')) else {
            insert_path(&mut out, &[key], value)?;
            continue;
        };
        let parts: Vec<Value> = path.split('.').map(|p| Value::String(p.to_string())).collect();
        insert_path(&mut out, &parts, value)?;
    }
    Ok(out)
}

fn insert_path(map: &mut Mapping, path: &[Value], value: Value) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(());
    };
    if rest.is_empty() {
        match (map.get_mut(head), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                for (k, v) in incoming {
                    insert_path(existing, &[k], v)?;
                }
            }
            (Some(_), _) => return Err(nesting_error(head)),
            (None, value) => {
                map.insert(head.clone(), value);
            }
        }
        return Ok(());
    }
    let child = map
        .entry(head.clone())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    match child {
        Value::Mapping(child) => insert_path(child, rest, value),
        _ => Err(nesting_error(head)),
    }
}

fn nesting_error(key: &Value) -> Error {
    Error::invalid_value(
        "property",
        key.as_str().unwrap_or_default(),
        "nesting incompatible with other keys",
    )
}

/// Render a scalar as a string; `None` for mappings and sequences
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Convert YAML to JSON. Non-string keys are stringified.
pub fn to_json(value: Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Number(n) => serde_json::to_value(n)?,
        Value::String(s) => serde_json::Value::String(s),
        Value::Sequence(items) => {
            serde_json::Value::Array(items.into_iter().map(to_json).collect::<Result<_>>()?)
        }
        Value::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key = scalar_to_string(&k).ok_or_else(|| {
                    Error::invalid_value("mapping key", format!("{k:?}"), "keys must be scalars")
                })?;
                out.insert(key, to_json(v)?);
            }
            serde_json::Value::Object(out)
        }
        Value::Tagged(tagged) => to_json(tagged.value)?,
    })
}

/// Convert a YAML mapping (or null) to a property map
pub fn to_properties(value: Value) -> Result<Properties> {
    match to_json(value)? {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Properties::new()),
        other => Err(Error::invalid_value(
            "properties",
            other.to_string(),
            "expected a mapping",
        )),
    }
}

/// Parse an annotation or `configure` value: YAML scalars keep their type,
/// anything that fails to parse stays a string
pub fn parse_scalar(text: &str) -> Value {
    match serde_yaml::from_str::<Value>(text) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) if !text.trim().is_empty() => v,
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Mapping {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_into() {
        let mut dst = yaml("a: 1\nnested: {x: 1, y: 2}");
        merge_into(&mut dst, yaml("b: 2\nnested: {y: 3}"));
        assert_eq!(dst, yaml("a: 1\nb: 2\nnested: {x: 1, y: 3}"));
    }

    #[test]
    fn test_apply_defaults() {
        let mut dst = yaml("materialize: false");
        apply_defaults(&mut dst, &yaml("materialize: true\ntimeout: 10s"));
        assert_eq!(dst, yaml("materialize: false\ntimeout: 10s"));
    }

    #[test]
    fn test_expand_dotted() {
        let out = expand_dotted(yaml("output.connector: duckdb\noutput.table: t\nmaterialize: true")).unwrap();
        assert_eq!(out, yaml("output: {connector: duckdb, table: t}\nmaterialize: true"));
    }

    #[test]
    fn test_expand_dotted_conflict() {
        let err = expand_dotted(yaml("output: duckdb\noutput.table: t")).unwrap_err();
        assert!(err.to_string().contains("nesting incompatible with other keys"));
    }

    #[test]
    fn test_to_properties() {
        let props = to_properties(Value::Mapping(yaml("path: s3://bucket\n1: one"))).unwrap();
        assert_eq!(props["path"], "s3://bucket");
        assert_eq!(props["1"], "one");
        assert!(to_properties(Value::Null).unwrap().is_empty());
        assert!(to_properties(Value::Bool(true)).is_err());
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("true"), Value::Bool(true));
        assert_eq!(parse_scalar("10"), serde_yaml::from_str::<Value>("10").unwrap());
        assert_eq!(parse_scalar("duckdb"), Value::String("duckdb".into()));
        assert_eq!(parse_scalar("a: b"), Value::String("a: b".into()));
    }
}
