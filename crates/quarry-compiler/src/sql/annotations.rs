//! Comment annotations
//!
//! ```sql
//! -- @materialize: true
//! -- @refresh.cron: 0 * * * *
//! -- @incremental
//! SELECT ...
//! ```
//!
//! A key without a value means `true`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*--\s*@([A-Za-z0-9_.\-]+)[ \t]*(?::[ \t]*(.*?))?[ \t]*$")
        .expect("annotation regex")
});

/// Extract annotations from SQL comments; later keys win
pub fn extract(sql: &str) -> BTreeMap<String, String> {
    ANNOTATION
        .captures_iter(sql)
        .map(|caps| {
            let key = caps[1].to_string();
            let value = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "true".to_string());
            (key, value)
        })
        .collect()
}

/// Convert annotations into a YAML mapping with typed scalar values
pub fn to_yaml(annotations: &BTreeMap<String, String>) -> serde_yaml::Mapping {
    annotations
        .iter()
        .map(|(k, v)| {
            (
                serde_yaml::Value::String(k.clone()),
                quarry_core::yaml::parse_scalar(v),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract() {
        let sql = r#"
-- @materialize: true
--@timeout: 10m
-- @incremental
-- a normal comment
SELECT 1 -- @not_an_annotation: x
"#;
        let got = extract(sql);
        assert_eq!(got.len(), 3);
        assert_eq!(got["materialize"], "true");
        assert_eq!(got["timeout"], "10m");
        assert_eq!(got["incremental"], "true");
    }

    #[test]
    fn test_dotted_keys() {
        let got = extract("-- @refresh.cron: 0 * * * *\nSELECT 1");
        assert_eq!(got["refresh.cron"], "0 * * * *");
    }

    #[test]
    fn test_to_yaml() {
        let map = to_yaml(&extract("-- @materialize: false\n-- @connector: duckdb"));
        assert_eq!(map.get("materialize"), Some(&serde_yaml::Value::Bool(false)));
        assert_eq!(
            map.get("connector"),
            Some(&serde_yaml::Value::String("duckdb".into()))
        );
    }
}
