//! Security policies
//!
//! A declarative `security:` block compiles to an ordered list of
//! [`SecurityRule`]s:
//!
//! ```yaml
//! security:
//!   access: "'{{ user.domain }}' = 'example.com'"
//!   row_filter: "region = '{{ user.region }}'"
//!   include:
//!     - if: "{{ user.admin }}"
//!       names: '*'
//!   exclude:
//!     - if: true
//!       names: [ssn]
//! ```
//!
//! Every condition is checked as a template and as a boolean expression
//! before any rule is emitted. Without an explicit access rule, a deny-all
//! rule comes first.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::validate_bool_expr;
use crate::resource::ResourceRef;
use crate::selector::{FieldSelector, Selector};
use crate::template::{self, TemplateData};

/// A compiled security rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityRule {
    /// Grant or deny access to the resource
    Access {
        /// Templated condition (empty means always)
        condition: String,
        /// Allow or deny
        allow: bool,
    },
    /// Grant or deny access to fields
    FieldAccess {
        /// Templated condition (empty means always)
        condition: String,
        /// Allow or deny
        allow: bool,
        /// Field names
        fields: Vec<String>,
        /// Applies to every field
        all_fields: bool,
    },
    /// Restrict rows with a SQL filter
    RowFilter {
        /// Templated condition (empty means always)
        condition: String,
        /// Templated SQL predicate
        sql: String,
    },
}

impl SecurityRule {
    fn is_access(&self) -> bool {
        matches!(self, SecurityRule::Access { .. })
    }
}

/// Raw YAML for a `security:` block
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityPolicyYaml {
    /// Boolean or templated access condition
    #[serde(default)]
    pub access: Option<serde_yaml::Value>,
    /// Row filter SQL
    #[serde(default)]
    pub row_filter: Option<serde_yaml::Value>,
    /// Fields to include
    #[serde(default)]
    pub include: Vec<Option<FieldAccessYaml>>,
    /// Fields to exclude
    #[serde(default)]
    pub exclude: Vec<Option<FieldAccessYaml>>,
    /// Explicit rules
    #[serde(default)]
    pub rules: Vec<SecurityRuleYaml>,
}

/// An include/exclude entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldAccessYaml {
    /// Condition
    #[serde(rename = "if", default)]
    pub condition: Option<serde_yaml::Value>,
    /// Field selector (`'*'` or a list)
    pub names: serde_yaml::Value,
}

/// An explicit rule entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityRuleYaml {
    /// `access`, `field_access` or `row_filter`
    #[serde(rename = "type")]
    pub rule_type: String,
    /// `allow` (default) or `deny`
    #[serde(default)]
    pub action: Option<String>,
    /// Condition
    #[serde(rename = "if", default)]
    pub condition: Option<serde_yaml::Value>,
    /// Field names for field access rules
    #[serde(default)]
    pub names: Vec<String>,
    /// Field access rule applies to all fields
    #[serde(default)]
    pub all: bool,
    /// Row filter SQL
    #[serde(default)]
    pub sql: Option<String>,
}

/// Output of [`compile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledSecurity {
    /// Rules in evaluation order
    pub rules: Vec<SecurityRule>,
    /// References found in row filters
    pub refs: Vec<ResourceRef>,
}

/// Options for [`compile`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityOptions {
    /// Reject field access and row filter rules
    pub access_only: bool,
}

/// Compile a security block into rules
pub fn compile(policy: &SecurityPolicyYaml, opts: SecurityOptions) -> Result<CompiledSecurity> {
    let mut rules = Vec::new();

    if let Some(access) = &policy.access {
        rules.push(SecurityRule::Access {
            condition: scalar_string("access", access)?,
            allow: true,
        });
    }

    if let Some(row_filter) = &policy.row_filter {
        rules.push(SecurityRule::RowFilter {
            condition: String::new(),
            sql: scalar_string("row_filter", row_filter)?,
        });
    }

    for (entries, allow) in [(&policy.include, true), (&policy.exclude, false)] {
        for entry in entries.iter().flatten() {
            let condition = match &entry.condition {
                Some(c) => scalar_string("if", c)?,
                None => String::new(),
            };
            let (fields, all_fields) = field_names(&entry.names)?;
            rules.push(SecurityRule::FieldAccess {
                condition,
                allow,
                fields,
                all_fields,
            });
        }
    }

    for rule in &policy.rules {
        rules.push(compile_rule(rule)?);
    }

    if opts.access_only && rules.iter().any(|r| !r.is_access()) {
        return Err(invalid("only access rules are supported for this resource"));
    }

    let mut refs = Vec::new();
    for rule in &rules {
        let (condition, sql) = match rule {
            SecurityRule::Access { condition, .. } | SecurityRule::FieldAccess { condition, .. } => {
                (condition, None)
            }
            SecurityRule::RowFilter { condition, sql } => (condition, Some(sql)),
        };
        validate_condition(condition)?;
        if let Some(sql) = sql {
            validate_condition(sql)?;
            let meta = template::analyze(sql)?;
            for r in meta.refs {
                if !refs.contains(&r) {
                    refs.push(r);
                }
            }
        }
    }

    if !rules.iter().any(SecurityRule::is_access) {
        rules.insert(
            0,
            SecurityRule::Access {
                condition: String::new(),
                allow: false,
            },
        );
    }

    Ok(CompiledSecurity { rules, refs })
}

fn compile_rule(rule: &SecurityRuleYaml) -> Result<SecurityRule> {
    let allow = match rule.action.as_deref() {
        None | Some("allow") => true,
        Some("deny") => false,
        Some(other) => return Err(invalid(format!("invalid action {other:?}, expected allow or deny"))),
    };
    let condition = match &rule.condition {
        Some(c) => scalar_string("if", c)?,
        None => String::new(),
    };

    match rule.rule_type.as_str() {
        "access" => Ok(SecurityRule::Access { condition, allow }),
        "field_access" => {
            if rule.all == !rule.names.is_empty() {
                return Err(invalid("field_access rule requires exactly one of 'names' or 'all'"));
            }
            Ok(SecurityRule::FieldAccess {
                condition,
                allow,
                fields: rule.names.clone(),
                all_fields: rule.all,
            })
        }
        "row_filter" => {
            let sql = rule
                .sql
                .clone()
                .ok_or_else(|| invalid("row_filter rule requires 'sql'"))?;
            Ok(SecurityRule::RowFilter { condition, sql })
        }
        other => Err(invalid(format!("invalid rule type {other:?}"))),
    }
}

fn field_names(value: &serde_yaml::Value) -> Result<(Vec<String>, bool)> {
    let selector = FieldSelector::parse(value).map_err(|e| invalid(e.to_string()))?;
    match selector {
        FieldSelector {
            invert: false,
            selector: Selector::All,
        } => Ok((Vec::new(), true)),
        FieldSelector {
            invert: false,
            selector: Selector::Fields(names),
        } => Ok((names, false)),
        _ => Err(invalid("'names' must be '*' or a list of names")),
    }
}

fn scalar_string(field: &str, value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        _ => Err(invalid(format!("'{field}' must be a boolean or a string"))),
    }
}

/// Check that a condition is a valid template rendering to a boolean expression
pub fn validate_condition(condition: &str) -> Result<()> {
    if condition.is_empty() {
        return Ok(());
    }
    let rendered = template::resolve(condition, &TemplateData::validation())
        .map_err(|e| invalid(format!("invalid template in condition {condition:?}: {e}")))?;
    validate_bool_expr(&rendered).map_err(|e| invalid(e.to_string()))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidSecurity {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_yaml(yaml: &str, opts: SecurityOptions) -> Result<CompiledSecurity> {
        let policy: SecurityPolicyYaml = serde_yaml::from_str(yaml).unwrap();
        compile(&policy, opts)
    }

    #[test]
    fn test_compile_full_policy() {
        let compiled = compile_yaml(
            r#"
row_filter: true
include:
  - if: "'{{ user.domain }}' = 'example.com'"
    names: '*'
  - if: true
    names: [a]
exclude:
  -
  - if: true
    names: [b]
"#,
            SecurityOptions::default(),
        )
        .unwrap();

        assert_eq!(
            compiled.rules,
            vec![
                SecurityRule::Access {
                    condition: String::new(),
                    allow: false
                },
                SecurityRule::RowFilter {
                    condition: String::new(),
                    sql: "true".to_string()
                },
                SecurityRule::FieldAccess {
                    condition: "'{{ user.domain }}' = 'example.com'".to_string(),
                    allow: true,
                    fields: vec![],
                    all_fields: true
                },
                SecurityRule::FieldAccess {
                    condition: "true".to_string(),
                    allow: true,
                    fields: vec!["a".to_string()],
                    all_fields: false
                },
                SecurityRule::FieldAccess {
                    condition: "true".to_string(),
                    allow: false,
                    fields: vec!["b".to_string()],
                    all_fields: false
                },
            ]
        );
    }

    #[test]
    fn test_access_rule_suppresses_default_deny() {
        let compiled = compile_yaml(
            "access: \"'{{ user.domain }}' = 'example.org'\"",
            SecurityOptions::default(),
        )
        .unwrap();
        assert_eq!(compiled.rules.len(), 1);
        assert!(matches!(
            &compiled.rules[0],
            SecurityRule::Access { allow: true, .. }
        ));
    }

    #[test]
    fn test_access_bool() {
        let compiled = compile_yaml("access: true", SecurityOptions::default()).unwrap();
        assert_eq!(
            compiled.rules,
            vec![SecurityRule::Access {
                condition: "true".to_string(),
                allow: true
            }]
        );
    }

    #[test]
    fn test_invalid_condition_template() {
        let err = compile_yaml("access: \"{{ user.domain \"", SecurityOptions::default()).unwrap_err();
        assert!(err.to_string().contains("invalid template"));
    }

    #[test]
    fn test_invalid_condition_expression() {
        let err = compile_yaml("access: \"'{{ user.domain }}' = \"", SecurityOptions::default()).unwrap_err();
        assert!(err.to_string().contains("invalid security policy"));
    }

    #[test]
    fn test_row_filter_refs() {
        let compiled = compile_yaml(
            "row_filter: \"id IN (SELECT id FROM {{ ref('allowed_ids') }})\"",
            SecurityOptions::default(),
        )
        .unwrap();
        assert_eq!(compiled.refs, vec![ResourceRef::untyped("allowed_ids")]);
    }

    #[test]
    fn test_access_only() {
        let err = compile_yaml("row_filter: true", SecurityOptions { access_only: true }).unwrap_err();
        assert!(err.to_string().contains("only access rules"));
        compile_yaml("access: false", SecurityOptions { access_only: true }).unwrap();
    }

    #[test]
    fn test_explicit_rules() {
        let compiled = compile_yaml(
            r#"
rules:
  - type: access
    action: allow
    if: "{{ user.admin }}"
  - type: field_access
    action: deny
    all: true
  - type: row_filter
    sql: "country = 'US'"
"#,
            SecurityOptions::default(),
        )
        .unwrap();
        assert_eq!(compiled.rules.len(), 3);
        assert!(compile_yaml("rules: [{type: field_access}]", SecurityOptions::default()).is_err());
        assert!(compile_yaml("rules: [{type: nope}]", SecurityOptions::default()).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(serde_yaml::from_str::<SecurityPolicyYaml>("acess: true").is_err());
    }
}
