//! Two-mode templating for SQL and YAML values
//!
//! Templates use Jinja syntax (via minijinja) with a few project-specific
//! functions:
//!
//! - `ref(name)` / `ref(kind, name)` - reference another resource
//! - `dependency(...)` - declare a dependency without emitting text
//! - `lookup(...)` - fetch another resource's metadata, spec and state
//! - `configure(map)` / `configure(key, value)` - set resource properties
//! - `dev()`, `prod()`, `now()` and the `as_sql_list` filter
//!
//! # Modes
//!
//! - [`analyze`] runs at parse time against placeholder data. It collects
//!   references, `configure` calls and referenced variables. Undefined
//!   values render as empty.
//! - [`resolve`] runs at execution time against real data supplied by the
//!   caller. Undefined values are an error.
//!
//! Each call builds its own environment and accumulator; nothing is shared
//! between calls.

use minijinja::value::{Rest, Value};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::resource::{ResourceKind, ResourceName, ResourceRef};

/// Text that `ref` renders to during analysis
pub const REF_PLACEHOLDER: &str = "<no value>";

const FUNCTIONS: [&str; 7] = ["ref", "dependency", "lookup", "configure", "dev", "prod", "now"];

/// Metadata extracted by [`analyze`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateMetadata {
    /// References from `ref`, `dependency` and `lookup`
    pub refs: Vec<ResourceRef>,
    /// Properties set with `configure`
    pub config: serde_yaml::Mapping,
    /// Variable paths referenced by the template (e.g. `user.domain`)
    pub variables: Vec<String>,
    /// Whether the text contains any template syntax
    pub uses_templating: bool,
    /// Output of rendering against placeholder data
    pub resolved_with_placeholders: String,
}

/// Returns true if `text` contains template syntax
pub fn uses_templating(text: &str) -> bool {
    text.contains("{{") || text.contains("{%") || text.contains("{#")
}

#[derive(Default)]
struct Accumulator {
    refs: Vec<ResourceRef>,
    config: serde_yaml::Mapping,
}

type Shared = Arc<Mutex<Accumulator>>;

fn poisoned() -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, "template state is poisoned")
}

fn base_environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.add_filter("as_sql_list", as_sql_list);
    env
}

/// Render a list as a comma-separated SQL list (`'a', 'b', 3`)
fn as_sql_list(values: Vec<Value>) -> String {
    values
        .iter()
        .map(|v| match v.as_str() {
            Some(s) => format!("'{}'", s.replace('\'', "''")),
            None => v.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_ref_args(function: &str, args: &[Value]) -> std::result::Result<ResourceRef, minijinja::Error> {
    let as_str = |v: &Value| -> std::result::Result<String, minijinja::Error> {
        v.as_str().map(str::to_string).ok_or_else(|| {
            minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("{function}: arguments must be strings"),
            )
        })
    };

    match args {
        [name] => Ok(ResourceRef::untyped(as_str(name)?)),
        [kind, name] => {
            let kind: ResourceKind = as_str(kind)?.parse().map_err(|e: Error| {
                minijinja::Error::new(ErrorKind::InvalidOperation, format!("{function}: {e}"))
            })?;
            Ok(ResourceRef::typed(kind, as_str(name)?))
        }
        _ => Err(minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("{function}: expected a name or a kind and a name"),
        )),
    }
}

/// Analyze a template against placeholder data
///
/// # Example
///
/// ```rust,ignore
/// let meta = analyze("SELECT * FROM {{ ref('orders') }} WHERE x = '{{ vars.region }}'")?;
/// assert_eq!(meta.refs, vec![ResourceRef::untyped("orders")]);
/// assert_eq!(meta.variables, vec!["vars.region"]);
/// ```
pub fn analyze(source: &str) -> Result<TemplateMetadata> {
    if !uses_templating(source) {
        return Ok(TemplateMetadata {
            resolved_with_placeholders: source.to_string(),
            ..Default::default()
        });
    }

    let acc: Shared = Arc::new(Mutex::new(Accumulator::default()));
    let mut env = base_environment();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);

    let state = acc.clone();
    env.add_function("ref", move |args: Rest<Value>| {
        let r = parse_ref_args("ref", &args)?;
        state.lock().map_err(|_| poisoned())?.refs.push(r);
        Ok::<_, minijinja::Error>(REF_PLACEHOLDER.to_string())
    });

    let state = acc.clone();
    env.add_function("dependency", move |args: Rest<Value>| {
        let r = parse_ref_args("dependency", &args)?;
        state.lock().map_err(|_| poisoned())?.refs.push(r);
        Ok::<_, minijinja::Error>(String::new())
    });

    let state = acc.clone();
    env.add_function("lookup", move |args: Rest<Value>| {
        let r = parse_ref_args("lookup", &args)?;
        state.lock().map_err(|_| poisoned())?.refs.push(r);
        Ok::<_, minijinja::Error>(Value::from_serialize(BTreeMap::<String, String>::new()))
    });

    let state = acc.clone();
    env.add_function("configure", move |args: Rest<Value>| {
        let mut acc = state.lock().map_err(|_| poisoned())?;
        match args.as_slice() {
            [blob] => {
                let value = to_yaml(blob)?;
                let serde_yaml::Value::Mapping(map) = value else {
                    return Err(minijinja::Error::new(
                        ErrorKind::InvalidOperation,
                        "configure: single argument must be a map",
                    ));
                };
                for (k, v) in map {
                    acc.config.insert(k, v);
                }
            }
            [key, value] => {
                let key = key.as_str().ok_or_else(|| {
                    minijinja::Error::new(ErrorKind::InvalidOperation, "configure: key must be a string")
                })?;
                acc.config.insert(key.into(), to_yaml(value)?);
            }
            _ => {
                return Err(minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    "configure: expected a map or a key and a value",
                ));
            }
        }
        Ok::<_, minijinja::Error>(String::new())
    });

    env.add_function("dev", || false);
    env.add_function("prod", || false);
    env.add_function("now", String::new);

    let tmpl = env.template_from_str(source)?;
    let variables: BTreeSet<String> = tmpl
        .undeclared_variables(true)
        .into_iter()
        .filter(|v| !FUNCTIONS.contains(&v.as_str()))
        .collect();
    let rendered = tmpl.render(minijinja::context! {})?;

    let acc = std::mem::take(&mut *acc.lock().map_err(|_| poisoned())?);
    Ok(TemplateMetadata {
        refs: dedup(acc.refs),
        config: acc.config,
        variables: variables.into_iter().collect(),
        uses_templating: true,
        resolved_with_placeholders: rendered,
    })
}

fn to_yaml(v: &Value) -> std::result::Result<serde_yaml::Value, minijinja::Error> {
    serde_yaml::to_value(v).map_err(|e| {
        minijinja::Error::new(ErrorKind::InvalidOperation, format!("configure: {e}"))
    })
}

fn dedup(refs: Vec<ResourceRef>) -> Vec<ResourceRef> {
    let mut out: Vec<ResourceRef> = Vec::with_capacity(refs.len());
    for r in refs {
        if !out.contains(&r) {
            out.push(r);
        }
    }
    out
}

/// A resource as seen from inside a template
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateResource {
    /// Kind and name
    pub meta: serde_json::Value,
    /// Resource spec
    pub spec: serde_json::Value,
    /// Resource state
    pub state: serde_json::Value,
}

/// Callback resolving a referenced resource to its final rendered name
pub type ResolveFn = Arc<dyn Fn(&ResourceName) -> std::result::Result<String, String> + Send + Sync>;

/// Callback fetching another resource for `lookup`
pub type LookupFn =
    Arc<dyn Fn(&ResourceName) -> std::result::Result<TemplateResource, String> + Send + Sync>;

/// Live data for [`resolve`]
#[derive(Clone, Default)]
pub struct TemplateData {
    /// Environment name (`dev`, `prod`, ...)
    pub environment: String,
    /// User attributes/claims
    pub user: serde_json::Map<String, serde_json::Value>,
    /// Project variables; dotted keys are also exposed as nested maps
    pub variables: BTreeMap<String, String>,
    /// State of the resource being rendered
    pub state: Option<serde_json::Value>,
    /// Extra top-level values
    pub extra_props: serde_json::Map<String, serde_json::Value>,
    /// The resource being rendered
    pub self_resource: Option<TemplateResource>,
    /// Resolves `ref` calls; without it names render unchanged
    pub resolve: Option<ResolveFn>,
    /// Serves `lookup` calls; without it `lookup` is an error
    pub lookup: Option<LookupFn>,
}

impl TemplateData {
    /// Dummy data used to validate templates at parse time
    pub fn validation() -> Self {
        let user = serde_json::json!({
            "name": "dummy",
            "email": "mock@example.org",
            "domain": "example.org",
            "groups": ["all"],
            "admin": false,
        });
        Self {
            environment: "dev".to_string(),
            user: user.as_object().cloned().unwrap_or_default(),
            lookup: Some(Arc::new(|_| Ok(TemplateResource::default()))),
            ..Default::default()
        }
    }

    fn context(&self) -> Value {
        let vars = nest_variables(&self.variables);
        let mut ctx = self.extra_props.clone();
        ctx.insert("environment".into(), self.environment.clone().into());
        ctx.insert("user".into(), serde_json::Value::Object(self.user.clone()));
        ctx.insert("vars".into(), vars.clone());
        ctx.insert("env".into(), vars);
        ctx.insert("incremental".into(), self.state.is_some().into());
        ctx.insert("state".into(), self.state.clone().unwrap_or_default());
        if let Some(me) = &self.self_resource {
            ctx.insert(
                "self".into(),
                serde_json::json!({ "meta": me.meta, "spec": me.spec, "state": me.state }),
            );
        }
        Value::from_serialize(&ctx)
    }
}

fn nest_variables(vars: &BTreeMap<String, String>) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for (key, value) in vars {
        root.insert(key.clone(), value.clone().into());
    }
    for (key, value) in vars.iter().filter(|(k, _)| k.contains('.')) {
        let parts: Vec<&str> = key.split('.').collect();
        insert_nested(&mut root, &parts, value);
    }
    serde_json::Value::Object(root)
}

/// Insert `value` under a dotted path; existing scalars are left alone
fn insert_nested(map: &mut serde_json::Map<String, serde_json::Value>, parts: &[&str], value: &str) {
    match parts {
        [] => {}
        [last] => {
            map.entry(last.to_string()).or_insert_with(|| value.into());
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.to_string())
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
            if let serde_json::Value::Object(child) = entry {
                insert_nested(child, rest, value);
            }
        }
    }
}

/// Render a template against live data
pub fn resolve(source: &str, data: &TemplateData) -> Result<String> {
    if !uses_templating(source) {
        return Ok(source.to_string());
    }

    let mut env = base_environment();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let resolver = data.resolve.clone();
    env.add_function("ref", move |args: Rest<Value>| {
        let r = parse_ref_args("ref", &args)?;
        let name = ResourceName::new(resolved_kind(r.kind), r.name);
        match &resolver {
            Some(f) => f(&name).map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e)),
            None => Ok(name.name),
        }
    });

    env.add_function("dependency", |args: Rest<Value>| {
        parse_ref_args("dependency", &args)?;
        Ok::<_, minijinja::Error>(String::new())
    });

    let lookup = data.lookup.clone();
    env.add_function("lookup", move |args: Rest<Value>| {
        let r = parse_ref_args("lookup", &args)?;
        let Some(f) = &lookup else {
            return Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                "function \"lookup\" is not supported in this context",
            ));
        };
        let name = ResourceName::new(resolved_kind(r.kind), r.name);
        let resource = f(&name).map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e))?;
        Ok(Value::from_serialize(&resource))
    });

    env.add_function("configure", |_args: Rest<Value>| String::new());

    let environment = data.environment.clone();
    env.add_function("dev", move || environment == "dev");
    let environment = data.environment.clone();
    env.add_function("prod", move || environment == "prod");
    env.add_function("now", || chrono::Utc::now().to_rfc3339());

    let tmpl = env.template_from_str(source)?;
    Ok(tmpl.render(data.context())?)
}

/// Sources are materialized as models, so references resolve to the model namespace
fn resolved_kind(kind: Option<ResourceKind>) -> ResourceKind {
    match kind {
        None | Some(ResourceKind::Source) => ResourceKind::Model,
        Some(kind) => kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_static_text() {
        let meta = analyze("SELECT 1").unwrap();
        assert!(!meta.uses_templating);
        assert!(meta.refs.is_empty());
        assert_eq!(meta.resolved_with_placeholders, "SELECT 1");
    }

    #[test]
    fn test_analyze_refs() {
        let meta = analyze(
            "SELECT * FROM {{ ref('m1') }} JOIN {{ ref('source', 's1') }} {{ dependency('m1') }}",
        )
        .unwrap();
        assert!(meta.uses_templating);
        assert_eq!(
            meta.refs,
            vec![
                ResourceRef::untyped("m1"),
                ResourceRef::typed(ResourceKind::Source, "s1"),
            ]
        );
        assert_eq!(
            meta.resolved_with_placeholders,
            "SELECT * FROM <no value> JOIN <no value> "
        );
    }

    #[test]
    fn test_analyze_configure() {
        let meta = analyze(
            "{{ configure('materialize', true) }}{{ configure({'timeout': '10s', 'incremental': false}) }}SELECT 1",
        )
        .unwrap();
        assert_eq!(meta.config.get("materialize"), Some(&serde_yaml::Value::Bool(true)));
        assert_eq!(meta.config.get("timeout"), Some(&serde_yaml::Value::from("10s")));
        assert_eq!(meta.config.get("incremental"), Some(&serde_yaml::Value::Bool(false)));
        assert_eq!(meta.resolved_with_placeholders, "SELECT 1");
    }

    #[test]
    fn test_analyze_variables_default_empty() {
        let meta = analyze("WHERE domain = '{{ user.domain }}' AND x = '{{ vars.region }}'").unwrap();
        assert_eq!(meta.variables, vec!["user.domain", "vars.region"]);
        assert_eq!(meta.resolved_with_placeholders, "WHERE domain = '' AND x = ''");
    }

    #[test]
    fn test_analyze_lookup() {
        let meta = analyze("{% set mv = lookup('metrics_view', 'mv1') %}{{ mv.spec.table }}").unwrap();
        assert_eq!(meta.refs, vec![ResourceRef::typed(ResourceKind::MetricsView, "mv1")]);
    }

    #[test]
    fn test_analyze_syntax_error() {
        assert!(analyze("{{ ref('m1' }}").is_err());
        assert!(analyze("{{ ref('widget', 'm1') }}").is_err());
    }

    #[test]
    fn test_resolve() {
        let mut data = TemplateData {
            environment: "prod".to_string(),
            ..Default::default()
        };
        data.variables.insert("region".into(), "eu".into());
        data.variables.insert("db.schema".into(), "main".into());
        data.resolve = Some(Arc::new(|n: &ResourceName| Ok(format!("\"{}\"", n.name))));

        let out = resolve(
            "SELECT * FROM {{ ref('m1') }} WHERE r = '{{ env.region }}' AND s = '{{ vars.db.schema }}'{% if prod() %} LIMIT 1{% endif %}",
            &data,
        )
        .unwrap();
        assert_eq!(out, "SELECT * FROM \"m1\" WHERE r = 'eu' AND s = 'main' LIMIT 1");
    }

    #[test]
    fn test_nested_variables() {
        let mut vars = BTreeMap::new();
        vars.insert("a.b.c".to_string(), "deep".to_string());
        vars.insert("a.b.d".to_string(), "sibling".to_string());
        vars.insert("x".to_string(), "scalar".to_string());
        vars.insert("x.y".to_string(), "shadowed".to_string());

        let nested = nest_variables(&vars);
        assert_eq!(nested["a"]["b"]["c"], "deep");
        assert_eq!(nested["a"]["b"]["d"], "sibling");
        assert_eq!(nested["a.b.c"], "deep");
        assert_eq!(nested["x"], "scalar");
    }

    #[test]
    fn test_resolve_strict_undefined() {
        let err = resolve("{{ vars.missing }}", &TemplateData::default()).unwrap_err();
        assert!(err.to_string().contains("undefined"));
    }

    #[test]
    fn test_resolve_lookup_requires_callback() {
        let err = resolve("{{ lookup('m1') }}", &TemplateData::default()).unwrap_err();
        assert!(err.to_string().contains("\"lookup\" is not supported"));
    }

    #[test]
    fn test_resolve_validation_data() {
        let out = resolve(
            "'{{ user.domain }}' = 'example.org' AND {{ user.admin }}",
            &TemplateData::validation(),
        )
        .unwrap();
        assert_eq!(out, "'example.org' = 'example.org' AND false");
    }

    #[test]
    fn test_as_sql_list() {
        let mut data = TemplateData::default();
        data.extra_props
            .insert("ids".into(), serde_json::json!(["a", "o'b", 3]));
        let out = resolve("IN ({{ ids | as_sql_list }})", &data).unwrap();
        assert_eq!(out, "IN ('a', 'o''b', 3)");
    }
}
