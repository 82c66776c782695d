//! Embedded sources
//!
//! A query that reads an external file directly
//! (`SELECT * FROM read_parquet('s3://bucket/data.parquet')`) gets a
//! synthesized Source resource for that file and is rewritten to select from
//! it. The source name is a hash of its properties and connectors, so every
//! query reading the same file shares one source.

use quarry_core::Properties;
use quarry_core::spec::SourceSpec;
use sha2::{Digest, Sha256};

use super::TableRef;

/// Prefix of synthesized source names
pub const EMBED_PREFIX: &str = "embed_";

const TABLE_FUNCTIONS: [(&str, &str); 8] = [
    ("read_parquet", "parquet"),
    ("read_csv", "csv"),
    ("read_csv_auto", "csv"),
    ("read_json", "json"),
    ("read_json_auto", "json"),
    ("read_json_objects", "json"),
    ("read_ndjson", "json"),
    ("read_ndjson_auto", "json"),
];

/// A source synthesized from a table reference
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedSource {
    /// Content-derived name
    pub name: String,
    /// Spec of the synthesized source
    pub spec: SourceSpec,
}

/// Connector able to read `path`
pub fn connector_for_path(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    match lower.split_once("://").map(|(scheme, _)| scheme) {
        Some("s3") => "s3",
        Some("gs") | Some("gcs") => "gcs",
        Some("azure") | Some("az") | Some("abfss") => "azure",
        Some("http") | Some("https") => "https",
        _ => "local_file",
    }
}

/// Build the embedded source for a table reference, if it reads a file
pub fn from_table_ref(r: &TableRef, sink_connector: &str) -> Option<EmbeddedSource> {
    if r.local_alias {
        return None;
    }

    let mut props = Properties::new();
    match &r.function {
        Some(function) => {
            let format = TABLE_FUNCTIONS
                .iter()
                .find(|(name, _)| *name == function.as_str())
                .map(|(_, format)| *format)?;
            match r.paths.as_slice() {
                [] => return None,
                [path] => {
                    props.insert("path".into(), path.clone().into());
                }
                paths => {
                    props.insert("path".into(), paths.to_vec().into());
                }
            }
            props.insert("format".into(), format.into());
            for (k, v) in &r.properties {
                props.insert(k.clone(), v.clone());
            }
        }
        None => {
            if !r.quoted || !r.name.contains('/') {
                return None;
            }
            props.insert("path".into(), r.name.clone().into());
        }
    }

    let first_path = r.paths.first().unwrap_or(&r.name);
    let connector = connector_for_path(first_path);
    let name = embedded_name(&props, connector, sink_connector);

    Some(EmbeddedSource {
        name,
        spec: SourceSpec {
            source_connector: connector.to_string(),
            sink_connector: sink_connector.to_string(),
            properties: props,
            ..Default::default()
        },
    })
}

/// Deterministic name: sorted properties, then connector, then sink
pub fn embedded_name(props: &Properties, connector: &str, sink: &str) -> String {
    let mut keys: Vec<&String> = props.keys().collect();
    keys.sort();

    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(props[key].to_string().as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(connector.as_bytes());
    hasher.update([0u8]);
    hasher.update(sink.as_bytes());

    let digest = hex::encode(hasher.finalize());
    format!("{EMBED_PREFIX}{}", &digest[..32])
}
