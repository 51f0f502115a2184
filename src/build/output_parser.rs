//! Build output parsing
//!
//! Toolchain output mixes warnings, progress lines and JSON. JSON is located
//! with an ordered chain of candidate extractors; the first candidate whose
//! value is accepted wins. Shapes differ between toolchain versions, so field
//! names and element shapes are normalized through alias lists.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const MODULE_FIELDS: &[&str] = &[
    "modules",
    "compiledModules",
    "compiled_modules",
    "bytecode_modules",
    "units",
];
const DEPENDENCY_FIELDS: &[&str] = &["dependencies", "dependencyIds", "dependency_ids", "deps"];
const ADDRESS_FIELDS: &[&str] = &[
    "dependencyAddresses",
    "dependency_addresses",
    "addresses",
    "address_alias_instantiation",
];
const MODULE_PAYLOAD_FIELDS: &[&str] = &["bytecode", "bytes", "base64", "module"];
const DEPENDENCY_ID_FIELDS: &[&str] = &["id", "address", "packageId", "package_id"];

lazy_static! {
    static ref JSON_OPENER: Regex = Regex::new(r"[\[{]").expect("opener pattern is valid");
}

/// Normalized build result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Base64 compiled modules, in build order
    pub modules: Vec<String>,
    /// Dependency package ids, deduplicated in first-seen order
    pub dependencies: Vec<String>,
    /// Named address → id
    pub dependency_addresses: BTreeMap<String, String>,
}

impl BuildOutput {
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.dependencies.is_empty()
    }
}

type Candidate = fn(&str) -> Option<Value>;

/// Candidate extractors, in the order they are tried
const CANDIDATES: &[(&str, Candidate)] = &[
    ("whole", whole_text),
    ("trailing-line", from_trailing_line),
    ("trailing-value", trailing_value),
    ("brace-span", brace_span),
];

fn whole_text(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

/// From the last line that opens an object or array to the end
fn from_trailing_line(text: &str) -> Option<Value> {
    let mut end = text.len();
    loop {
        let start = text[..end].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line = &text[start..end];
        if line.starts_with('{') || line.starts_with('[') {
            return serde_json::from_str(text[start..].trim()).ok();
        }
        if start == 0 {
            return None;
        }
        end = start - 1;
    }
}

/// The trailing top-level object or array
///
/// Openers are tried from the last one backwards; inner values always leave
/// the outer closers behind, so the first parse that consumes the rest of the
/// text is the top-level value.
fn trailing_value(text: &str) -> Option<Value> {
    let trimmed = text.trim_end();
    let openers: Vec<usize> = JSON_OPENER.find_iter(trimmed).map(|m| m.start()).collect();

    openers
        .into_iter()
        .rev()
        .find_map(|start| serde_json::from_str(&trimmed[start..]).ok())
}

fn brace_span(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// First value extracted from `text` that `accept` maps to `Some`
pub fn extract_json<T>(text: &str, accept: impl Fn(Value) -> Option<T>) -> Option<T> {
    if text.trim().is_empty() {
        return None;
    }

    for (name, candidate) in CANDIDATES {
        if let Some(accepted) = candidate(text).and_then(&accept) {
            tracing::trace!(candidate = *name, "extracted JSON from output");
            return Some(accepted);
        }
    }
    None
}

/// Parse build output, trying stdout before stderr
///
/// Only a result with at least one module or dependency is accepted.
pub fn parse_build_json(stdout: &str, stderr: &str) -> Option<BuildOutput> {
    [stdout, stderr].into_iter().find_map(|text| {
        extract_json(text, |value| normalize(&value).filter(|output| !output.is_empty()))
    })
}

/// Normalize any supported JSON shape into a [`BuildOutput`]
pub fn normalize(value: &Value) -> Option<BuildOutput> {
    match value {
        Value::Array(items) => Some(BuildOutput {
            modules: items.iter().filter_map(module_blob).collect(),
            ..Default::default()
        }),
        Value::Object(map) => {
            let modules = first_field(map, MODULE_FIELDS)
                .map(|v| list(v).iter().filter_map(|m| module_blob(m)).collect())
                .unwrap_or_default();

            let mut dependencies: Vec<String> = Vec::new();
            if let Some(deps) = first_field(map, DEPENDENCY_FIELDS) {
                for id in list(deps).iter().filter_map(|d| dependency_id(d)) {
                    if !dependencies.contains(&id) {
                        dependencies.push(id);
                    }
                }
            }

            let dependency_addresses = first_field(map, ADDRESS_FIELDS)
                .and_then(Value::as_object)
                .map(|addresses| {
                    addresses
                        .iter()
                        .filter_map(|(name, v)| dependency_id(v).map(|id| (name.clone(), id)))
                        .collect()
                })
                .unwrap_or_default();

            Some(BuildOutput {
                modules,
                dependencies,
                dependency_addresses,
            })
        }
        _ => None,
    }
}

fn first_field<'a>(map: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| map.get(*alias))
}

fn list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Base64 module from a string, tuple, byte array or object
fn module_blob(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            if let Some(bytes) = as_bytes(items) {
                return Some(BASE64.encode(bytes));
            }
            items.iter().rev().find_map(module_blob)
        }
        Value::Object(map) => first_field(map, MODULE_PAYLOAD_FIELDS).and_then(module_blob),
        _ => None,
    }
}

fn as_bytes(items: &[Value]) -> Option<Vec<u8>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn dependency_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().rev().find_map(dependency_id),
        Value::Object(map) => first_field(map, DEPENDENCY_ID_FIELDS).and_then(dependency_id),
        _ => None,
    }
}
