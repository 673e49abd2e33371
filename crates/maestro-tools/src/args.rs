// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::warn;

use maestro_domain::FileRef;
use maestro_events::sanitize_filename_value;
use maestro_files::DownloadUrlSigner;

/// Declared property names for a tool, read from OpenAI-shaped schemas.
/// `None` when the tool has no schema entry (schema unavailable).
pub fn schema_properties(schemas: &[Value], tool_name: &str) -> Option<HashSet<String>> {
    schemas
        .iter()
        .find(|schema| schema["function"]["name"].as_str() == Some(tool_name))
        .and_then(|schema| schema["function"]["parameters"]["properties"].as_object())
        .map(|props| props.keys().cloned().collect())
}

/// Whether a tool's schema declares a `username` parameter.
pub fn tool_accepts_username(schemas: &[Value], tool_name: &str) -> bool {
    schema_properties(schemas, tool_name)
        .map(|props| props.contains("username"))
        .unwrap_or(false)
}

/// Parse raw tool-call arguments into a mapping.
///
/// Models sometimes emit arguments as a JSON string, sometimes as an object,
/// and occasionally as malformed text.  Parse failures yield an empty
/// mapping; a parsed non-object is wrapped under `_value`.
pub fn parse_raw_arguments(raw: &Value, tool_name: &str) -> Map<String, Value> {
    match raw {
        Value::Object(map) => map.clone(),
        Value::String(s) if s.is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("_value".into(), other);
                map
            }
            Err(_) => {
                warn!("failed to parse tool arguments as JSON for {tool_name}, using empty map");
                Map::new()
            }
        },
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("_value".into(), other.clone());
            map
        }
    }
}

/// Session-derived inputs for argument injection.
pub struct ArgInjectionContext<'a> {
    pub user_email: Option<&'a str>,
    pub files: &'a HashMap<String, FileRef>,
    pub signer: Option<&'a DownloadUrlSigner>,
}

impl ArgInjectionContext<'_> {
    fn download_url(&self, key: &str) -> Option<String> {
        let signer = self.signer?;
        let user = self.user_email?;
        Some(signer.create_download_url(user, key))
    }
}

/// Inject session context into parsed arguments.
///
/// - `username` is set when a user email is present and the schema declares
///   the parameter (or no schema is available).
/// - `filename` / `file_names` entries that resolve to stored session files
///   are rewritten to signed download URLs; the originals are preserved
///   under `original_filename` / `original_file_names`, and `file_url` /
///   `file_urls` are exposed when not already present.
pub fn inject_context_into_args(
    args: &mut Map<String, Value>,
    context: &ArgInjectionContext<'_>,
    tool_name: &str,
    schemas: &[Value],
) {
    if let Some(user_email) = context.user_email {
        if schemas.is_empty() || tool_accepts_username(schemas, tool_name) {
            args.insert("username".into(), Value::String(user_email.to_string()));
        }
    }

    if let Some(Value::String(fname)) = args.get("filename").cloned().as_ref() {
        if let Some(url) = context
            .files
            .get(fname)
            .filter(|r| !r.key.is_empty())
            .and_then(|r| context.download_url(&r.key))
        {
            args.entry("original_filename".to_string())
                .or_insert_with(|| Value::String(fname.clone()));
            args.insert("filename".into(), Value::String(url.clone()));
            args.entry("file_url".to_string())
                .or_insert_with(|| Value::String(url));
        }
    }

    if let Some(Value::Array(names)) = args.get("file_names").cloned().as_ref() {
        let mut originals = Vec::new();
        let mut urls = Vec::new();
        for name in names {
            let Value::String(fname) = name else { continue };
            originals.push(Value::String(fname.clone()));
            let resolved = context
                .files
                .get(fname)
                .filter(|r| !r.key.is_empty())
                .and_then(|r| context.download_url(&r.key))
                .unwrap_or_else(|| fname.clone());
            urls.push(Value::String(resolved));
        }
        if !urls.is_empty() {
            args.entry("original_file_names".to_string())
                .or_insert_with(|| Value::Array(originals));
            args.insert("file_names".into(), Value::Array(urls.clone()));
            args.entry("file_urls".to_string())
                .or_insert_with(|| Value::Array(urls));
        }
    }
}

/// Keep only arguments the tool's schema declares.
///
/// When the schema is unavailable, fall back to dropping the injected
/// extras (`original_*`, `file_url`, `file_urls`) so strict tool servers do
/// not reject the call.
pub fn filter_args_to_schema(
    args: &Map<String, Value>,
    tool_name: &str,
    schemas: &[Value],
) -> Map<String, Value> {
    if let Some(allowed) = schema_properties(schemas, tool_name).filter(|a| !a.is_empty()) {
        return args
            .iter()
            .filter(|(k, _)| allowed.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }

    args.iter()
        .filter(|(k, _)| {
            !k.starts_with("original_") && k.as_str() != "file_url" && k.as_str() != "file_urls"
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Reduce filename-ish argument values to clean basenames for UI display.
///
/// Applied to a copy; the dispatch arguments keep their signed URLs.
/// Idempotent.
pub fn sanitize_args_for_ui(args: &Map<String, Value>) -> Map<String, Value> {
    let mut cleaned = args.clone();

    for key in ["filename", "file_url"] {
        if let Some(Value::String(s)) = cleaned.get(key) {
            let sanitized = sanitize_filename_value(s);
            cleaned.insert(key.to_string(), Value::String(sanitized));
        }
    }
    for key in ["file_names", "file_urls"] {
        if let Some(Value::Array(items)) = cleaned.get(key).cloned().as_ref() {
            let sanitized = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(sanitize_filename_value(s)),
                    other => other.clone(),
                })
                .collect();
            cleaned.insert(key.to_string(), Value::Array(sanitized));
        }
    }

    cleaned
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
