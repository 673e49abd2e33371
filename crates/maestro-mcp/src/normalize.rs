// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{json, Map, Value};
use tracing::debug;

use maestro_domain::Artifact;

use crate::transport::{RawContentBlock, RawToolResult};

/// Size guard for the whole-mapping results fallback.
const RESULTS_SIZE_GUARD: usize = 8000;
/// Size guard for tool-provided metadata.
const META_SIZE_GUARD: usize = 4000;

/// Base64-looking strings above this length are scrubbed from LLM-visible
/// content regardless of key.
const BASE64_SCRUB_THRESHOLD: usize = 10_240;
/// Values under known payload keys are scrubbed above this length.
const PAYLOAD_KEY_SCRUB_THRESHOLD: usize = 1024;

const PAYLOAD_KEYS: [&str; 4] = ["b64", "data", "base64", "image_data"];

/// Artifacts, display configuration, and metadata extracted alongside the
/// normalized content mapping.
#[derive(Debug, Clone, Default)]
pub struct NormalizedComponents {
    pub content: Map<String, Value>,
    pub artifacts: Vec<Artifact>,
    pub display_config: Option<Value>,
    pub meta_data: Option<Value>,
}

/// Pick the structured mapping out of a raw result, in priority order:
/// `structured_content`, then `data`, then the first text block parsed as
/// JSON when it starts with `{`.
fn structured_mapping(raw: &RawToolResult) -> Option<Map<String, Value>> {
    if let Some(Value::Object(map)) = &raw.structured_content {
        if !map.is_empty() {
            return Some(map.clone());
        }
    }
    if let Some(Value::Object(map)) = &raw.data {
        if !map.is_empty() {
            return Some(map.clone());
        }
    }
    for block in &raw.content {
        if let RawContentBlock::Text { text } = block {
            if text.trim_start().starts_with('{') {
                match serde_json::from_str::<Value>(text) {
                    Ok(Value::Object(map)) => return Some(map),
                    Ok(_) => {}
                    Err(e) => debug!("first content block is not valid JSON: {e}"),
                }
            }
            break;
        }
    }
    None
}

fn serialized_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Normalize a raw MCP tool result into the stable content contract.
///
/// The returned mapping has the shape
/// `{results | results_summary, meta_data?, returned_file_names?,
/// returned_file_count?}`.  Base64 file contents are never inlined here;
/// artifacts carry payloads separately.
pub fn normalize_raw_result(raw: &RawToolResult) -> Map<String, Value> {
    let mut normalized = Map::new();

    if let Some(structured) = structured_mapping(raw) {
        // Support both correct and legacy key forms.
        let results_payload = structured
            .get("results")
            .filter(|v| !v.is_null())
            .or_else(|| structured.get("result").filter(|v| !v.is_null()));
        let meta_payload = structured
            .get("meta_data")
            .or_else(|| structured.get("meta-data"))
            .or_else(|| structured.get("metadata"))
            .filter(|v| !v.is_null());

        if let Some(results) = results_payload {
            normalized.insert("results".into(), results.clone());
        }
        if let Some(meta) = meta_payload {
            if serialized_len(meta) < META_SIZE_GUARD {
                normalized.insert("meta_data".into(), meta.clone());
            } else {
                normalized.insert("meta_data_truncated".into(), json!(true));
            }
        }
        if let Some(names) = structured.get("returned_file_names").filter(|v| !v.is_null()) {
            normalized.insert("returned_file_names".into(), names.clone());
        }
        if let Some(contents) = structured.get("returned_file_contents").filter(|v| !v.is_null()) {
            let count = contents.as_array().map(|a| a.len()).unwrap_or(1);
            normalized.insert("returned_file_count".into(), json!(count));
        }

        // No explicit results key: fall back to the entire structured mapping
        // minus the potentially huge file contents, under the size guard.
        if !normalized.contains_key("results") {
            let pruned: Map<String, Value> = structured
                .iter()
                .filter(|(k, _)| k.as_str() != "returned_file_contents")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let serialized = serialized_len(&Value::Object(pruned.clone()));
            if serialized <= RESULTS_SIZE_GUARD {
                normalized.insert("results".into(), Value::Object(pruned));
            } else {
                normalized.insert(
                    "results_summary".into(),
                    json!({
                        "keys": pruned.keys().cloned().collect::<Vec<_>>(),
                        "omitted_due_to_size": serialized,
                    }),
                );
            }
        }
    }

    if normalized.is_empty() {
        normalized.insert("results".into(), json!(raw.text()));
    }
    normalized
}

/// Map a recognized `image/*` MIME type to an artifact file extension.
fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

/// Extract artifacts, display configuration, and metadata from a raw result.
///
/// Explicit artifacts need `name` + `b64`; malformed entries are skipped.
/// Top-level image content blocks synthesize `mcp_image_<i>.<ext>` artifacts
/// with `viewer = image`; when any exist and no explicit display is set, a
/// canvas-opening display pointing at the first image is synthesized.
pub fn extract_components(raw: &RawToolResult) -> NormalizedComponents {
    let mut components = NormalizedComponents {
        content: normalize_raw_result(raw),
        ..Default::default()
    };

    let structured = structured_mapping(raw).unwrap_or_default();

    if let Some(Value::Array(entries)) = structured.get("artifacts") {
        for entry in entries {
            let (Some(name), Some(b64)) = (
                entry.get("name").and_then(Value::as_str),
                entry.get("b64").and_then(Value::as_str),
            ) else {
                debug!("skipping artifact with missing name or content");
                continue;
            };
            components.artifacts.push(Artifact {
                name: name.to_string(),
                b64: b64.to_string(),
                mime: entry.get("mime").and_then(Value::as_str).map(str::to_string),
                size: entry.get("size").and_then(Value::as_u64),
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                viewer: entry
                    .get("viewer")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }
    }

    if let Some(display @ Value::Object(_)) = structured.get("display") {
        components.display_config = Some(display.clone());
    }
    if let Some(meta @ Value::Object(_)) = structured.get("meta_data") {
        components.meta_data = Some(meta.clone());
    }

    // Synthetic artifacts from inline image content blocks.
    let mut first_image: Option<String> = None;
    for (i, block) in raw.content.iter().enumerate() {
        let RawContentBlock::Image { data, mime_type } = block else {
            continue;
        };
        if data.is_empty() {
            continue;
        }
        let Some(ext) = extension_for_mime(mime_type) else {
            continue;
        };
        let name = format!("mcp_image_{i}.{ext}");
        first_image.get_or_insert_with(|| name.clone());
        components.artifacts.push(Artifact {
            name,
            b64: data.clone(),
            mime: Some(mime_type.clone()),
            size: None,
            description: None,
            viewer: Some("image".into()),
        });
    }
    if components.display_config.is_none() {
        if let Some(primary) = first_image {
            components.display_config = Some(json!({
                "open_canvas": true,
                "primary_file": primary,
            }));
        }
    }

    components
}

fn looks_like_base64(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'+' | b'/' | b'=' | b'-' | b'_' | b'\r' | b'\n')
        })
}

/// Replace base64 payloads in LLM-visible content with size placeholders.
///
/// Two triggers: any sufficiently large string that matches the base64
/// charset, and any value above 1 KB under the known payload keys
/// (`b64`, `data`, `base64`, `image_data`).  Artifacts keep their payloads;
/// only the content string fed back to the model is scrubbed.
pub fn scrub_base64_bloat(value: &Value) -> Value {
    fn scrub(value: &Value, key: Option<&str>) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), scrub(v, Some(k.as_str()))))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| scrub(v, None)).collect())
            }
            Value::String(s) => {
                let under_payload_key = key.map(|k| PAYLOAD_KEYS.contains(&k)).unwrap_or(false);
                if (under_payload_key && s.len() > PAYLOAD_KEY_SCRUB_THRESHOLD)
                    || (s.len() > BASE64_SCRUB_THRESHOLD && looks_like_base64(s))
                {
                    Value::String(format!("<{} bytes removed>", s.len()))
                } else {
                    value.clone()
                }
            }
            other => other.clone(),
        }
    }
    scrub(value, None)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
