// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Storage keys look like `1755396436_d71d38d7_report.csv`; the UI should only
/// ever see `report.csv`.
fn storage_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{9,}_[0-9a-fA-F]{6,}_(.+)$").expect("valid pattern"))
}

/// Reduce a filename-ish value to a user-safe basename.
///
/// - Strips any query string (`?token=...`)
/// - Keeps only the basename of URL or filesystem paths
/// - Strips the timestamp-hash storage prefix
///
/// Idempotent: applying twice equals applying once.
pub fn sanitize_filename_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let without_query = value.split('?').next().unwrap_or(value);

    // For URLs the path component is what carries the filename; the basename
    // split below handles both URLs and plain paths.
    let basename = without_query.rsplit('/').next().unwrap_or(without_query);

    match storage_prefix_pattern().captures(basename) {
        Some(caps) => caps[1].to_string(),
        None => basename.to_string(),
    }
}

/// Recursively sanitize tool-result content for UI display.
///
/// Any value under a key literally named `filename` (including the nested
/// `file.filename` shape) is reduced to a clean basename.  Lists and nested
/// objects are traversed; everything else passes through unchanged.
pub fn sanitize_result_for_ui(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                let sanitized = match (key.as_str(), inner) {
                    ("filename", Value::String(s)) => Value::String(sanitize_filename_value(s)),
                    _ => sanitize_result_for_ui(inner),
                };
                out.insert(key.clone(), sanitized);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_result_for_ui).collect()),
        other => other.clone(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
