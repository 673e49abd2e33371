// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Error returned when a required `${NAME}` reference cannot be resolved.
#[derive(Debug, Error)]
pub enum EnvExpandError {
    #[error("unresolved environment reference ${{{0}}}")]
    Missing(String),
    #[error("unterminated environment reference in {0:?}")]
    Unterminated(String),
}

/// Expand `${NAME}` references against the process environment.
///
/// Every reference must resolve; a missing variable is an error so that
/// misconfigured deployments fail at load time rather than at first use.
/// Text without references passes through unchanged.
pub fn expand_env(input: &str) -> Result<String, EnvExpandError> {
    expand(input, true).map(|v| v.expect("required expansion always yields a value"))
}

/// Expand `${NAME}` references, treating unresolved references as absent.
///
/// Returns `None` when any reference is missing.  Used for optional config
/// values such as bearer tokens, where an unset variable means "no token".
pub fn expand_env_optional(input: &str) -> Option<String> {
    expand(input, false).ok().flatten()
}

fn expand(input: &str, required: bool) -> Result<Option<String>, EnvExpandError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| EnvExpandError::Unterminated(input.to_string()))?;
        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) if required => return Err(EnvExpandError::Missing(name.to_string())),
            Err(_) => return Ok(None),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Some(out))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
