// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use maestro_domain::ErrorKind;

/// Classification of an LLM failure into the stable user-facing vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub kind: ErrorKind,
    pub user_message: &'static str,
    pub log_message: String,
}

pub const RATE_LIMIT_USER_MESSAGE: &str =
    "The AI service is experiencing high traffic. Please try again in a moment.";
pub const TIMEOUT_USER_MESSAGE: &str = "The AI service request timed out. Please try again.";
pub const AUTHENTICATION_USER_MESSAGE: &str =
    "There was an authentication issue with the AI service. Please contact your administrator.";
pub const GENERIC_USER_MESSAGE: &str =
    "The AI service encountered an error. Please try again or contact support if the issue persists.";

/// Classify an LLM failure.
///
/// Pure function over the error's display chain.  The user message never
/// contains raw exception text, keys, or provider identifiers; the log
/// message carries the full chain for ERROR-level logging.
pub fn classify(error: &anyhow::Error) -> Classified {
    let error_str = format!("{error:#}");
    let lowered = error_str.to_lowercase();

    if error_str.contains("RateLimit")
        || lowered.contains("rate limit")
        || lowered.contains("high traffic")
    {
        return Classified {
            kind: ErrorKind::RateLimit,
            user_message: RATE_LIMIT_USER_MESSAGE,
            log_message: format!("Rate limit error: {error_str}"),
        };
    }

    if lowered.contains("timeout") || lowered.contains("timed out") {
        return Classified {
            kind: ErrorKind::LlmTimeout,
            user_message: TIMEOUT_USER_MESSAGE,
            log_message: format!("Timeout error: {error_str}"),
        };
    }

    const AUTH_MARKERS: [&str; 5] = [
        "unauthorized",
        "authentication",
        "invalid api key",
        "invalid_api_key",
        "api key",
    ];
    if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Classified {
            kind: ErrorKind::LlmAuthentication,
            user_message: AUTHENTICATION_USER_MESSAGE,
            log_message: format!("Authentication error: {error_str}"),
        };
    }

    Classified {
        kind: ErrorKind::LlmService,
        user_message: GENERIC_USER_MESSAGE,
        log_message: format!("LLM error: {error_str}"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
