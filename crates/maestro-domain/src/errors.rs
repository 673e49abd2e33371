// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error vocabulary of the chat pipeline.
///
/// Kinds form a tree: specialised kinds report a parent via [`ErrorKind::parent`]
/// so callers can match on either the precise kind or its family
/// (e.g. `RateLimit` is-a `Llm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Session,
    SessionNotFound,
    Message,
    Authentication,
    LlmAuthentication,
    Authorization,
    ToolAuthorization,
    DataSourcePermission,
    Configuration,
    LlmConfiguration,
    Llm,
    LlmService,
    RateLimit,
    LlmTimeout,
    Tool,
    PromptOverride,
}

impl ErrorKind {
    /// Parent kind in the taxonomy, `None` for roots.
    pub fn parent(self) -> Option<ErrorKind> {
        use ErrorKind::*;
        match self {
            SessionNotFound => Some(Session),
            LlmAuthentication => Some(Authentication),
            ToolAuthorization | DataSourcePermission => Some(Authorization),
            LlmConfiguration => Some(Configuration),
            LlmService | RateLimit | LlmTimeout => Some(Llm),
            _ => None,
        }
    }

    /// Whether this kind equals `ancestor` or descends from it.
    pub fn is_a(self, ancestor: ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    pub fn label(self) -> &'static str {
        use ErrorKind::*;
        match self {
            Validation => "validation error",
            Session => "session error",
            SessionNotFound => "session not found",
            Message => "message error",
            Authentication => "authentication error",
            LlmAuthentication => "LLM authentication error",
            Authorization => "authorization error",
            ToolAuthorization => "tool authorization error",
            DataSourcePermission => "data source permission error",
            Configuration => "configuration error",
            LlmConfiguration => "LLM configuration error",
            Llm => "LLM error",
            LlmService => "LLM service error",
            RateLimit => "rate limit error",
            LlmTimeout => "LLM timeout",
            Tool => "tool error",
            PromptOverride => "prompt override error",
        }
    }
}

/// A classified pipeline error: `(kind, message, optional code)`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{}: {message}", .kind.label())]
pub struct DomainError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DomainError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn session_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionNotFound, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tool, message)
    }

    pub fn llm_service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LlmService, message)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
