// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_domain::Message;

/// Message shown when blocked tool output forces the compensating clear.
pub const BLOCKED_TOOL_OUTPUT_MESSAGE: &str = "Tool output violated our content policy. \
     The conversation history has been cleared. Please start a new conversation.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityStatus {
    #[serde(rename = "blocked")]
    Blocked,
    #[serde(rename = "allowed-with-warnings")]
    AllowedWithWarnings,
    #[serde(rename = "good")]
    Good,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub status: SecurityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl SecurityVerdict {
    pub fn good() -> Self {
        Self {
            status: SecurityStatus::Good,
            message: None,
            details: None,
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            status: SecurityStatus::Blocked,
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status == SecurityStatus::Blocked
    }
}

/// Content policy gate.  Checks run on user input, on assistant output, and
/// on tool / RAG payloads before they are fed back to the model.
#[async_trait]
pub trait SecurityChecker: Send + Sync {
    async fn check_input(
        &self,
        content: &str,
        history: &[Message],
        user: Option<&str>,
    ) -> SecurityVerdict;

    async fn check_output(
        &self,
        content: &str,
        history: &[Message],
        user: Option<&str>,
    ) -> SecurityVerdict;

    async fn check_tool_rag_output(
        &self,
        content: &str,
        source_type: &str,
        history: &[Message],
        user: Option<&str>,
    ) -> SecurityVerdict;
}

/// Pass-through checker for deployments without a policy backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSecurityChecker;

#[async_trait]
impl SecurityChecker for NoopSecurityChecker {
    async fn check_input(
        &self,
        _content: &str,
        _history: &[Message],
        _user: Option<&str>,
    ) -> SecurityVerdict {
        SecurityVerdict::good()
    }

    async fn check_output(
        &self,
        _content: &str,
        _history: &[Message],
        _user: Option<&str>,
    ) -> SecurityVerdict {
        SecurityVerdict::good()
    }

    async fn check_tool_rag_output(
        &self,
        _content: &str,
        _source_type: &str,
        _history: &[Message],
        _user: Option<&str>,
    ) -> SecurityVerdict {
        SecurityVerdict::good()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
