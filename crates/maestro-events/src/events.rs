// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The transport-agnostic client event stream.
///
/// Every message carries a `type` tag; payload shapes match the wire contract
/// consumed by the web client and the CLI collector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    TokenStream {
        token: String,
        is_first: bool,
        is_last: bool,
    },
    ChatResponse {
        message: String,
        has_pending_tools: bool,
    },
    ResponseComplete {},
    AgentUpdate {
        update_type: String,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    ToolStart {
        tool_call_id: String,
        tool_name: String,
        server_name: String,
        /// UI-sanitized arguments; never the dispatch arguments.
        arguments: Value,
    },
    ToolProgress {
        tool_call_id: String,
        tool_name: String,
        progress: f64,
        total: Option<f64>,
        percentage: Option<f64>,
        message: String,
    },
    ToolComplete {
        tool_call_id: String,
        tool_name: String,
        success: bool,
        result: Value,
    },
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: String,
    },
    IntermediateUpdate {
        update_type: String,
        data: Value,
    },
    CanvasContent {
        content: String,
        content_type: String,
    },
    ElicitationRequest {
        elicitation_id: String,
        tool_call_id: String,
        tool_name: String,
        message: String,
        response_schema: Value,
    },
    Error {
        message: String,
    },
    SecurityWarning {
        status: String,
        message: String,
    },
    ConversationSaved {
        conversation_id: String,
    },
    SessionReset {
        session_id: String,
        message: String,
    },
}

impl ClientEvent {
    /// The wire `type` tag of this event.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TokenStream { .. } => "token_stream",
            Self::ChatResponse { .. } => "chat_response",
            Self::ResponseComplete {} => "response_complete",
            Self::AgentUpdate { .. } => "agent_update",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolProgress { .. } => "tool_progress",
            Self::ToolComplete { .. } => "tool_complete",
            Self::ToolError { .. } => "tool_error",
            Self::IntermediateUpdate { .. } => "intermediate_update",
            Self::CanvasContent { .. } => "canvas_content",
            Self::ElicitationRequest { .. } => "elicitation_request",
            Self::Error { .. } => "error",
            Self::SecurityWarning { .. } => "security_warning",
            Self::ConversationSaved { .. } => "conversation_saved",
            Self::SessionReset { .. } => "session_reset",
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
