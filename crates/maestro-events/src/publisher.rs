// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::events::ClientEvent;

/// Ordered event emission to the client.
///
/// All methods are non-throwing from the caller's perspective: implementations
/// log and swallow transport failures so a dropped connection can never break
/// the chat pipeline mid-request.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Terminal assistant content for non-streaming paths.
    async fn publish_chat_response(&self, message: &str, has_pending_tools: bool);

    /// Signals the end of the request turn.
    async fn publish_response_complete(&self);

    /// Agent-loop visibility (`agent_start`, `agent_reason`, ...).
    async fn publish_agent_update(&self, update_type: &str, data: Map<String, Value>);

    /// Agent-path tool start; tools mode emits its richer `tool_start`
    /// payload through [`send_json`](Self::send_json).
    async fn publish_tool_start(&self, tool_name: &str, data: Map<String, Value>);

    async fn publish_tool_complete(&self, tool_name: &str, result: Value, data: Map<String, Value>);

    /// Incremental assistant tokens.  `is_first` is true at most once per
    /// stream; `is_last` exactly once (the terminator).
    async fn publish_token_stream(&self, token: &str, is_first: bool, is_last: bool);

    async fn publish_files_update(&self, files: Value);

    async fn publish_canvas_content(&self, content: &str, content_type: &str);

    async fn publish_elicitation_request(
        &self,
        elicitation_id: &str,
        tool_call_id: &str,
        tool_name: &str,
        message: &str,
        response_schema: Value,
    );

    /// Raw escape hatch — structured errors, security warnings, and the
    /// detailed tool notification stream.
    async fn send_json(&self, data: Value);

    /// Typed convenience over [`send_json`](Self::send_json).
    async fn send_event(&self, event: ClientEvent) {
        self.send_json(event.to_value()).await;
    }
}
