// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_domain::{Message, Role};

/// A message in provider wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallData>,
    ) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Tool result paired with its originating call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(m: &Message) -> Self {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        Self {
            role: role.into(),
            content: m.content.clone(),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Canonical tool-call record: `{id, type, function: {name, arguments}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCallData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

impl ToolCallData {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".into(),
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Convert a loose tool-call value into the canonical record.
///
/// Streaming backends yield tool calls in whatever shape their SDK uses; the
/// pipeline needs one shape before the calls are re-sent to the model.
/// Accepts `arguments` as either a JSON string or an object (objects are
/// re-encoded); `type` defaults to `"function"`; `id`, `function.name` and
/// string arguments are preserved verbatim.
pub fn normalize_tool_call(value: &Value) -> Option<ToolCallData> {
    let id = value.get("id")?.as_str()?.to_string();
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("function")
        .to_string();
    let function = value.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        Some(obj @ Value::Object(_)) => obj.to_string(),
        _ => "{}".to_string(),
    };
    Some(ToolCallData {
        id,
        kind,
        function: FunctionCallData { name, arguments },
    })
}

/// A complete (non-streamed) model response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Request sent to a completion backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// OpenAI-shaped function schemas.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// `"auto"` or `"required"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

/// One item of a token stream: incremental text, or the terminal response
/// object carrying tool calls.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Token(String),
    Final(LlmResponse),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
