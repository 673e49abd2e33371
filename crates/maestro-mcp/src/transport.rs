// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-call progress callback: `(progress, total, message)`.
pub type ProgressHandler =
    Arc<dyn Fn(f64, Option<f64>, Option<String>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// A content block in a raw MCP tool response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawContentBlock {
    Text { text: String },
    Image { data: String, mime_type: String },
}

/// The raw response of an MCP tool call, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<RawContentBlock>,
}

impl RawToolResult {
    pub fn from_structured(value: Value) -> Self {
        Self {
            structured_content: Some(value),
            ..Default::default()
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![RawContentBlock::Text { text: text.into() }],
            ..Default::default()
        }
    }

    /// Concatenated text blocks, used as the stringify fallback.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                RawContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Opaque per-server MCP client.
///
/// The real transport (stdio / HTTP / SSE) lives outside the core; the
/// pipeline only needs discovery, invocation with progress, and prompts.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>>;

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        progress: Option<ProgressHandler>,
    ) -> anyhow::Result<RawToolResult>;

    async fn get_prompt(&self, name: &str) -> anyhow::Result<String>;
}
