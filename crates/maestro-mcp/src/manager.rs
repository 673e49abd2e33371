// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use maestro_config::McpServerConfig;
use maestro_domain::{ToolCall, ToolResult};

use crate::normalize::{extract_components, scrub_base64_bloat};
use crate::transport::{ProgressHandler, ToolDescriptor, ToolTransport};

/// The canvas pseudo-tool: always authorized, never dispatched to a server.
pub const CANVAS_TOOL_NAME: &str = "canvas_canvas";

struct RegisteredServer {
    transport: Arc<dyn ToolTransport>,
    config: McpServerConfig,
    tools: Vec<ToolDescriptor>,
}

/// Registry of MCP servers and their tools, keyed by fully qualified
/// `<server>_<tool>` names.
///
/// The tool index avoids prefix-parsing ambiguity for server names that
/// contain underscores: names are resolved by exact lookup, built from the
/// actual discovery results.
pub struct McpToolManager {
    servers: HashMap<String, RegisteredServer>,
    tool_index: HashMap<String, (String, String)>,
    timeout_seconds: u64,
}

impl McpToolManager {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            servers: HashMap::new(),
            tool_index: HashMap::new(),
            timeout_seconds,
        }
    }

    /// Register a server and discover its tools.  Discovery failure leaves
    /// the server registered with no tools so prompts may still resolve.
    pub async fn register_server(
        &mut self,
        name: impl Into<String>,
        transport: Arc<dyn ToolTransport>,
        config: McpServerConfig,
    ) {
        let name = name.into();
        let tools = match transport.list_tools().await {
            Ok(tools) => {
                info!("discovered {} tool(s) on server {name}", tools.len());
                tools
            }
            Err(e) => {
                error!("tool discovery failed for server {name}: {e:#}");
                Vec::new()
            }
        };

        for tool in &tools {
            self.tool_index.insert(
                format!("{name}_{}", tool.name),
                (name.clone(), tool.name.clone()),
            );
        }
        self.servers.insert(
            name,
            RegisteredServer {
                transport,
                config,
                tools,
            },
        );
    }

    pub fn available_servers(&self) -> Vec<&str> {
        self.servers.keys().map(String::as_str).collect()
    }

    pub fn available_tools(&self) -> Vec<&str> {
        self.tool_index.keys().map(String::as_str).collect()
    }

    /// Groups required to use a server's tools.  Unknown servers have none.
    pub fn server_groups(&self, server: &str) -> &[String] {
        self.servers
            .get(server)
            .map(|s| s.config.groups.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve a fully qualified name to `(server, tool)` via the index.
    pub fn resolve(&self, full_name: &str) -> Option<(&str, &str)> {
        self.tool_index
            .get(full_name)
            .map(|(server, tool)| (server.as_str(), tool.as_str()))
    }

    fn canvas_schema() -> Value {
        json!({
            "type": "function",
            "function": {
                "name": CANVAS_TOOL_NAME,
                "description": "Display markdown or HTML content in the canvas panel next to the chat.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "content": {
                            "type": "string",
                            "description": "The content to display"
                        }
                    },
                    "required": ["content"]
                }
            }
        })
    }

    /// OpenAI-shaped schemas for the selected fully qualified tool names.
    /// Unknown names are skipped; the canvas pseudo-tool is synthesized.
    pub fn get_tools_schema(&self, names: &[String]) -> Vec<Value> {
        let mut schemas = Vec::new();
        for name in names {
            if name == CANVAS_TOOL_NAME {
                schemas.push(Self::canvas_schema());
                continue;
            }
            let Some((server, tool_name)) = self.resolve(name) else {
                warn!("no schema for unknown tool {name}");
                continue;
            };
            let Some(server_entry) = self.servers.get(server) else {
                continue;
            };
            if let Some(tool) = server_entry.tools.iter().find(|t| t.name == tool_name) {
                schemas.push(json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                }));
            }
        }
        schemas
    }

    /// Retrieve a prompt from a server.
    pub async fn get_prompt(&self, server: &str, prompt_name: &str) -> anyhow::Result<String> {
        let entry = self
            .servers
            .get(server)
            .ok_or_else(|| anyhow::anyhow!("no client available for server: {server}"))?;
        entry.transport.get_prompt(prompt_name).await
    }

    /// Execute a tool call.  Never errors: every failure path (unknown tool,
    /// transport error, timeout) produces a failed [`ToolResult`].
    pub async fn execute_tool(
        &self,
        call: &ToolCall,
        progress: Option<ProgressHandler>,
    ) -> ToolResult {
        let Some((server, tool_name)) = self.resolve(&call.name) else {
            let message = format!("Tool not found: {}", call.name);
            let mut result = ToolResult::err(&call.id, message.clone());
            result.content = message;
            return result;
        };
        let entry = self.servers.get(server).expect("index entries have servers");

        let dispatch = entry
            .transport
            .call_tool(tool_name, call.arguments.clone(), progress);

        let raw = if self.timeout_seconds == 0 {
            dispatch.await
        } else {
            match tokio::time::timeout(Duration::from_secs(self.timeout_seconds), dispatch).await {
                Ok(result) => result,
                Err(_) => {
                    let seconds = self.timeout_seconds;
                    error!("tool {} timed out after {seconds} seconds", call.name);
                    return ToolResult {
                        tool_call_id: call.id.clone(),
                        content: json!({
                            "error": format!(
                                "Tool call timed out after {seconds} seconds. \
                                 Increase MCP_TOOL_TIMEOUT_SECONDS to allow longer-running tools."
                            )
                        })
                        .to_string(),
                        success: false,
                        error: Some(format!("Tool execution timed out after {seconds} seconds")),
                        artifacts: Vec::new(),
                        display_config: None,
                        meta_data: None,
                    };
                }
            }
        };

        match raw {
            Ok(raw) => {
                let components = extract_components(&raw);
                let scrubbed = scrub_base64_bloat(&Value::Object(components.content));
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: scrubbed.to_string(),
                    success: true,
                    error: None,
                    artifacts: components.artifacts,
                    display_config: components.display_config,
                    meta_data: components.meta_data,
                }
            }
            Err(e) => {
                error!("error executing tool {}: {e:#}", call.name);
                let mut result = ToolResult::err(&call.id, format!("{e:#}"));
                result.content = format!("Error executing tool: {e:#}");
                result
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
