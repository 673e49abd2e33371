// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

fn default_tool_timeout() -> u64 {
    300
}

fn default_max_steps() -> u32 {
    30
}

fn default_strategy() -> String {
    "think-act".to_string()
}

fn default_rag_top_k() -> u32 {
    5
}

fn default_rag_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub model: ModelConfig,
    /// MCP tool servers keyed by server name.  The server name becomes the
    /// prefix of every fully-qualified tool name (`<server>_<tool>`).
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// RAG sources keyed by server name (the left half of a qualified
    /// `server:source` data-source identifier).
    #[serde(default)]
    pub rag_sources: HashMap<String, RagSourceConfig>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Per-tool-call timeout in seconds.  `0` disables the timeout.
    #[serde(default = "default_tool_timeout")]
    pub mcp_tool_timeout_seconds: u64,
    /// When true every tool call requires user approval, overriding the
    /// per-server `require_approval` lists.
    #[serde(default)]
    pub force_tool_approval_globally: bool,
    /// Default step budget for agent mode.
    #[serde(default = "default_max_steps")]
    pub agent_max_steps: u32,
    /// Default agent loop strategy: "react" | "think-act" | "act".
    #[serde(default = "default_strategy")]
    pub agent_loop_strategy: String,
    /// Optional system prompt template.  `{user_email}` is substituted with
    /// the requesting user's email before the prompt is sent.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            mcp_tool_timeout_seconds: default_tool_timeout(),
            force_tool_approval_globally: false,
            agent_max_steps: default_max_steps(),
            agent_loop_strategy: default_strategy(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier.  "mock" selects the scripted in-process backend.
    pub provider: String,
    /// Model name forwarded to the provider API.
    pub name: String,
    /// Environment variable the provider adapter reads the API key from.
    /// Prefer this over inlining secrets in version-controlled files.
    pub api_key_env: Option<String>,
    /// Base URL override forwarded to the provider adapter.
    pub base_url: Option<String>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            name: "mock-model".to_string(),
            api_key_env: None,
            base_url: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Endpoint the server's MCP transport connects to.
    #[serde(default)]
    pub url: Option<String>,
    /// Groups whose members may use this server's tools.  Empty means
    /// unrestricted.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Tool names (without the server prefix) that require user approval
    /// before execution.
    #[serde(default)]
    pub require_approval: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            url: None,
            groups: Vec::new(),
            require_approval: Vec::new(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSourceConfig {
    /// Backend kind: "http" queries a remote RAG API, "mcp" routes through
    /// the MCP tool manager.
    #[serde(rename = "type", default = "default_rag_type")]
    pub kind: String,
    /// HTTP endpoint.  May contain `${NAME}` environment references.
    #[serde(default)]
    pub url: Option<String>,
    /// Bearer token for the HTTP endpoint.  May contain `${NAME}` references;
    /// optional references that do not resolve are treated as absent.
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub compliance_level: Option<String>,
    /// Groups whose members may query this source.  Empty means unrestricted.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rag_top_k")]
    pub top_k: u32,
    #[serde(default = "default_rag_timeout")]
    pub timeout: u64,
}

fn default_rag_type() -> String {
    "http".to_string()
}

impl Default for RagSourceConfig {
    fn default() -> Self {
        Self {
            kind: default_rag_type(),
            url: None,
            bearer_token: None,
            display_name: None,
            icon: None,
            compliance_level: None,
            groups: Vec::new(),
            enabled: true,
            top_k: default_rag_top_k(),
            timeout: default_rag_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Save conversation history after each request (skipped for incognito
    /// sessions and anonymous users).
    #[serde(default = "default_true")]
    pub save_conversations: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_conversations: true,
        }
    }
}

impl Config {
    /// Build the set of fully-qualified tool names that require approval.
    ///
    /// Entries are `<server>_<tool>`; the global force flag is handled
    /// separately by the approval gate.
    pub fn approval_required_tools(&self) -> std::collections::HashSet<String> {
        let mut set = std::collections::HashSet::new();
        for (server, cfg) in &self.mcp_servers {
            for tool in &cfg.require_approval {
                set.insert(format!("{server}_{tool}"));
            }
        }
        set
    }

    /// Reject configurations that would only fail at first use.
    ///
    /// Run by the loader after merging; misconfigured deployments stop at
    /// startup with a pointer to the offending field.
    pub fn validate(&self) -> anyhow::Result<()> {
        const STRATEGIES: [&str; 3] = ["react", "think-act", "act"];
        if !STRATEGIES.contains(&self.app.agent_loop_strategy.as_str()) {
            anyhow::bail!(
                "unknown agent_loop_strategy {:?} (expected one of {STRATEGIES:?})",
                self.app.agent_loop_strategy
            );
        }
        if self.app.agent_max_steps == 0 {
            anyhow::bail!("agent_max_steps must be at least 1");
        }
        for (name, source) in &self.rag_sources {
            match source.kind.as_str() {
                "http" => {
                    if source.enabled && source.url.is_none() {
                        anyhow::bail!("RAG source {name} is enabled but has no url");
                    }
                }
                "mcp" => {}
                other => anyhow::bail!("RAG source {name} has unknown type {other:?}"),
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
