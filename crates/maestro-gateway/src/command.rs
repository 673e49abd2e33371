// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use maestro_core::ChatRequest;
use maestro_domain::ExtractMode;
use maestro_files::FilePayload;

/// A `chat` command received over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCommand {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub selected_tools: Vec<String>,
    #[serde(default)]
    pub selected_prompts: Vec<String>,
    #[serde(default)]
    pub selected_data_sources: Vec<String>,
    #[serde(default)]
    pub only_rag: bool,
    #[serde(default)]
    pub tool_choice_required: bool,
    #[serde(default)]
    pub agent_mode: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Filename → base64 payload, either a bare string or
    /// `{content, extract_mode}`.
    #[serde(default)]
    pub files: HashMap<String, Value>,
    #[serde(default)]
    pub agent_max_steps: Option<u32>,
    #[serde(default)]
    pub agent_loop_strategy: Option<String>,
    #[serde(default)]
    pub incognito: Option<bool>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

fn parse_extract_mode(value: &Value) -> Option<ExtractMode> {
    match value.as_str()? {
        "none" => Some(ExtractMode::None),
        "preview" => Some(ExtractMode::Preview),
        "full" => Some(ExtractMode::Full),
        _ => None,
    }
}

impl ChatCommand {
    fn file_payloads(&self) -> HashMap<String, FilePayload> {
        let mut payloads = HashMap::new();
        for (filename, spec) in &self.files {
            let payload = match spec {
                Value::String(content) => FilePayload::new(content.clone()),
                Value::Object(map) => {
                    let content = map
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let mut payload = FilePayload::new(content);
                    if let Some(mode) = map.get("extract_mode").and_then(|v| parse_extract_mode(v))
                    {
                        payload = payload.with_extract_mode(mode);
                    }
                    payload
                }
                _ => continue,
            };
            payloads.insert(filename.clone(), payload);
        }
        payloads
    }

    /// Build the pipeline request, given the resolved session id and default
    /// model.
    pub fn into_request(self, session_id: Uuid, default_model: &str) -> ChatRequest {
        let files = self.file_payloads();
        let mut request = ChatRequest::new(
            session_id,
            self.content,
            self.model.unwrap_or_else(|| default_model.to_string()),
        );
        request.user_email = self.user_email;
        request.selected_tools = self.selected_tools;
        request.selected_prompts = self.selected_prompts;
        request.selected_data_sources = self.selected_data_sources;
        request.only_rag = self.only_rag;
        request.tool_choice_required = self.tool_choice_required;
        request.agent_mode = self.agent_mode;
        request.temperature = self.temperature;
        request.files = files;
        request.agent_max_steps = self.agent_max_steps;
        request.agent_loop_strategy = self.agent_loop_strategy;
        request.incognito = self.incognito;
        request.conversation_id = self.conversation_id;
        request
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
