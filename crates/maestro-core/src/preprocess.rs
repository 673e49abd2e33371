// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::{debug, info};

use maestro_domain::Session;
use maestro_files::build_files_manifest;
use maestro_mcp::McpToolManager;
use maestro_model::ChatMessage;

use crate::prompts::PromptProvider;

/// Builds the message array for an LLM call: system prompt, conversation
/// history, and the session files manifest.
pub struct MessageBuilder {
    prompt_provider: Arc<PromptProvider>,
}

impl MessageBuilder {
    pub fn new(prompt_provider: Arc<PromptProvider>) -> Self {
        Self { prompt_provider }
    }

    pub fn build_messages(&self, session: &Session, include_files_manifest: bool) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(session.history.len() + 2);

        if let Some(system_prompt) = self
            .prompt_provider
            .get_system_prompt(session.user_email.as_deref())
        {
            debug!("added system prompt (len={})", system_prompt.len());
            messages.push(ChatMessage::system(system_prompt));
        }

        messages.extend(session.history.messages().iter().map(ChatMessage::from));

        if include_files_manifest {
            if let Some(manifest) = build_files_manifest(&session.context) {
                debug!("adding files manifest ({} files)", session.context.files.len());
                messages.push(ChatMessage::system(manifest));
            }
        }

        messages
    }
}

/// Injects an MCP-provided system prompt override.
///
/// Only the first successfully retrieved prompt applies; retrieval failures
/// are non-fatal and the remaining keys are ignored once one succeeds.
pub struct PromptOverrideService {
    manager: Option<Arc<McpToolManager>>,
}

impl PromptOverrideService {
    pub fn new(manager: Option<Arc<McpToolManager>>) -> Self {
        Self { manager }
    }

    pub async fn apply_prompt_override(
        &self,
        mut messages: Vec<ChatMessage>,
        selected_prompts: &[String],
    ) -> Vec<ChatMessage> {
        let Some(manager) = &self.manager else {
            return messages;
        };

        for key in selected_prompts {
            let Some((server, prompt_name)) = key.split_once('_') else {
                continue;
            };
            match manager.get_prompt(server, prompt_name).await {
                Ok(prompt_text) if !prompt_text.is_empty() => {
                    info!("applied MCP system prompt override (len={})", prompt_text.len());
                    messages.insert(0, ChatMessage::system(prompt_text));
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("failed retrieving MCP prompt {key}: {e:#}");
                }
            }
        }
        messages
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
