// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::json;
use tracing::error;

use maestro_domain::{Message, Session, ToolResult};
use maestro_events::{ClientEvent, EventPublisher};
use maestro_files::{build_updated_manifest, process_tool_artifacts, FileStore};
use maestro_mcp::CANVAS_TOOL_NAME;
use maestro_model::{classify, ChatMessage, LlmCaller, LlmResponse};
use maestro_tools::{ToolExecutor, ToolSessionContext};

use super::ChatOutcome;
use crate::security::{SecurityChecker, BLOCKED_TOOL_OUTPUT_MESSAGE};
use crate::stream::{drain_stream_with_final, stream_and_accumulate};
use crate::PromptProvider;

/// Tool-augmented mode: initial streamed LLM turn, sequential tool fan-out,
/// artifact ingestion, then a streamed synthesis turn.
pub struct ToolsModeRunner {
    llm: Arc<LlmCaller>,
    executor: Arc<ToolExecutor>,
    publisher: Arc<dyn EventPublisher>,
    prompt_provider: Arc<PromptProvider>,
    store: Option<Arc<dyn FileStore>>,
    security: Option<Arc<dyn SecurityChecker>>,
}

impl ToolsModeRunner {
    pub fn new(
        llm: Arc<LlmCaller>,
        executor: Arc<ToolExecutor>,
        publisher: Arc<dyn EventPublisher>,
        prompt_provider: Arc<PromptProvider>,
    ) -> Self {
        Self {
            llm,
            executor,
            publisher,
            prompt_provider,
            store: None,
            security: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityChecker>) -> Self {
        self.security = Some(security);
        self
    }

    fn tool_context(session: &Session) -> ToolSessionContext {
        ToolSessionContext {
            session_id: Some(session.id),
            user_email: session.user_email.clone(),
            files: session.context.files.clone(),
        }
    }

    fn assistant_message(
        content: &str,
        selected_tools: &[String],
        data_sources: &[String],
    ) -> Message {
        let mut message = Message::assistant(content).with_metadata("tools", json!(selected_tools));
        if !data_sources.is_empty() {
            message = message.with_metadata("data_sources", json!(data_sources));
        }
        message
    }

    /// Execute tools mode with token streaming.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_streaming(
        &self,
        session: &mut Session,
        model: &str,
        mut messages: Vec<ChatMessage>,
        selected_tools: &[String],
        selected_data_sources: &[String],
        user_email: Option<&str>,
        tool_choice_required: bool,
        temperature: Option<f32>,
    ) -> ChatOutcome {
        let tools_schema = self.executor.manager().get_tools_schema(selected_tools);
        let tool_choice = if tool_choice_required { "required" } else { "auto" };

        // Stream the initial LLM call with tools.
        let stream = match (user_email, selected_data_sources.is_empty()) {
            (Some(user), false) => {
                self.llm
                    .stream_with_rag_and_tools(
                        model,
                        messages.clone(),
                        selected_data_sources,
                        tools_schema.clone(),
                        user,
                        tool_choice,
                        temperature,
                    )
                    .await
            }
            _ => {
                self.llm
                    .stream_with_tools(
                        model,
                        messages.clone(),
                        tools_schema.clone(),
                        tool_choice,
                        temperature,
                        user_email,
                    )
                    .await
            }
        };

        let (accumulated, final_response, failure) =
            drain_stream_with_final(stream, self.publisher.as_ref(), "tools").await;

        // Initial stream failed before yielding anything: structured error.
        if let Some(failure) = &failure {
            if accumulated.is_empty() {
                let classified = classify(failure);
                error!("{}", classified.log_message);
                self.publisher
                    .send_event(ClientEvent::Error {
                        message: classified.user_message.to_string(),
                    })
                    .await;
                self.publisher.publish_response_complete().await;
                return ChatOutcome::chat_response(classified.user_message);
            }
        }

        // No tool calls: the streamed content is the whole answer.
        let has_tool_calls = final_response
            .as_ref()
            .map(LlmResponse::has_tool_calls)
            .unwrap_or(false);
        if !has_tool_calls {
            let content = if accumulated.is_empty() {
                final_response.map(|r| r.content).unwrap_or_default()
            } else {
                accumulated.clone()
            };
            if !accumulated.is_empty() {
                if failure.is_none() {
                    self.publisher.publish_token_stream("", false, true).await;
                }
            } else {
                self.publisher.publish_chat_response(&content, false).await;
            }

            session.history.add_message(Message::assistant(&content));
            self.publisher.publish_response_complete().await;
            return ChatOutcome::chat_response(content);
        }

        // Tool calls present: close the initial stream before the fan-out.
        if !accumulated.is_empty() && failure.is_none() {
            self.publisher.publish_token_stream("", false, true).await;
        }

        let llm_response = final_response.expect("tool calls imply a terminal response");
        messages.push(ChatMessage::assistant_with_tool_calls(
            &llm_response.content,
            llm_response.tool_calls.clone(),
        ));

        // Execute tools sequentially; results never raise.
        let tool_context = Self::tool_context(session);
        let mut tool_results: Vec<ToolResult> = Vec::new();
        for call in &llm_response.tool_calls {
            let result = self
                .executor
                .execute_single_tool(call, &tool_context, &self.publisher)
                .await;

            if let Some(blocked) = self.check_tool_output(session, &result, user_email).await {
                return blocked;
            }

            messages.push(ChatMessage::tool_result(&result.tool_call_id, &result.content));
            tool_results.push(result);
        }

        // Artifact ingestion precedes the synthesis stream.
        if let Some(store) = &self.store {
            for result in &tool_results {
                process_tool_artifacts(session, result, store.as_ref(), self.publisher.as_ref())
                    .await;
            }
        }

        let synthesis = self
            .stream_synthesis(&llm_response, &mut messages, model, session, user_email, temperature)
            .await;

        session.history.add_message(Self::assistant_message(
            &synthesis,
            selected_tools,
            selected_data_sources,
        ));
        self.publisher.publish_response_complete().await;
        ChatOutcome::chat_response(synthesis)
    }

    /// Blocked tool output clears the conversation and notifies the client.
    async fn check_tool_output(
        &self,
        session: &mut Session,
        result: &ToolResult,
        user_email: Option<&str>,
    ) -> Option<ChatOutcome> {
        let security = self.security.as_ref()?;
        let verdict = security
            .check_tool_rag_output(
                &result.content,
                "tool",
                session.history.messages(),
                user_email,
            )
            .await;
        if !verdict.is_blocked() {
            return None;
        }

        error!("blocked tool output for call {}", result.tool_call_id);
        session.history.clear();
        self.publisher
            .send_event(ClientEvent::SecurityWarning {
                status: "blocked".into(),
                message: BLOCKED_TOOL_OUTPUT_MESSAGE.into(),
            })
            .await;
        self.publisher.publish_response_complete().await;
        Some(ChatOutcome::error(BLOCKED_TOOL_OUTPUT_MESSAGE))
    }

    /// Stream the synthesis turn; canvas-only calls skip it entirely.
    async fn stream_synthesis(
        &self,
        llm_response: &LlmResponse,
        messages: &mut Vec<ChatMessage>,
        model: &str,
        session: &Session,
        user_email: Option<&str>,
        temperature: Option<f32>,
    ) -> String {
        let canvas_only = llm_response
            .tool_calls
            .iter()
            .all(|tc| tc.function.name == CANVAS_TOOL_NAME);
        if canvas_only {
            return if llm_response.content.is_empty() {
                "Content displayed in canvas.".to_string()
            } else {
                llm_response.content.clone()
            };
        }

        // Tool runs may have added files; refresh the manifest.
        if let Some(manifest) = build_updated_manifest(&session.context) {
            messages.push(ChatMessage::system(manifest));
        }

        let user_question = messages
            .iter()
            .rev()
            .find(|m| m.role == "user" && !m.content.is_empty())
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "the user's last request".to_string());

        let mut synthesis_messages = messages.clone();
        synthesis_messages.push(ChatMessage::system(
            self.prompt_provider.get_tool_synthesis_prompt(&user_question),
        ));

        let stream = self
            .llm
            .stream_plain(
                model,
                synthesis_messages.clone(),
                temperature,
                user_email,
            )
            .await;

        let llm = self.llm.clone();
        let fallback_model = model.to_string();
        let fallback_email = user_email.map(str::to_string);
        stream_and_accumulate(
            stream,
            self.publisher.as_ref(),
            Some(Box::pin(async move {
                llm.call_plain(
                    &fallback_model,
                    synthesis_messages,
                    temperature,
                    fallback_email.as_deref(),
                )
                .await
            })),
            "synthesis",
        )
        .await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
