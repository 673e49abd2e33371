// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod act;
mod react;
mod relay;
mod think_act;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use maestro_domain::{FileRef, Message};
use maestro_events::EventPublisher;
use maestro_model::{ChatMessage, LlmCaller, LlmResponse, ToolCallData};
use maestro_tools::{ToolExecutor, ToolSessionContext};

pub use act::ActAgentLoop;
pub use react::ReActAgentLoop;
pub use relay::{AgentEventRelay, ArtifactProcessor};
pub use think_act::ThinkActAgentLoop;

/// Immutable session snapshot handed to an agent loop.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub session_id: Uuid,
    pub user_email: Option<String>,
    pub files: HashMap<String, FileRef>,
    pub history: Vec<Message>,
}

impl AgentContext {
    pub fn tool_context(&self) -> ToolSessionContext {
        ToolSessionContext {
            session_id: Some(self.session_id),
            user_email: self.user_email.clone(),
            files: self.files.clone(),
        }
    }
}

/// One event emitted by an agent loop, relayed to the client by
/// [`AgentEventRelay`].
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub kind: String,
    pub payload: Value,
}

impl AgentEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Receives agent events as the loop progresses.
#[async_trait]
pub trait AgentEventSink: Send + Sync {
    async fn handle(&self, event: AgentEvent);
}

/// The outcome of an agent run.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub final_answer: String,
    pub steps: u32,
    pub metadata: Map<String, Value>,
}

/// Inputs for one agent run.
pub struct AgentRunParams<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub context: &'a AgentContext,
    pub selected_tools: &'a [String],
    pub data_sources: &'a [String],
    pub max_steps: u32,
    pub temperature: Option<f32>,
    pub events: &'a dyn AgentEventSink,
    pub streaming: bool,
    pub publisher: &'a Arc<dyn EventPublisher>,
}

/// A multi-step reason/act strategy.
#[async_trait]
pub trait AgentLoop: Send + Sync {
    async fn run(&self, params: AgentRunParams<'_>) -> anyhow::Result<AgentResult>;
}

/// Selects a loop implementation by strategy name.
pub struct AgentLoopFactory {
    llm: Arc<LlmCaller>,
    executor: Arc<ToolExecutor>,
    default_strategy: String,
}

impl AgentLoopFactory {
    pub fn new(llm: Arc<LlmCaller>, executor: Arc<ToolExecutor>, default_strategy: impl Into<String>) -> Self {
        Self {
            llm,
            executor,
            default_strategy: default_strategy.into(),
        }
    }

    pub fn create(&self, strategy: Option<&str>) -> Arc<dyn AgentLoop> {
        let strategy = strategy.unwrap_or(self.default_strategy.as_str());
        match strategy {
            "react" => Arc::new(ReActAgentLoop::new(self.llm.clone(), self.executor.clone())),
            "act" => Arc::new(ActAgentLoop::new(self.llm.clone(), self.executor.clone())),
            _ => Arc::new(ThinkActAgentLoop::new(
                self.llm.clone(),
                self.executor.clone(),
            )),
        }
    }
}

// ─── Shared loop plumbing ────────────────────────────────────────────────────

/// Call the model with tools, routing through RAG when sources are selected.
pub(crate) async fn call_llm_with_tools(
    llm: &LlmCaller,
    params: &AgentRunParams<'_>,
    messages: Vec<ChatMessage>,
    tools: Vec<Value>,
    tool_choice: &str,
) -> anyhow::Result<LlmResponse> {
    match (&params.context.user_email, params.data_sources.is_empty()) {
        (Some(user_email), false) => {
            llm.call_with_rag_and_tools(
                params.model,
                messages,
                params.data_sources,
                tools,
                user_email,
                tool_choice,
                params.temperature,
            )
            .await
        }
        _ => {
            llm.call_with_tools(
                params.model,
                messages,
                tools,
                tool_choice,
                params.temperature,
                params.context.user_email.as_deref(),
            )
            .await
        }
    }
}

/// Parsed arguments of a named tool call, when present.
pub(crate) fn extract_named_tool_args(
    tool_calls: &[ToolCallData],
    name: &str,
) -> Option<Map<String, Value>> {
    let call = tool_calls.iter().find(|tc| tc.function.name == name)?;
    match serde_json::from_str::<Value>(&call.function.arguments) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Execute one tool call, appending the assistant + tool messages and
/// emitting `agent_tool_results` so artifacts get ingested.
pub(crate) async fn run_one_tool(
    executor: &ToolExecutor,
    call: &ToolCallData,
    content: &str,
    params: &AgentRunParams<'_>,
    messages: &mut Vec<ChatMessage>,
) -> maestro_domain::ToolResult {
    messages.push(ChatMessage::assistant_with_tool_calls(
        content,
        vec![call.clone()],
    ));
    let result = executor
        .execute_single_tool(call, &params.context.tool_context(), params.publisher)
        .await;
    messages.push(ChatMessage::tool_result(&result.tool_call_id, &result.content));

    let serialized = serde_json::to_value(&result).unwrap_or(Value::Null);
    params
        .events
        .handle(AgentEvent::new(
            "agent_tool_results",
            json!({ "results": [serialized] }),
        ))
        .await;
    result
}

/// Stream the final answer to the client when the loop runs in streaming
/// mode.  Pre-computed answers are emitted as a single chunk plus the
/// terminator.
pub(crate) async fn emit_final_answer(params: &AgentRunParams<'_>, answer: &str) {
    if !params.streaming || answer.is_empty() {
        return;
    }
    params
        .events
        .handle(AgentEvent::new(
            "agent_token_stream",
            json!({"token": answer, "is_first": true, "is_last": false}),
        ))
        .await;
    params
        .events
        .handle(AgentEvent::new(
            "agent_token_stream",
            json!({"token": "", "is_first": false, "is_last": true}),
        ))
        .await;
}

// ─── Test support ────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use maestro_config::McpServerConfig;
    use maestro_mcp::{McpToolManager, RawToolResult, ToolDescriptor, ToolTransport};
    use maestro_tools::{ApprovalPolicy, ElicitationBroker};
    use tokio::sync::Mutex;

    /// Collects agent events for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<AgentEvent>>,
    }

    impl RecordingSink {
        pub async fn events(&self) -> Vec<AgentEvent> {
            self.events.lock().await.clone()
        }

        pub async fn kinds(&self) -> Vec<String> {
            self.events
                .lock()
                .await
                .iter()
                .map(|e| e.kind.clone())
                .collect()
        }
    }

    #[async_trait]
    impl AgentEventSink for RecordingSink {
        async fn handle(&self, event: AgentEvent) {
            self.events.lock().await.push(event);
        }
    }

    /// Publisher that discards everything.
    struct NullPublisher;

    #[async_trait]
    impl EventPublisher for NullPublisher {
        async fn publish_chat_response(&self, _m: &str, _p: bool) {}
        async fn publish_response_complete(&self) {}
        async fn publish_agent_update(&self, _u: &str, _d: Map<String, Value>) {}
        async fn publish_tool_start(&self, _t: &str, _d: Map<String, Value>) {}
        async fn publish_tool_complete(&self, _t: &str, _r: Value, _d: Map<String, Value>) {}
        async fn publish_token_stream(&self, _t: &str, _f: bool, _l: bool) {}
        async fn publish_files_update(&self, _f: Value) {}
        async fn publish_canvas_content(&self, _c: &str, _t: &str) {}
        async fn publish_elicitation_request(
            &self,
            _e: &str,
            _t: &str,
            _n: &str,
            _m: &str,
            _s: Value,
        ) {
        }
        async fn send_json(&self, _data: Value) {}
    }

    pub fn noop_publisher() -> Arc<dyn EventPublisher> {
        Arc::new(NullPublisher)
    }

    struct EchoTransport;

    #[async_trait]
    impl ToolTransport for EchoTransport {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(vec![ToolDescriptor {
                name: "read".into(),
                description: "read".into(),
                parameters: json!({"type": "object", "properties": {"filename": {"type": "string"}}}),
            }])
        }
        async fn call_tool(
            &self,
            _tool: &str,
            arguments: Value,
            _progress: Option<maestro_mcp::ProgressHandler>,
        ) -> anyhow::Result<RawToolResult> {
            Ok(RawToolResult::from_structured(
                json!({"results": {"echo": arguments}}),
            ))
        }
        async fn get_prompt(&self, _name: &str) -> anyhow::Result<String> {
            anyhow::bail!("no prompts")
        }
    }

    pub async fn plain_executor() -> Arc<ToolExecutor> {
        let mut manager = McpToolManager::new(300);
        manager
            .register_server("reader", Arc::new(EchoTransport), McpServerConfig::default())
            .await;
        Arc::new(ToolExecutor::new(
            Arc::new(manager),
            ApprovalPolicy::default(),
            Arc::new(ElicitationBroker::new()),
        ))
    }

    pub fn agent_context() -> AgentContext {
        AgentContext {
            session_id: Uuid::new_v4(),
            user_email: Some("u@e.com".into()),
            files: HashMap::new(),
            history: Vec::new(),
        }
    }
}

/// Forced summarization once `max_steps` is exhausted without a final
/// answer.  Streams when the run is streaming; the accumulator handles
/// fallback and error classification.
pub(crate) async fn summarize_remaining(
    llm: &LlmCaller,
    params: &AgentRunParams<'_>,
    messages: &[ChatMessage],
) -> anyhow::Result<String> {
    if params.streaming {
        let stream = llm
            .stream_plain(
                params.model,
                messages.to_vec(),
                params.temperature,
                params.context.user_email.as_deref(),
            )
            .await;
        let fallback_messages = messages.to_vec();
        let answer = crate::stream::stream_and_accumulate(
            stream,
            params.publisher.as_ref(),
            Some(Box::pin(async move {
                llm.call_plain(
                    params.model,
                    fallback_messages,
                    params.temperature,
                    params.context.user_email.as_deref(),
                )
                .await
            })),
            "agent summary",
        )
        .await;
        Ok(answer)
    } else {
        llm.call_plain(
            params.model,
            messages.to_vec(),
            params.temperature,
            params.context.user_email.as_deref(),
        )
        .await
    }
}
