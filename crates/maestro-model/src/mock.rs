// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::{CompletionBackend, TokenStream};
use crate::types::{CompletionRequest, LlmResponse, StreamItem, ToolCallData};

/// Deterministic backend for local smoke tests: echoes the last user
/// message back as the assistant response.
#[derive(Default)]
pub struct EchoBackend;

impl EchoBackend {
    fn reply(req: &CompletionRequest) -> String {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]");
        format!("MOCK: {last_user}")
    }
}

#[async_trait]
impl CompletionBackend for EchoBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<LlmResponse> {
        Ok(LlmResponse::text(Self::reply(&req)))
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<TokenStream> {
        let reply = Self::reply(&req);
        let mut items: Vec<anyhow::Result<StreamItem>> = reply
            .split_inclusive(' ')
            .map(|chunk| Ok(StreamItem::Token(chunk.to_string())))
            .collect();
        items.push(Ok(StreamItem::Final(LlmResponse::text(reply))));
        Ok(Box::pin(stream::iter(items)))
    }
}

/// One scripted element of a mock model turn.
#[derive(Debug, Clone)]
pub enum MockEvent {
    /// A streamed text chunk.
    Token(String),
    /// A requested tool call (carried on the terminal response).
    ToolCall(ToolCallData),
    /// Fail the call / stream at this point with the given message.
    Fail(String),
}

/// A pre-scripted mock backend.  Each call pops the next script from the
/// front of the queue, so tests can specify exact token sequences — including
/// tool calls and mid-stream failures — without network access.
pub struct ScriptedMockBackend {
    scripts: Arc<Mutex<Vec<Vec<MockEvent>>>>,
    /// The last `CompletionRequest` seen by this backend.
    /// Written on each call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedMockBackend {
    /// Build a backend from an ordered list of per-call scripts.
    pub fn new(scripts: Vec<Vec<MockEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Backend that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    pub fn text_script(reply: impl Into<String>) -> Vec<MockEvent> {
        vec![MockEvent::Token(reply.into())]
    }

    pub fn tokens_script(tokens: Vec<&str>) -> Vec<MockEvent> {
        tokens
            .into_iter()
            .map(|t| MockEvent::Token(t.to_string()))
            .collect()
    }

    pub fn tool_call_script(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Vec<MockEvent> {
        vec![MockEvent::ToolCall(ToolCallData::new(id, name, arguments))]
    }

    pub fn fail_script(message: impl Into<String>) -> Vec<MockEvent> {
        vec![MockEvent::Fail(message.into())]
    }

    /// Tokens followed by a mid-stream failure.
    pub fn tokens_then_fail(tokens: Vec<&str>, message: impl Into<String>) -> Vec<MockEvent> {
        let mut script = Self::tokens_script(tokens);
        script.push(MockEvent::Fail(message.into()));
        script
    }

    fn next_script(&self) -> Vec<MockEvent> {
        let mut scripts = self.scripts.lock().expect("script queue poisoned");
        if scripts.is_empty() {
            // Default fallback when all scripts are consumed.
            vec![MockEvent::Token("[no more scripts]".into())]
        } else {
            scripts.remove(0)
        }
    }

    fn build_response(script: &[MockEvent]) -> anyhow::Result<LlmResponse> {
        let mut response = LlmResponse::default();
        response.model_used = Some("scripted-mock-model".into());
        for event in script {
            match event {
                MockEvent::Token(t) => response.content.push_str(t),
                MockEvent::ToolCall(tc) => response.tool_calls.push(tc.clone()),
                MockEvent::Fail(message) => return Err(anyhow::anyhow!("{message}")),
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionBackend for ScriptedMockBackend {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<LlmResponse> {
        *self.last_request.lock().expect("request slot poisoned") = Some(req);
        Self::build_response(&self.next_script())
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<TokenStream> {
        *self.last_request.lock().expect("request slot poisoned") = Some(req);
        let script = self.next_script();

        let mut items: Vec<anyhow::Result<StreamItem>> = Vec::new();
        let mut failed = false;
        for event in &script {
            match event {
                MockEvent::Token(t) => items.push(Ok(StreamItem::Token(t.clone()))),
                MockEvent::ToolCall(_) => {}
                MockEvent::Fail(message) => {
                    items.push(Err(anyhow::anyhow!("{message}")));
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            // Terminal response carries the accumulated content + tool calls.
            let response = Self::build_response(&script)?;
            items.push(Ok(StreamItem::Final(response)));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
