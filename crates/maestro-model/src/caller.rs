// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::provider::{CompletionBackend, TokenStream};
use crate::types::{ChatMessage, CompletionRequest, LlmResponse};

/// Retrieved context for one RAG query.
#[derive(Debug, Clone)]
pub struct RagQueryResult {
    pub content: String,
    /// Unqualified source id for display in the injected context message.
    pub source_label: String,
}

/// Retrieval port used by the RAG-augmented entry points.
///
/// `qualified_source` uses the `"<server>:<source_id>"` form.
#[async_trait]
pub trait RagQuery: Send + Sync {
    async fn query(
        &self,
        user_email: &str,
        qualified_source: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<RagQueryResult>;
}

/// Entry points into the model: plain, with-tools, with-RAG, and
/// with-RAG-and-tools, each in call and stream variants.
///
/// RAG augmentation queries the first selected source and inserts the
/// retrieved context as a system message just before the latest user turn,
/// then delegates to the plain / tools path.
pub struct LlmCaller {
    backend: Arc<dyn CompletionBackend>,
    rag: Option<Arc<dyn RagQuery>>,
}

impl LlmCaller {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend, rag: None }
    }

    pub fn with_rag(mut self, rag: Arc<dyn RagQuery>) -> Self {
        self.rag = Some(rag);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn request(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<Value>,
        tool_choice: Option<&str>,
        temperature: Option<f32>,
        user_email: Option<&str>,
    ) -> CompletionRequest {
        CompletionRequest {
            model: model.to_string(),
            messages,
            tools,
            tool_choice: tool_choice.map(str::to_string),
            temperature,
            user_email: user_email.map(str::to_string),
        }
    }

    /// Query RAG and insert the retrieved context before the latest message.
    async fn augment_with_rag(
        &self,
        mut messages: Vec<ChatMessage>,
        data_sources: &[String],
        user_email: &str,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        let Some(qualified) = data_sources.first() else {
            debug!("no data sources selected, skipping RAG augmentation");
            return Ok(messages);
        };
        let rag = self
            .rag
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("RAG service not configured"))?;

        let result = rag.query(user_email, qualified, &messages).await?;
        let context = ChatMessage::system(format!(
            "Retrieved context from {}:\n\n{}\n\nUse this context to inform your response.",
            result.source_label, result.content
        ));

        let insert_at = messages.len().saturating_sub(1);
        messages.insert(insert_at, context);
        Ok(messages)
    }

    // ── Plain ─────────────────────────────────────────────────────────────────

    pub async fn call_plain(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: Option<f32>,
        user_email: Option<&str>,
    ) -> anyhow::Result<String> {
        let req = self.request(model, messages, Vec::new(), None, temperature, user_email);
        Ok(self.backend.complete(req).await?.content)
    }

    pub async fn stream_plain(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: Option<f32>,
        user_email: Option<&str>,
    ) -> anyhow::Result<TokenStream> {
        let req = self.request(model, messages, Vec::new(), None, temperature, user_email);
        self.backend.stream(req).await
    }

    // ── Tools ─────────────────────────────────────────────────────────────────

    pub async fn call_with_tools(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<Value>,
        tool_choice: &str,
        temperature: Option<f32>,
        user_email: Option<&str>,
    ) -> anyhow::Result<LlmResponse> {
        let req = self.request(
            model,
            messages,
            tools,
            Some(tool_choice),
            temperature,
            user_email,
        );
        self.backend.complete(req).await
    }

    pub async fn stream_with_tools(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        tools: Vec<Value>,
        tool_choice: &str,
        temperature: Option<f32>,
        user_email: Option<&str>,
    ) -> anyhow::Result<TokenStream> {
        let req = self.request(
            model,
            messages,
            tools,
            Some(tool_choice),
            temperature,
            user_email,
        );
        self.backend.stream(req).await
    }

    // ── RAG ───────────────────────────────────────────────────────────────────

    pub async fn call_with_rag(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        data_sources: &[String],
        user_email: &str,
        temperature: Option<f32>,
    ) -> anyhow::Result<String> {
        let augmented = self
            .augment_with_rag(messages, data_sources, user_email)
            .await?;
        self.call_plain(model, augmented, temperature, Some(user_email))
            .await
    }

    pub async fn stream_with_rag(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        data_sources: &[String],
        user_email: &str,
        temperature: Option<f32>,
    ) -> anyhow::Result<TokenStream> {
        let augmented = self
            .augment_with_rag(messages, data_sources, user_email)
            .await?;
        self.stream_plain(model, augmented, temperature, Some(user_email))
            .await
    }

    // ── RAG + tools ───────────────────────────────────────────────────────────

    pub async fn call_with_rag_and_tools(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        data_sources: &[String],
        tools: Vec<Value>,
        user_email: &str,
        tool_choice: &str,
        temperature: Option<f32>,
    ) -> anyhow::Result<LlmResponse> {
        let augmented = self
            .augment_with_rag(messages, data_sources, user_email)
            .await?;
        self.call_with_tools(
            model,
            augmented,
            tools,
            tool_choice,
            temperature,
            Some(user_email),
        )
        .await
    }

    pub async fn stream_with_rag_and_tools(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
        data_sources: &[String],
        tools: Vec<Value>,
        user_email: &str,
        tool_choice: &str,
        temperature: Option<f32>,
    ) -> anyhow::Result<TokenStream> {
        let augmented = self
            .augment_with_rag(messages, data_sources, user_email)
            .await?;
        self.stream_with_tools(
            model,
            augmented,
            tools,
            tool_choice,
            temperature,
            Some(user_email),
        )
        .await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedMockBackend;
    use crate::types::StreamItem;
    use futures::StreamExt;

    struct FixedRag;

    #[async_trait]
    impl RagQuery for FixedRag {
        async fn query(
            &self,
            _user_email: &str,
            qualified_source: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<RagQueryResult> {
            let label = qualified_source
                .split_once(':')
                .map(|(_, source)| source)
                .unwrap_or(qualified_source);
            Ok(RagQueryResult {
                content: "retrieved facts".into(),
                source_label: label.to_string(),
            })
        }
    }

    fn caller_with_rag(backend: ScriptedMockBackend) -> LlmCaller {
        LlmCaller::new(Arc::new(backend)).with_rag(Arc::new(FixedRag))
    }

    #[tokio::test]
    async fn call_plain_returns_content() {
        let backend = ScriptedMockBackend::always_text("hello");
        let caller = LlmCaller::new(Arc::new(backend));
        let out = caller
            .call_plain("m", vec![ChatMessage::user("hi")], None, None)
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn stream_plain_yields_tokens_then_final() {
        let backend = ScriptedMockBackend::new(vec![ScriptedMockBackend::tokens_script(vec![
            "Hello", " ", "World",
        ])]);
        let caller = LlmCaller::new(Arc::new(backend));
        let mut stream = caller
            .stream_plain("m", vec![ChatMessage::user("hi")], None, None)
            .await
            .unwrap();

        let mut tokens = Vec::new();
        let mut saw_final = false;
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                StreamItem::Token(t) => tokens.push(t),
                StreamItem::Final(_) => saw_final = true,
            }
        }
        assert_eq!(tokens, vec!["Hello", " ", "World"]);
        assert!(saw_final);
    }

    #[tokio::test]
    async fn rag_context_is_inserted_before_last_message() {
        let backend = ScriptedMockBackend::always_text("answer");
        let last_request = backend.last_request.clone();
        let caller = caller_with_rag(backend);

        caller
            .call_with_rag(
                "m",
                vec![ChatMessage::system("sys"), ChatMessage::user("question")],
                &["corpus:technical-docs".to_string()],
                "user@example.com",
                None,
            )
            .await
            .unwrap();

        let req = last_request.lock().unwrap().clone().unwrap();
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[1].role, "system");
        assert!(req.messages[1].content.contains("technical-docs"));
        assert!(req.messages[1].content.contains("retrieved facts"));
        assert_eq!(req.messages[2].content, "question");
    }

    #[tokio::test]
    async fn empty_data_sources_skips_rag() {
        let backend = ScriptedMockBackend::always_text("answer");
        let last_request = backend.last_request.clone();
        let caller = caller_with_rag(backend);

        caller
            .call_with_rag("m", vec![ChatMessage::user("q")], &[], "u@e.com", None)
            .await
            .unwrap();

        let req = last_request.lock().unwrap().clone().unwrap();
        assert_eq!(req.messages.len(), 1);
    }

    #[tokio::test]
    async fn rag_without_service_errors() {
        let backend = ScriptedMockBackend::always_text("answer");
        let caller = LlmCaller::new(Arc::new(backend));
        let err = caller
            .call_with_rag(
                "m",
                vec![ChatMessage::user("q")],
                &["corpus:docs".to_string()],
                "u@e.com",
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("RAG service not configured"));
    }

    #[tokio::test]
    async fn tools_request_carries_tool_choice() {
        let backend = ScriptedMockBackend::always_text("done");
        let last_request = backend.last_request.clone();
        let caller = LlmCaller::new(Arc::new(backend));

        caller
            .call_with_tools(
                "m",
                vec![ChatMessage::user("q")],
                vec![serde_json::json!({"type": "function", "function": {"name": "t"}})],
                "required",
                Some(0.2),
                None,
            )
            .await
            .unwrap();

        let req = last_request.lock().unwrap().clone().unwrap();
        assert_eq!(req.tool_choice.as_deref(), Some("required"));
        assert_eq!(req.tools.len(), 1);
        assert_eq!(req.temperature, Some(0.2));
    }
}
