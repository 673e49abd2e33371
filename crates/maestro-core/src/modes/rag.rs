// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::json;

use maestro_domain::{Message, Session};
use maestro_events::EventPublisher;
use maestro_model::{ChatMessage, LlmCaller};

use super::ChatOutcome;
use crate::stream::stream_and_accumulate;

/// Retrieval-augmented mode: the accumulator is fed from the RAG-augmented
/// stream and the stored assistant message records the sources used.
pub struct RagModeRunner {
    llm: Arc<LlmCaller>,
    publisher: Arc<dyn EventPublisher>,
}

impl RagModeRunner {
    pub fn new(llm: Arc<LlmCaller>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { llm, publisher }
    }

    fn assistant_message(content: &str, data_sources: &[String]) -> Message {
        Message::assistant(content).with_metadata("data_sources", json!(data_sources))
    }

    pub async fn run(
        &self,
        session: &mut Session,
        model: &str,
        messages: Vec<ChatMessage>,
        data_sources: &[String],
        user_email: Option<&str>,
        temperature: Option<f32>,
    ) -> anyhow::Result<ChatOutcome> {
        let content = self
            .llm
            .call_with_rag(
                model,
                messages,
                data_sources,
                user_email.unwrap_or(""),
                temperature,
            )
            .await?;

        session
            .history
            .add_message(Self::assistant_message(&content, data_sources));
        self.publisher.publish_chat_response(&content, false).await;
        self.publisher.publish_response_complete().await;
        Ok(ChatOutcome::chat_response(content))
    }

    pub async fn run_streaming(
        &self,
        session: &mut Session,
        model: &str,
        messages: Vec<ChatMessage>,
        data_sources: &[String],
        user_email: Option<&str>,
        temperature: Option<f32>,
    ) -> ChatOutcome {
        let user = user_email.unwrap_or("").to_string();
        let stream = self
            .llm
            .stream_with_rag(model, messages.clone(), data_sources, &user, temperature)
            .await;

        let llm = self.llm.clone();
        let fallback_model = model.to_string();
        let fallback_sources = data_sources.to_vec();
        let fallback_user = user.clone();
        let accumulated = stream_and_accumulate(
            stream,
            self.publisher.as_ref(),
            Some(Box::pin(async move {
                llm.call_with_rag(
                    &fallback_model,
                    messages,
                    &fallback_sources,
                    &fallback_user,
                    temperature,
                )
                .await
            })),
            "RAG",
        )
        .await;

        session
            .history
            .add_message(Self::assistant_message(&accumulated, data_sources));
        self.publisher.publish_response_complete().await;
        ChatOutcome::chat_response(accumulated)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests_support::Recorder;
    use async_trait::async_trait;
    use maestro_model::{RagQuery, RagQueryResult, ScriptedMockBackend};

    struct FixedRag;

    #[async_trait]
    impl RagQuery for FixedRag {
        async fn query(
            &self,
            _user_email: &str,
            qualified_source: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<RagQueryResult> {
            Ok(RagQueryResult {
                content: "retrieved".into(),
                source_label: qualified_source.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn streaming_records_data_sources_in_metadata() {
        let backend = ScriptedMockBackend::new(vec![ScriptedMockBackend::tokens_script(vec![
            "grounded", " answer",
        ])]);
        let recorder = Arc::new(Recorder::default());
        let llm = Arc::new(LlmCaller::new(Arc::new(backend)).with_rag(Arc::new(FixedRag)));
        let runner = RagModeRunner::new(llm, recorder.clone());

        let mut session = Session::new().with_user("u@e.com");
        let sources = vec!["corpus:docs".to_string()];
        let outcome = runner
            .run_streaming(
                &mut session,
                "m",
                vec![ChatMessage::user("q")],
                &sources,
                Some("u@e.com"),
                None,
            )
            .await;

        assert_eq!(outcome.message, "grounded answer");
        let stored = session.history.last().unwrap();
        assert_eq!(stored.metadata["data_sources"], json!(["corpus:docs"]));

        let events = recorder.events().await;
        assert_eq!(events.last().unwrap()["type"], "response_complete");
    }

    #[tokio::test]
    async fn non_streaming_path_emits_chat_response() {
        let backend = ScriptedMockBackend::always_text("grounded");
        let recorder = Arc::new(Recorder::default());
        let llm = Arc::new(LlmCaller::new(Arc::new(backend)).with_rag(Arc::new(FixedRag)));
        let runner = RagModeRunner::new(llm, recorder.clone());

        let mut session = Session::new();
        let outcome = runner
            .run(
                &mut session,
                "m",
                vec![ChatMessage::user("q")],
                &["corpus:docs".to_string()],
                Some("u@e.com"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.message, "grounded");

        let events = recorder.events().await;
        assert_eq!(events[0]["type"], "chat_response");
        assert_eq!(events[1]["type"], "response_complete");
    }
}
