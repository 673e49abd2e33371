// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use maestro_domain::{Message, Session};
use maestro_events::EventPublisher;
use maestro_model::{ChatMessage, LlmCaller};

use super::ChatOutcome;
use crate::stream::stream_and_accumulate;

/// Plain LLM mode: no tools, no retrieval.
pub struct PlainModeRunner {
    llm: Arc<LlmCaller>,
    publisher: Arc<dyn EventPublisher>,
}

impl PlainModeRunner {
    pub fn new(llm: Arc<LlmCaller>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { llm, publisher }
    }

    pub async fn run(
        &self,
        session: &mut Session,
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: Option<f32>,
        user_email: Option<&str>,
    ) -> anyhow::Result<ChatOutcome> {
        let content = self
            .llm
            .call_plain(model, messages, temperature, user_email)
            .await?;

        session.history.add_message(Message::assistant(&content));
        self.publisher.publish_chat_response(&content, false).await;
        self.publisher.publish_response_complete().await;
        Ok(ChatOutcome::chat_response(content))
    }

    pub async fn run_streaming(
        &self,
        session: &mut Session,
        model: &str,
        messages: Vec<ChatMessage>,
        temperature: Option<f32>,
        user_email: Option<&str>,
    ) -> ChatOutcome {
        let stream = self
            .llm
            .stream_plain(model, messages.clone(), temperature, user_email)
            .await;

        let llm = self.llm.clone();
        let fallback_email = user_email.map(str::to_string);
        let fallback_model = model.to_string();
        let accumulated = stream_and_accumulate(
            stream,
            self.publisher.as_ref(),
            Some(Box::pin(async move {
                llm.call_plain(
                    &fallback_model,
                    messages,
                    temperature,
                    fallback_email.as_deref(),
                )
                .await
            })),
            "plain",
        )
        .await;

        session.history.add_message(Message::assistant(&accumulated));
        self.publisher.publish_response_complete().await;
        ChatOutcome::chat_response(accumulated)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests_support::Recorder;
    use maestro_model::ScriptedMockBackend;

    #[tokio::test]
    async fn streaming_happy_path_stores_accumulated_content() {
        let backend = ScriptedMockBackend::new(vec![ScriptedMockBackend::tokens_script(vec![
            "Hello", " ", "World",
        ])]);
        let recorder = Arc::new(Recorder::default());
        let runner = PlainModeRunner::new(
            Arc::new(LlmCaller::new(Arc::new(backend))),
            recorder.clone(),
        );

        let mut session = Session::new();
        let outcome = runner
            .run_streaming(
                &mut session,
                "m",
                vec![ChatMessage::user("hi")],
                None,
                None,
            )
            .await;

        assert_eq!(outcome.message, "Hello World");
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history.last().unwrap().content, "Hello World");

        let events = recorder.events().await;
        // Three tokens + terminator + response_complete, in order.
        assert_eq!(events.len(), 5);
        assert_eq!(events[0]["token"], "Hello");
        assert_eq!(events[0]["is_first"], true);
        assert_eq!(events[3]["is_last"], true);
        assert_eq!(events[4]["type"], "response_complete");
    }

    #[tokio::test]
    async fn mid_stream_failure_preserves_partial_in_history() {
        let backend = ScriptedMockBackend::new(vec![ScriptedMockBackend::tokens_then_fail(
            vec!["partial"],
            "mid-stream",
        )]);
        let recorder = Arc::new(Recorder::default());
        let runner = PlainModeRunner::new(
            Arc::new(LlmCaller::new(Arc::new(backend))),
            recorder.clone(),
        );

        let mut session = Session::new();
        let outcome = runner
            .run_streaming(
                &mut session,
                "m",
                vec![ChatMessage::user("hi")],
                None,
                None,
            )
            .await;

        assert_eq!(outcome.message, "partial");
        assert_eq!(session.history.last().unwrap().content, "partial");
    }

    #[tokio::test]
    async fn non_streaming_publishes_chat_response_before_complete() {
        let backend = ScriptedMockBackend::always_text("answer");
        let recorder = Arc::new(Recorder::default());
        let runner = PlainModeRunner::new(
            Arc::new(LlmCaller::new(Arc::new(backend))),
            recorder.clone(),
        );

        let mut session = Session::new();
        let outcome = runner
            .run(&mut session, "m", vec![ChatMessage::user("hi")], None, None)
            .await
            .unwrap();
        assert_eq!(outcome.message, "answer");

        let events = recorder.events().await;
        assert_eq!(events[0]["type"], "chat_response");
        assert_eq!(events[1]["type"], "response_complete");
    }
}
