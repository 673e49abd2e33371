// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde_json::json;
use tracing::error;

use maestro_domain::{Message, Session, ToolResult};
use maestro_events::EventPublisher;
use maestro_files::{process_tool_artifacts, FileStore};
use maestro_model::{classify, ChatMessage};

use super::ChatOutcome;
use crate::agent::{
    AgentContext, AgentEventRelay, AgentLoopFactory, AgentRunParams, ArtifactProcessor,
};

/// Agent mode: delegates to a multi-step loop strategy and relays its events.
pub struct AgentModeRunner {
    factory: Arc<AgentLoopFactory>,
    publisher: Arc<dyn EventPublisher>,
    store: Option<Arc<dyn FileStore>>,
}

impl AgentModeRunner {
    pub fn new(factory: Arc<AgentLoopFactory>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            factory,
            publisher,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        session: &mut Session,
        model: &str,
        messages: Vec<ChatMessage>,
        selected_tools: &[String],
        selected_data_sources: &[String],
        max_steps: u32,
        temperature: Option<f32>,
        strategy: Option<&str>,
    ) -> ChatOutcome {
        let agent_loop = self.factory.create(strategy);

        let context = AgentContext {
            session_id: session.id,
            user_email: session.user_email.clone(),
            files: session.context.files.clone(),
            history: session.history.messages().to_vec(),
        };

        // The relay's artifact processor needs shared mutable access to the
        // session while the loop is running; the session is moved into a lock
        // for the duration of the run and moved back out afterwards.
        let shared_session = Arc::new(tokio::sync::Mutex::new(std::mem::take(session)));
        let artifact_processor: Option<ArtifactProcessor> = self.store.clone().map(|store| {
            let shared = shared_session.clone();
            let publisher = self.publisher.clone();
            let processor: ArtifactProcessor = Arc::new(move |results: Vec<ToolResult>| {
                let shared = shared.clone();
                let store = store.clone();
                let publisher = publisher.clone();
                Box::pin(async move {
                    let mut session = shared.lock().await;
                    for result in &results {
                        process_tool_artifacts(
                            &mut session,
                            result,
                            store.as_ref(),
                            publisher.as_ref(),
                        )
                        .await;
                    }
                })
            });
            processor
        });

        let relay = AgentEventRelay::new(self.publisher.clone(), artifact_processor);
        let run_result = agent_loop
            .run(AgentRunParams {
                model,
                messages,
                context: &context,
                selected_tools,
                data_sources: selected_data_sources,
                max_steps,
                temperature,
                events: &relay,
                streaming: true,
                publisher: &self.publisher,
            })
            .await;
        drop(relay);

        // Reclaim the session.
        *session = match Arc::try_unwrap(shared_session) {
            Ok(lock) => lock.into_inner(),
            Err(arc) => arc.lock().await.clone(),
        };

        match run_result {
            Ok(result) => {
                session.history.add_message(
                    Message::assistant(&result.final_answer)
                        .with_metadata("agent_mode", json!(true))
                        .with_metadata("steps", json!(result.steps)),
                );
                self.publisher.publish_response_complete().await;
                ChatOutcome::chat_response(result.final_answer)
            }
            Err(e) => {
                let classified = classify(&e);
                error!("{}", classified.log_message);
                self.publisher
                    .send_event(maestro_events::ClientEvent::Error {
                        message: classified.user_message.to_string(),
                    })
                    .await;
                self.publisher.publish_response_complete().await;
                ChatOutcome::error(classified.user_message)
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
