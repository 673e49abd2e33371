// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use maestro_domain::{
    ConversationRepository, DomainError, Message, Session, SessionLocks, SessionRepository,
};
use maestro_events::{ClientEvent, EventPublisher};
use maestro_files::{handle_session_files, ContentExtractor, FilePayload, FileStore};

use crate::modes::{AgentModeRunner, ChatOutcome, PlainModeRunner, RagModeRunner, ToolsModeRunner};
use crate::preprocess::{MessageBuilder, PromptOverrideService};
use crate::security::SecurityChecker;
use crate::ToolAuthorizationService;

/// One chat request through the full pipeline.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub session_id: Uuid,
    pub content: String,
    pub model: String,
    pub user_email: Option<String>,
    pub selected_tools: Vec<String>,
    pub selected_prompts: Vec<String>,
    pub selected_data_sources: Vec<String>,
    pub only_rag: bool,
    pub tool_choice_required: bool,
    pub agent_mode: bool,
    pub temperature: Option<f32>,
    pub files: HashMap<String, FilePayload>,
    pub agent_max_steps: Option<u32>,
    pub agent_loop_strategy: Option<String>,
    pub incognito: Option<bool>,
    pub conversation_id: Option<String>,
}

impl ChatRequest {
    pub fn new(session_id: Uuid, content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            session_id,
            content: content.into(),
            model: model.into(),
            user_email: None,
            selected_tools: Vec::new(),
            selected_prompts: Vec::new(),
            selected_data_sources: Vec::new(),
            only_rag: false,
            tool_choice_required: false,
            agent_mode: false,
            temperature: None,
            files: HashMap::new(),
            agent_max_steps: None,
            agent_loop_strategy: None,
            incognito: None,
            conversation_id: None,
        }
    }

    pub fn with_user(mut self, user_email: impl Into<String>) -> Self {
        self.user_email = Some(user_email.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.selected_tools = tools;
        self
    }

    pub fn with_data_sources(mut self, sources: Vec<String>) -> Self {
        self.selected_data_sources = sources;
        self
    }

    pub fn in_agent_mode(mut self) -> Self {
        self.agent_mode = true;
        self
    }
}

/// Coordinates the full request flow: session load, preprocessing, policy
/// checks, mode dispatch, and persistence.
pub struct Orchestrator {
    repository: Arc<dyn SessionRepository>,
    locks: SessionLocks,
    publisher: Arc<dyn EventPublisher>,
    message_builder: MessageBuilder,
    prompt_override: PromptOverrideService,
    tool_authorization: ToolAuthorizationService,
    plain_mode: PlainModeRunner,
    rag_mode: RagModeRunner,
    tools_mode: ToolsModeRunner,
    agent_mode: Option<AgentModeRunner>,
    store: Option<Arc<dyn FileStore>>,
    extractor: Option<Arc<dyn ContentExtractor>>,
    security: Option<Arc<dyn SecurityChecker>>,
    conversations: Option<Arc<dyn ConversationRepository>>,
    save_conversations: bool,
    default_max_steps: u32,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        publisher: Arc<dyn EventPublisher>,
        message_builder: MessageBuilder,
        prompt_override: PromptOverrideService,
        tool_authorization: ToolAuthorizationService,
        plain_mode: PlainModeRunner,
        rag_mode: RagModeRunner,
        tools_mode: ToolsModeRunner,
    ) -> Self {
        Self {
            repository,
            locks: SessionLocks::new(),
            publisher,
            message_builder,
            prompt_override,
            tool_authorization,
            plain_mode,
            rag_mode,
            tools_mode,
            agent_mode: None,
            store: None,
            extractor: None,
            security: None,
            conversations: None,
            save_conversations: true,
            default_max_steps: 30,
        }
    }

    pub fn with_agent_mode(mut self, agent_mode: AgentModeRunner) -> Self {
        self.agent_mode = Some(agent_mode);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityChecker>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_conversations(mut self, conversations: Arc<dyn ConversationRepository>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    pub fn with_save_conversations(mut self, save: bool) -> Self {
        self.save_conversations = save;
        self
    }

    pub fn with_default_max_steps(mut self, max_steps: u32) -> Self {
        self.default_max_steps = max_steps;
        self
    }

    /// Create a fresh session.
    pub async fn create_session(&self, user_email: Option<&str>) -> Session {
        let mut session = Session::new();
        session.user_email = user_email.map(str::to_string);
        self.repository.create(session).await
    }

    /// Deactivate and remove a session.
    pub async fn end_session(&self, session_id: Uuid) -> bool {
        let removed = self.repository.delete(session_id).await;
        self.locks.discard(session_id).await;
        removed
    }

    /// Run a chat request through the pipeline.
    ///
    /// The session is borrowed for the whole call: a per-session lock
    /// serializes concurrent requests for the same id while requests for
    /// distinct sessions proceed in parallel.
    pub async fn execute(&self, request: ChatRequest) -> Result<ChatOutcome, DomainError> {
        let _guard = self.locks.acquire(request.session_id).await;

        let mut session = self.repository.get(request.session_id).await.ok_or_else(|| {
            DomainError::session_not_found(format!("Session {} not found", request.session_id))
        })?;

        if let Some(incognito) = request.incognito {
            session.context.incognito = incognito;
        }
        if let Some(conversation_id) = &request.conversation_id {
            session.context.conversation_id = Some(conversation_id.clone());
        }
        if session.user_email.is_none() {
            session.user_email = request.user_email.clone();
        }

        session.history.add_message(
            Message::user(&request.content).with_metadata("model", json!(request.model)),
        );
        session.touch();

        // Input gate: a blocked message is backed out of the history.
        if let Some(security) = &self.security {
            let verdict = security
                .check_input(
                    &request.content,
                    session.history.messages(),
                    request.user_email.as_deref(),
                )
                .await;
            if verdict.is_blocked() {
                session.history.pop();
                self.repository.update(session).await?;
                let message = verdict
                    .message
                    .unwrap_or_else(|| "Your message was blocked by the content policy.".into());
                self.publisher
                    .send_event(ClientEvent::SecurityWarning {
                        status: "blocked".into(),
                        message: message.clone(),
                    })
                    .await;
                return Ok(ChatOutcome::error(message));
            }
        }

        // File ingestion.
        if let Some(store) = &self.store {
            handle_session_files(
                &mut session.context,
                request.user_email.as_deref(),
                &request.files,
                store.as_ref(),
                self.extractor.as_deref(),
                self.publisher.as_ref(),
            )
            .await;
        }

        // Message assembly + optional MCP prompt override.
        let messages = self.message_builder.build_messages(&session, true);
        let messages = self
            .prompt_override
            .apply_prompt_override(messages, &request.selected_prompts)
            .await;

        // Mode routing.  An empty data-source list routes to plain.
        let outcome = if request.agent_mode && self.agent_mode.is_some() {
            session.context.agent_mode = true;
            let agent = self.agent_mode.as_ref().expect("checked above");
            agent
                .run(
                    &mut session,
                    &request.model,
                    messages,
                    &request.selected_tools,
                    &request.selected_data_sources,
                    request.agent_max_steps.unwrap_or(self.default_max_steps),
                    request.temperature,
                    request.agent_loop_strategy.as_deref(),
                )
                .await
        } else if !request.selected_tools.is_empty() && !request.only_rag {
            let filtered = self
                .tool_authorization
                .filter_authorized_tools(&request.selected_tools, request.user_email.as_deref())
                .await;
            self.tools_mode
                .run_streaming(
                    &mut session,
                    &request.model,
                    messages,
                    &filtered,
                    &request.selected_data_sources,
                    request.user_email.as_deref(),
                    request.tool_choice_required,
                    request.temperature,
                )
                .await
        } else if !request.selected_data_sources.is_empty() {
            self.rag_mode
                .run_streaming(
                    &mut session,
                    &request.model,
                    messages,
                    &request.selected_data_sources,
                    request.user_email.as_deref(),
                    request.temperature,
                )
                .await
        } else {
            self.plain_mode
                .run_streaming(
                    &mut session,
                    &request.model,
                    messages,
                    request.temperature,
                    request.user_email.as_deref(),
                )
                .await
        };

        // Default the conversation id to the session id on first save.
        let conversation_id = session
            .context
            .conversation_id
            .clone()
            .unwrap_or_else(|| session.id.to_string());
        if self.should_persist(&session, request.user_email.as_deref()) {
            session.context.conversation_id = Some(conversation_id.clone());
        }

        self.repository.update(session.clone()).await?;

        // Conversation persistence is best-effort; the chat result stands
        // even when the save fails.
        if self.should_persist(&session, request.user_email.as_deref()) {
            let conversations = self.conversations.as_ref().expect("checked in should_persist");
            let user_email = request.user_email.as_deref().expect("checked in should_persist");
            match conversations
                .save_conversation(user_email, &conversation_id, session.history.messages())
                .await
            {
                Ok(()) => {
                    info!("saved conversation {conversation_id} for {user_email}");
                    self.publisher
                        .send_event(ClientEvent::ConversationSaved {
                            conversation_id: conversation_id.clone(),
                        })
                        .await;
                }
                Err(e) => warn!("non-fatal: failed saving conversation {conversation_id}: {e}"),
            }
        }

        Ok(outcome)
    }

    fn should_persist(&self, session: &Session, user_email: Option<&str>) -> bool {
        self.conversations.is_some()
            && self.save_conversations
            && !session.context.incognito
            && user_email.is_some()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests_support::plain_executor;
    use crate::prompts::PromptProvider;
    use crate::security::{SecurityChecker, SecurityVerdict};
    use crate::stream::tests_support::Recorder;
    use async_trait::async_trait;
    use maestro_domain::{AllowAll, InMemoryConversationRepository, InMemorySessionRepository};
    use maestro_model::{ChatMessage, LlmCaller, RagQuery, RagQueryResult, ScriptedMockBackend};

    struct MarkedRag;

    #[async_trait]
    impl RagQuery for MarkedRag {
        async fn query(
            &self,
            _user_email: &str,
            qualified_source: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<RagQueryResult> {
            Ok(RagQueryResult {
                content: "RAG-CONTEXT".into(),
                source_label: qualified_source.to_string(),
            })
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        recorder: Arc<Recorder>,
        repository: Arc<InMemorySessionRepository>,
        conversations: Arc<InMemoryConversationRepository>,
        backend_requests: Arc<std::sync::Mutex<Option<maestro_model::CompletionRequest>>>,
    }

    async fn fixture(backend: ScriptedMockBackend) -> Fixture {
        let recorder = Arc::new(Recorder::default());
        let repository = Arc::new(InMemorySessionRepository::new());
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let backend_requests = backend.last_request.clone();

        let llm = Arc::new(LlmCaller::new(Arc::new(backend)).with_rag(Arc::new(MarkedRag)));
        let executor = plain_executor().await;
        let prompt_provider = Arc::new(PromptProvider::default());

        let publisher: Arc<dyn EventPublisher> = recorder.clone();
        let orchestrator = Orchestrator::new(
            repository.clone(),
            publisher.clone(),
            MessageBuilder::new(prompt_provider.clone()),
            PromptOverrideService::new(None),
            ToolAuthorizationService::new(None, Arc::new(AllowAll)),
            PlainModeRunner::new(llm.clone(), publisher.clone()),
            RagModeRunner::new(llm.clone(), publisher.clone()),
            ToolsModeRunner::new(llm, executor, publisher, prompt_provider),
        )
        .with_conversations(conversations.clone());

        Fixture {
            orchestrator,
            recorder,
            repository,
            conversations,
            backend_requests,
        }
    }

    #[tokio::test]
    async fn missing_session_fails_with_session_not_found() {
        let f = fixture(ScriptedMockBackend::always_text("x")).await;
        let err = f
            .orchestrator
            .execute(ChatRequest::new(Uuid::new_v4(), "hi", "m"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, maestro_domain::ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn empty_data_sources_route_to_plain() {
        let f = fixture(ScriptedMockBackend::always_text("plain answer")).await;
        let session = f.orchestrator.create_session(Some("u@e.com")).await;

        let mut request = ChatRequest::new(session.id, "hi", "m").with_user("u@e.com");
        request.selected_data_sources = Vec::new();
        let outcome = f.orchestrator.execute(request).await.unwrap();
        assert_eq!(outcome.message, "plain answer");

        // No RAG context was injected: the request had exactly the user turn.
        let req = f.backend_requests.lock().unwrap().clone().unwrap();
        assert!(req
            .messages
            .iter()
            .all(|m| !m.content.contains("RAG-CONTEXT")));
    }

    #[tokio::test]
    async fn non_empty_data_sources_route_to_rag() {
        let f = fixture(ScriptedMockBackend::always_text("grounded answer")).await;
        let session = f.orchestrator.create_session(Some("u@e.com")).await;

        let request = ChatRequest::new(session.id, "hi", "m")
            .with_user("u@e.com")
            .with_data_sources(vec!["corpus:docs".to_string()]);
        let outcome = f.orchestrator.execute(request).await.unwrap();
        assert_eq!(outcome.message, "grounded answer");

        let req = f.backend_requests.lock().unwrap().clone().unwrap();
        assert!(req
            .messages
            .iter()
            .any(|m| m.content.contains("RAG-CONTEXT")));
    }

    #[tokio::test]
    async fn only_rag_ignores_selected_tools() {
        let f = fixture(ScriptedMockBackend::always_text("grounded")).await;
        let session = f.orchestrator.create_session(Some("u@e.com")).await;

        let mut request = ChatRequest::new(session.id, "hi", "m")
            .with_user("u@e.com")
            .with_tools(vec!["reader_read".to_string()])
            .with_data_sources(vec!["corpus:docs".to_string()]);
        request.only_rag = true;
        let outcome = f.orchestrator.execute(request).await.unwrap();
        assert_eq!(outcome.message, "grounded");

        // Routed to RAG: no tool schemas were sent.
        let req = f.backend_requests.lock().unwrap().clone().unwrap();
        assert!(req.tools.is_empty());
    }

    #[tokio::test]
    async fn history_grows_and_session_persists() {
        let f = fixture(ScriptedMockBackend::always_text("one")).await;
        let session = f.orchestrator.create_session(Some("u@e.com")).await;

        f.orchestrator
            .execute(ChatRequest::new(session.id, "first", "m").with_user("u@e.com"))
            .await
            .unwrap();

        let stored = f.repository.get(session.id).await.unwrap();
        assert_eq!(stored.history.len(), 2);
        assert_eq!(stored.history.messages()[0].content, "first");
        assert!(stored.updated_at >= stored.created_at);
    }

    #[tokio::test]
    async fn conversation_saved_and_notified() {
        let f = fixture(ScriptedMockBackend::always_text("answer")).await;
        let session = f.orchestrator.create_session(Some("u@e.com")).await;

        f.orchestrator
            .execute(ChatRequest::new(session.id, "hi", "m").with_user("u@e.com"))
            .await
            .unwrap();

        // Default conversation id is the session id.
        let saved = f
            .conversations
            .get_conversation("u@e.com", &session.id.to_string())
            .await
            .unwrap();
        assert_eq!(saved.len(), 2);

        let events = f.recorder.events().await;
        let saved_event = events
            .iter()
            .find(|e| e["type"] == "conversation_saved")
            .unwrap();
        assert_eq!(saved_event["conversation_id"], session.id.to_string());
    }

    #[tokio::test]
    async fn incognito_skips_conversation_persistence() {
        let f = fixture(ScriptedMockBackend::always_text("answer")).await;
        let session = f.orchestrator.create_session(Some("u@e.com")).await;

        let mut request = ChatRequest::new(session.id, "hi", "m").with_user("u@e.com");
        request.incognito = Some(true);
        f.orchestrator.execute(request).await.unwrap();

        assert!(f
            .conversations
            .get_conversation("u@e.com", &session.id.to_string())
            .await
            .is_none());
        let events = f.recorder.events().await;
        assert!(events.iter().all(|e| e["type"] != "conversation_saved"));
    }

    #[tokio::test]
    async fn blocked_input_pops_user_message_and_warns() {
        struct BlockInput;

        #[async_trait]
        impl SecurityChecker for BlockInput {
            async fn check_input(
                &self,
                _c: &str,
                _h: &[Message],
                _u: Option<&str>,
            ) -> SecurityVerdict {
                SecurityVerdict::blocked("Input violates policy.")
            }
            async fn check_output(
                &self,
                _c: &str,
                _h: &[Message],
                _u: Option<&str>,
            ) -> SecurityVerdict {
                SecurityVerdict::good()
            }
            async fn check_tool_rag_output(
                &self,
                _c: &str,
                _s: &str,
                _h: &[Message],
                _u: Option<&str>,
            ) -> SecurityVerdict {
                SecurityVerdict::good()
            }
        }

        let f = fixture(ScriptedMockBackend::always_text("answer")).await;
        let orchestrator = f.orchestrator.with_security(Arc::new(BlockInput));
        let session = orchestrator.create_session(Some("u@e.com")).await;

        let outcome = orchestrator
            .execute(ChatRequest::new(session.id, "bad input", "m").with_user("u@e.com"))
            .await
            .unwrap();
        assert!(outcome.is_error());

        // The blocked user message was backed out.
        let stored = f.repository.get(session.id).await.unwrap();
        assert_eq!(stored.history.len(), 0);

        let events = f.recorder.events().await;
        let warning = events
            .iter()
            .find(|e| e["type"] == "security_warning")
            .unwrap();
        assert_eq!(warning["status"], "blocked");
    }

    #[tokio::test]
    async fn end_session_removes_state() {
        let f = fixture(ScriptedMockBackend::always_text("x")).await;
        let session = f.orchestrator.create_session(None).await;
        assert!(f.orchestrator.end_session(session.id).await);
        assert!(!f.repository.exists(session.id).await);
        assert!(!f.orchestrator.end_session(session.id).await);
    }
}
