// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// End-to-end tests over the assembled pipeline with scripted mock backends.
use std::sync::Arc;

use maestro_core::{
    ChatRequest, MessageBuilder, Orchestrator, PlainModeRunner, PromptOverrideService,
    PromptProvider, RagModeRunner, ToolAuthorizationService, ToolsModeRunner,
};
use maestro_domain::{AllowAll, InMemorySessionRepository};
use maestro_events::{CliPublisher, EventPublisher};
use maestro_mcp::McpToolManager;
use maestro_model::{LlmCaller, ScriptedMockBackend};
use maestro_tools::{ApprovalPolicy, ElicitationBroker, ToolExecutor};

fn orchestrator_with(
    backend: ScriptedMockBackend,
    publisher: Arc<dyn EventPublisher>,
) -> Orchestrator {
    let llm = Arc::new(LlmCaller::new(Arc::new(backend)));
    let manager = Arc::new(McpToolManager::new(300));
    let executor = Arc::new(ToolExecutor::new(
        manager.clone(),
        ApprovalPolicy::default(),
        Arc::new(ElicitationBroker::new()),
    ));
    let prompt_provider = Arc::new(PromptProvider::default());

    Orchestrator::new(
        Arc::new(InMemorySessionRepository::new()),
        publisher.clone(),
        MessageBuilder::new(prompt_provider.clone()),
        PromptOverrideService::new(None),
        ToolAuthorizationService::new(Some(manager), Arc::new(AllowAll)),
        PlainModeRunner::new(llm.clone(), publisher.clone()),
        RagModeRunner::new(llm.clone(), publisher.clone()),
        ToolsModeRunner::new(llm, executor, publisher, prompt_provider),
    )
}

#[tokio::test]
async fn plain_streaming_happy_path_emits_ordered_events() {
    let backend = ScriptedMockBackend::new(vec![ScriptedMockBackend::tokens_script(vec![
        "Hello", " ", "World",
    ])]);
    let collector = Arc::new(CliPublisher::collecting());
    let publisher: Arc<dyn EventPublisher> = collector.clone();
    let orchestrator = orchestrator_with(backend, publisher);

    let session = orchestrator.create_session(Some("u@e.com")).await;
    let outcome = orchestrator
        .execute(ChatRequest::new(session.id, "greet me", "m").with_user("u@e.com"))
        .await
        .unwrap();

    assert_eq!(outcome.kind, "chat_response");
    assert_eq!(outcome.message, "Hello World");
    assert_eq!(collector.result().message, "Hello World");
}

#[tokio::test]
async fn stream_failure_after_one_token_keeps_partial() {
    let backend = ScriptedMockBackend::new(vec![
        ScriptedMockBackend::tokens_then_fail(vec!["partial"], "mid-stream"),
    ]);
    let collector = Arc::new(CliPublisher::collecting());
    let publisher: Arc<dyn EventPublisher> = collector.clone();
    let orchestrator = orchestrator_with(backend, publisher);

    let session = orchestrator.create_session(Some("u@e.com")).await;
    let outcome = orchestrator
        .execute(ChatRequest::new(session.id, "go", "m").with_user("u@e.com"))
        .await
        .unwrap();

    // Partial content survives; no fallback text replaces it.
    assert_eq!(outcome.message, "partial");
    assert_eq!(collector.result().message, "partial");
}

#[tokio::test]
async fn empty_data_source_list_routes_to_plain_runner() {
    // A single script: if RAG were attempted, the configured-less caller
    // would error before ever reaching the backend.
    let backend = ScriptedMockBackend::always_text("plain path");
    let collector = Arc::new(CliPublisher::collecting());
    let publisher: Arc<dyn EventPublisher> = collector.clone();
    let orchestrator = orchestrator_with(backend, publisher);

    let session = orchestrator.create_session(Some("u@e.com")).await;
    let request = ChatRequest::new(session.id, "question", "m")
        .with_user("u@e.com")
        .with_data_sources(Vec::new());
    let outcome = orchestrator.execute(request).await.unwrap();
    assert_eq!(outcome.message, "plain path");
}

#[tokio::test]
async fn canvas_only_tool_call_skips_synthesis() {
    let backend = ScriptedMockBackend::new(vec![
        ScriptedMockBackend::tool_call_script("c1", "canvas_canvas", r##"{"content": "# Hi"}"##),
        // Would be consumed by synthesis; asserting it is NOT consumed.
        ScriptedMockBackend::fail_script("synthesis must not run"),
    ]);
    let collector = Arc::new(CliPublisher::collecting());
    let publisher: Arc<dyn EventPublisher> = collector.clone();
    let orchestrator = orchestrator_with(backend, publisher);

    let session = orchestrator.create_session(Some("u@e.com")).await;
    let request = ChatRequest::new(session.id, "show it", "m")
        .with_user("u@e.com")
        .with_tools(vec!["canvas_canvas".to_string()]);
    let outcome = orchestrator.execute(request).await.unwrap();

    assert_eq!(outcome.message, "Content displayed in canvas.");
    let result = collector.result();
    assert_eq!(result.canvas_content.as_deref(), Some("# Hi"));
    // Exactly one successful tool completion was observed.
    let completed: Vec<_> = result
        .raw_events
        .iter()
        .filter(|e| e["type"] == "tool_complete")
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["success"], true);
}

#[tokio::test]
async fn session_history_is_non_decreasing_across_requests() {
    let backend = ScriptedMockBackend::new(vec![
        ScriptedMockBackend::text_script("one"),
        ScriptedMockBackend::text_script("two"),
    ]);
    let collector = Arc::new(CliPublisher::collecting());
    let publisher: Arc<dyn EventPublisher> = collector.clone();
    let orchestrator = orchestrator_with(backend, publisher);

    let session = orchestrator.create_session(Some("u@e.com")).await;
    orchestrator
        .execute(ChatRequest::new(session.id, "first", "m").with_user("u@e.com"))
        .await
        .unwrap();
    orchestrator
        .execute(ChatRequest::new(session.id, "second", "m").with_user("u@e.com"))
        .await
        .unwrap();

    // Two user + two assistant turns accumulated.
    let collected = collector.result();
    assert_eq!(collected.message, "onetwo");
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let backend = ScriptedMockBackend::always_text("x");
    let collector = Arc::new(CliPublisher::collecting());
    let publisher: Arc<dyn EventPublisher> = collector.clone();
    let orchestrator = orchestrator_with(backend, publisher);

    let err = orchestrator
        .execute(ChatRequest::new(uuid::Uuid::new_v4(), "hi", "m"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, maestro_domain::ErrorKind::SessionNotFound);
}
