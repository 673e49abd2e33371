// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use futures::future::BoxFuture;
use futures::StreamExt;
use tracing::{error, info};

use maestro_events::EventPublisher;
use maestro_model::{classify, LlmResponse, StreamItem, TokenStream};

/// Lazily evaluated non-streaming fallback, awaited at most once.
pub type Fallback<'a> = BoxFuture<'a, anyhow::Result<String>>;

/// Consume a token stream, publishing each chunk and accumulating the result.
///
/// The contract:
/// - the first non-empty token is published with `is_first = true`;
/// - a normal, non-empty completion is closed with exactly one terminator
///   (`token = ""`, `is_last = true`);
/// - an empty completion invokes the fallback (if any) and publishes its
///   result as a `chat_response`;
/// - a mid-stream failure always emits the terminator, keeps any partial
///   content unchanged, and only falls back when nothing was received —
///   classifying the original failure when the fallback also fails.
pub async fn stream_and_accumulate(
    stream_result: anyhow::Result<TokenStream>,
    publisher: &dyn EventPublisher,
    fallback: Option<Fallback<'_>>,
    label: &str,
) -> String {
    let mut accumulated = String::new();
    let mut is_first = true;
    let mut failure: Option<anyhow::Error> = None;

    match stream_result {
        Ok(mut stream) => {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(StreamItem::Token(token)) => {
                        if token.is_empty() {
                            continue;
                        }
                        publisher.publish_token_stream(&token, is_first, false).await;
                        accumulated.push_str(&token);
                        is_first = false;
                    }
                    Ok(StreamItem::Final(_)) => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        Err(e) => failure = Some(e),
    }

    if let Some(failure) = failure {
        error!("{label} streaming error, sending partial content: {failure:#}");
        // Always close the stream so the client caret is not stuck.
        publisher.publish_token_stream("", false, true).await;

        if !accumulated.is_empty() {
            return accumulated;
        }
        let result = match fallback {
            Some(fallback) => match fallback.await {
                Ok(content) => content,
                Err(fallback_err) => {
                    error!("{label} fallback also failed: {fallback_err:#}");
                    let classified = classify(&failure);
                    error!("{}", classified.log_message);
                    classified.user_message.to_string()
                }
            },
            None => {
                let classified = classify(&failure);
                error!("{}", classified.log_message);
                classified.user_message.to_string()
            }
        };
        publisher.publish_chat_response(&result, false).await;
        return result;
    }

    if accumulated.is_empty() {
        if let Some(fallback) = fallback {
            info!("{label} stream yielded no content, using fallback");
            let result = match fallback.await {
                Ok(content) => content,
                Err(e) => {
                    let classified = classify(&e);
                    error!("{}", classified.log_message);
                    classified.user_message.to_string()
                }
            };
            publisher.publish_chat_response(&result, false).await;
            return result;
        }
        return accumulated;
    }

    publisher.publish_token_stream("", false, true).await;
    accumulated
}

/// Drain a tools-mode stream: publish tokens, capture the terminal response
/// carrying tool calls, and surface any failure to the caller.
///
/// On failure the terminator has already been emitted; the caller decides
/// how to recover (partial content vs. structured error).
pub async fn drain_stream_with_final(
    stream_result: anyhow::Result<TokenStream>,
    publisher: &dyn EventPublisher,
    label: &str,
) -> (String, Option<LlmResponse>, Option<anyhow::Error>) {
    let mut accumulated = String::new();
    let mut final_response = None;
    let mut is_first = true;

    let mut stream = match stream_result {
        Ok(stream) => stream,
        Err(e) => {
            error!("{label} streaming error: {e:#}");
            publisher.publish_token_stream("", false, true).await;
            return (accumulated, final_response, Some(e));
        }
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(StreamItem::Token(token)) => {
                if token.is_empty() {
                    continue;
                }
                publisher.publish_token_stream(&token, is_first, false).await;
                accumulated.push_str(&token);
                is_first = false;
            }
            Ok(StreamItem::Final(response)) => final_response = Some(response),
            Err(e) => {
                error!("{label} streaming error: {e:#}");
                publisher.publish_token_stream("", false, true).await;
                return (accumulated, final_response, Some(e));
            }
        }
    }

    (accumulated, final_response, None)
}

// ─── Test support ────────────────────────────────────────────────────────────

/// Publisher that records every event as its JSON wire value, shared by the
/// mode runner and accumulator tests.
#[cfg(test)]
pub(crate) mod tests_support {
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use tokio::sync::Mutex;

    use maestro_events::EventPublisher;

    #[derive(Default)]
    pub struct Recorder {
        pub events: Mutex<Vec<Value>>,
    }

    impl Recorder {
        pub async fn events(&self) -> Vec<Value> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventPublisher for Recorder {
        async fn publish_chat_response(&self, message: &str, has_pending_tools: bool) {
            self.events.lock().await.push(json!({
                "type": "chat_response", "message": message, "has_pending_tools": has_pending_tools
            }));
        }
        async fn publish_response_complete(&self) {
            self.events
                .lock()
                .await
                .push(json!({"type": "response_complete"}));
        }
        async fn publish_agent_update(&self, update_type: &str, data: Map<String, Value>) {
            self.events.lock().await.push(json!({
                "type": "agent_update", "update_type": update_type, "data": data
            }));
        }
        async fn publish_tool_start(&self, _t: &str, _d: Map<String, Value>) {}
        async fn publish_tool_complete(&self, _t: &str, _r: Value, _d: Map<String, Value>) {}
        async fn publish_token_stream(&self, token: &str, is_first: bool, is_last: bool) {
            self.events.lock().await.push(json!({
                "type": "token_stream", "token": token, "is_first": is_first, "is_last": is_last
            }));
        }
        async fn publish_files_update(&self, files: Value) {
            self.events
                .lock()
                .await
                .push(json!({"type": "intermediate_update", "update_type": "files_update", "data": files}));
        }
        async fn publish_canvas_content(&self, content: &str, content_type: &str) {
            self.events.lock().await.push(json!({
                "type": "canvas_content", "content": content, "content_type": content_type
            }));
        }
        async fn publish_elicitation_request(
            &self,
            elicitation_id: &str,
            tool_call_id: &str,
            tool_name: &str,
            message: &str,
            response_schema: Value,
        ) {
            self.events.lock().await.push(json!({
                "type": "elicitation_request",
                "elicitation_id": elicitation_id,
                "tool_call_id": tool_call_id,
                "tool_name": tool_name,
                "message": message,
                "response_schema": response_schema,
            }));
        }
        async fn send_json(&self, data: Value) {
            self.events.lock().await.push(data);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
