// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::warn;

use crate::events::ClientEvent;
use crate::publisher::EventPublisher;

/// Publisher that forwards events to a WebSocket connection task.
///
/// The gateway owns the socket; this side only sees an outbound channel.  A
/// closed channel means the client disconnected — events are dropped with a
/// warning and the pipeline keeps running (cancellation is the gateway's
/// decision, not the publisher's).
#[derive(Debug, Clone)]
pub struct WebSocketPublisher {
    outbound: mpsc::Sender<Value>,
}

impl WebSocketPublisher {
    pub fn new(outbound: mpsc::Sender<Value>) -> Self {
        Self { outbound }
    }

    async fn send(&self, data: Value) {
        if let Err(e) = self.outbound.send(data).await {
            warn!("dropping client event, connection gone: {e}");
        }
    }
}

#[async_trait]
impl EventPublisher for WebSocketPublisher {
    async fn publish_chat_response(&self, message: &str, has_pending_tools: bool) {
        self.send(
            ClientEvent::ChatResponse {
                message: message.to_string(),
                has_pending_tools,
            }
            .to_value(),
        )
        .await;
    }

    async fn publish_response_complete(&self) {
        self.send(ClientEvent::ResponseComplete {}.to_value()).await;
    }

    async fn publish_agent_update(&self, update_type: &str, data: Map<String, Value>) {
        self.send(
            ClientEvent::AgentUpdate {
                update_type: update_type.to_string(),
                data,
            }
            .to_value(),
        )
        .await;
    }

    async fn publish_tool_start(&self, tool_name: &str, data: Map<String, Value>) {
        let mut payload = data;
        payload.insert("tool".into(), json!(tool_name));
        self.publish_agent_update("tool_start", payload).await;
    }

    async fn publish_tool_complete(&self, tool_name: &str, result: Value, data: Map<String, Value>) {
        let mut payload = data;
        payload.insert("tool".into(), json!(tool_name));
        payload.insert("result".into(), result);
        self.publish_agent_update("tool_complete", payload).await;
    }

    async fn publish_token_stream(&self, token: &str, is_first: bool, is_last: bool) {
        self.send(
            ClientEvent::TokenStream {
                token: token.to_string(),
                is_first,
                is_last,
            }
            .to_value(),
        )
        .await;
    }

    async fn publish_files_update(&self, files: Value) {
        self.send(
            ClientEvent::IntermediateUpdate {
                update_type: "files_update".to_string(),
                data: files,
            }
            .to_value(),
        )
        .await;
    }

    async fn publish_canvas_content(&self, content: &str, content_type: &str) {
        self.send(
            ClientEvent::CanvasContent {
                content: content.to_string(),
                content_type: content_type.to_string(),
            }
            .to_value(),
        )
        .await;
    }

    async fn publish_elicitation_request(
        &self,
        elicitation_id: &str,
        tool_call_id: &str,
        tool_name: &str,
        message: &str,
        response_schema: Value,
    ) {
        self.send(
            ClientEvent::ElicitationRequest {
                elicitation_id: elicitation_id.to_string(),
                tool_call_id: tool_call_id.to_string(),
                tool_name: tool_name.to_string(),
                message: message.to_string(),
                response_schema,
            }
            .to_value(),
        )
        .await;
    }

    async fn send_json(&self, data: Value) {
        self.send(data).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> (WebSocketPublisher, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(16);
        (WebSocketPublisher::new(tx), rx)
    }

    #[tokio::test]
    async fn chat_response_reaches_the_channel() {
        let (p, mut rx) = publisher();
        p.publish_chat_response("hi", false).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev["type"], "chat_response");
        assert_eq!(ev["message"], "hi");
        assert_eq!(ev["has_pending_tools"], false);
    }

    #[tokio::test]
    async fn token_stream_preserves_flags() {
        let (p, mut rx) = publisher();
        p.publish_token_stream("Hello", true, false).await;
        p.publish_token_stream("", false, true).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first["is_first"], true);
        let last = rx.recv().await.unwrap();
        assert_eq!(last["is_last"], true);
        assert_eq!(last["token"], "");
    }

    #[tokio::test]
    async fn tool_start_maps_to_agent_update() {
        let (p, mut rx) = publisher();
        p.publish_tool_start("reader_read", Map::new()).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev["type"], "agent_update");
        assert_eq!(ev["update_type"], "tool_start");
        assert_eq!(ev["tool"], "reader_read");
    }

    #[tokio::test]
    async fn files_update_wraps_in_intermediate_update() {
        let (p, mut rx) = publisher();
        p.publish_files_update(json!({"files": []})).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev["type"], "intermediate_update");
        assert_eq!(ev["update_type"], "files_update");
    }

    #[tokio::test]
    async fn closed_channel_does_not_panic() {
        let (p, rx) = publisher();
        drop(rx);
        p.publish_response_complete().await;
        p.send_json(json!({"type": "error", "message": "x"})).await;
    }
}
