// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use maestro_events::{ClientEvent, EventPublisher};

use crate::transport::ProgressHandler;

/// Structured updates are smuggled through the plain-text progress message
/// behind this literal prefix.
const MCP_UPDATE_PREFIX: &str = "MCP_UPDATE:";

/// Build a [`ProgressHandler`] that forwards tool progress to the client.
///
/// Messages starting with `MCP_UPDATE:` carry JSON dispatched by `type`
/// (`canvas_update`, `system_message`, `artifacts`); the regular
/// `tool_progress` event is still emitted alongside.
pub fn progress_relay(
    publisher: Arc<dyn EventPublisher>,
    tool_call_id: String,
    tool_name: String,
) -> ProgressHandler {
    Arc::new(move |progress, total, message| {
        let publisher = publisher.clone();
        let tool_call_id = tool_call_id.clone();
        let tool_name = tool_name.clone();
        async move {
            relay(publisher, &tool_call_id, &tool_name, progress, total, message).await;
        }
        .boxed()
    })
}

async fn relay(
    publisher: Arc<dyn EventPublisher>,
    tool_call_id: &str,
    tool_name: &str,
    progress: f64,
    total: Option<f64>,
    message: Option<String>,
) {
    if let Some(structured_text) = message
        .as_deref()
        .and_then(|m| m.strip_prefix(MCP_UPDATE_PREFIX))
    {
        match serde_json::from_str::<Value>(structured_text) {
            Ok(structured) => {
                dispatch_structured(&publisher, tool_call_id, tool_name, &structured).await;
                let progress_message = structured["progress_message"]
                    .as_str()
                    .unwrap_or("Processing...")
                    .to_string();
                send_progress(&publisher, tool_call_id, tool_name, progress, total, progress_message)
                    .await;
                return;
            }
            Err(e) => {
                warn!("failed to parse structured progress update: {e}");
                // Fall through to regular progress handling.
            }
        }
    }

    send_progress(
        &publisher,
        tool_call_id,
        tool_name,
        progress,
        total,
        message.unwrap_or_default(),
    )
    .await;
}

async fn dispatch_structured(
    publisher: &Arc<dyn EventPublisher>,
    tool_call_id: &str,
    tool_name: &str,
    structured: &Value,
) {
    match structured["type"].as_str() {
        Some("canvas_update") => {
            if let Some(content) = structured["content"].as_str() {
                publisher.publish_canvas_content(content, "text/html").await;
                info!("tool {tool_name} sent canvas update during execution");
            }
        }
        Some("system_message") => {
            publisher
                .send_event(ClientEvent::IntermediateUpdate {
                    update_type: "system_message".into(),
                    data: json!({
                        "message": structured["message"].as_str().unwrap_or(""),
                        "subtype": structured["subtype"].as_str().unwrap_or("info"),
                        "tool_call_id": tool_call_id,
                        "tool_name": tool_name,
                    }),
                })
                .await;
            info!("tool {tool_name} sent system message during execution");
        }
        Some("artifacts") => {
            let artifacts = structured["artifacts"].clone();
            if artifacts.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
                let count = artifacts.as_array().map(|a| a.len()).unwrap_or(0);
                publisher
                    .send_event(ClientEvent::IntermediateUpdate {
                        update_type: "progress_artifacts".into(),
                        data: json!({
                            "artifacts": artifacts,
                            "display": structured["display"].clone(),
                            "tool_call_id": tool_call_id,
                            "tool_name": tool_name,
                        }),
                    })
                    .await;
                info!("tool {tool_name} sent {count} artifact(s) during execution");
            }
        }
        other => {
            warn!("unknown structured progress update type: {other:?}");
        }
    }
}

async fn send_progress(
    publisher: &Arc<dyn EventPublisher>,
    tool_call_id: &str,
    tool_name: &str,
    progress: f64,
    total: Option<f64>,
    message: String,
) {
    let percentage = total
        .filter(|t| *t != 0.0)
        .map(|t| (progress / t) * 100.0);
    publisher
        .send_event(ClientEvent::ToolProgress {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            progress,
            total,
            percentage,
            message,
        })
        .await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Map;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl EventPublisher for Recorder {
        async fn publish_chat_response(&self, _m: &str, _p: bool) {}
        async fn publish_response_complete(&self) {}
        async fn publish_agent_update(&self, _u: &str, _d: Map<String, Value>) {}
        async fn publish_tool_start(&self, _t: &str, _d: Map<String, Value>) {}
        async fn publish_tool_complete(&self, _t: &str, _r: Value, _d: Map<String, Value>) {}
        async fn publish_token_stream(&self, _t: &str, _f: bool, _l: bool) {}
        async fn publish_files_update(&self, _f: Value) {}
        async fn publish_canvas_content(&self, content: &str, content_type: &str) {
            self.events
                .lock()
                .await
                .push(json!({"type": "canvas_content", "content": content, "content_type": content_type}));
        }
        async fn publish_elicitation_request(
            &self,
            _e: &str,
            _t: &str,
            _n: &str,
            _m: &str,
            _s: Value,
        ) {
        }
        async fn send_json(&self, data: Value) {
            self.events.lock().await.push(data);
        }
    }

    async fn run_relay(progress: f64, total: Option<f64>, message: Option<&str>) -> Vec<Value> {
        let recorder = Arc::new(Recorder::default());
        let handler = progress_relay(recorder.clone(), "c1".into(), "reader_read".into());
        handler(progress, total, message.map(str::to_string)).await;
        let events = recorder.events.lock().await.clone();
        events
    }

    #[tokio::test]
    async fn plain_progress_emits_tool_progress_with_percentage() {
        let events = run_relay(2.0, Some(4.0), Some("halfway")).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "tool_progress");
        assert_eq!(events[0]["percentage"], 50.0);
        assert_eq!(events[0]["message"], "halfway");
    }

    #[tokio::test]
    async fn zero_total_yields_no_percentage() {
        let events = run_relay(1.0, Some(0.0), None).await;
        assert_eq!(events[0]["percentage"], Value::Null);
    }

    #[tokio::test]
    async fn canvas_update_dispatches_canvas_content() {
        let message = format!("{MCP_UPDATE_PREFIX}{}", json!({"type": "canvas_update", "content": "# Hi"}));
        let events = run_relay(1.0, None, Some(&message)).await;
        assert_eq!(events[0]["type"], "canvas_content");
        assert_eq!(events[0]["content"], "# Hi");
        // The accompanying tool_progress is still emitted.
        assert_eq!(events[1]["type"], "tool_progress");
        assert_eq!(events[1]["message"], "Processing...");
    }

    #[tokio::test]
    async fn system_message_dispatches_intermediate_update() {
        let message = format!(
            "{MCP_UPDATE_PREFIX}{}",
            json!({"type": "system_message", "message": "indexing", "subtype": "info"})
        );
        let events = run_relay(1.0, None, Some(&message)).await;
        assert_eq!(events[0]["type"], "intermediate_update");
        assert_eq!(events[0]["update_type"], "system_message");
        assert_eq!(events[0]["data"]["message"], "indexing");
    }

    #[tokio::test]
    async fn artifacts_dispatch_progress_artifacts() {
        let message = format!(
            "{MCP_UPDATE_PREFIX}{}",
            json!({"type": "artifacts", "artifacts": [{"name": "a.png", "b64": "AA"}]})
        );
        let events = run_relay(1.0, None, Some(&message)).await;
        assert_eq!(events[0]["update_type"], "progress_artifacts");
        assert_eq!(events[0]["data"]["artifacts"][0]["name"], "a.png");
    }

    #[tokio::test]
    async fn malformed_structured_update_falls_back_to_plain_progress() {
        let message = format!("{MCP_UPDATE_PREFIX}not-json");
        let events = run_relay(1.0, None, Some(&message)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "tool_progress");
    }
}
