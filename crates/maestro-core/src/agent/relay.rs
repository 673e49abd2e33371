// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::warn;

use maestro_domain::ToolResult;
use maestro_events::EventPublisher;

use super::{AgentEvent, AgentEventSink};

const UNKNOWN_TOOL_NAME: &str = "unknown";

/// Callback that ingests tool-produced artifacts into the session.
pub type ArtifactProcessor = Arc<dyn Fn(Vec<ToolResult>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Translates agent loop events to publisher calls.
///
/// A pure mapping with one exception: `agent_tool_results` does not publish —
/// it hands the results to the artifact processor.
pub struct AgentEventRelay {
    publisher: Arc<dyn EventPublisher>,
    artifact_processor: Option<ArtifactProcessor>,
}

impl AgentEventRelay {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        artifact_processor: Option<ArtifactProcessor>,
    ) -> Self {
        Self {
            publisher,
            artifact_processor,
        }
    }

    fn payload_map(payload: &Value, keys: &[&str]) -> Map<String, Value> {
        let mut map = Map::new();
        for key in keys {
            if let Some(value) = payload.get(*key) {
                if !value.is_null() {
                    map.insert((*key).to_string(), value.clone());
                }
            }
        }
        map
    }
}

#[async_trait]
impl AgentEventSink for AgentEventRelay {
    async fn handle(&self, event: AgentEvent) {
        let payload = &event.payload;
        match event.kind.as_str() {
            "agent_start" => {
                self.publisher
                    .publish_agent_update(
                        "agent_start",
                        Self::payload_map(payload, &["max_steps", "strategy"]),
                    )
                    .await;
            }
            "agent_turn_start" => {
                self.publisher
                    .publish_agent_update("agent_turn_start", Self::payload_map(payload, &["step"]))
                    .await;
            }
            "agent_reason" => {
                self.publisher
                    .publish_agent_update(
                        "agent_reason",
                        Self::payload_map(payload, &["message", "step"]),
                    )
                    .await;
            }
            "agent_request_input" => {
                self.publisher
                    .publish_agent_update(
                        "agent_request_input",
                        Self::payload_map(payload, &["question", "step"]),
                    )
                    .await;
            }
            "agent_tool_start" => {
                self.publisher
                    .publish_tool_start(
                        payload["tool"].as_str().unwrap_or(UNKNOWN_TOOL_NAME),
                        Map::new(),
                    )
                    .await;
            }
            "agent_tool_complete" => {
                self.publisher
                    .publish_tool_complete(
                        payload["tool"].as_str().unwrap_or(UNKNOWN_TOOL_NAME),
                        payload.get("result").cloned().unwrap_or(Value::Null),
                        Map::new(),
                    )
                    .await;
            }
            "agent_tool_results" => {
                // Not a publisher call: artifacts are ingested instead.
                if let Some(processor) = &self.artifact_processor {
                    let results: Vec<ToolResult> = payload["results"]
                        .as_array()
                        .map(|entries| {
                            entries
                                .iter()
                                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                                .collect()
                        })
                        .unwrap_or_default();
                    if !results.is_empty() {
                        processor(results).await;
                    }
                }
            }
            "agent_observe" => {
                self.publisher
                    .publish_agent_update(
                        "agent_observe",
                        Self::payload_map(payload, &["message", "step"]),
                    )
                    .await;
            }
            "agent_completion" => {
                self.publisher
                    .publish_agent_update("agent_completion", Self::payload_map(payload, &["steps"]))
                    .await;
            }
            "agent_token_stream" => {
                self.publisher
                    .publish_token_stream(
                        payload["token"].as_str().unwrap_or(""),
                        payload["is_first"].as_bool().unwrap_or(false),
                        payload["is_last"].as_bool().unwrap_or(false),
                    )
                    .await;
            }
            "agent_error" => {
                self.publisher
                    .publish_agent_update("agent_error", Self::payload_map(payload, &["message"]))
                    .await;
            }
            other => warn!("unmapped agent event kind: {other}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl EventPublisher for Recorder {
        async fn publish_chat_response(&self, _m: &str, _p: bool) {}
        async fn publish_response_complete(&self) {}
        async fn publish_agent_update(&self, update_type: &str, data: Map<String, Value>) {
            self.events.lock().await.push(json!({
                "type": "agent_update", "update_type": update_type, "data": data
            }));
        }
        async fn publish_tool_start(&self, tool_name: &str, _d: Map<String, Value>) {
            self.events
                .lock()
                .await
                .push(json!({"type": "tool_start", "tool": tool_name}));
        }
        async fn publish_tool_complete(&self, tool_name: &str, result: Value, _d: Map<String, Value>) {
            self.events
                .lock()
                .await
                .push(json!({"type": "tool_complete", "tool": tool_name, "result": result}));
        }
        async fn publish_token_stream(&self, token: &str, is_first: bool, is_last: bool) {
            self.events.lock().await.push(json!({
                "type": "token_stream", "token": token, "is_first": is_first, "is_last": is_last
            }));
        }
        async fn publish_files_update(&self, _f: Value) {}
        async fn publish_canvas_content(&self, _c: &str, _t: &str) {}
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

    #[tokio::test]
    async fn agent_start_maps_to_agent_update() {
        let recorder = Arc::new(Recorder::default());
        let relay = AgentEventRelay::new(recorder.clone(), None);
        relay
            .handle(AgentEvent::new(
                "agent_start",
                json!({"max_steps": 5, "strategy": "act"}),
            ))
            .await;

        let events = recorder.events.lock().await;
        assert_eq!(events[0]["update_type"], "agent_start");
        assert_eq!(events[0]["data"]["max_steps"], 5);
        assert_eq!(events[0]["data"]["strategy"], "act");
    }

    #[tokio::test]
    async fn tool_events_map_to_tool_publishers() {
        let recorder = Arc::new(Recorder::default());
        let relay = AgentEventRelay::new(recorder.clone(), None);

        relay
            .handle(AgentEvent::new("agent_tool_start", json!({"tool": "reader_read"})))
            .await;
        relay
            .handle(AgentEvent::new(
                "agent_tool_complete",
                json!({"tool": "reader_read", "result": "done"}),
            ))
            .await;

        let events = recorder.events.lock().await;
        assert_eq!(events[0]["type"], "tool_start");
        assert_eq!(events[1]["type"], "tool_complete");
        assert_eq!(events[1]["result"], "done");
    }

    #[tokio::test]
    async fn missing_tool_name_falls_back_to_unknown() {
        let recorder = Arc::new(Recorder::default());
        let relay = AgentEventRelay::new(recorder.clone(), None);
        relay
            .handle(AgentEvent::new("agent_tool_start", json!({})))
            .await;
        assert_eq!(recorder.events.lock().await[0]["tool"], "unknown");
    }

    #[tokio::test]
    async fn token_stream_events_forward_flags() {
        let recorder = Arc::new(Recorder::default());
        let relay = AgentEventRelay::new(recorder.clone(), None);
        relay
            .handle(AgentEvent::new(
                "agent_token_stream",
                json!({"token": "", "is_first": false, "is_last": true}),
            ))
            .await;
        let events = recorder.events.lock().await;
        assert_eq!(events[0]["is_last"], true);
    }

    #[tokio::test]
    async fn tool_results_invoke_processor_without_publishing() {
        let recorder = Arc::new(Recorder::default());
        let seen: Arc<Mutex<Vec<ToolResult>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let processor: ArtifactProcessor = Arc::new(move |results| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().await.extend(results);
            })
        });
        let relay = AgentEventRelay::new(recorder.clone(), Some(processor));

        let result = ToolResult::ok("c1", "{}");
        relay
            .handle(AgentEvent::new(
                "agent_tool_results",
                json!({"results": [serde_json::to_value(&result).unwrap()]}),
            ))
            .await;

        assert!(recorder.events.lock().await.is_empty());
        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tool_call_id, "c1");
    }

    #[tokio::test]
    async fn empty_results_skip_the_processor() {
        let recorder = Arc::new(Recorder::default());
        let invoked = Arc::new(Mutex::new(false));
        let flag = invoked.clone();
        let processor: ArtifactProcessor = Arc::new(move |_results| {
            let flag = flag.clone();
            Box::pin(async move {
                *flag.lock().await = true;
            })
        });
        let relay = AgentEventRelay::new(recorder, Some(processor));

        relay
            .handle(AgentEvent::new("agent_tool_results", json!({"results": []})))
            .await;
        assert!(!*invoked.lock().await);
    }
}
