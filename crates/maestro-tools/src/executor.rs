// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use maestro_domain::{FileRef, ToolCall, ToolResult};
use maestro_events::{sanitize_result_for_ui, ClientEvent, EventPublisher};
use maestro_files::DownloadUrlSigner;
use maestro_mcp::{progress_relay, McpToolManager, CANVAS_TOOL_NAME};
use maestro_model::ToolCallData;

use crate::approval::{ApprovalPolicy, ElicitationBroker};
use crate::args::{
    filter_args_to_schema, inject_context_into_args, parse_raw_arguments, sanitize_args_for_ui,
    ArgInjectionContext,
};

/// Session-derived context for one tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolSessionContext {
    pub session_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub files: HashMap<String, FileRef>,
}

/// Executes single tool calls: argument shaping, approval gate, dispatch
/// with progress relay, result notification.  Never returns an error — every
/// failure becomes a failed [`ToolResult`] so one bad call cannot abort the
/// whole tool fan-out.
pub struct ToolExecutor {
    manager: Arc<McpToolManager>,
    approval: ApprovalPolicy,
    broker: Arc<ElicitationBroker>,
    signer: Option<Arc<DownloadUrlSigner>>,
}

impl ToolExecutor {
    pub fn new(
        manager: Arc<McpToolManager>,
        approval: ApprovalPolicy,
        broker: Arc<ElicitationBroker>,
    ) -> Self {
        Self {
            manager,
            approval,
            broker,
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<DownloadUrlSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn broker(&self) -> &Arc<ElicitationBroker> {
        &self.broker
    }

    pub fn manager(&self) -> &Arc<McpToolManager> {
        &self.manager
    }

    fn server_name_for_display(&self, tool_name: &str) -> String {
        if let Some((server, _)) = self.manager.resolve(tool_name) {
            return server.to_string();
        }
        // Fallback for pseudo-tools and unknown names: strip the last segment.
        match tool_name.rsplit_once('_') {
            Some((server, _)) => server.to_string(),
            None => "unknown".to_string(),
        }
    }

    /// Run one tool call end to end.
    pub async fn execute_single_tool(
        &self,
        call: &ToolCallData,
        context: &ToolSessionContext,
        publisher: &Arc<dyn EventPublisher>,
    ) -> ToolResult {
        let tool_name = call.function.name.clone();
        let schemas = self.manager.get_tools_schema(&[tool_name.clone()]);

        // Shape arguments: parse, inject session context, filter to schema.
        let raw = Value::String(call.function.arguments.clone());
        let mut parsed = parse_raw_arguments(&raw, &tool_name);
        inject_context_into_args(
            &mut parsed,
            &ArgInjectionContext {
                user_email: context.user_email.as_deref(),
                files: &context.files,
                signer: self.signer.as_deref(),
            },
            &tool_name,
            &schemas,
        );
        let mut filtered = filter_args_to_schema(&parsed, &tool_name, &schemas);

        let display_args = sanitize_args_for_ui(&filtered);
        publisher
            .send_event(ClientEvent::ToolStart {
                tool_call_id: call.id.clone(),
                tool_name: tool_name.clone(),
                server_name: self.server_name_for_display(&tool_name),
                arguments: Value::Object(display_args.clone()),
            })
            .await;

        // Approval gate.
        if self.approval.requires_approval(&tool_name) {
            match self
                .run_approval_gate(call, &tool_name, &display_args, publisher)
                .await
            {
                ApprovalOutcome::Approved => {}
                ApprovalOutcome::Edited(edited) => {
                    filtered = filter_args_to_schema(&edited, &tool_name, &schemas);
                }
                ApprovalOutcome::Rejected => {
                    info!("tool {tool_name} rejected by user");
                    let result = ToolResult {
                        tool_call_id: call.id.clone(),
                        content: "Tool execution was rejected by the user.".to_string(),
                        success: false,
                        error: Some("rejected by user".to_string()),
                        artifacts: Vec::new(),
                        display_config: None,
                        meta_data: None,
                    };
                    self.notify_complete(call, &result, publisher).await;
                    return result;
                }
            }
        }

        // Canvas pseudo-tool: client-side effect only, no server dispatch.
        if tool_name == CANVAS_TOOL_NAME {
            let result = self.run_canvas_tool(call, &filtered, publisher).await;
            self.notify_complete(call, &result, publisher).await;
            return result;
        }

        let progress = progress_relay(publisher.clone(), call.id.clone(), tool_name.clone());
        let domain_call = ToolCall::new(&call.id, &tool_name, Value::Object(filtered));
        let result = self.manager.execute_tool(&domain_call, Some(progress)).await;

        self.notify_complete(call, &result, publisher).await;
        result
    }

    async fn run_approval_gate(
        &self,
        call: &ToolCallData,
        tool_name: &str,
        display_args: &Map<String, Value>,
        publisher: &Arc<dyn EventPublisher>,
    ) -> ApprovalOutcome {
        let elicitation_id = Uuid::new_v4().to_string();
        let rx = self.broker.register(&elicitation_id).await;

        let message = format!(
            "Approve execution of {tool_name} with arguments {}?",
            Value::Object(display_args.clone())
        );
        let response_schema = json!({
            "type": "object",
            "properties": {
                "approved": {"type": "boolean"},
                "edited_arguments": {"type": "object"}
            },
            "required": ["approved"]
        });
        publisher
            .publish_elicitation_request(
                &elicitation_id,
                &call.id,
                tool_name,
                &message,
                response_schema,
            )
            .await;

        let response = self.broker.await_response(rx).await;
        if !response.approved {
            return ApprovalOutcome::Rejected;
        }
        match response.edited_arguments {
            Some(edited) => {
                debug!("tool {tool_name} approved with edited arguments");
                ApprovalOutcome::Edited(edited)
            }
            None => ApprovalOutcome::Approved,
        }
    }

    async fn run_canvas_tool(
        &self,
        call: &ToolCallData,
        args: &Map<String, Value>,
        publisher: &Arc<dyn EventPublisher>,
    ) -> ToolResult {
        let content = args.get("content").and_then(Value::as_str).unwrap_or("");
        if content.is_empty() {
            info!("canvas tool called without content, skipping canvas_content event");
        } else {
            publisher.publish_canvas_content(content, "text/html").await;
        }

        let summary = if content.chars().count() > 100 {
            let head: String = content.chars().take(100).collect();
            format!("Canvas content displayed: {head}...")
        } else {
            format!("Canvas content displayed: {content}")
        };
        ToolResult::ok(&call.id, summary)
    }

    /// Emit `progress_artifacts` (when the result carries artifacts) followed
    /// by exactly one `tool_complete` with UI-sanitized result content.
    async fn notify_complete(
        &self,
        call: &ToolCallData,
        result: &ToolResult,
        publisher: &Arc<dyn EventPublisher>,
    ) {
        if !result.artifacts.is_empty() {
            let artifacts = serde_json::to_value(&result.artifacts).unwrap_or(Value::Null);
            publisher
                .send_event(ClientEvent::IntermediateUpdate {
                    update_type: "progress_artifacts".into(),
                    data: json!({
                        "artifacts": artifacts,
                        "display": result.display_config.clone().unwrap_or(json!({})),
                        "tool_call_id": call.id,
                        "tool_name": call.function.name,
                    }),
                })
                .await;
            info!(
                "sent {} artifact(s) from tool {} to frontend",
                result.artifacts.len(),
                call.function.name
            );
        }

        let sanitized = match serde_json::from_str::<Value>(&result.content) {
            Ok(parsed) => sanitize_result_for_ui(&parsed),
            Err(_) => {
                warn!(
                    "tool {} returned non-JSON content, forwarding as string",
                    call.function.name
                );
                Value::String(result.content.clone())
            }
        };
        publisher
            .send_event(ClientEvent::ToolComplete {
                tool_call_id: call.id.clone(),
                tool_name: call.function.name.clone(),
                success: result.success,
                result: sanitized,
            })
            .await;
    }
}

enum ApprovalOutcome {
    Approved,
    Rejected,
    Edited(Map<String, Value>),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_config::McpServerConfig;
    use maestro_mcp::{RawToolResult, ToolDescriptor, ToolTransport};
    use std::collections::HashSet;
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

    struct EchoTransport;

    #[async_trait]
    impl ToolTransport for EchoTransport {
        async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
            Ok(vec![ToolDescriptor {
                name: "read".into(),
                description: "read a file".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "username": {"type": "string"}
                    }
                }),
            }])
        }

        async fn call_tool(
            &self,
            _tool: &str,
            arguments: Value,
            _progress: Option<maestro_mcp::ProgressHandler>,
        ) -> anyhow::Result<RawToolResult> {
            Ok(RawToolResult::from_structured(
                json!({"results": {"echo": arguments}}),
            ))
        }

        async fn get_prompt(&self, _name: &str) -> anyhow::Result<String> {
            anyhow::bail!("no prompts")
        }
    }

    async fn executor(approval: ApprovalPolicy) -> ToolExecutor {
        let mut manager = McpToolManager::new(300);
        manager
            .register_server("reader", Arc::new(EchoTransport), McpServerConfig::default())
            .await;
        ToolExecutor::new(
            Arc::new(manager),
            approval,
            Arc::new(ElicitationBroker::new()),
        )
        .with_signer(Arc::new(DownloadUrlSigner::new(
            b"secret".to_vec(),
            "https://files.local",
        )))
    }

    fn context_with_file() -> ToolSessionContext {
        let mut files = HashMap::new();
        files.insert(
            "data.csv".to_string(),
            FileRef::new("1755396436_d71d38d7_data.csv", maestro_domain::FileSource::User),
        );
        ToolSessionContext {
            session_id: Some(Uuid::new_v4()),
            user_email: Some("u@e.com".into()),
            files,
        }
    }

    #[tokio::test]
    async fn filename_rewrite_and_ui_sanitization() {
        let executor = executor(ApprovalPolicy::default()).await;
        let (recorder, publisher) = recording_publisher();

        let call = ToolCallData::new("c1", "reader_read", r#"{"filename": "data.csv"}"#);
        let result = executor
            .execute_single_tool(&call, &context_with_file(), &publisher)
            .await;
        assert!(result.success);

        // Dispatched arguments carry the signed URL + username; schema
        // filtering dropped the injection extras.
        let dispatched: Value = serde_json::from_str(&result.content).unwrap();
        let echo = &dispatched["results"]["echo"];
        assert!(echo["filename"].as_str().unwrap().contains("token="));
        assert_eq!(echo["username"], "u@e.com");
        assert!(echo.get("original_filename").is_none());
        assert!(echo.get("file_url").is_none());

        // The UI saw the clean basename.
        let events = recorder.events.lock().await.clone();
        let start = events.iter().find(|e| e["type"] == "tool_start").unwrap();
        assert_eq!(start["arguments"]["filename"], "data.csv");
        assert_eq!(start["server_name"], "reader");
    }

    fn recording_publisher() -> (Arc<Recorder>, Arc<dyn EventPublisher>) {
        let recorder = Arc::new(Recorder::default());
        let publisher: Arc<dyn EventPublisher> = recorder.clone();
        (recorder, publisher)
    }

    #[tokio::test]
    async fn exactly_one_completion_event_per_call() {
        let executor = executor(ApprovalPolicy::default()).await;
        let (recorder, publisher) = recording_publisher();

        let call = ToolCallData::new("c1", "reader_read", "{}");
        executor
            .execute_single_tool(&call, &ToolSessionContext::default(), &publisher)
            .await;

        let events = recorder.events.lock().await.clone();
        let completions = events
            .iter()
            .filter(|e| e["type"] == "tool_complete" || e["type"] == "tool_error")
            .count();
        assert_eq!(completions, 1);
        // tool_start precedes tool_complete.
        let start_idx = events.iter().position(|e| e["type"] == "tool_start").unwrap();
        let done_idx = events.iter().position(|e| e["type"] == "tool_complete").unwrap();
        assert!(start_idx < done_idx);
    }

    #[tokio::test]
    async fn unknown_tool_yields_failed_result() {
        let executor = executor(ApprovalPolicy::default()).await;
        let (recorder, publisher) = recording_publisher();

        let call = ToolCallData::new("c1", "ghost_tool", "{}");
        let result = executor
            .execute_single_tool(&call, &ToolSessionContext::default(), &publisher)
            .await;
        assert!(!result.success);

        let events = recorder.events.lock().await.clone();
        let complete = events.iter().find(|e| e["type"] == "tool_complete").unwrap();
        assert_eq!(complete["success"], false);
    }

    #[tokio::test]
    async fn canvas_tool_emits_canvas_content_without_dispatch() {
        let executor = executor(ApprovalPolicy::default()).await;
        let (recorder, publisher) = recording_publisher();

        let call = ToolCallData::new("c1", CANVAS_TOOL_NAME, r##"{"content": "# Hi"}"##);
        let result = executor
            .execute_single_tool(&call, &ToolSessionContext::default(), &publisher)
            .await;

        assert!(result.success);
        assert!(result.content.starts_with("Canvas content displayed: # Hi"));

        let events = recorder.events.lock().await.clone();
        let canvas = events.iter().find(|e| e["type"] == "canvas_content").unwrap();
        assert_eq!(canvas["content"], "# Hi");
    }

    #[tokio::test]
    async fn rejection_produces_failed_result() {
        let executor = executor(ApprovalPolicy::new(
            HashSet::from(["reader_read".to_string()]),
            false,
        ))
        .await;
        let broker = executor.broker().clone();
        let (recorder, publisher) = recording_publisher();

        let call = ToolCallData::new("c1", "reader_read", "{}");
        let context = ToolSessionContext::default();

        let exec = executor.execute_single_tool(&call, &context, &publisher);
        let respond = async {
            // Wait for the elicitation to be registered, then reject.
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let events = recorder.events.lock().await.clone();
            let req = events
                .iter()
                .find(|e| e["type"] == "elicitation_request")
                .expect("elicitation emitted");
            let id = req["elicitation_id"].as_str().unwrap().to_string();
            broker
                .resolve(&id, crate::approval::ElicitationResponse::rejected())
                .await;
        };

        let (result, _) = tokio::join!(exec, respond);
        assert!(!result.success);
        assert!(result.content.contains("rejected by the user"));
        assert_eq!(result.error.as_deref(), Some("rejected by user"));
    }

    #[tokio::test]
    async fn edited_arguments_replace_dispatch_args() {
        let executor = executor(ApprovalPolicy::new(HashSet::new(), true)).await;
        let broker = executor.broker().clone();
        let (recorder, publisher) = recording_publisher();

        let call = ToolCallData::new("c1", "reader_read", r#"{"filename": "a.csv"}"#);
        let context = ToolSessionContext::default();

        let exec = executor.execute_single_tool(&call, &context, &publisher);
        let respond = async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let events = recorder.events.lock().await.clone();
            let req = events
                .iter()
                .find(|e| e["type"] == "elicitation_request")
                .expect("elicitation emitted");
            let id = req["elicitation_id"].as_str().unwrap().to_string();
            let mut edited = Map::new();
            edited.insert("filename".into(), json!("edited.csv"));
            edited.insert("not_in_schema".into(), json!(true));
            broker
                .resolve(&id, crate::approval::ElicitationResponse::edited(edited))
                .await;
        };

        let (result, _) = tokio::join!(exec, respond);
        assert!(result.success);
        let dispatched: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(dispatched["results"]["echo"]["filename"], "edited.csv");
        // Edited arguments are schema-filtered again.
        assert!(dispatched["results"]["echo"].get("not_in_schema").is_none());
    }

    #[tokio::test]
    async fn progress_artifacts_precede_tool_complete() {
        struct ArtifactTransport;

        #[async_trait]
        impl ToolTransport for ArtifactTransport {
            async fn list_tools(&self) -> anyhow::Result<Vec<ToolDescriptor>> {
                Ok(vec![ToolDescriptor {
                    name: "plot".into(),
                    description: String::new(),
                    parameters: json!({"type": "object", "properties": {}}),
                }])
            }
            async fn call_tool(
                &self,
                _tool: &str,
                _arguments: Value,
                _progress: Option<maestro_mcp::ProgressHandler>,
            ) -> anyhow::Result<RawToolResult> {
                Ok(RawToolResult::from_structured(json!({
                    "results": "ok",
                    "artifacts": [{"name": "chart.png", "b64": "QUJD", "mime": "image/png"}]
                })))
            }
            async fn get_prompt(&self, _name: &str) -> anyhow::Result<String> {
                anyhow::bail!("no prompts")
            }
        }

        let mut manager = McpToolManager::new(300);
        manager
            .register_server("viz", Arc::new(ArtifactTransport), McpServerConfig::default())
            .await;
        let executor = ToolExecutor::new(
            Arc::new(manager),
            ApprovalPolicy::default(),
            Arc::new(ElicitationBroker::new()),
        );
        let (recorder, publisher) = recording_publisher();

        let call = ToolCallData::new("c1", "viz_plot", "{}");
        let result = executor
            .execute_single_tool(&call, &ToolSessionContext::default(), &publisher)
            .await;
        assert_eq!(result.artifacts.len(), 1);

        let events = recorder.events.lock().await.clone();
        let artifacts_idx = events
            .iter()
            .position(|e| e["update_type"] == "progress_artifacts")
            .unwrap();
        let complete_idx = events
            .iter()
            .position(|e| e["type"] == "tool_complete")
            .unwrap();
        assert!(artifacts_idx < complete_idx);
    }
}
