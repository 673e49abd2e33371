// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::publisher::EventPublisher;

/// Structured result of a collected CLI chat request.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CollectedResult {
    pub message: String,
    pub tool_calls: Vec<Value>,
    pub files: Map<String, Value>,
    pub canvas_content: Option<String>,
    pub raw_events: Vec<Value>,
}

/// Publisher for headless / non-interactive use.
///
/// Two modes:
/// - *streaming*: token text to stdout, tool and status lines to stderr so
///   stdout stays clean for piping
/// - *collecting*: buffers every event into a [`CollectedResult`]
pub struct CliPublisher {
    streaming: bool,
    quiet: bool,
    collected: Mutex<CollectedResult>,
}

impl CliPublisher {
    pub fn streaming() -> Self {
        Self {
            streaming: true,
            quiet: false,
            collected: Mutex::new(CollectedResult::default()),
        }
    }

    pub fn collecting() -> Self {
        Self {
            streaming: false,
            quiet: true,
            collected: Mutex::new(CollectedResult::default()),
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn result(&self) -> CollectedResult {
        self.collected.lock().expect("collector poisoned").clone()
    }

    fn write_stdout(&self, text: &str) {
        print!("{text}");
        let _ = std::io::stdout().flush();
    }

    /// Status lines go to stderr so stdout stays clean for LLM output.
    fn print_status(&self, text: &str) {
        if self.streaming && !self.quiet {
            eprintln!("{text}");
        }
    }

    fn mark_tool_complete(
        collected: &mut CollectedResult,
        tool_name: &str,
        result: &Value,
        success: Option<bool>,
    ) {
        for tc in collected.tool_calls.iter_mut().rev() {
            if tc["tool"] == tool_name && tc["status"] == "started" {
                tc["status"] = json!("complete");
                tc["result"] = result.clone();
                if let Some(success) = success {
                    tc["success"] = json!(success);
                }
                break;
            }
        }
    }
}

#[async_trait]
impl EventPublisher for CliPublisher {
    async fn publish_chat_response(&self, message: &str, _has_pending_tools: bool) {
        self.collected
            .lock()
            .expect("collector poisoned")
            .message
            .push_str(message);
        if self.streaming {
            self.write_stdout(message);
        }
    }

    async fn publish_response_complete(&self) {
        if self.streaming {
            // Final newline so the shell prompt does not glue to the answer.
            self.write_stdout("\n");
        }
    }

    async fn publish_agent_update(&self, update_type: &str, data: Map<String, Value>) {
        let mut event = json!({"type": "agent_update", "update_type": update_type});
        for (k, v) in data {
            event[k.as_str()] = v;
        }
        self.collected
            .lock()
            .expect("collector poisoned")
            .raw_events
            .push(event);
        self.print_status(&format!("[agent] {update_type}"));
    }

    async fn publish_tool_start(&self, tool_name: &str, _data: Map<String, Value>) {
        self.collected
            .lock()
            .expect("collector poisoned")
            .tool_calls
            .push(json!({"tool": tool_name, "status": "started"}));
        self.print_status(&format!("[tool] {tool_name} ..."));
    }

    async fn publish_tool_complete(&self, tool_name: &str, result: Value, _data: Map<String, Value>) {
        {
            let mut collected = self.collected.lock().expect("collector poisoned");
            Self::mark_tool_complete(&mut collected, tool_name, &result, None);
        }
        self.print_status(&format!("[tool] {tool_name} done"));
    }

    async fn publish_token_stream(&self, token: &str, _is_first: bool, _is_last: bool) {
        if token.is_empty() {
            return;
        }
        self.collected
            .lock()
            .expect("collector poisoned")
            .message
            .push_str(token);
        if self.streaming {
            self.write_stdout(token);
        }
    }

    async fn publish_files_update(&self, files: Value) {
        let count = {
            let mut collected = self.collected.lock().expect("collector poisoned");
            if let Value::Object(map) = files {
                for (k, v) in map {
                    collected.files.insert(k, v);
                }
            }
            collected.files.len()
        };
        self.print_status(&format!("[files] {count} file(s)"));
    }

    async fn publish_canvas_content(&self, content: &str, _content_type: &str) {
        self.collected
            .lock()
            .expect("collector poisoned")
            .canvas_content = Some(content.to_string());
    }

    async fn publish_elicitation_request(
        &self,
        _elicitation_id: &str,
        _tool_call_id: &str,
        tool_name: &str,
        message: &str,
        _response_schema: Value,
    ) {
        // The CLI has no interactive approval round-trip.
        warn!("elicitation requested by tool {tool_name} but CLI mode cannot respond interactively");
        self.print_status(&format!(
            "[elicitation] {tool_name}: {message} (skipped, non-interactive)"
        ));
    }

    async fn send_json(&self, data: Value) {
        let msg_type = data["type"].as_str().unwrap_or("").to_string();
        {
            let mut collected = self.collected.lock().expect("collector poisoned");
            collected.raw_events.push(data.clone());

            match msg_type.as_str() {
                "tool_start" => {
                    let tool_name = data["tool_name"].as_str().unwrap_or("unknown");
                    collected
                        .tool_calls
                        .push(json!({"tool": tool_name, "status": "started"}));
                }
                "tool_complete" => {
                    let tool_name = data["tool_name"].as_str().unwrap_or("unknown").to_string();
                    let success = data["success"].as_bool().unwrap_or(false);
                    Self::mark_tool_complete(
                        &mut collected,
                        &tool_name,
                        &data["result"],
                        Some(success),
                    );
                }
                _ => {}
            }
        }

        match msg_type.as_str() {
            "tool_start" => {
                let tool_name = data["tool_name"].as_str().unwrap_or("unknown");
                self.print_status(&format!(
                    "[tool] {tool_name} called with: {}",
                    data["arguments"]
                ));
            }
            "tool_complete" => {
                let tool_name = data["tool_name"].as_str().unwrap_or("unknown");
                let status = if data["success"].as_bool().unwrap_or(false) {
                    "ok"
                } else {
                    "error"
                };
                self.print_status(&format!("[tool] {tool_name} {status}"));
            }
            _ => {}
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
