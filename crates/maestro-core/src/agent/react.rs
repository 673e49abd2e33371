// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use maestro_model::LlmCaller;
use maestro_tools::ToolExecutor;

use super::{
    call_llm_with_tools, emit_final_answer, run_one_tool, summarize_remaining, AgentEvent,
    AgentLoop, AgentResult, AgentRunParams,
};

/// Text marker that signals the model is done reasoning.
const FINAL_ANSWER_MARKER: &str = "Final Answer:";

/// Cap on the observation text relayed to the client per step.
const OBSERVATION_PREVIEW_CHARS: usize = 500;

/// Reason → Act → Observe.
///
/// Each step surfaces the model's reasoning, executes the requested tool
/// calls, and relays a truncated observation.  The loop ends when the model
/// emits the final-answer marker, answers without tools, or exhausts the
/// step budget.
pub struct ReActAgentLoop {
    llm: Arc<LlmCaller>,
    executor: Arc<ToolExecutor>,
}

impl ReActAgentLoop {
    pub fn new(llm: Arc<LlmCaller>, executor: Arc<ToolExecutor>) -> Self {
        Self { llm, executor }
    }

    fn extract_final_answer(content: &str) -> Option<String> {
        content
            .find(FINAL_ANSWER_MARKER)
            .map(|idx| content[idx + FINAL_ANSWER_MARKER.len()..].trim().to_string())
    }

    fn observation_preview(content: &str) -> String {
        if content.chars().count() <= OBSERVATION_PREVIEW_CHARS {
            return content.to_string();
        }
        let head: String = content.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}

#[async_trait]
impl AgentLoop for ReActAgentLoop {
    async fn run(&self, params: AgentRunParams<'_>) -> anyhow::Result<AgentResult> {
        params
            .events
            .handle(AgentEvent::new(
                "agent_start",
                json!({"max_steps": params.max_steps, "strategy": "react"}),
            ))
            .await;

        let mut messages = params.messages.clone();
        let mut steps = 0u32;
        let mut final_answer: Option<String> = None;

        while steps < params.max_steps && final_answer.is_none() {
            steps += 1;
            params
                .events
                .handle(AgentEvent::new("agent_turn_start", json!({"step": steps})))
                .await;

            let tools = self
                .executor
                .manager()
                .get_tools_schema(params.selected_tools);
            let response =
                call_llm_with_tools(&self.llm, &params, messages.clone(), tools, "auto").await?;

            if !response.content.is_empty() {
                params
                    .events
                    .handle(AgentEvent::new(
                        "agent_reason",
                        json!({"message": response.content, "step": steps}),
                    ))
                    .await;
            }

            if let Some(answer) = Self::extract_final_answer(&response.content) {
                final_answer = Some(answer);
                break;
            }

            if !response.has_tool_calls() {
                // Tool-free reply without the marker: the text is the answer.
                if response.content.is_empty() {
                    break;
                }
                final_answer = Some(response.content);
                break;
            }

            // Act: execute each requested tool, then observe.
            for call in response.tool_calls.clone() {
                params
                    .events
                    .handle(AgentEvent::new(
                        "agent_tool_start",
                        json!({"tool": call.function.name}),
                    ))
                    .await;
                let result = run_one_tool(
                    &self.executor,
                    &call,
                    &response.content,
                    &params,
                    &mut messages,
                )
                .await;
                params
                    .events
                    .handle(AgentEvent::new(
                        "agent_tool_complete",
                        json!({"tool": call.function.name, "result": result.success}),
                    ))
                    .await;
                params
                    .events
                    .handle(AgentEvent::new(
                        "agent_observe",
                        json!({
                            "message": Self::observation_preview(&result.content),
                            "step": steps,
                        }),
                    ))
                    .await;
            }
        }

        let final_answer = match final_answer {
            Some(answer) => {
                emit_final_answer(&params, &answer).await;
                answer
            }
            None => summarize_remaining(&self.llm, &params, &messages).await?,
        };

        params
            .events
            .handle(AgentEvent::new("agent_completion", json!({"steps": steps})))
            .await;

        let mut metadata = Map::new();
        metadata.insert("agent_mode".into(), json!(true));
        metadata.insert("strategy".into(), json!("react"));
        Ok(AgentResult {
            final_answer,
            steps,
            metadata,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
