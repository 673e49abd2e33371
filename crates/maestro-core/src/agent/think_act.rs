// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use maestro_model::{LlmCaller, LlmResponse};
use maestro_tools::ToolExecutor;

use super::{
    call_llm_with_tools, emit_final_answer, extract_named_tool_args, run_one_tool,
    summarize_remaining, AgentEvent, AgentLoop, AgentResult, AgentRunParams,
};

const THINK_TOOL: &str = "agent_think";

/// Think → Act interleaving: a planning `agent_think` pseudo-tool alternates
/// with at most one user-tool call per step, until think returns
/// `finish = true` or the budget runs out.
pub struct ThinkActAgentLoop {
    llm: Arc<LlmCaller>,
    executor: Arc<ToolExecutor>,
}

impl ThinkActAgentLoop {
    pub fn new(llm: Arc<LlmCaller>, executor: Arc<ToolExecutor>) -> Self {
        Self { llm, executor }
    }

    fn think_tool_schema() -> Vec<Value> {
        vec![json!({
            "type": "function",
            "function": {
                "name": THINK_TOOL,
                "description": "Think step: analyze the user input and context, outline the \
                                next action or finish. Be concise, at most two sentences. \
                                You are only thinking, not acting right now.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "finish": {"type": "boolean"},
                        "final_answer": {"type": "string"},
                        "next_action_hint": {"type": "string"}
                    },
                    "additionalProperties": false
                }
            }
        })]
    }

    /// Think responses may carry their payload as tool arguments or as plain
    /// JSON content; accept both.
    fn parse_think_args(response: &LlmResponse) -> Map<String, Value> {
        if let Some(args) = extract_named_tool_args(&response.tool_calls, THINK_TOOL) {
            return args;
        }
        match serde_json::from_str::<Value>(&response.content) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    fn finish_answer(args: &Map<String, Value>, response: &LlmResponse) -> Option<String> {
        if !args.get("finish").and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }
        let answer = args
            .get("final_answer")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| response.content.clone());
        Some(answer)
    }
}

#[async_trait]
impl AgentLoop for ThinkActAgentLoop {
    async fn run(&self, params: AgentRunParams<'_>) -> anyhow::Result<AgentResult> {
        params
            .events
            .handle(AgentEvent::new(
                "agent_start",
                json!({"max_steps": params.max_steps, "strategy": "think-act"}),
            ))
            .await;

        let mut messages = params.messages.clone();
        let mut steps = 0u32;
        let mut final_answer: Option<String> = None;

        // First think.
        steps += 1;
        params
            .events
            .handle(AgentEvent::new("agent_turn_start", json!({"step": steps})))
            .await;
        let first_think = self
            .llm
            .call_with_tools(
                params.model,
                messages.clone(),
                Self::think_tool_schema(),
                "required",
                params.temperature,
                params.context.user_email.as_deref(),
            )
            .await?;
        let think_args = Self::parse_think_args(&first_think);
        params
            .events
            .handle(AgentEvent::new(
                "agent_reason",
                json!({"message": first_think.content, "step": steps}),
            ))
            .await;

        if let Some(answer) = Self::finish_answer(&think_args, &first_think) {
            final_answer = Some(answer);
        } else {
            // Action loop: one tool call, then think again.
            while steps < params.max_steps && final_answer.is_none() {
                let tools = self
                    .executor
                    .manager()
                    .get_tools_schema(params.selected_tools);

                if !tools.is_empty() {
                    let response =
                        call_llm_with_tools(&self.llm, &params, messages.clone(), tools, "auto")
                            .await?;

                    if response.has_tool_calls() {
                        let first_call = response.tool_calls[0].clone();
                        run_one_tool(
                            &self.executor,
                            &first_call,
                            &response.content,
                            &params,
                            &mut messages,
                        )
                        .await;
                    } else if !response.content.is_empty() {
                        final_answer = Some(response.content);
                        break;
                    }
                }

                // Think after the action.
                steps += 1;
                params
                    .events
                    .handle(AgentEvent::new("agent_turn_start", json!({"step": steps})))
                    .await;
                let think = self
                    .llm
                    .call_with_tools(
                        params.model,
                        messages.clone(),
                        Self::think_tool_schema(),
                        "required",
                        params.temperature,
                        params.context.user_email.as_deref(),
                    )
                    .await?;
                let think_args = Self::parse_think_args(&think);
                params
                    .events
                    .handle(AgentEvent::new(
                        "agent_reason",
                        json!({"message": think.content, "step": steps}),
                    ))
                    .await;
                if let Some(answer) = Self::finish_answer(&think_args, &think) {
                    final_answer = Some(answer);
                    break;
                }
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
        metadata.insert("strategy".into(), json!("think-act"));
        Ok(AgentResult {
            final_answer,
            steps,
            metadata,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
