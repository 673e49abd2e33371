// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use maestro_model::LlmCaller;
use maestro_tools::ToolExecutor;

use super::{
    call_llm_with_tools, emit_final_answer, extract_named_tool_args, run_one_tool,
    summarize_remaining, AgentEvent, AgentLoop, AgentResult, AgentRunParams,
};

const FINISHED_TOOL: &str = "finished";

/// Pure action loop: execute tools until the model calls the synthetic
/// `finished` control tool.
///
/// No explicit reasoning or observation steps — the fastest strategy with
/// minimal overhead.  Exit conditions: `finished(final_answer)`, a tool-free
/// text response, or the step budget.
pub struct ActAgentLoop {
    llm: Arc<LlmCaller>,
    executor: Arc<ToolExecutor>,
}

impl ActAgentLoop {
    pub fn new(llm: Arc<LlmCaller>, executor: Arc<ToolExecutor>) -> Self {
        Self { llm, executor }
    }

    fn finished_tool_schema() -> Value {
        json!({
            "type": "function",
            "function": {
                "name": FINISHED_TOOL,
                "description": "Call this when you have completed the task and are ready to \
                                provide a final answer to the user.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "final_answer": {
                            "type": "string",
                            "description": "The final response to provide to the user"
                        }
                    },
                    "required": ["final_answer"],
                    "additionalProperties": false
                }
            }
        })
    }
}

#[async_trait]
impl AgentLoop for ActAgentLoop {
    async fn run(&self, params: AgentRunParams<'_>) -> anyhow::Result<AgentResult> {
        params
            .events
            .handle(AgentEvent::new(
                "agent_start",
                json!({"max_steps": params.max_steps, "strategy": "act"}),
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

            let mut tools = vec![Self::finished_tool_schema()];
            tools.extend(
                self.executor
                    .manager()
                    .get_tools_schema(params.selected_tools),
            );

            // "required" forces tool calling during the act phase.
            let response =
                call_llm_with_tools(&self.llm, &params, messages.clone(), tools, "required")
                    .await?;

            if response.has_tool_calls() {
                if let Some(args) = extract_named_tool_args(&response.tool_calls, FINISHED_TOOL) {
                    if let Some(answer) = args.get("final_answer").and_then(Value::as_str) {
                        final_answer = Some(answer.to_string());
                        break;
                    }
                }

                let first_call = response
                    .tool_calls
                    .iter()
                    .find(|tc| tc.function.name != FINISHED_TOOL);
                match first_call {
                    Some(call) => {
                        run_one_tool(
                            &self.executor,
                            call,
                            &response.content,
                            &params,
                            &mut messages,
                        )
                        .await;
                    }
                    None => {
                        // Only a malformed finished call: fall back to text.
                        let answer = if response.content.is_empty() {
                            "Task completed.".to_string()
                        } else {
                            response.content
                        };
                        final_answer = Some(answer);
                        break;
                    }
                }
            } else {
                let answer = if response.content.is_empty() {
                    "Task completed.".to_string()
                } else {
                    response.content
                };
                final_answer = Some(answer);
                break;
            }
        }

        let final_answer = match final_answer {
            Some(answer) => {
                emit_final_answer(&params, &answer).await;
                answer
            }
            // Budget exhausted without an answer: forced summarization.
            None => summarize_remaining(&self.llm, &params, &messages).await?,
        };

        params
            .events
            .handle(AgentEvent::new("agent_completion", json!({"steps": steps})))
            .await;

        let mut metadata = Map::new();
        metadata.insert("agent_mode".into(), json!(true));
        metadata.insert("strategy".into(), json!("act"));
        Ok(AgentResult {
            final_answer,
            steps,
            metadata,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests_support::{
        agent_context, noop_publisher, plain_executor, RecordingSink,
    };
    use maestro_model::ScriptedMockBackend;

    fn params<'a>(
        context: &'a super::super::AgentContext,
        sink: &'a RecordingSink,
        publisher: &'a Arc<dyn maestro_events::EventPublisher>,
        max_steps: u32,
    ) -> AgentRunParams<'a> {
        AgentRunParams {
            model: "m",
            messages: vec![maestro_model::ChatMessage::user("do the task")],
            context,
            selected_tools: &[],
            data_sources: &[],
            max_steps,
            temperature: None,
            events: sink,
            streaming: false,
            publisher,
        }
    }

    #[tokio::test]
    async fn finished_tool_ends_the_loop() {
        let backend = ScriptedMockBackend::new(vec![ScriptedMockBackend::tool_call_script(
            "c1",
            FINISHED_TOOL,
            r#"{"final_answer": "all done"}"#,
        )]);
        let llm = Arc::new(LlmCaller::new(Arc::new(backend)));
        let executor = plain_executor().await;
        let agent_loop = ActAgentLoop::new(llm, executor);

        let context = agent_context();
        let sink = RecordingSink::default();
        let publisher = noop_publisher();
        let result = agent_loop
            .run(params(&context, &sink, &publisher, 5))
            .await
            .unwrap();

        assert_eq!(result.final_answer, "all done");
        assert_eq!(result.steps, 1);
        assert_eq!(result.metadata["strategy"], "act");

        let kinds = sink.kinds().await;
        assert_eq!(kinds.first().map(String::as_str), Some("agent_start"));
        assert_eq!(kinds.last().map(String::as_str), Some("agent_completion"));
    }

    #[tokio::test]
    async fn text_response_becomes_final_answer() {
        let backend = ScriptedMockBackend::always_text("here is the answer");
        let llm = Arc::new(LlmCaller::new(Arc::new(backend)));
        let agent_loop = ActAgentLoop::new(llm, plain_executor().await);

        let context = agent_context();
        let sink = RecordingSink::default();
        let publisher = noop_publisher();
        let result = agent_loop
            .run(params(&context, &sink, &publisher, 5))
            .await
            .unwrap();
        assert_eq!(result.final_answer, "here is the answer");
        assert_eq!(result.steps, 1);
    }

    #[tokio::test]
    async fn tool_call_then_finished_runs_two_steps() {
        let backend = ScriptedMockBackend::new(vec![
            ScriptedMockBackend::tool_call_script("c1", "reader_read", "{}"),
            ScriptedMockBackend::tool_call_script(
                "c2",
                FINISHED_TOOL,
                r#"{"final_answer": "read it"}"#,
            ),
        ]);
        let llm = Arc::new(LlmCaller::new(Arc::new(backend)));
        let agent_loop = ActAgentLoop::new(llm, plain_executor().await);

        let context = agent_context();
        let sink = RecordingSink::default();
        let publisher = noop_publisher();
        let result = agent_loop
            .run(params(&context, &sink, &publisher, 5))
            .await
            .unwrap();

        assert_eq!(result.final_answer, "read it");
        assert_eq!(result.steps, 2);
        // The intermediate tool execution surfaced its results for ingestion.
        assert!(sink.kinds().await.contains(&"agent_tool_results".to_string()));
    }

    #[tokio::test]
    async fn max_steps_forces_summarization() {
        // Never finishes: every turn calls a user tool; the final script is
        // the forced plain summarization.
        let backend = ScriptedMockBackend::new(vec![
            ScriptedMockBackend::tool_call_script("c1", "reader_read", "{}"),
            ScriptedMockBackend::tool_call_script("c2", "reader_read", "{}"),
            ScriptedMockBackend::text_script("summary of partial work"),
        ]);
        let llm = Arc::new(LlmCaller::new(Arc::new(backend)));
        let agent_loop = ActAgentLoop::new(llm, plain_executor().await);

        let context = agent_context();
        let sink = RecordingSink::default();
        let publisher = noop_publisher();
        let result = agent_loop
            .run(params(&context, &sink, &publisher, 2))
            .await
            .unwrap();

        assert_eq!(result.final_answer, "summary of partial work");
        assert_eq!(result.steps, 2);

        // Exactly two turn starts with steps 1 and 2.
        let turns: Vec<Value> = sink
            .events()
            .await
            .into_iter()
            .filter(|e| e.kind == "agent_turn_start")
            .map(|e| e.payload["step"].clone())
            .collect();
        assert_eq!(turns, vec![json!(1), json!(2)]);
    }
}
