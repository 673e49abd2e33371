// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod caller;
mod classify;
mod mock;
mod provider;
mod types;

pub use caller::{LlmCaller, RagQuery, RagQueryResult};
pub use classify::{classify, Classified};
pub use mock::{EchoBackend, MockEvent, ScriptedMockBackend};
pub use provider::{CompletionBackend, TokenStream};
pub use types::{
    normalize_tool_call, ChatMessage, CompletionRequest, FunctionCallData, LlmResponse, StreamItem,
    ToolCallData,
};
