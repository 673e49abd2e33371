// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::types::{CompletionRequest, LlmResponse, StreamItem};

/// A stream of incremental tokens, optionally terminated by a
/// [`StreamItem::Final`] carrying tool calls.
pub type TokenStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamItem>> + Send>>;

/// The external LLM provider adapter.
///
/// Provider-specific concerns (HTTP wire formats, API keys, SDK global state)
/// live entirely behind this port; the pipeline only ever sees requests and
/// token streams.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Human-readable backend name for status display.
    fn name(&self) -> &str;

    /// Send a completion request and wait for the full response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<LlmResponse>;

    /// Send a completion request and return a token stream.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<TokenStream>;
}
