// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use maestro_model::ChatMessage;

use crate::types::{DiscoveredSource, RagBackend, RagResponse};

/// RAG backend speaking the HTTP retrieval API.
///
/// `POST {base}/discover` lists corpora for a user; `POST {base}/query`
/// retrieves and synthesizes an answer from one corpus.
pub struct HttpRagBackend {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    top_k: u32,
}

impl HttpRagBackend {
    pub fn new(
        base_url: impl Into<String>,
        bearer_token: Option<String>,
        top_k: u32,
        timeout_seconds: u64,
    ) -> anyhow::Result<Self> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("building RAG HTTP client")?;
        Ok(Self {
            client,
            base_url,
            bearer_token,
            top_k,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{path}", self.base_url));
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

#[async_trait]
impl RagBackend for HttpRagBackend {
    async fn discover_data_sources(
        &self,
        username: &str,
    ) -> anyhow::Result<Vec<DiscoveredSource>> {
        debug!("discovering RAG sources at {} for {username}", self.base_url);
        let response = self
            .request("/discover")
            .json(&json!({ "username": username }))
            .send()
            .await
            .context("RAG discover request failed")?
            .error_for_status()
            .context("RAG discover returned an error status")?;

        #[derive(serde::Deserialize)]
        struct DiscoverPayload {
            #[serde(default)]
            sources: Vec<DiscoveredSource>,
        }
        let payload: DiscoverPayload = response
            .json()
            .await
            .context("decoding RAG discover payload")?;
        Ok(payload.sources)
    }

    async fn query(
        &self,
        username: &str,
        source_id: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<RagResponse> {
        debug!("querying RAG source {source_id} for {username}");
        let response = self
            .request("/query")
            .json(&json!({
                "username": username,
                "data_source": source_id,
                "messages": messages,
                "top_k": self.top_k,
            }))
            .send()
            .await
            .context("RAG query request failed")?
            .error_for_status()
            .context("RAG query returned an error status")?;

        response.json().await.context("decoding RAG query payload")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_trimmed() {
        let backend = HttpRagBackend::new("https://rag.local///", None, 5, 30).unwrap();
        assert_eq!(backend.base_url, "https://rag.local");
    }

    #[tokio::test]
    async fn unreachable_backend_surfaces_context() {
        // Reserved TEST-NET address: the connection fails fast without
        // touching a real service.
        let backend = HttpRagBackend::new("http://192.0.2.1:9", None, 5, 1).unwrap();
        let err = backend
            .discover_data_sources("u@e.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("discover"));
    }
}
