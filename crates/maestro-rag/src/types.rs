// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use maestro_model::ChatMessage;

/// The answer from one RAG query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Whether the backend produced a finished completion (as opposed to
    /// retrieved context the model still has to synthesize).
    #[serde(default)]
    pub is_completion: bool,
}

/// A corpus advertised by a RAG backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSource {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_level: Option<String>,
}

/// Per-source entry in the discovery payload sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiSource {
    pub id: String,
    pub name: String,
    pub label: String,
    pub description: String,
    #[serde(rename = "authRequired")]
    pub auth_required: bool,
    pub selected: bool,
    #[serde(rename = "complianceLevel", skip_serializing_if = "Option::is_none")]
    pub compliance_level: Option<String>,
}

/// One RAG server with its sources, shaped for the client's source picker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagServerInfo {
    pub server: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub icon: String,
    #[serde(rename = "complianceLevel", skip_serializing_if = "Option::is_none")]
    pub compliance_level: Option<String>,
    pub sources: Vec<UiSource>,
}

/// A single RAG backend (one server).
#[async_trait]
pub trait RagBackend: Send + Sync {
    async fn discover_data_sources(&self, username: &str)
        -> anyhow::Result<Vec<DiscoveredSource>>;

    /// Query one corpus.  `source_id` is the unqualified id (no server
    /// prefix).
    async fn query(
        &self,
        username: &str,
        source_id: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<RagResponse>;
}
