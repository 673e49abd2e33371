// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use maestro_config::{expand_env, expand_env_optional, RagSourceConfig};
use maestro_domain::{AllowAll, AuthCheck, DomainError};
use maestro_model::{ChatMessage, RagQuery, RagQueryResult};

use crate::http::HttpRagBackend;
use crate::types::{RagBackend, RagResponse, RagServerInfo, UiSource};

/// MCP-backed retrieval port.  The synthesize result is a mapping with
/// `results.answer` and optional `meta_data`.
#[async_trait]
pub trait McpRagSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        username: &str,
        query: &str,
        qualified_sources: &[String],
    ) -> anyhow::Result<Value>;
}

/// Aggregates RAG discovery and querying across HTTP and MCP sources.
///
/// Qualified data sources use the `"<server>:<source_id>"` form; the server
/// half selects the backend, the unqualified id goes to the backend itself.
pub struct UnifiedRagService {
    sources: HashMap<String, RagSourceConfig>,
    backends: tokio::sync::RwLock<HashMap<String, Arc<dyn RagBackend>>>,
    auth: Arc<dyn AuthCheck>,
    mcp_synthesizer: Option<Arc<dyn McpRagSynthesizer>>,
}

impl UnifiedRagService {
    pub fn new(sources: HashMap<String, RagSourceConfig>) -> Self {
        Self {
            sources,
            backends: tokio::sync::RwLock::new(HashMap::new()),
            auth: Arc::new(AllowAll),
            mcp_synthesizer: None,
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthCheck>) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_mcp_synthesizer(mut self, synthesizer: Arc<dyn McpRagSynthesizer>) -> Self {
        self.mcp_synthesizer = Some(synthesizer);
        self
    }

    /// Pre-seed a backend (tests, custom transports).
    pub async fn register_backend(&self, server: impl Into<String>, backend: Arc<dyn RagBackend>) {
        self.backends.write().await.insert(server.into(), backend);
    }

    /// Get or build the HTTP backend for a source.  Environment references
    /// in the URL are required; a missing variable is a configuration error.
    async fn backend_for(
        &self,
        server: &str,
        config: &RagSourceConfig,
    ) -> anyhow::Result<Arc<dyn RagBackend>> {
        if let Some(backend) = self.backends.read().await.get(server) {
            return Ok(backend.clone());
        }

        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("RAG source {server} has no url configured"))?;
        let url = expand_env(url)
            .map_err(|e| anyhow::Error::new(DomainError::configuration(e.to_string())))?;
        let bearer_token = config
            .bearer_token
            .as_deref()
            .and_then(expand_env_optional);

        let backend: Arc<dyn RagBackend> = Arc::new(HttpRagBackend::new(
            url,
            bearer_token,
            config.top_k,
            config.timeout,
        )?);
        info!("created HTTP RAG client for source: {server}");
        self.backends
            .write()
            .await
            .insert(server.to_string(), backend.clone());
        Ok(backend)
    }

    async fn is_authorized(&self, username: &str, groups: &[String]) -> bool {
        if groups.is_empty() {
            return true;
        }
        for group in groups {
            if self.auth.is_member(username, group).await {
                return true;
            }
        }
        false
    }

    /// Discover data sources across all configured backends.
    ///
    /// Disabled and unauthorized sources are skipped; per-source failures are
    /// logged and do not abort discovery of the remaining sources.
    pub async fn discover_data_sources(&self, username: &str) -> Vec<RagServerInfo> {
        let mut servers = Vec::new();

        let mut names: Vec<&String> = self.sources.keys().collect();
        names.sort();

        for name in names {
            let config = &self.sources[name];
            if !config.enabled {
                continue;
            }
            if !self.is_authorized(username, &config.groups).await {
                debug!("user {username} not authorized for RAG source {name}");
                continue;
            }
            if config.kind != "http" {
                // MCP sources are surfaced through the MCP synthesizer's own
                // discovery; only HTTP sources are listed here.
                debug!("skipping MCP source {name} in HTTP discovery");
                continue;
            }

            match self.discover_http_source(name, config, username).await {
                Ok(Some(info)) => servers.push(info),
                Ok(None) => {}
                Err(e) => {
                    error!("error discovering RAG source {name}, continuing with remaining sources: {e:#}");
                }
            }
        }

        servers
    }

    async fn discover_http_source(
        &self,
        server: &str,
        config: &RagSourceConfig,
        username: &str,
    ) -> anyhow::Result<Option<RagServerInfo>> {
        let backend = self.backend_for(server, config).await?;
        let sources = backend.discover_data_sources(username).await?;
        if sources.is_empty() {
            debug!("no data sources found for HTTP source {server}");
            return Ok(None);
        }

        let ui_sources = sources
            .into_iter()
            .map(|s| UiSource {
                id: s.id,
                name: s.label.clone(),
                label: s.label,
                description: s.description,
                auth_required: true,
                selected: false,
                compliance_level: s.compliance_level,
            })
            .collect();

        Ok(Some(RagServerInfo {
            server: server.to_string(),
            display_name: config
                .display_name
                .clone()
                .unwrap_or_else(|| server.to_string()),
            icon: config.icon.clone().unwrap_or_else(|| "database".to_string()),
            compliance_level: config.compliance_level.clone(),
            sources: ui_sources,
        }))
    }

    /// Query a RAG source given a qualified `"server:source_id"` identifier.
    pub async fn query_rag(
        &self,
        username: &str,
        qualified_data_source: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<RagResponse> {
        let (server, source_id) = qualified_data_source
            .split_once(':')
            .ok_or_else(|| {
                anyhow::anyhow!("could not find server for source: {qualified_data_source}")
            })?;

        info!("routing RAG query: server={server}, source={source_id}, user={username}");

        let config = self
            .sources
            .get(server)
            .ok_or_else(|| anyhow::anyhow!("RAG source not found: {server}"))?;

        match config.kind.as_str() {
            "http" => {
                let backend = self.backend_for(server, config).await?;
                backend.query(username, source_id, messages).await
            }
            "mcp" => {
                let synthesizer = self.mcp_synthesizer.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("MCP RAG synthesizer not configured for MCP RAG queries")
                })?;

                // The query is the latest user message.
                let query = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == "user")
                    .map(|m| m.content.clone())
                    .unwrap_or_default();

                let response = synthesizer
                    .synthesize(username, &query, &[qualified_data_source.to_string()])
                    .await?;

                let answer = response["results"]["answer"]
                    .as_str()
                    .unwrap_or("No response from MCP RAG.")
                    .to_string();
                let metadata = response.get("meta_data").cloned().filter(|m| !m.is_null());
                Ok(RagResponse {
                    content: answer,
                    metadata,
                    is_completion: true,
                })
            }
            other => anyhow::bail!("unknown RAG source type: {other}"),
        }
    }

    /// Drop cached backends so config changes take effect.
    pub async fn invalidate_cache(&self, server: Option<&str>) {
        let mut backends = self.backends.write().await;
        match server {
            Some(server) => {
                backends.remove(server);
            }
            None => backends.clear(),
        }
    }
}

#[async_trait]
impl RagQuery for UnifiedRagService {
    async fn query(
        &self,
        user_email: &str,
        qualified_source: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<RagQueryResult> {
        let response = self.query_rag(user_email, qualified_source, messages).await?;
        let source_label = qualified_source
            .split_once(':')
            .map(|(_, source)| source)
            .unwrap_or(qualified_source)
            .to_string();
        Ok(RagQueryResult {
            content: response.content,
            source_label,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
