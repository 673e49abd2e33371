// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use tracing::debug;

use maestro_domain::AuthCheck;
use maestro_mcp::{McpToolManager, CANVAS_TOOL_NAME};

/// Filters selected tools down to those the user's groups allow.
pub struct ToolAuthorizationService {
    manager: Option<Arc<McpToolManager>>,
    auth: Arc<dyn AuthCheck>,
}

impl ToolAuthorizationService {
    pub fn new(manager: Option<Arc<McpToolManager>>, auth: Arc<dyn AuthCheck>) -> Self {
        Self { manager, auth }
    }

    /// Keep only tools whose server admits the user.
    ///
    /// The canvas pseudo-tool is always admitted.  Server matching uses the
    /// longest authorized prefix so server names containing underscores
    /// resolve correctly.  On any internal failure the selection passes
    /// through unfiltered.
    pub async fn filter_authorized_tools(
        &self,
        selected_tools: &[String],
        user_email: Option<&str>,
    ) -> Vec<String> {
        let Some(manager) = &self.manager else {
            return selected_tools.to_vec();
        };
        if selected_tools.is_empty() {
            return Vec::new();
        }

        let user = user_email.unwrap_or("");
        let mut authorized: Vec<String> = Vec::new();
        for server in manager.available_servers() {
            let groups = manager.server_groups(server);
            if groups.is_empty() {
                authorized.push(server.to_string());
                continue;
            }
            for group in groups {
                if self.auth.is_member(user, group).await {
                    authorized.push(server.to_string());
                    break;
                }
            }
        }
        // Longest prefix first: "pptx_generator" must win over "pptx".
        authorized.sort_by_key(|server| std::cmp::Reverse(server.len()));

        let mut filtered = Vec::new();
        for tool in selected_tools {
            if tool == CANVAS_TOOL_NAME {
                filtered.push(tool.clone());
                continue;
            }
            let matched = authorized
                .iter()
                .any(|server| tool.starts_with(&format!("{server}_")));
            if matched {
                filtered.push(tool.clone());
            } else {
                debug!("dropping tool {tool}: no authorized server matches");
            }
        }
        filtered
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
