// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use maestro_config::Config;

/// Which tools need user approval before execution.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    require_approval: HashSet<String>,
    force_globally: bool,
}

impl ApprovalPolicy {
    pub fn new(require_approval: HashSet<String>, force_globally: bool) -> Self {
        Self {
            require_approval,
            force_globally,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            require_approval: config.approval_required_tools(),
            force_globally: config.app.force_tool_approval_globally,
        }
    }

    /// Approval is required when the fully qualified name is listed or the
    /// global force flag is set.
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        self.force_globally || self.require_approval.contains(tool_name)
    }
}

/// The client's answer to an elicitation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElicitationResponse {
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_arguments: Option<Map<String, Value>>,
}

impl ElicitationResponse {
    pub fn approved() -> Self {
        Self {
            approved: true,
            edited_arguments: None,
        }
    }

    pub fn rejected() -> Self {
        Self::default()
    }

    pub fn edited(arguments: Map<String, Value>) -> Self {
        Self {
            approved: true,
            edited_arguments: Some(arguments),
        }
    }
}

/// Pairs outstanding elicitation requests with their eventual responses.
///
/// The executor registers an id and awaits; the transport resolves it when
/// the client answers.  A dropped pending entry (disconnect, shutdown)
/// resolves as rejection so tools fail closed.
#[derive(Default)]
pub struct ElicitationBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<ElicitationResponse>>>,
}

impl ElicitationBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, elicitation_id: &str) -> oneshot::Receiver<ElicitationResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(elicitation_id.to_string(), tx);
        rx
    }

    /// Deliver the client's response.  Returns false for unknown ids.
    pub async fn resolve(&self, elicitation_id: &str, response: ElicitationResponse) -> bool {
        match self.pending.lock().await.remove(elicitation_id) {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                warn!("elicitation response for unknown id {elicitation_id}");
                false
            }
        }
    }

    /// Drop an outstanding request (the waiting executor sees rejection).
    pub async fn cancel(&self, elicitation_id: &str) {
        self.pending.lock().await.remove(elicitation_id);
    }

    /// Await the response for a registered id.  Channel loss means rejection.
    pub async fn await_response(
        &self,
        rx: oneshot::Receiver<ElicitationResponse>,
    ) -> ElicitationResponse {
        rx.await.unwrap_or_else(|_| {
            warn!("elicitation channel closed before response, treating as rejection");
            ElicitationResponse::rejected()
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
