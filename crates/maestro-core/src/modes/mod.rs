// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod plain;
mod rag;
mod tools;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use agent::AgentModeRunner;
pub use plain::PlainModeRunner;
pub use rag::RagModeRunner;
pub use tools::ToolsModeRunner;

/// The structured result of one request, returned to non-streaming callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOutcome {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ChatOutcome {
    pub fn chat_response(message: impl Into<String>) -> Self {
        Self {
            kind: "chat_response".into(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "error".into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    pub fn to_value(&self) -> Value {
        json!({"type": self.kind, "message": self.message})
    }
}
