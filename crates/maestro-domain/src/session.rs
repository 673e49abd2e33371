// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::message::ConversationHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSource {
    User,
    Tool,
}

/// How much of a file's content is surfaced in the files manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    None,
    #[default]
    Preview,
    Full,
}

/// Reference to a stored file, kept in the session context.  The payload
/// itself lives in the file store under `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub source: FileSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub extract_mode: ExtractMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_metadata: Option<Value>,
    /// Set when the file was produced by a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl FileRef {
    pub fn new(key: impl Into<String>, source: FileSource) -> Self {
        Self {
            key: key.into(),
            content_type: None,
            size: None,
            source,
            last_modified: None,
            extract_mode: ExtractMode::None,
            extracted_content: None,
            extracted_preview: None,
            extraction_metadata: None,
            tool_call_id: None,
        }
    }
}

/// Per-session request context: stored files plus conversation flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Filenames are unique within a session; insertion order is irrelevant.
    #[serde(default)]
    pub files: HashMap<String, FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Set when the session was restored from a saved conversation.
    #[serde(default)]
    pub restored: bool,
    #[serde(default)]
    pub agent_mode: bool,
    /// Incognito sessions are never persisted to the conversation repository.
    #[serde(default)]
    pub incognito: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A per-user conversation context.  `id` never changes; `updated_at` is
/// bumped on every mutation and never precedes `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: ConversationHistory,
    #[serde(default)]
    pub context: SessionContext,
    pub active: bool,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_email: None,
            created_at: now,
            updated_at: now,
            history: ConversationHistory::new(),
            context: SessionContext::default(),
            active: true,
        }
    }

    pub fn with_user(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }

    /// Bump the mutation timestamp, clamping so `updated_at >= created_at`.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now.max(self.created_at);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn new_session_has_unique_id() {
        assert_ne!(Session::new().id, Session::new().id);
    }

    #[test]
    fn new_session_starts_empty_and_active() {
        let s = Session::new();
        assert!(s.history.is_empty());
        assert!(s.context.files.is_empty());
        assert!(s.active);
    }

    #[test]
    fn updated_at_never_precedes_created_at() {
        let mut s = Session::new();
        s.touch();
        assert!(s.updated_at >= s.created_at);
    }

    #[test]
    fn touch_advances_updated_at() {
        let mut s = Session::new();
        let before = s.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        s.touch();
        assert!(s.updated_at >= before);
    }

    #[test]
    fn history_length_grows_with_messages() {
        let mut s = Session::new().with_user("user@example.com");
        s.history.add_message(Message::user("hi"));
        s.history.add_message(Message::assistant("hello"));
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.user_email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn extract_mode_defaults_to_preview() {
        assert_eq!(ExtractMode::default(), ExtractMode::Preview);
    }

    #[test]
    fn file_ref_round_trips() {
        let r = FileRef {
            content_type: Some("text/csv".into()),
            size: Some(120),
            ..FileRef::new("1755396436_d71d38d7_data.csv", FileSource::User)
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: FileRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, "1755396436_d71d38d7_data.csv");
        assert_eq!(back.source, FileSource::User);
    }

    #[test]
    fn session_serializes_and_deserializes() {
        let mut s = Session::new();
        s.context.conversation_id = Some("conv-1".into());
        let json = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.context.conversation_id.as_deref(), Some("conv-1"));
    }
}
