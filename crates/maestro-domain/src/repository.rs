// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::message::Message;
use crate::session::Session;

/// Session storage port.  Implementations must be safe for serialized access
/// per session id; the orchestrator guarantees no concurrent requests per
/// session (see [`SessionLocks`]).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Option<Session>;
    async fn create(&self, session: Session) -> Session;
    /// Fails with `SessionNotFound` when the session does not exist.
    async fn update(&self, session: Session) -> Result<Session, DomainError>;
    async fn delete(&self, id: Uuid) -> bool;
    async fn exists(&self, id: Uuid) -> bool;
}

/// Process-local, non-persistent session store.  The default repository.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    async fn create(&self, session: Session) -> Session {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        session
    }

    async fn update(&self, session: Session) -> Result<Session, DomainError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.id) {
            return Err(DomainError::session_not_found(format!(
                "Session {} not found",
                session.id
            )));
        }
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn delete(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    async fn exists(&self, id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&id)
    }
}

/// Per-session request serialization.
///
/// The orchestrator acquires the session's guard for the whole of `execute`,
/// so two requests for the same session id never interleave while requests
/// for distinct sessions run in parallel.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry for an ended session.
    pub async fn discard(&self, id: Uuid) {
        self.locks.lock().await.remove(&id);
    }
}

/// Saved-conversation port.  Persistence failures are non-fatal for the chat
/// pipeline; the orchestrator logs and continues.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn save_conversation(
        &self,
        user_email: &str,
        conversation_id: &str,
        messages: &[Message],
    ) -> Result<(), DomainError>;

    async fn get_conversation(
        &self,
        user_email: &str,
        conversation_id: &str,
    ) -> Option<Vec<Message>>;
}

#[derive(Debug, Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<(String, String), Vec<Message>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn save_conversation(
        &self,
        user_email: &str,
        conversation_id: &str,
        messages: &[Message],
    ) -> Result<(), DomainError> {
        self.conversations.write().await.insert(
            (user_email.to_string(), conversation_id.to_string()),
            messages.to_vec(),
        );
        Ok(())
    }

    async fn get_conversation(
        &self,
        user_email: &str,
        conversation_id: &str,
    ) -> Option<Vec<Message>> {
        self.conversations
            .read()
            .await
            .get(&(user_email.to_string(), conversation_id.to_string()))
            .cloned()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
