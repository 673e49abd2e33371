// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod auth;
mod errors;
mod message;
mod repository;
mod session;

pub use auth::{AllowAll, AuthCheck, StaticGroups};
pub use errors::{DomainError, ErrorKind};
pub use message::{
    Artifact, ConversationHistory, Message, Role, ToolCall, ToolResult,
};
pub use repository::{
    ConversationRepository, InMemoryConversationRepository, InMemorySessionRepository,
    SessionLocks, SessionRepository,
};
pub use session::{ExtractMode, FileRef, FileSource, Session, SessionContext};
