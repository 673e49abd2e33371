// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;

/// Group-membership backend port.
///
/// Backs both tool-server ACLs and RAG source authorization.  The real
/// implementation talks to a directory service; the default admits everyone
/// (no restriction configured means unrestricted).
#[async_trait]
pub trait AuthCheck: Send + Sync {
    async fn is_member(&self, username: &str, group: &str) -> bool;
}

/// Admits every user to every group.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthCheck for AllowAll {
    async fn is_member(&self, _username: &str, _group: &str) -> bool {
        true
    }
}

/// Fixed membership table, used in tests and static deployments.
#[derive(Debug, Default)]
pub struct StaticGroups {
    memberships: std::collections::HashSet<(String, String)>,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, username: impl Into<String>, group: impl Into<String>) -> Self {
        self.memberships.insert((username.into(), group.into()));
        self
    }
}

#[async_trait]
impl AuthCheck for StaticGroups {
    async fn is_member(&self, username: &str, group: &str) -> bool {
        self.memberships
            .contains(&(username.to_string(), group.to_string()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_admits_everyone() {
        assert!(AllowAll.is_member("anyone@example.com", "any-group").await);
    }

    #[tokio::test]
    async fn static_groups_respects_grants() {
        let auth = StaticGroups::new().grant("a@example.com", "analysts");
        assert!(auth.is_member("a@example.com", "analysts").await);
        assert!(!auth.is_member("a@example.com", "admins").await);
        assert!(!auth.is_member("b@example.com", "analysts").await);
    }
}
