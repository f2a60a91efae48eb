//! Username to user-id resolution.

use std::collections::BTreeMap;

use async_trait::async_trait;
use schemaman_state::UserId;

use crate::config::ConnectionSpec;
use crate::error::{Result, VcmError};

/// Maps a username to a stable user identifier.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, username: &str) -> Result<UserId>;
}

/// Resolver over a fixed username table.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityResolver {
    users: BTreeMap<String, UserId>,
}

impl StaticIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `users` table of a connection spec.
    pub fn from_spec(spec: &ConnectionSpec) -> Self {
        Self {
            users: spec
                .users
                .iter()
                .map(|(name, id)| (name.clone(), UserId(*id)))
                .collect(),
        }
    }

    pub fn with_user(mut self, username: impl Into<String>, user_id: UserId) -> Self {
        self.users.insert(username.into(), user_id);
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve(&self, username: &str) -> Result<UserId> {
        self.users
            .get(username)
            .copied()
            .ok_or_else(|| VcmError::Identity(format!("unknown user: {username}")))
    }
}
