// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Seam to the user store.
//!
//! The admission layer never touches comment or user persistence directly;
//! it only needs to resolve a token subject, verify login credentials and
//! record a successful authentication. Deployments plug a database-backed
//! implementation in here; `MemoryDirectory` serves tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Failures reported by the backing user store.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

/// An authenticated principal.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

/// External collaborator resolving and updating principals.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a token subject. `None` means the subject does not exist.
    async fn lookup_user_by_id(&self, id: u64) -> Option<User>;

    /// Verify login credentials, returning the matching user.
    async fn verify_password(&self, email: &str, password: &str) -> Option<User>;

    /// Record that the user just authenticated. A failure here fails the
    /// whole authentication attempt.
    async fn update_last_authenticated(&self, user: &User) -> Result<(), DirectoryError>;
}

struct StoredUser {
    user: User,
    password: String,
}

/// In-memory directory for tests and local runs.
///
/// Stores passwords in the clear; a production directory verifies against
/// a salted hash instead.
#[derive(Default)]
pub struct MemoryDirectory {
    users: DashMap<u64, StoredUser>,
    fail_last_login: AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user with the given credentials.
    pub fn insert(&self, id: u64, username: &str, email: &str, password: &str) {
        self.users.insert(
            id,
            StoredUser {
                user: User {
                    id,
                    username: username.to_string(),
                    email: email.to_string(),
                    last_login: None,
                },
                password: password.to_string(),
            },
        );
    }

    /// Make every subsequent last-authenticated write fail, simulating a
    /// store outage.
    pub fn fail_last_login_writes(&self, fail: bool) {
        self.fail_last_login.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn lookup_user_by_id(&self, id: u64) -> Option<User> {
        self.users.get(&id).map(|stored| stored.user.clone())
    }

    async fn verify_password(&self, email: &str, password: &str) -> Option<User> {
        self.users
            .iter()
            .find(|stored| stored.user.email == email && stored.password == password)
            .map(|stored| stored.user.clone())
    }

    async fn update_last_authenticated(&self, user: &User) -> Result<(), DirectoryError> {
        if self.fail_last_login.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(
                "simulated write failure".to_string(),
            ));
        }
        let mut stored = self
            .users
            .get_mut(&user.id)
            .ok_or_else(|| DirectoryError::Unavailable("user vanished".to_string()))?;
        stored.user.last_login = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_and_password_verification() {
        let directory = MemoryDirectory::new();
        directory.insert(1, "alice", "alice@example.com", "hunter2");

        assert!(directory.lookup_user_by_id(1).await.is_some());
        assert!(directory.lookup_user_by_id(2).await.is_none());

        assert!(directory
            .verify_password("alice@example.com", "hunter2")
            .await
            .is_some());
        assert!(directory
            .verify_password("alice@example.com", "wrong")
            .await
            .is_none());
        assert!(directory
            .verify_password("bob@example.com", "hunter2")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn last_authenticated_is_recorded() {
        let directory = MemoryDirectory::new();
        directory.insert(1, "alice", "alice@example.com", "hunter2");

        let user = directory.lookup_user_by_id(1).await.unwrap();
        assert!(user.last_login.is_none());

        directory.update_last_authenticated(&user).await.unwrap();
        let user = directory.lookup_user_by_id(1).await.unwrap();
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn simulated_outage_fails_writes() {
        let directory = MemoryDirectory::new();
        directory.insert(1, "alice", "alice@example.com", "hunter2");
        directory.fail_last_login_writes(true);

        let user = directory.lookup_user_by_id(1).await.unwrap();
        assert!(directory.update_last_authenticated(&user).await.is_err());
    }
}
