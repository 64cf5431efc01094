use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use super::{AuthError, UserRecord};

/// Where user records live
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError>;

    /// Add a user, failing with [`AuthError::EmailTaken`] if the email is already in use
    async fn insert(&self, user: UserRecord) -> Result<(), AuthError>;
}

/// Process-local user store keyed by email
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserRecord>) -> Self {
        let users = users
            .into_iter()
            .map(|user| (user.email.clone(), user))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Seed the store from a JSON array of user records
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthError::Store(format!("reading {}: {}", path.display(), e)))?;
        let users: Vec<UserRecord> = serde_json::from_str(&raw)
            .map_err(|e| AuthError::Store(format!("parsing {}: {}", path.display(), e)))?;

        tracing::info!(count = users.len(), path = %path.display(), "loaded user records");
        Ok(Self::with_users(users))
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, AuthError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn insert(&self, user: UserRecord) -> Result<(), AuthError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.email) {
            return Err(AuthError::EmailTaken);
        }
        users.insert(user.email.clone(), user);
        Ok(())
    }
}
