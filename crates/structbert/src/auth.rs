//! Email/password credential verification against a user record store
mod password;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use password::{hash_password, verify_password};
pub use store::{MemoryUserStore, UserStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email and password are required")]
    MissingFields,

    /// Deliberately the same for an unknown email and a wrong password
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("An account with this email already exists")]
    EmailTaken,

    #[error("User store error: {0}")]
    Store(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

/// A stored user. `password` holds the bcrypt hash, never the plain password.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// The fields of a user record that may leave the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for PublicUser {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            created_at: record.created_at,
        }
    }
}

impl UserRecord {
    /// A new record for `email`, hashing `password` with a fresh salt
    pub async fn new(name: Option<String>, email: &str, password: &str) -> Result<Self, AuthError> {
        let password = password::hash_blocking(password.to_string()).await?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            email: email.to_string(),
            password,
            created_at: Utc::now(),
        })
    }
}

/// Check an email/password pair, returning the user without its password hash.
///
/// Both failure causes produce [`AuthError::InvalidCredentials`], and an unknown email still
/// costs one bcrypt comparison. Hashing runs on the blocking pool.
pub async fn verify_credentials(
    store: &dyn UserStore,
    email: &str,
    password: &str,
) -> Result<PublicUser, AuthError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }

    let user = store.find_by_email(email).await?;
    let stored = user.as_ref().map(|user| user.password.clone());
    let matched = password::verify_blocking(password.to_string(), stored).await?;

    match user {
        Some(user) if matched => {
            tracing::info!(user_id = %user.id, "login succeeded");
            Ok(user.into())
        }
        _ => {
            tracing::debug!("login rejected");
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Create a user account
pub async fn register(
    store: &dyn UserStore,
    name: Option<&str>,
    email: &str,
    password: &str,
) -> Result<PublicUser, AuthError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    let name = name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from);

    let record = UserRecord::new(name, email, password).await?;
    store.insert(record.clone()).await?;
    tracing::info!(user_id = %record.id, "registered user");
    Ok(record.into())
}
