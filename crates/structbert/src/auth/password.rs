use lazy_static::lazy_static;

use super::AuthError;

#[cfg(not(test))]
const COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const COST: u32 = 4;

lazy_static! {
    /// Compared against when the email is unknown so both rejection paths cost one bcrypt check
    static ref DUMMY_HASH: Option<String> = bcrypt::hash("structbert-dummy-password", COST).ok();
}

/// Hash a password with bcrypt and a fresh salt (`$2b$<cost>$...`)
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, COST).map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Check `password` against a stored bcrypt hash. Unparseable hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}

/// Hash on the blocking pool; bcrypt is deliberately slow
pub(super) async fn hash_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
}

/// Verify on the blocking pool. With no stored hash the dummy hash is checked instead and
/// the result is always `false`.
pub(super) async fn verify_blocking(password: String, stored: Option<String>) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || match stored {
        Some(stored) => verify_password(&password, &stored),
        None => {
            if let Some(dummy) = DUMMY_HASH.as_deref() {
                verify_password(&password, dummy);
            }
            false
        }
    })
    .await
    .map_err(|e| AuthError::Hashing(e.to_string()))
}
