use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use structbert::auth::AuthError;
use structbert::errors::{ConfigurationError, ValidationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error(transparent)]
    Provider(#[from] ConfigurationError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Convert a dotted configuration key to the environment variable that sets it
pub fn to_env_var(field: &str) -> String {
    format!("STRUCTBERT_{}", field.replace('.', "__").to_uppercase())
}

/// Failures a route reports before any streaming starts
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<ConfigurationError> for ApiError {
    fn from(err: ConfigurationError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

const INTERNAL_ERROR: &str = "Internal Server Error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Auth(err @ AuthError::MissingFields) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Auth(err @ AuthError::InvalidCredentials) => {
                (StatusCode::UNAUTHORIZED, err.to_string())
            }
            ApiError::Auth(err @ AuthError::EmailTaken) => (StatusCode::CONFLICT, err.to_string()),
            ApiError::Auth(AuthError::Store(message))
            | ApiError::Auth(AuthError::Hashing(message))
            | ApiError::Internal(message) => {
                // Details stay in the log, callers get a generic message
                tracing::error!("request failed: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "STRUCTBERT_PROVIDER__API_KEY");
        assert_eq!(to_env_var("type"), "STRUCTBERT_TYPE");
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::BadRequest("bad".into()), StatusCode::BAD_REQUEST),
            (ApiError::Auth(AuthError::MissingFields), StatusCode::BAD_REQUEST),
            (ApiError::Auth(AuthError::InvalidCredentials), StatusCode::UNAUTHORIZED),
            (ApiError::Auth(AuthError::EmailTaken), StatusCode::CONFLICT),
            (ApiError::Auth(AuthError::Store("disk".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::Auth(AuthError::Hashing("join".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::from(ConfigurationError::MissingApiKey {
                    provider: "gemini".into(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
