use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;

/// Classification carried by a terminal `error` stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorReason {
    Transport,
    MalformedResponse,
    SchemaValidation,
    ToolExecution,
    Timeout,
    Internal,
}

/// Failures talking to a generation backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            ProviderError::Malformed(_) => ErrorReason::MalformedResponse,
            _ => ErrorReason::Transport,
        }
    }
}

/// One offending field found while validating tool input against its schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub problem: String,
}

impl FieldViolation {
    pub fn new<F: Into<String>, P: Into<String>>(field: F, problem: P) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.problem)
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid input for {tool}: {}", join_violations(.violations))]
    SchemaValidation {
        tool: String,
        violations: Vec<FieldViolation>,
    },

    #[error("Unrecognized tool: {0}")]
    UnrecognizedTool(String),

    #[error("Tool {tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("Tool {tool} failed: {message}")]
    ExecutionError { tool: String, message: String },
}

impl ToolError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            ToolError::SchemaValidation { .. } => ErrorReason::SchemaValidation,
            _ => ErrorReason::ToolExecution,
        }
    }
}

/// Malformed caller input, rejected before an exchange starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Conversation has no turns")]
    EmptyConversation,

    #[error("Turn {index} has no parts")]
    EmptyTurn { index: usize },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Turn {index} with role {role} cannot carry a {part} part")]
    MisplacedPart {
        index: usize,
        role: String,
        part: &'static str,
    },

    #[error("Duplicate tool call id: {0}")]
    DuplicateCallId(String),

    #[error("Tool result refers to unknown call id: {0}")]
    UnknownCallId(String),
}

/// Missing or malformed backend credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("No API key configured for {provider}")]
    MissingApiKey { provider: String },

    #[error("API key for {provider} does not have the expected format (should start with {expected_prefix})")]
    MalformedApiKey {
        provider: String,
        expected_prefix: String,
    },

    #[error("Invalid agent configuration: {0}")]
    InvalidAgent(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Backend produced no event within {0:?}")]
    StepTimeout(Duration),

    #[error("Exchange did not complete within {0:?}")]
    ExchangeTimeout(Duration),

    #[error("Exchange cancelled by the caller")]
    Cancelled,

    #[error("{message}")]
    Failed {
        reason: ErrorReason,
        message: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            AgentError::Provider(err) => err.reason(),
            AgentError::Tool(err) => err.reason(),
            AgentError::StepTimeout(_) | AgentError::ExchangeTimeout(_) => ErrorReason::Timeout,
            AgentError::Failed { reason, .. } => *reason,
            AgentError::Cancelled | AgentError::Internal(_) => ErrorReason::Internal,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_violation_lists_fields() {
        let err = ToolError::SchemaValidation {
            tool: "weather".to_string(),
            violations: vec![
                FieldViolation::new("location", "required field is missing"),
                FieldViolation::new("units", "expected string, found number"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Invalid input for weather: location: required field is missing; units: expected string, found number"
        );
        assert_eq!(err.reason(), ErrorReason::SchemaValidation);
    }

    #[test]
    fn test_reason_classification() {
        let timeout = AgentError::StepTimeout(Duration::from_secs(1));
        assert_eq!(timeout.reason(), ErrorReason::Timeout);

        let malformed = AgentError::from(ProviderError::Malformed("bad json".into()));
        assert_eq!(malformed.reason(), ErrorReason::MalformedResponse);

        let status = AgentError::from(ProviderError::Status {
            status: 503,
            message: "unavailable".into(),
        });
        assert_eq!(status.reason(), ErrorReason::Transport);

        let unknown = AgentError::from(ToolError::UnrecognizedTool("nope".into()));
        assert_eq!(unknown.reason(), ErrorReason::ToolExecution);
    }

    #[test]
    fn test_reason_serialization() {
        assert_eq!(
            serde_json::to_value(ErrorReason::MalformedResponse).unwrap(),
            serde_json::json!("malformed_response")
        );
        assert_eq!(ErrorReason::ToolExecution.to_string(), "tool_execution");
    }
}
