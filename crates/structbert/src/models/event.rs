use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorReason;

/// Why an exchange completed without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The backend finished generating without requesting more tools
    Stop,
    /// The step bound was reached and the exchange was ended early
    StepLimit,
}

/// One unit of the caller-facing output of an exchange.
///
/// A `tool-result` for a call id never precedes the `tool-call-started` for the same id,
/// and `done`/`error` are terminal: nothing follows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    TextDelta {
        delta: String,
    },
    ToolCallStarted {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        output: Value,
    },
    Done {
        finish_reason: FinishReason,
    },
    Error {
        reason: ErrorReason,
        message: String,
    },
}

impl StreamEvent {
    pub fn text<S: Into<String>>(delta: S) -> Self {
        StreamEvent::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
