use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use structbert::errors::ValidationError;
use structbert::models::conversation::Conversation;
use structbert::models::event::{FinishReason, StreamEvent};
use structbert::models::message::Message;
use structbert::models::role::Role;
use structbert::models::tool::ToolCall;

// Types matching the incoming JSON structure
#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    #[serde(default)]
    parts: Vec<IncomingPart>,
    /// Plain text form older clients send instead of parts
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum IncomingPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        #[serde(default)]
        output: Value,
    },
    #[serde(other)]
    Unknown,
}

// Custom SSE response type that implements the Vercel AI SDK protocol
pub struct SseResponse {
    frames: BoxStream<'static, String>,
}

impl SseResponse {
    fn new(frames: BoxStream<'static, String>) -> Self {
        Self { frames }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames
            .poll_next_unpin(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
                (HeaderName::from_static("x-vercel-ai-data-stream"), "v1"),
            ],
            body,
        )
            .into_response()
    }
}

// Convert incoming messages to our internal conversation, rejecting unknown roles
fn convert_messages(incoming: Vec<IncomingMessage>) -> Result<Conversation, ValidationError> {
    let mut conversation = Conversation::new();

    for msg in incoming {
        let role = Role::from_str(&msg.role).map_err(|_| ValidationError::UnknownRole(msg.role.clone()))?;
        let mut message = Message::new(role);

        for part in msg.parts {
            message = match part {
                IncomingPart::Text { text } => message.with_text(text),
                IncomingPart::ToolCall {
                    tool_call_id,
                    tool_name,
                    input,
                } => message.with_tool_call(tool_call_id, ToolCall::new(tool_name, input)),
                IncomingPart::ToolResult {
                    tool_call_id,
                    output,
                } => message.with_tool_result(tool_call_id, output),
                IncomingPart::Unknown => {
                    tracing::debug!("skipping unsupported message part");
                    message
                }
            };
        }
        if message.is_empty() {
            if let Some(content) = msg.content.filter(|c| !c.is_empty()) {
                message = message.with_text(content);
            }
        }

        conversation.push(message);
    }

    Ok(conversation)
}

// Protocol-specific message formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_text(text: &str) -> String {
        let encoded_text = serde_json::to_string(text).unwrap_or_else(|_| String::new());
        format!("0:{}\n", encoded_text)
    }

    fn format_tool_call(id: &str, name: &str, args: &Value) -> String {
        // Tool calls start with "9:"
        let tool_call = json!({
            "toolCallId": id,
            "toolName": name,
            "args": args
        });
        format!("9:{}\n", tool_call)
    }

    fn format_tool_response(id: &str, result: &Value) -> String {
        // Tool responses start with "a:"
        let response = json!({
            "toolCallId": id,
            "result": result,
        });
        format!("a:{}\n", response)
    }

    fn format_error(message: &str) -> String {
        let encoded = serde_json::to_string(message).unwrap_or_else(|_| String::from("\"\""));
        format!("3:{}\n", encoded)
    }

    fn format_finish(reason: &str) -> String {
        // Finish messages start with "d:"
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": 0,
                "completionTokens": 0
            }
        });
        format!("d:{}\n", finish)
    }

    /// The frames one event is written as. An error is always closed by an error finish.
    fn frames(event: &StreamEvent) -> Vec<String> {
        match event {
            StreamEvent::TextDelta { delta } => vec![Self::format_text(delta)],
            StreamEvent::ToolCallStarted { id, name, input } => {
                vec![Self::format_tool_call(id, name, input)]
            }
            StreamEvent::ToolResult { id, output } => vec![Self::format_tool_response(id, output)],
            StreamEvent::Done { finish_reason } => {
                let reason = match finish_reason {
                    FinishReason::Stop => "stop",
                    // The backend still wanted to call tools when the exchange was cut off
                    FinishReason::StepLimit => "tool-calls",
                };
                vec![Self::format_finish(reason)]
            }
            StreamEvent::Error { message, .. } => {
                vec![Self::format_error(message), Self::format_finish("error")]
            }
        }
    }
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, ApiError> {
    // Check protocol header (optional in our case)
    if let Some(protocol) = headers.get("x-protocol") {
        if protocol.to_str().map(|p| p != "data").unwrap_or(true) {
            return Err(ApiError::BadRequest("Unsupported protocol".to_string()));
        }
    }

    let conversation = convert_messages(request.messages)?;
    let agent = Arc::new(state.agent()?);

    // The exchange runs on its own task; dropping the response body cancels it
    let (events, _exchange) = agent.stream(conversation)?;
    let frames = events
        .flat_map(|event| stream::iter(ProtocolFormatter::frames(&event)))
        .boxed();

    Ok(SseResponse::new(frames))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    prompt: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    response: String,
}

// simple ask an AI for a response, non streaming
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt is required".to_string()));
    }

    let agent = state.agent()?;
    let response = agent
        .ask(&request.prompt)
        .await
        .map_err(|e| ApiError::Internal(format!("ask failed: {}", e)))?;

    Ok(Json(AskResponse {
        response: response.trim().to_string(),
    }))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply", post(handler))
        .route("/ask", post(ask_handler))
        .with_state(state)
}
