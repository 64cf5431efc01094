use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::ProviderError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::Tool;

/// `data` payloads of a server-sent event response, in arrival order
pub type SseFrames = BoxStream<'static, Result<String, ProviderError>>;

pub fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

pub fn map_request_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transport(format!("Request timeout: {}", err))
    } else if err.is_connect() {
        ProviderError::Transport(format!("Connection failed: {}", err))
    } else if err.is_decode() {
        ProviderError::Malformed(format!("Failed to decode response: {}", err))
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// Pull a human readable message out of an API error body, if it has one
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(String::from)
}

/// Turn a non-success HTTP status into a classified error
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or(body);
    tracing::warn!(status = status.as_u16(), "provider request failed: {}", message);

    Err(match status.as_u16() {
        401 | 403 => ProviderError::Authentication(message),
        code => ProviderError::Status {
            status: code,
            message,
        },
    })
}

/// Decode a streaming response body as server-sent events
pub fn decode_sse(response: reqwest::Response) -> SseFrames {
    response
        .bytes_stream()
        .eventsource()
        .map(|event| match event {
            Ok(event) => Ok(event.data),
            Err(EventStreamError::Transport(err)) => Err(map_request_error(err)),
            Err(err) => Err(ProviderError::Malformed(format!("SSE stream error: {}", err))),
        })
        .boxed()
}

/// Tool outputs are sent back as objects; wrap anything else
pub fn output_object(output: &Value) -> Value {
    if output.is_object() {
        output.clone()
    } else {
        json!({ "result": output })
    }
}

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let mut converted = json!({ "role": role });
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(part) => text.push_str(&part.text),
                MessageContent::ToolCall(request) => {
                    tool_calls.push(json!({
                        "id": request.id,
                        "type": "function",
                        "function": {
                            "name": request.tool_call.name,
                            "arguments": request.tool_call.arguments.to_string(),
                        }
                    }));
                }
                MessageContent::ToolResult(response) => {
                    output.push(json!({
                        "role": "tool",
                        "content": response.output.to_string(),
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        if !text.is_empty() {
            converted["content"] = json!(text);
        }
        if !tool_calls.is_empty() {
            converted["tool_calls"] = json!(tool_calls);
        }
        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolCall;

    #[test]
    fn test_messages_to_openai_spec_text() {
        let messages = vec![Message::user().with_text("Hello")];
        let spec = messages_to_openai_spec(&messages);
        assert_eq!(spec, vec![json!({"role": "user", "content": "Hello"})]);
    }

    #[test]
    fn test_messages_to_openai_spec_tool_round() {
        let messages = vec![
            Message::assistant().with_tool_call(
                "call_1",
                ToolCall::new("weather", json!({"location": "Boston"})),
            ),
            Message::tool().with_tool_result("call_1", json!({"temperature": 70})),
        ];
        let spec = messages_to_openai_spec(&messages);

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "assistant");
        assert_eq!(spec[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            spec[0]["tool_calls"][0]["function"]["arguments"],
            "{\"location\":\"Boston\"}"
        );
        assert_eq!(spec[1]["role"], "tool");
        assert_eq!(spec[1]["tool_call_id"], "call_1");
        assert_eq!(spec[1]["content"], "{\"temperature\":70}");
    }

    #[test]
    fn test_tools_to_openai_spec() {
        let tools = vec![Tool::new("weather", "Get the weather", json!({"type": "object"}))];
        let spec = tools_to_openai_spec(&tools);
        assert_eq!(spec[0]["function"]["name"], "weather");
        assert_eq!(spec[0]["function"]["parameters"], json!({"type": "object"}));
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error": {"message": "API key not valid", "code": 400}}"#),
            Some("API key not valid".to_string())
        );
        assert_eq!(
            extract_error_message(r#"{"error": "quota"}"#),
            Some("quota".to_string())
        );
        assert_eq!(extract_error_message("<html>"), None);
    }

    #[test]
    fn test_call_ids_are_unique() {
        assert_ne!(new_call_id(), new_call_id());
        assert!(new_call_id().starts_with("call_"));
    }
}
