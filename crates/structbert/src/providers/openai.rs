use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::base::{Provider, ProviderEvent, ProviderStream, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_response, decode_sse, map_request_error, messages_to_openai_spec, new_call_id,
    tools_to_openai_spec, SseFrames,
};
use crate::errors::{ConfigurationError, ProviderError};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Value {
        let mut messages_array = vec![json!({
            "role": "system",
            "content": system
        })];
        messages_array.extend(messages_to_openai_spec(messages));

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages_array,
            "stream": true,
            "stream_options": {"include_usage": true}
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_openai_spec(tools));
        }
        if let Some(temp) = self.config.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }
        payload
    }
}

fn get_usage(data: &Value) -> Option<Usage> {
    let usage = data.get("usage").filter(|usage| !usage.is_null())?;

    let count = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);
    let input_tokens = count("prompt_tokens");
    let output_tokens = count("completion_tokens");
    let total_tokens = count("total_tokens").or_else(|| match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });

    Some(Usage::new(input_tokens, output_tokens, total_tokens))
}

/// A tool call whose name and arguments are still arriving in fragments
#[derive(Default)]
struct PendingCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn finish(self) -> Result<ProviderEvent, ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::Malformed(
                "tool call arrived without a function name".to_string(),
            ));
        }
        let arguments = if self.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| {
                ProviderError::Malformed(format!(
                    "invalid arguments for {}: {}",
                    self.name, e
                ))
            })?
        };

        Ok(ProviderEvent::ToolCall {
            id: self.id.unwrap_or_else(new_call_id),
            call: ToolCall::new(self.name, arguments),
        })
    }
}

/// Translate chat completion chunks into provider events. Tool call fragments are
/// accumulated by index and released once the choice reports its finish reason.
pub fn parse_openai_stream(
    mut frames: SseFrames,
) -> impl Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'static {
    try_stream! {
        let mut pending: BTreeMap<u64, PendingCall> = BTreeMap::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();
        let mut done = false;

        while let Some(frame) = frames.next().await {
            let data = frame?;
            if data.trim() == "[DONE]" {
                done = true;
                break;
            }

            let chunk: Value = serde_json::from_str(&data)
                .map_err(|e| ProviderError::Malformed(format!("{}: {}", e, data)))?;
            if let Some(error) = chunk.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| error.to_string());
                Err::<(), _>(ProviderError::Malformed(message))?;
            }
            if let Some(total) = get_usage(&chunk) {
                usage = total;
            }

            let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
                continue;
            };
            let delta = &choice["delta"];

            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    yield ProviderEvent::TextDelta(text.to_string());
                }
            }

            for fragment in delta.get("tool_calls").and_then(Value::as_array).into_iter().flatten() {
                let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
                let call = pending.entry(index).or_default();
                if let Some(id) = fragment.get("id").and_then(Value::as_str) {
                    call.id = Some(id.to_string());
                }
                if let Some(name) = fragment["function"].get("name").and_then(Value::as_str) {
                    call.name.push_str(name);
                }
                if let Some(arguments) = fragment["function"].get("arguments").and_then(Value::as_str) {
                    call.arguments.push_str(arguments);
                }
            }

            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                finish_reason = Some(reason.to_string());
                for (_, call) in std::mem::take(&mut pending) {
                    yield call.finish()?;
                }
            }
        }

        let reason = match finish_reason {
            Some(reason) if done || pending.is_empty() => reason,
            _ => Err(ProviderError::Malformed("stream ended before the completion finished".to_string()))?,
        };
        yield ProviderEvent::Finish { reason, usage };
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        let payload = self.build_payload(system, messages, tools);
        tracing::debug!(model = %self.config.model, turns = messages.len(), "sending openai request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(map_request_error)?;
        let response = check_response(response).await?;

        Ok(parse_openai_stream(decode_sse(response)).boxed())
    }
}
