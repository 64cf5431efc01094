//! Google Gemini provider, streaming through `streamGenerateContent`
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::base::{Provider, ProviderEvent, ProviderStream, Usage};
use super::configs::GeminiProviderConfig;
use super::utils::{check_response, decode_sse, map_request_error, new_call_id, output_object, SseFrames};
use crate::errors::{ConfigurationError, ProviderError};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub const GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_MODEL: &str = "gemini-2.5-flash";

pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> Result<Self, ConfigurationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()
            .map_err(|e| ConfigurationError::HttpClient(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.host.trim_end_matches('/'),
            self.config.model
        )
    }

    fn build_request(&self, system: &str, messages: &[Message], tools: &[Tool]) -> GeminiRequest {
        let system_instruction = (!system.is_empty()).then(|| GeminiContent {
            role: None,
            parts: vec![GeminiPart::Text {
                text: system.to_string(),
                thought: false,
            }],
        });

        let tools = (!tools.is_empty()).then(|| {
            vec![GeminiTool {
                function_declarations: tools
                    .iter()
                    .map(|tool| GeminiFunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.input_schema.clone(),
                    })
                    .collect(),
            }]
        });

        let generation_config = (self.config.temperature.is_some() || self.config.max_tokens.is_some())
            .then(|| GeminiGenerationConfig {
                max_output_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            });

        GeminiRequest {
            contents: messages_to_gemini_spec(messages),
            system_instruction,
            tools,
            generation_config,
        }
    }
}

/// Convert internal messages to Gemini contents. Tool results travel as `functionResponse`
/// parts in a user turn, keyed by the name of the call they answer.
pub fn messages_to_gemini_spec(messages: &[Message]) -> Vec<GeminiContent> {
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut contents = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "model",
        };

        let mut parts = Vec::new();
        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(GeminiPart::Text {
                            text: text.text.clone(),
                            thought: false,
                        });
                    }
                }
                MessageContent::ToolCall(request) => {
                    call_names.insert(&request.id, &request.tool_call.name);
                    parts.push(GeminiPart::FunctionCall {
                        function_call: GeminiFunctionCall {
                            name: request.tool_call.name.clone(),
                            args: request.tool_call.arguments.clone(),
                            id: None,
                        },
                    });
                }
                MessageContent::ToolResult(response) => {
                    let name = call_names.get(response.id.as_str()).copied().unwrap_or("function");
                    parts.push(GeminiPart::FunctionResponse {
                        function_response: GeminiFunctionResponse {
                            name: name.to_string(),
                            response: output_object(&response.output),
                        },
                    });
                }
            }
        }

        if !parts.is_empty() {
            contents.push(GeminiContent {
                role: Some(role.to_string()),
                parts,
            });
        }
    }

    contents
}

/// Translate Gemini's SSE chunks into provider events
pub fn parse_gemini_stream(
    mut frames: SseFrames,
) -> impl Stream<Item = Result<ProviderEvent, ProviderError>> + Send + 'static {
    try_stream! {
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        while let Some(frame) = frames.next().await {
            let data = frame?;
            let chunk: GeminiChunk = serde_json::from_str(&data)
                .map_err(|e| ProviderError::Malformed(format!("{}: {}", e, data)))?;

            if let Some(metadata) = chunk.usage_metadata {
                usage = metadata.into();
            }
            if let Some(reason) = chunk.prompt_feedback.and_then(|feedback| feedback.block_reason) {
                finish_reason = Some(reason);
            }

            if let Some(candidate) = chunk.candidates.into_iter().next() {
                for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
                    match part {
                        // Thought summaries are model reasoning, not answer text
                        GeminiPart::Text { thought: true, .. } => {}
                        GeminiPart::Text { text, .. } => {
                            if !text.is_empty() {
                                yield ProviderEvent::TextDelta(text);
                            }
                        }
                        GeminiPart::FunctionCall { function_call } => {
                            let arguments = if function_call.args.is_null() {
                                json!({})
                            } else {
                                function_call.args
                            };
                            yield ProviderEvent::ToolCall {
                                id: function_call.id.unwrap_or_else(new_call_id),
                                call: ToolCall::new(function_call.name, arguments),
                            };
                        }
                        _ => {}
                    }
                }
                if let Some(reason) = candidate.finish_reason {
                    finish_reason = Some(reason);
                }
            }
        }

        let reason = finish_reason
            .ok_or_else(|| ProviderError::Malformed("stream ended without a finish reason".to_string()))?;
        if reason == "MALFORMED_FUNCTION_CALL" {
            Err::<(), _>(ProviderError::Malformed("backend produced a malformed function call".to_string()))?;
        }
        yield ProviderEvent::Finish { reason, usage };
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        let request = self.build_request(system, messages, tools);
        tracing::debug!(model = %self.config.model, turns = messages.len(), "sending gemini request");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(map_request_error)?;
        let response = check_response(response).await?;

        Ok(parse_gemini_stream(decode_sse(response)).boxed())
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
    Other(Value),
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
    total_token_count: Option<i32>,
}

impl From<GeminiUsageMetadata> for Usage {
    fn from(metadata: GeminiUsageMetadata) -> Self {
        Usage::new(
            metadata.prompt_token_count,
            metadata.candidates_token_count,
            metadata.total_token_count,
        )
    }
}
