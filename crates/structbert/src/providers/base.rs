use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// A low-level generation event from a backend
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// A chunk of generated text
    TextDelta(String),
    /// The backend wants a tool run before it continues
    ToolCall { id: String, call: ToolCall },
    /// Generation for this round-trip is over
    Finish { reason: String, usage: Usage },
}

pub type ProviderStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

/// Base trait for generation backends (Gemini, OpenAI, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// The model this provider generates with
    fn model(&self) -> &str;

    /// Start one round-trip and stream back its events as they arrive
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError>;

    /// Generate the whole next message without streaming it
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage), ProviderError> {
        let mut stream = self.stream(system, messages, tools).await?;
        let mut message = Message::assistant();
        let mut text = String::new();
        let mut usage = Usage::default();

        while let Some(event) = stream.next().await {
            match event? {
                ProviderEvent::TextDelta(delta) => text.push_str(&delta),
                ProviderEvent::ToolCall { id, call } => {
                    if !text.is_empty() {
                        message = message.with_text(std::mem::take(&mut text));
                    }
                    message = message.with_tool_call(id, call);
                }
                ProviderEvent::Finish { usage: total, .. } => usage = total,
            }
        }
        if !text.is_empty() {
            message = message.with_text(text);
        }

        Ok((message, usage))
    }
}
