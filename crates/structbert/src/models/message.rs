use super::role::Role;
use super::tool::ToolCall;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub id: String,
    pub tool_call: ToolCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: String,
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
/// One part of a turn: text, a tool call, or the result of a tool call
pub enum MessageContent {
    Text(TextContent),
    ToolCall(ToolRequest),
    ToolResult(ToolResponse),
}

impl MessageContent {
    pub fn text<S: Into<String>>(text: S) -> Self {
        MessageContent::Text(TextContent { text: text.into() })
    }

    pub fn tool_call<S: Into<String>>(id: S, tool_call: ToolCall) -> Self {
        MessageContent::ToolCall(ToolRequest {
            id: id.into(),
            tool_call,
        })
    }

    pub fn tool_result<S: Into<String>>(id: S, output: Value) -> Self {
        MessageContent::ToolResult(ToolResponse {
            id: id.into(),
            output,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolRequest> {
        if let MessageContent::ToolCall(ref request) = self {
            Some(request)
        } else {
            None
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResponse> {
        if let MessageContent::ToolResult(ref response) = self {
            Some(response)
        } else {
            None
        }
    }

    /// Short name of the part kind, used in validation messages
    pub fn kind(&self) -> &'static str {
        match self {
            MessageContent::Text(_) => "text",
            MessageContent::ToolCall(_) => "tool-call",
            MessageContent::ToolResult(_) => "tool-result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single turn of a conversation
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<MessageContent>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Self::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Create a new tool message with the current timestamp
    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    pub fn with_content(mut self, content: MessageContent) -> Self {
        self.content.push(content);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(MessageContent::text(text))
    }

    pub fn with_tool_call<S: Into<String>>(self, id: S, tool_call: ToolCall) -> Self {
        self.with_content(MessageContent::tool_call(id, tool_call))
    }

    pub fn with_tool_result<S: Into<String>>(self, id: S, output: Value) -> Self {
        self.with_content(MessageContent::tool_result(id, output))
    }

    /// Concatenated text parts of this message
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_preserves_part_order() {
        let message = Message::assistant()
            .with_text("Let me check.")
            .with_tool_call("call_1", ToolCall::new("weather", json!({"location": "Boston"})))
            .with_text("Done.");

        let kinds: Vec<_> = message.content.iter().map(MessageContent::kind).collect();
        assert_eq!(kinds, vec!["text", "tool-call", "text"]);
        assert_eq!(message.text(), "Let me check.Done.");
    }

    #[test]
    fn test_part_serialization_is_tagged() {
        let part = MessageContent::tool_result("call_1", json!({"celsius": 21}));
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "tool-result");
        assert_eq!(value["id"], "call_1");
        assert_eq!(value["output"]["celsius"], 21);
    }
}
