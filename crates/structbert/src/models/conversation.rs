use std::collections::HashSet;

use super::message::{Message, MessageContent};
use super::role::Role;
use crate::errors::ValidationError;

/// The ordered turns of one exchange, owned by the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether any tool call in the conversation already uses this id
    pub fn has_call_id(&self, id: &str) -> bool {
        self.messages
            .iter()
            .flat_map(|message| message.content.iter())
            .filter_map(MessageContent::as_tool_call)
            .any(|request| request.id == id)
    }

    /// Check the structural invariants a caller-supplied conversation must hold before an
    /// exchange may start.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.messages.is_empty() {
            return Err(ValidationError::EmptyConversation);
        }

        let mut call_ids = HashSet::new();
        for (index, message) in self.messages.iter().enumerate() {
            if message.content.is_empty() {
                return Err(ValidationError::EmptyTurn { index });
            }

            for content in &message.content {
                match content {
                    MessageContent::Text(_) => {}
                    MessageContent::ToolCall(request) => {
                        if message.role != Role::Assistant {
                            return Err(misplaced(index, message.role, content));
                        }
                        if !call_ids.insert(request.id.as_str()) {
                            return Err(ValidationError::DuplicateCallId(request.id.clone()));
                        }
                    }
                    MessageContent::ToolResult(response) => {
                        if message.role != Role::Tool {
                            return Err(misplaced(index, message.role, content));
                        }
                        if !call_ids.contains(response.id.as_str()) {
                            return Err(ValidationError::UnknownCallId(response.id.clone()));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn misplaced(index: usize, role: Role, content: &MessageContent) -> ValidationError {
    ValidationError::MisplacedPart {
        index,
        role: role.to_string(),
        part: content.kind(),
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl FromIterator<Message> for Conversation {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}
