//! A scripted provider for tests and local demos
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::base::{Provider, ProviderEvent, ProviderStream, Usage};
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};

/// What the mock does for one round-trip
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Stream these events, in order
    Events(Vec<Result<ProviderEvent, ProviderError>>),
    /// Fail before any event is produced
    Fail(ProviderError),
    /// Accept the request and then never produce an event
    Stall,
}

impl MockStep {
    pub fn events(events: Vec<ProviderEvent>) -> Self {
        MockStep::Events(events.into_iter().map(Ok).collect())
    }

    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::events(vec![ProviderEvent::TextDelta(text.into()), finish("stop")])
    }

    pub fn tool_call<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: Value) -> Self {
        Self::events(vec![
            ProviderEvent::ToolCall {
                id: id.into(),
                call: ToolCall::new(name, arguments),
            },
            finish("tool_calls"),
        ])
    }
}

fn finish(reason: &str) -> ProviderEvent {
    ProviderEvent::Finish {
        reason: reason.to_string(),
        usage: Usage::default(),
    }
}

/// Replays one scripted step per call and records what it was sent
#[derive(Clone, Default)]
pub struct MockProvider {
    steps: Arc<Mutex<VecDeque<MockStep>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockProvider {
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The conversation sent on each call so far
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn model(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        lock(&self.requests).push(messages.to_vec());
        // Once the script runs out, behave like a backend that has nothing more to say
        let step = lock(&self.steps)
            .pop_front()
            .unwrap_or_else(|| MockStep::events(vec![finish("stop")]));

        match step {
            MockStep::Events(events) => Ok(stream::iter(events).boxed()),
            MockStep::Fail(err) => Err(err),
            MockStep::Stall => Ok(stream::pending().boxed()),
        }
    }
}
