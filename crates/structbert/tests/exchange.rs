use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use structbert::agent::{Agent, DEFAULT_MAX_STEPS};
use structbert::errors::ProviderError;
use structbert::models::conversation::Conversation;
use structbert::models::event::{FinishReason, StreamEvent};
use structbert::models::message::Message;
use structbert::models::role::Role;
use structbert::models::tool::{Tool, ToolCall};
use structbert::providers::base::{Provider, ProviderEvent, ProviderStream, Usage};
use structbert::providers::mock::{MockProvider, MockStep};
use structbert::tools::{fahrenheit_to_celsius, ToolRegistry};

/// Plays the part of a backend that chains the weather and conversion tools, reading each
/// tool's output from the conversation it is sent.
#[derive(Default)]
struct WeatherBackend {
    calls: AtomicUsize,
}

fn finish(reason: &str) -> ProviderEvent {
    ProviderEvent::Finish {
        reason: reason.to_string(),
        usage: Usage::default(),
    }
}

#[async_trait]
impl Provider for WeatherBackend {
    fn model(&self) -> &str {
        "weather-backend"
    }

    async fn stream(
        &self,
        _system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        let step = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(tools.len(), 2);

        let last = messages.last().expect("conversation is never empty");
        let output = last
            .content
            .first()
            .and_then(|content| content.as_tool_result())
            .map(|response| response.output.clone());

        let events = match (last.role, output) {
            (Role::User, _) => vec![
                ProviderEvent::ToolCall {
                    id: format!("call_{}", step),
                    call: ToolCall::new("weather", json!({"location": "Boston"})),
                },
                finish("tool_calls"),
            ],
            (Role::Tool, Some(output)) if output.get("temperature").is_some() => vec![
                ProviderEvent::ToolCall {
                    id: format!("call_{}", step),
                    call: ToolCall::new(
                        "convertFahrenheitToCelsius",
                        json!({"temperature": output["temperature"]}),
                    ),
                },
                finish("tool_calls"),
            ],
            (Role::Tool, Some(output)) => vec![
                ProviderEvent::TextDelta("In Celsius that is ".to_string()),
                ProviderEvent::TextDelta(format!("{} degrees.", output["celsius"])),
                finish("stop"),
            ],
            other => panic!("unexpected conversation state: {:?}", other),
        };

        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

async fn collect(agent: Arc<Agent>, text: &str) -> (Vec<StreamEvent>, Conversation) {
    let conversation = Conversation::from(vec![Message::user().with_text(text)]);
    let (events, handle) = agent.stream(conversation).expect("valid conversation");
    let events: Vec<StreamEvent> = events.collect().await;
    (events, handle.await.expect("exchange task"))
}

fn assert_single_terminal(events: &[StreamEvent]) {
    let terminal: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| event.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![events.len() - 1]);
}

#[tokio::test]
async fn test_question_without_tools() {
    let provider = MockProvider::new(vec![MockStep::events(vec![
        ProviderEvent::TextDelta("Binary search runs in ".into()),
        ProviderEvent::TextDelta("O(log n) time, ".into()),
        ProviderEvent::TextDelta("halving the range each step.".into()),
        finish("STOP"),
    ])]);
    let agent = Agent::new(
        Box::new(provider.clone()),
        Arc::new(ToolRegistry::with_builtin_tools()),
    )
    .unwrap();

    let (events, conversation) =
        collect(Arc::new(agent), "What's the time complexity of binary search?").await;

    assert_single_terminal(&events);
    let (last, deltas) = events.split_last().unwrap();
    assert_eq!(
        last,
        &StreamEvent::Done {
            finish_reason: FinishReason::Stop
        }
    );
    assert!(deltas
        .iter()
        .all(|event| matches!(event, StreamEvent::TextDelta { .. })));
    assert_eq!(
        conversation.last().unwrap().text(),
        "Binary search runs in O(log n) time, halving the range each step."
    );
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_weather_then_conversion() {
    let backend = Arc::new(WeatherBackend::default());
    let agent = Agent::new(
        Box::new(SharedBackend(backend.clone())),
        Arc::new(ToolRegistry::with_builtin_tools()),
    )
    .unwrap();

    let (events, conversation) = collect(
        Arc::new(agent),
        "What's the weather in Boston and what's that in Celsius?",
    )
    .await;
    assert_single_terminal(&events);

    let mut started = Vec::new();
    let mut results: Vec<(String, Value)> = Vec::new();
    let mut text = String::new();
    for event in &events {
        match event {
            StreamEvent::ToolCallStarted { id, name, input } => {
                assert!(results.iter().all(|(seen, _)| seen != id));
                started.push((id.clone(), name.clone(), input.clone()));
            }
            StreamEvent::ToolResult { id, output } => {
                assert_eq!(started.last().map(|(s, _, _)| s), Some(id));
                results.push((id.clone(), output.clone()));
            }
            StreamEvent::TextDelta { delta } => {
                assert_eq!(results.len(), 2, "text arrives after both tools ran");
                text.push_str(delta);
            }
            StreamEvent::Done { finish_reason } => assert_eq!(*finish_reason, FinishReason::Stop),
            StreamEvent::Error { message, .. } => panic!("exchange failed: {}", message),
        }
    }

    let names: Vec<&str> = started.iter().map(|(_, name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["weather", "convertFahrenheitToCelsius"]);

    let fahrenheit = results[0].1["temperature"].as_i64().unwrap();
    assert!((32..=90).contains(&fahrenheit));
    assert_eq!(started[1].2, json!({"temperature": fahrenheit}));

    let celsius = fahrenheit_to_celsius(fahrenheit as f64);
    assert_eq!(results[1].1, json!({"celsius": celsius}));
    assert_eq!(text, format!("In Celsius that is {} degrees.", celsius));

    let steps = backend.calls.load(Ordering::SeqCst);
    assert_eq!(steps, 3);
    assert!(steps <= DEFAULT_MAX_STEPS);
    assert!(conversation.validate().is_ok());
    assert_eq!(conversation.len(), 6);
}

/// Lets the test keep a handle on the backend after the agent takes ownership
struct SharedBackend(Arc<WeatherBackend>);

#[async_trait]
impl Provider for SharedBackend {
    fn model(&self) -> &str {
        self.0.model()
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<ProviderStream, ProviderError> {
        self.0.stream(system, messages, tools).await
    }
}
