use futures::StreamExt;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::{AgentError, AgentResult, ConfigurationError, ProviderError, ValidationError};
use crate::models::conversation::Conversation;
use crate::models::event::{FinishReason, StreamEvent};
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::prompt_template::system_directive;
use crate::providers::base::{Provider, ProviderEvent};
use crate::tools::ToolRegistry;

pub const DEFAULT_MAX_STEPS: usize = 5;

/// Buffer between a spawned exchange and its consumer
const EVENT_BUFFER: usize = 32;

/// Bounds applied to every exchange an agent runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Backend round-trips allowed in one exchange
    pub max_steps: usize,
    /// How long to wait for the backend to start a step or produce its next event
    pub step_timeout: Option<Duration>,
    /// Wall-clock bound on the whole exchange
    pub exchange_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            step_timeout: None,
            exchange_timeout: None,
        }
    }
}

/// Agent drives a conversation through a generation backend, running the tools it asks for
pub struct Agent {
    provider: Box<dyn Provider>,
    registry: Arc<ToolRegistry>,
    system_prompt: String,
    config: AgentConfig,
}

impl Agent {
    /// Create a new Agent with the specified provider and tools
    pub fn new(provider: Box<dyn Provider>, registry: Arc<ToolRegistry>) -> AgentResult<Self> {
        let system_prompt = system_directive(&registry.declarations())
            .map_err(|e| AgentError::Internal(format!("Failed to render system prompt: {}", e)))?;

        Ok(Self {
            provider,
            registry,
            system_prompt,
            config: AgentConfig::default(),
        })
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Result<Self, ConfigurationError> {
        if config.max_steps == 0 {
            return Err(ConfigurationError::InvalidAgent(
                "max_steps must be at least 1".to_string(),
            ));
        }
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    /// Run one exchange, writing its events to `sink` as they are produced.
    ///
    /// The conversation is checked before anything is sent; an invalid one is rejected without
    /// emitting any event. Otherwise exactly one terminal event (`done` or `error`) is written
    /// unless the receiving side goes away first. Returns the conversation extended with the
    /// turns generated during the exchange.
    pub async fn reply(
        &self,
        conversation: Conversation,
        sink: &mpsc::Sender<StreamEvent>,
    ) -> Result<Conversation, ValidationError> {
        conversation.validate()?;
        Ok(self.exchange(conversation, sink).await)
    }

    /// Run one exchange on its own task and hand back its events as a stream
    pub fn stream(
        self: Arc<Self>,
        conversation: Conversation,
    ) -> Result<(ReceiverStream<StreamEvent>, JoinHandle<Conversation>), ValidationError> {
        conversation.validate()?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(async move { self.exchange(conversation, &tx).await });
        Ok((ReceiverStream::new(rx), handle))
    }

    /// Answer a single prompt and return the generated text
    pub async fn ask(&self, prompt: &str) -> AgentResult<String> {
        let conversation = Conversation::from(vec![Message::user().with_text(prompt)]);
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

        let run = async move {
            self.exchange(conversation, &tx).await;
        };
        let collect = async move {
            let mut text = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta { delta } => text.push_str(&delta),
                    StreamEvent::Error { reason, message } => {
                        return Err(AgentError::Failed { reason, message })
                    }
                    StreamEvent::Done { .. } => break,
                    StreamEvent::ToolCallStarted { .. } | StreamEvent::ToolResult { .. } => {}
                }
            }
            Ok(text)
        };

        let ((), answer) = tokio::join!(run, collect);
        answer
    }

    async fn exchange(
        &self,
        mut conversation: Conversation,
        sink: &mpsc::Sender<StreamEvent>,
    ) -> Conversation {
        let outcome = match self.config.exchange_timeout {
            Some(limit) => timeout(limit, self.run_steps(&mut conversation, sink))
                .await
                .unwrap_or(Err(AgentError::ExchangeTimeout(limit))),
            None => self.run_steps(&mut conversation, sink).await,
        };

        let terminal = match outcome {
            Ok(finish_reason) => StreamEvent::Done { finish_reason },
            Err(AgentError::Cancelled) => {
                tracing::debug!("exchange cancelled by the caller");
                return conversation;
            }
            Err(err) => {
                tracing::warn!(reason = %err.reason(), "exchange failed: {}", err);
                StreamEvent::Error {
                    reason: err.reason(),
                    message: err.to_string(),
                }
            }
        };

        if sink.send(terminal).await.is_err() {
            tracing::debug!("caller went away before the exchange finished");
        }
        conversation
    }

    async fn run_steps(
        &self,
        conversation: &mut Conversation,
        sink: &mpsc::Sender<StreamEvent>,
    ) -> AgentResult<FinishReason> {
        let tools = self.registry.declarations();

        for step in 1..=self.config.max_steps {
            tracing::debug!(step, max_steps = self.config.max_steps, "starting generation step");
            if !self.run_step(conversation, &tools, sink).await? {
                return Ok(FinishReason::Stop);
            }
        }

        tracing::info!(max_steps = self.config.max_steps, "step limit reached, ending exchange");
        Ok(FinishReason::StepLimit)
    }

    /// One backend round-trip. Returns whether any tool was dispatched, i.e. whether the
    /// backend is waiting to continue.
    async fn run_step(
        &self,
        conversation: &mut Conversation,
        tools: &[Tool],
        sink: &mpsc::Sender<StreamEvent>,
    ) -> AgentResult<bool> {
        let mut events = self
            .guarded(
                sink,
                self.provider
                    .stream(&self.system_prompt, conversation.messages(), tools),
            )
            .await?;

        let mut reply = Message::assistant();
        let mut results = Message::tool();
        let mut text = String::new();
        let mut step_ids = HashSet::new();

        while let Some(event) = self
            .guarded(sink, async { events.next().await.transpose() })
            .await?
        {
            match event {
                ProviderEvent::TextDelta(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);
                    emit(sink, StreamEvent::text(delta)).await?;
                }
                ProviderEvent::ToolCall { id, call } => {
                    if conversation.has_call_id(&id) || !step_ids.insert(id.clone()) {
                        return Err(ProviderError::Malformed(format!(
                            "backend reused tool call id {}",
                            id
                        ))
                        .into());
                    }

                    emit(
                        sink,
                        StreamEvent::ToolCallStarted {
                            id: id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        },
                    )
                    .await?;

                    let output = until_closed(sink, async {
                        self.registry
                            .resolve(&call.name, call.arguments.clone())
                            .await
                            .map_err(AgentError::from)
                    })
                    .await?;

                    emit(
                        sink,
                        StreamEvent::ToolResult {
                            id: id.clone(),
                            output: output.clone(),
                        },
                    )
                    .await?;

                    // Keep the parts in the order the backend produced them
                    if !text.is_empty() {
                        reply = reply.with_text(std::mem::take(&mut text));
                    }
                    reply = reply.with_tool_call(id.clone(), call);
                    results = results.with_tool_result(id, output);
                }
                ProviderEvent::Finish { reason, usage } => {
                    tracing::debug!(
                        reason = %reason,
                        input_tokens = ?usage.input_tokens,
                        output_tokens = ?usage.output_tokens,
                        "backend finished step"
                    );
                }
            }
        }

        if !text.is_empty() {
            reply = reply.with_text(text);
        }
        let dispatched = !results.is_empty();
        if !reply.is_empty() {
            conversation.push(reply);
        }
        if dispatched {
            conversation.push(results);
        }
        Ok(dispatched)
    }

    /// Await a backend operation under the step timeout, giving up if the caller leaves
    async fn guarded<T, F>(&self, sink: &mpsc::Sender<StreamEvent>, operation: F) -> AgentResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let bounded = async {
            match self.config.step_timeout {
                Some(after) => match timeout(after, operation).await {
                    Ok(result) => result.map_err(AgentError::from),
                    Err(_) => Err(AgentError::StepTimeout(after)),
                },
                None => operation.await.map_err(AgentError::from),
            }
        };
        until_closed(sink, bounded).await
    }
}

async fn emit(sink: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> AgentResult<()> {
    sink.send(event).await.map_err(|_| AgentError::Cancelled)
}

async fn until_closed<T, F>(sink: &mpsc::Sender<StreamEvent>, operation: F) -> AgentResult<T>
where
    F: Future<Output = AgentResult<T>>,
{
    tokio::select! {
        biased;
        _ = sink.closed() => Err(AgentError::Cancelled),
        result = operation => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorReason;
    use crate::models::role::Role;
    use crate::providers::mock::{MockProvider, MockStep};
    use crate::tools::{from_fn, ToolSchema};
    use indoc::indoc;
    use serde_json::{json, Value};

    fn agent(provider: &MockProvider) -> Agent {
        Agent::new(
            Box::new(provider.clone()),
            Arc::new(ToolRegistry::with_builtin_tools()),
        )
        .unwrap()
    }

    fn ask_user(text: &str) -> Conversation {
        Conversation::from(vec![Message::user().with_text(text)])
    }

    async fn run(agent: &Agent, conversation: Conversation) -> (Vec<StreamEvent>, Conversation) {
        let (tx, mut rx) = mpsc::channel(64);
        let conversation = agent.reply(conversation, &tx).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, conversation)
    }

    fn error_reason(events: &[StreamEvent]) -> Option<ErrorReason> {
        match events.last() {
            Some(StreamEvent::Error { reason, .. }) => Some(*reason),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_simple_response() {
        let provider = MockProvider::new(vec![MockStep::events(vec![
            ProviderEvent::TextDelta("Binary search ".into()),
            ProviderEvent::TextDelta("is O(log n).".into()),
        ])]);
        let (events, conversation) = run(&agent(&provider), ask_user("Binary search?")).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::text("Binary search "),
                StreamEvent::text("is O(log n)."),
                StreamEvent::Done {
                    finish_reason: FinishReason::Stop
                },
            ]
        );
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().unwrap().text(), "Binary search is O(log n).");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = MockProvider::new(vec![
            MockStep::tool_call("call_1", "weather", json!({"location": "Boston"})),
            MockStep::text("It is mild in Boston."),
        ]);
        let (events, conversation) = run(&agent(&provider), ask_user("Weather in Boston?")).await;

        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            StreamEvent::ToolCallStarted {
                id: "call_1".into(),
                name: "weather".into(),
                input: json!({"location": "Boston"}),
            }
        );
        let output = match &events[1] {
            StreamEvent::ToolResult { id, output } => {
                assert_eq!(id, "call_1");
                output.clone()
            }
            other => panic!("Expected tool result, got {:?}", other),
        };
        assert_eq!(output["location"], "Boston");
        assert_eq!(events[2], StreamEvent::text("It is mild in Boston."));
        assert!(events[3].is_terminal());

        // The backend sees the tool result on its second round-trip
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let fed_back = requests[1].last().unwrap();
        assert_eq!(fed_back.role, Role::Tool);
        assert_eq!(fed_back.content[0].as_tool_result().unwrap().output, output);

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
        assert!(conversation.validate().is_ok());
    }

    #[tokio::test]
    async fn test_text_before_tool_call_keeps_order() {
        let provider = MockProvider::new(vec![
            MockStep::events(vec![
                ProviderEvent::TextDelta("Let me check.".into()),
                ProviderEvent::ToolCall {
                    id: "call_1".into(),
                    call: crate::models::tool::ToolCall::new("weather", json!({"location": "Oslo"})),
                },
            ]),
            MockStep::text("Cold."),
        ]);
        let (_, conversation) = run(&agent(&provider), ask_user("Oslo?")).await;

        let first_reply = &conversation.messages()[1];
        assert_eq!(first_reply.content[0].as_text(), Some("Let me check."));
        assert!(first_reply.content[1].as_tool_call().is_some());
    }

    #[tokio::test]
    async fn test_step_limit_forces_done() {
        let steps = (0..10)
            .map(|i| MockStep::tool_call(format!("call_{}", i), "weather", json!({"location": "Boston"})))
            .collect();
        let provider = MockProvider::new(steps);
        let agent = agent(&provider)
            .with_config(AgentConfig {
                max_steps: 3,
                ..AgentConfig::default()
            })
            .unwrap();

        let (events, _) = run(&agent, ask_user("Loop forever")).await;

        let started = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCallStarted { .. }))
            .count();
        assert_eq!(started, 3);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                finish_reason: FinishReason::StepLimit
            })
        );
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_steps_rejected() {
        let provider = MockProvider::default();
        let result = agent(&provider).with_config(AgentConfig {
            max_steps: 0,
            ..AgentConfig::default()
        });
        assert!(matches!(result, Err(ConfigurationError::InvalidAgent(_))));
    }

    #[tokio::test]
    async fn test_schema_violation_terminates() {
        let provider = MockProvider::new(vec![MockStep::tool_call("call_1", "weather", json!({}))]);
        let (events, _) = run(&agent(&provider), ask_user("Weather?")).await;

        assert!(matches!(events[0], StreamEvent::ToolCallStarted { .. }));
        assert_eq!(events.len(), 2);
        assert_eq!(error_reason(&events), Some(ErrorReason::SchemaValidation));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_tool() {
        let provider = MockProvider::new(vec![MockStep::tool_call("call_1", "stock_price", json!({}))]);
        let (events, _) = run(&agent(&provider), ask_user("AAPL?")).await;
        assert_eq!(error_reason(&events), Some(ErrorReason::ToolExecution));
    }

    #[tokio::test]
    async fn test_tool_failure() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                "flaky",
                "always fails",
                ToolSchema::new(),
                from_fn(|_: Value| async move { Err(anyhow::anyhow!("disk on fire")) }),
            )
            .unwrap();
        let provider = MockProvider::new(vec![MockStep::tool_call("call_1", "flaky", json!({}))]);
        let agent = Agent::new(Box::new(provider), Arc::new(registry)).unwrap();

        let (events, _) = run(&agent, ask_user("go")).await;
        match events.last() {
            Some(StreamEvent::Error { reason, message }) => {
                assert_eq!(*reason, ErrorReason::ToolExecution);
                assert!(message.contains("disk on fire"));
            }
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let provider = MockProvider::new(vec![MockStep::Fail(ProviderError::Transport(
            "connection refused".into(),
        ))]);
        let (events, _) = run(&agent(&provider), ask_user("hello")).await;
        assert_eq!(events.len(), 1);
        assert_eq!(error_reason(&events), Some(ErrorReason::Transport));
    }

    #[tokio::test]
    async fn test_malformed_mid_stream() {
        let provider = MockProvider::new(vec![MockStep::Events(vec![
            Ok(ProviderEvent::TextDelta("Hel".into())),
            Err(ProviderError::Malformed("unexpected token".into())),
        ])]);
        let (events, conversation) = run(&agent(&provider), ask_user("hello")).await;

        assert_eq!(events[0], StreamEvent::text("Hel"));
        assert_eq!(error_reason(&events), Some(ErrorReason::MalformedResponse));
        assert_eq!(events.len(), 2);
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_reused_call_id_is_malformed() {
        let provider = MockProvider::new(vec![
            MockStep::tool_call("call_1", "weather", json!({"location": "Boston"})),
            MockStep::tool_call("call_1", "weather", json!({"location": "Paris"})),
        ]);
        let (events, _) = run(&agent(&provider), ask_user("twice")).await;
        assert_eq!(error_reason(&events), Some(ErrorReason::MalformedResponse));
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let provider = MockProvider::new(vec![MockStep::Stall]);
        let agent = agent(&provider)
            .with_config(AgentConfig {
                step_timeout: Some(Duration::from_millis(50)),
                ..AgentConfig::default()
            })
            .unwrap();

        let (events, _) = run(&agent, ask_user("hello")).await;
        assert_eq!(events.len(), 1);
        assert_eq!(error_reason(&events), Some(ErrorReason::Timeout));
    }

    #[tokio::test]
    async fn test_exchange_timeout() {
        let provider = MockProvider::new(vec![MockStep::Stall]);
        let agent = agent(&provider)
            .with_config(AgentConfig {
                exchange_timeout: Some(Duration::from_millis(50)),
                ..AgentConfig::default()
            })
            .unwrap();

        let (events, _) = run(&agent, ask_user("hello")).await;
        match events.as_slice() {
            [StreamEvent::Error { reason, message }] => {
                assert_eq!(*reason, ErrorReason::Timeout);
                assert!(message.starts_with("Exchange did not complete"));
            }
            other => panic!("Expected a single timeout error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_exchange() {
        let provider = MockProvider::new(vec![MockStep::Stall]);
        let agent = Arc::new(agent(&provider));

        let (events, handle) = agent.stream(ask_user("hello")).unwrap();
        drop(events);

        let conversation = timeout(Duration::from_secs(1), handle)
            .await
            .expect("exchange should stop once the caller is gone")
            .unwrap();
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_events() {
        let provider = MockProvider::new(vec![MockStep::text("Hi")]);
        let agent = Arc::new(agent(&provider));

        let (events, handle) = agent.stream(ask_user("hello")).unwrap();
        let events: Vec<StreamEvent> = events.collect().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::text("Hi"),
                StreamEvent::Done {
                    finish_reason: FinishReason::Stop
                }
            ]
        );
        assert_eq!(handle.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_conversation_rejected() {
        let provider = MockProvider::default();
        let agent = agent(&provider);
        let (tx, mut rx) = mpsc::channel(4);

        let err = agent.reply(Conversation::new(), &tx).await.unwrap_err();
        assert_eq!(err, ValidationError::EmptyConversation);
        drop(tx);
        assert!(rx.recv().await.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_ask() {
        let provider = MockProvider::new(vec![MockStep::events(vec![
            ProviderEvent::TextDelta("O(".into()),
            ProviderEvent::TextDelta("log n)".into()),
        ])]);
        assert_eq!(agent(&provider).ask("binary search?").await.unwrap(), "O(log n)");

        let failing = MockProvider::new(vec![MockStep::Fail(ProviderError::Authentication(
            "bad key".into(),
        ))]);
        let err = agent(&failing).ask("hello").await.unwrap_err();
        assert_eq!(err.reason(), ErrorReason::Transport);
    }

    #[tokio::test]
    async fn test_system_prompt_lists_tools() {
        let provider = MockProvider::default();
        let agent = agent(&provider);
        assert!(agent.system_prompt().contains("convertFahrenheitToCelsius"));

        let custom = indoc! {"
            You are a terse assistant.
            Answer in one sentence.
        "};
        let agent = agent.with_system_prompt(custom);
        assert_eq!(agent.system_prompt(), custom);
    }
}
