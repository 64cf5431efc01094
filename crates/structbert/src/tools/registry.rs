use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use super::builtin::BuiltinTool;
use super::schema::ToolSchema;
use crate::errors::ToolError;
use crate::models::tool::Tool;

/// The execution capability behind a tool. Receives input already validated against the
/// tool's schema.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, input: Value) -> anyhow::Result<Value>;
}

struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

/// Wrap an async closure as a tool executor
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn ToolExecutor>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnExecutor(f))
}

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    executor: Arc<dyn ToolExecutor>,
    timeout: Option<Duration>,
    limiter: Option<Arc<Semaphore>>,
}

impl ToolDefinition {
    pub fn new<N, D>(name: N, description: D, schema: ToolSchema, executor: Arc<dyn ToolExecutor>) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            executor,
            timeout: None,
            limiter: None,
        }
    }

    /// Bound a single execution, including any wait for a concurrency slot
    pub fn with_timeout(mut self, after: Duration) -> Self {
        self.timeout = Some(after);
        self
    }

    /// Cap how many executions of this tool may run at once across all exchanges
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    /// The declaration sent to the backend
    pub fn declaration(&self) -> Tool {
        Tool::new(&self.name, &self.description, self.schema.to_json_schema())
    }

    async fn run(&self, input: Value) -> Result<Value, ToolError> {
        let execution = async {
            let _permit = match &self.limiter {
                Some(limiter) => Some(
                    limiter
                        .acquire()
                        .await
                        .map_err(|_| self.failure("concurrency limiter closed"))?,
                ),
                None => None,
            };
            self.executor
                .execute(input)
                .await
                .map_err(|e| self.failure(format!("{:#}", e)))
        };

        match self.timeout {
            Some(after) => timeout(after, execution)
                .await
                .map_err(|_| ToolError::Timeout {
                    tool: self.name.clone(),
                    after,
                })?,
            None => execution.await,
        }
    }

    fn failure<S: Into<String>>(&self, message: S) -> ToolError {
        ToolError::ExecutionError {
            tool: self.name.clone(),
            message: message.into(),
        }
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .field("timeout", &self.timeout)
            .field("max_concurrency", &self.limiter.is_some())
            .finish()
    }
}

/// The closed set of tools offered to the backend. Read-only once an exchange starts, so a
/// single registry can be shared by every concurrent exchange.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the weather and temperature conversion tools
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        for tool in BuiltinTool::all() {
            registry.insert(tool.definition());
        }
        registry
    }

    pub fn register<N, D>(
        &mut self,
        name: N,
        description: D,
        schema: ToolSchema,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<(), ToolError>
    where
        N: Into<String>,
        D: Into<String>,
    {
        self.register_definition(ToolDefinition::new(name, description, schema, executor))
    }

    pub fn register_definition(&mut self, definition: ToolDefinition) -> Result<(), ToolError> {
        if self.index.contains_key(&definition.name) {
            return Err(ToolError::DuplicateTool(definition.name));
        }
        self.insert(definition);
        Ok(())
    }

    fn insert(&mut self, definition: ToolDefinition) {
        self.index.insert(definition.name.clone(), self.tools.len());
        self.tools.push(definition);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for every tool, in registration order
    pub fn declarations(&self) -> Vec<Tool> {
        self.tools.iter().map(ToolDefinition::declaration).collect()
    }

    /// Validate `raw_input` against the named tool's schema and run it
    pub async fn resolve(&self, name: &str, raw_input: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnrecognizedTool(name.to_string()))?;

        tool.schema
            .validate(&raw_input)
            .map_err(|violations| ToolError::SchemaValidation {
                tool: name.to_string(),
                violations,
            })?;

        tracing::debug!(tool = name, "executing tool");
        tool.run(raw_input).await
    }
}
