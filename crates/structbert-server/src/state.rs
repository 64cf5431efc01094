use std::sync::Arc;
use structbert::agent::{Agent, AgentConfig};
use structbert::auth::UserStore;
use structbert::providers::{configs::ProviderConfig, factory};
use structbert::tools::ToolRegistry;

use crate::error::ApiError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub provider_config: ProviderConfig,
    /// Read-only once built, shared by every exchange
    pub registry: Arc<ToolRegistry>,
    pub agent_config: AgentConfig,
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    pub fn new(provider_config: ProviderConfig, users: Arc<dyn UserStore>) -> Self {
        Self {
            provider_config,
            registry: Arc::new(ToolRegistry::with_builtin_tools()),
            agent_config: AgentConfig::default(),
            users,
        }
    }

    pub fn with_agent_config(mut self, agent_config: AgentConfig) -> Self {
        self.agent_config = agent_config;
        self
    }

    /// A fresh agent for one request
    pub fn agent(&self) -> Result<Agent, ApiError> {
        let provider = factory::get_provider(self.provider_config.clone())?;
        let agent = Agent::new(provider, self.registry.clone())
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(agent.with_config(self.agent_config.clone())?)
    }
}
