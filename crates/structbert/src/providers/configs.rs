use std::fmt;

use super::factory::ProviderType;
use crate::errors::ConfigurationError;

#[derive(Clone)]
pub struct GeminiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl GeminiProviderConfig {
    pub const KEY_PREFIX: &'static str = "AIza";
}

#[derive(Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl OpenAiProviderConfig {
    pub const KEY_PREFIX: &'static str = "sk-";
}

/// Unified enum to wrap different provider configurations
#[derive(Clone, Debug)]
pub enum ProviderConfig {
    Gemini(GeminiProviderConfig),
    OpenAi(OpenAiProviderConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::Gemini(_) => ProviderType::Gemini,
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::Gemini(config) => &config.model,
            ProviderConfig::OpenAi(config) => &config.model,
        }
    }

    /// Check the API key is present and has the format the provider issues
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let (key, prefix) = match self {
            ProviderConfig::Gemini(config) => (&config.api_key, GeminiProviderConfig::KEY_PREFIX),
            ProviderConfig::OpenAi(config) => (&config.api_key, OpenAiProviderConfig::KEY_PREFIX),
        };
        let provider = self.provider_type().to_string();

        if key.trim().is_empty() {
            return Err(ConfigurationError::MissingApiKey { provider });
        }
        if !key.starts_with(prefix) {
            return Err(ConfigurationError::MalformedApiKey {
                provider,
                expected_prefix: prefix.to_string(),
            });
        }
        Ok(())
    }
}

fn redact(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{}***", key.chars().take(4).collect::<String>())
    }
}

impl fmt::Debug for GeminiProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiProviderConfig")
            .field("host", &self.host)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("host", &self.host)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
