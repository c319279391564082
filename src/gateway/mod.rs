//! Text-generation gateway.
//!
//! The pipeline only ever sees [`TextGenerator`]: one prompt in, one string
//! out, or a [`ProviderError`]. Chat backends implement [`ChatProvider`] and
//! are wrapped by [`ChatGenerator`], which owns the model choice.

pub mod error;
pub mod ollama;
pub mod openrouter;
pub mod types;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use error::{ErrorContext, ProviderError};
pub use ollama::OllamaAdapter;
pub use openrouter::OpenRouterAdapter;
pub use types::*;

/// Maximum allowed response body (1MB).
pub(crate) const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
pub(crate) const MAX_INPUT_CHARS: usize = 500_000;

/// One prompt in, generated text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Adapts a [`ChatProvider`] to [`TextGenerator`].
///
/// The prompt becomes a single user message, optionally preceded by a fixed
/// system message. Blank replies count as failures.
pub struct ChatGenerator<P> {
    provider: P,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl<P: ChatProvider> ChatGenerator<P> {
    pub fn new(provider: P, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: None,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    fn request(&self, prompt: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));

        let req = ChatRequest::new(&self.model, messages, "strata::generate")
            .temperature(self.temperature);
        match self.max_tokens {
            Some(max) => req.max_tokens(max),
            None => req,
        }
    }
}

#[async_trait]
impl<P: ChatProvider> TextGenerator for ChatGenerator<P> {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let req = self.request(prompt);
        let resp = self.provider.chat(&req).await?;

        debug!(
            provider = self.provider.name(),
            model = %self.model,
            caller = req.caller,
            input_tokens = resp.input_tokens,
            output_tokens = resp.output_tokens,
            latency_ms = resp.latency.as_millis() as u64,
            finish_reason = ?resp.finish_reason,
            "generation complete"
        );

        if resp.content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: self.provider.name(),
            });
        }
        Ok(resp.content)
    }
}

// =============================================================================
// Backend selection
// =============================================================================

/// Which chat backend produces the reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ollama,
    OpenRouter,
}

impl Backend {
    pub fn default_model(self) -> &'static str {
        match self {
            Backend::Ollama => "llama3.1",
            Backend::OpenRouter => "openai/gpt-5-mini",
        }
    }
}

impl FromStr for Backend {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Backend::Ollama),
            "openrouter" => Ok(Backend::OpenRouter),
            other => Err(ProviderError::config(format!(
                "unknown backend {other:?} (expected ollama or openrouter)"
            ))),
        }
    }
}

/// Backend + model selection, resolved before any stage runs.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub backend: Backend,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl GeneratorConfig {
    /// Read `STRATA_LLM_BACKEND`, `STRATA_LLM_MODEL`, `STRATA_LLM_TEMPERATURE`,
    /// `STRATA_LLM_MAX_TOKENS` and `STRATA_LLM_SYSTEM_PROMPT`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let backend = match std::env::var("STRATA_LLM_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => Backend::Ollama,
        };
        let model = std::env::var("STRATA_LLM_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| backend.default_model().to_string());
        let temperature = match std::env::var("STRATA_LLM_TEMPERATURE") {
            Ok(raw) => raw.parse::<f32>().map_err(|_| {
                ProviderError::config(format!("STRATA_LLM_TEMPERATURE is not a number: {raw:?}"))
            })?,
            Err(_) => 0.0,
        };
        let max_tokens = match std::env::var("STRATA_LLM_MAX_TOKENS") {
            Ok(raw) => Some(raw.parse::<u32>().map_err(|_| {
                ProviderError::config(format!("STRATA_LLM_MAX_TOKENS is not an integer: {raw:?}"))
            })?),
            Err(_) => None,
        };
        let system_prompt = std::env::var("STRATA_LLM_SYSTEM_PROMPT")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            backend,
            model,
            temperature,
            max_tokens,
            system_prompt,
        })
    }

    /// Build the configured generator. Fails on missing credentials or a bad endpoint.
    pub fn build(&self) -> Result<Arc<dyn TextGenerator>, ProviderError> {
        let generator: Arc<dyn TextGenerator> = match self.backend {
            Backend::Ollama => Arc::new(self.wrap(OllamaAdapter::from_env()?)),
            Backend::OpenRouter => Arc::new(self.wrap(OpenRouterAdapter::from_env()?)),
        };
        Ok(generator)
    }

    fn wrap<P: ChatProvider>(&self, provider: P) -> ChatGenerator<P> {
        let mut generator =
            ChatGenerator::new(provider, self.model.clone()).temperature(self.temperature);
        if let Some(max) = self.max_tokens {
            generator = generator.max_tokens(max);
        }
        match &self.system_prompt {
            Some(system) => generator.system_prompt(system.clone()),
            None => generator,
        }
    }
}

/// Stands in when no enabled stage generates text; every call is a config error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGenerator;

#[async_trait]
impl TextGenerator for NoGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::config("no text generator configured for this run"))
    }
}

/// Read a response body, refusing anything larger than [`MAX_RESPONSE_LEN`].
pub(crate) async fn read_capped_body(
    provider: &'static str,
    mut response: reqwest::Response,
) -> Result<String, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let new_len = bytes.len() + chunk.len();
        if new_len > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                provider,
                format!("Response too large: {new_len} bytes"),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
