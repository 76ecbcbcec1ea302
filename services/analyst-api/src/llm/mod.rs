//! LLM commentary generation
//!
//! All providers are reached through one OpenAI-compatible router endpoint;
//! the provider only selects the model id and sampling parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod prompt;
pub mod router;

pub use prompt::{build_strategy_prompt, SYSTEM_PROMPT};
pub use router::RouterClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Perplexity,
}

/// Model id and sampling parameters for one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub model: &'static str,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmProvider {
    pub const ALL: [LlmProvider; 3] = [
        LlmProvider::OpenAi,
        LlmProvider::Anthropic,
        LlmProvider::Perplexity,
    ];

    /// Path segment used in `/api/analyze/{provider}`
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Perplexity => "perplexity",
        }
    }

    pub fn config(&self) -> ModelConfig {
        match self {
            LlmProvider::OpenAi => ModelConfig {
                model: "openai/gpt-4o",
                max_tokens: 2000,
                temperature: 0.7,
            },
            LlmProvider::Anthropic => ModelConfig {
                model: "anthropic/claude-3-7-sonnet-latest",
                max_tokens: 4000,
                temperature: 0.5,
            },
            LlmProvider::Perplexity => ModelConfig {
                model: "perplexity/sonar",
                max_tokens: 1000,
                temperature: 0.3,
            },
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" => Ok(LlmProvider::OpenAi),
            "anthropic" | "claude" => Ok(LlmProvider::Anthropic),
            "perplexity" | "sonar" => Ok(LlmProvider::Perplexity),
            other => Err(LlmError::UnknownProvider(other.to_string())),
        }
    }
}

/// One commentary request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub provider: LlmProvider,
    pub system_prompt: String,
    pub prompt: String,
    /// Base64-encoded PNG chart, sent as an image content part
    pub image_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub provider: LlmProvider,
    pub model: String,
    pub analysis: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("router request failed: {0}")]
    Request(String),

    #[error("router returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("invalid router response: {0}")]
    InvalidResponse(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Anything that turns a prompt into commentary
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing_and_config() {
        assert_eq!("OpenAI".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!("claude".parse::<LlmProvider>().unwrap(), LlmProvider::Anthropic);
        assert!("mistral".parse::<LlmProvider>().is_err());

        assert_eq!(LlmProvider::Anthropic.config().max_tokens, 4000);
        assert_eq!(LlmProvider::Perplexity.config().model, "perplexity/sonar");
        assert_eq!(
            serde_json::to_value(LlmProvider::OpenAi).unwrap(),
            serde_json::json!("openai")
        );
    }
}
