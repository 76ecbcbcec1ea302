//! Router client
//!
//! OpenAI-compatible `POST {base_url}/chat/completions` against the LLM
//! router. Retries rate limits, server errors and connection failures.

use super::{LlmError, LlmRequest, LlmResponse, TextGenerator};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_ROUTER_URL: &str = "https://router.requesty.ai/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct RouterClient {
    base_url: String,
    api_key: String,
    http_client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RouterClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| LlmError::Request(format!("failed to create HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(
            "Router client initialized: url={}, max_retries={}, retry_delay={:?}",
            base_url, max_retries, retry_delay
        );

        Ok(Self {
            base_url,
            api_key: api_key.into(),
            http_client,
            max_retries,
            retry_delay,
        })
    }

    fn build_body(request: &LlmRequest) -> Value {
        let config = request.provider.config();

        let user_content = match &request.image_base64 {
            Some(image) => json!([
                {"type": "text", "text": request.prompt},
                {
                    "type": "image_url",
                    "image_url": {"url": format!("data:image/png;base64,{}", image)}
                }
            ]),
            None => json!(request.prompt),
        };

        json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": user_content}
            ]
        })
    }

    fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// One attempt; `Err((retryable, error))` on failure
    async fn send_once(&self, url: &str, body: &Value) -> Result<ChatResponse, (bool, LlmError)> {
        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect();
                let err = if e.is_timeout() {
                    LlmError::Request(format!("timed out after {}s", DEFAULT_TIMEOUT_SECS))
                } else if e.is_connect() {
                    LlmError::Request(format!("failed to connect to router at {}: {}", url, e))
                } else {
                    LlmError::Request(e.to_string())
                };
                (retryable, err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Router returned error: status={}, body={}", status, body);
            return Err((
                Self::is_retryable(status),
                LlmError::Api {
                    status: status.as_u16(),
                    body,
                },
            ));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| (false, LlmError::InvalidResponse(e.to_string())))
    }
}

#[async_trait::async_trait]
impl TextGenerator for RouterClient {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let started = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(request);
        let model = request.provider.config().model;

        debug!(
            "Requesting {} commentary: model={}, prompt_chars={}, image={}",
            request.provider,
            model,
            request.prompt.len(),
            request.image_base64.is_some()
        );

        let mut attempt: u32 = 0;
        let chat = loop {
            match self.send_once(&url, &body).await {
                Ok(chat) => break chat,
                Err((true, err)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Router error for {} (attempt {}/{}): {}. Retrying in {:?}",
                        request.provider, attempt, self.max_retries, err, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err((true, err)) => {
                    return Err(LlmError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    });
                }
                Err((false, err)) => return Err(err),
            }
        };

        let analysis = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "{} commentary generated in {}ms ({} chars)",
            request.provider,
            elapsed_ms,
            analysis.len()
        );

        Ok(LlmResponse {
            provider: request.provider,
            model: chat.model.unwrap_or_else(|| model.to_string()),
            analysis,
            elapsed_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
