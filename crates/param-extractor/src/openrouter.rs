//! OpenRouter client: one OpenAI-compatible endpoint in front of many
//! model vendors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::{Completion, GenerateRequest, LlmProvider, ProviderError, TokenUsage};

/// Default OpenRouter API base URL.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const REFERER: &str = "https://github.com/risc-v-param-extractor";
const APP_TITLE: &str = "RISC-V Parameter Extractor";

pub const ACCESS_METHOD: &str = "OpenRouter API";

/// Models queried when none are configured.
pub const MODEL_CATALOG: &[&str] = &[
    "nvidia/nemotron-3-nano-30b-a3b:free",
    "qwen/qwen3-coder-next",
    "moonshotai/kimi-k2.5",
    "openai/gpt-4o-mini",
    "openai/gpt-3.5-turbo",
    "anthropic/claude-3-haiku",
    "google/gemini-3-flash-preview",
    "google/gemini-2.5-flash",
    "meta-llama/llama-3.1-70b-instruct",
    "mistralai/ministral-14b-2512",
];

pub fn available_models() -> Vec<String> {
    MODEL_CATALOG.iter().map(|m| m.to_string()).collect()
}

/// Catalog models served by one vendor, e.g. `"openai"`.
pub fn provider_models(provider: &str) -> Vec<String> {
    let prefix = format!("{provider}/");
    MODEL_CATALOG
        .iter()
        .filter(|m| m.starts_with(&prefix))
        .map(|m| m.to_string())
        .collect()
}

/// Descriptive split of a model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub full_name: String,
    pub provider: String,
    pub model: String,
    pub access_method: String,
}

impl ModelInfo {
    /// Split `vendor/model` on the first slash; no slash means vendor `unknown`.
    pub fn from_model_id(model_id: &str, access_method: &str) -> Self {
        let (provider, model) = model_id
            .split_once('/')
            .unwrap_or(("unknown", model_id));
        Self {
            full_name: model_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            access_method: access_method.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// HTTP client for the OpenRouter chat-completions endpoint.
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
    request_delay: Duration,
}

impl OpenRouterClient {
    pub fn new(base_url: impl Into<String>, request_delay: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_delay,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmProvider for OpenRouterClient {
    fn access_method(&self) -> &str {
        ACCESS_METHOD
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        api_key: &str,
    ) -> Result<Completion, ProviderError> {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        let body = ChatRequest {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(model = %request.model, prompt_len = request.prompt.len(), "Sending completion request");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", APP_TITLE)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response has no message content".into()))?;

        Ok(Completion {
            text,
            model: request.model.clone(),
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_info_split() {
        let info = ModelInfo::from_model_id("openai/gpt-4o-mini", "OpenRouter API");
        assert_eq!(info.provider, "openai");
        assert_eq!(info.model, "gpt-4o-mini");

        let info = ModelInfo::from_model_id("local-model", "OpenRouter API");
        assert_eq!(info.provider, "unknown");
        assert_eq!(info.model, "local-model");
    }

    #[test]
    fn test_model_info_keeps_suffix_slashes() {
        let info = ModelInfo::from_model_id("org/family/variant:free", "x");
        assert_eq!(info.provider, "org");
        assert_eq!(info.model, "family/variant:free");
    }

    #[test]
    fn test_provider_models_filter() {
        assert_eq!(
            provider_models("google"),
            vec!["google/gemini-3-flash-preview", "google/gemini-2.5-flash"]
        );
        assert!(provider_models("nonexistent").is_empty());
        assert_eq!(available_models().len(), 10);
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let client = OpenRouterClient::new("https://example.test/api/v1/", Duration::ZERO).unwrap();
        assert_eq!(
            client.completions_url(),
            "https://example.test/api/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "openai/gpt-4o-mini",
            messages: [ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.5,
            max_tokens: 10,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn test_response_without_choices_parses() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"usage": {"total_tokens": 5}}"#).unwrap();
        assert!(parsed.choices.is_empty());
        assert_eq!(parsed.usage.unwrap().total_tokens, 5);
    }
}
