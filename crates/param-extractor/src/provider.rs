//! Generation provider abstraction.
//!
//! A provider turns `(model, prompt)` into completion text. Everything that
//! can go wrong on the network side is a [`ProviderError`]; by the time a
//! result reaches consensus it has been flattened into a
//! [`GenerationOutcome`], and a failed outcome contributes zero records.
//!
//! API keys are not chosen by the provider. The caller owns a [`KeyCursor`]
//! and asks a [`KeyRing`] for the next key before each request.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a generation call
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("No API keys configured")]
    MissingApiKey,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::MissingApiKey | Self::InvalidResponse(_) => false,
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: 0.3,
            max_tokens: 2000,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// How models are reached, e.g. `"OpenRouter API"`.
    fn access_method(&self) -> &str;

    async fn generate(
        &self,
        request: &GenerateRequest,
        api_key: &str,
    ) -> Result<Completion, ProviderError>;
}

/// Flattened result of a generation call: `{success, text, error}`, plus
/// token usage when the provider reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl GenerationOutcome {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: Some(text.into()),
            error: None,
            usage: None,
        }
    }

    pub fn failure(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            text: None,
            error: Some(error.to_string()),
            usage: None,
        }
    }
}

impl From<Result<Completion, ProviderError>> for GenerationOutcome {
    fn from(result: Result<Completion, ProviderError>) -> Self {
        match result {
            Ok(completion) => Self {
                usage: completion.usage,
                ..Self::success(completion.text)
            },
            Err(e) => Self::failure(e),
        }
    }
}

/// Position in a [`KeyRing`]. Owned by whoever issues requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyCursor {
    position: usize,
}

/// The pool of API keys requests are spread across.
#[derive(Clone)]
pub struct KeyRing {
    keys: Vec<String>,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Result<Self, ProviderError> {
        let keys: Vec<String> = keys.into_iter().filter(|k| !k.trim().is_empty()).collect();
        if keys.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }
        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Round-robin: the key at the cursor, then advance the cursor.
    pub fn next(&self, cursor: &mut KeyCursor) -> &str {
        let key = &self.keys[cursor.position % self.keys.len()];
        cursor.position = cursor.position.wrapping_add(1);
        key
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("keys", &format_args!("<{} redacted>", self.keys.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::Transport("reset".into()).is_retriable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retriable());
        assert!(ProviderError::Http {
            status: 503,
            body: String::new()
        }
        .is_retriable());
        assert!(!ProviderError::Http {
            status: 401,
            body: String::new()
        }
        .is_retriable());
        assert!(!ProviderError::InvalidResponse("no choices".into()).is_retriable());
        assert!(!ProviderError::MissingApiKey.is_retriable());
    }

    #[test]
    fn test_key_ring_round_robin() {
        let ring = KeyRing::new(vec!["k1".into(), "k2".into(), "k3".into()]).unwrap();
        let mut cursor = KeyCursor::default();
        let picked: Vec<&str> = (0..5).map(|_| ring.next(&mut cursor)).collect();
        assert_eq!(picked, vec!["k1", "k2", "k3", "k1", "k2"]);
    }

    #[test]
    fn test_independent_cursors() {
        let ring = KeyRing::new(vec!["k1".into(), "k2".into()]).unwrap();
        let mut a = KeyCursor::default();
        let mut b = KeyCursor::default();
        assert_eq!(ring.next(&mut a), "k1");
        assert_eq!(ring.next(&mut a), "k2");
        assert_eq!(ring.next(&mut b), "k1");
    }

    #[test]
    fn test_empty_key_ring_rejected() {
        assert!(matches!(
            KeyRing::new(vec![" ".into()]),
            Err(ProviderError::MissingApiKey)
        ));
    }

    #[test]
    fn test_key_ring_debug_redacts() {
        let ring = KeyRing::new(vec!["sk-secret".into()]).unwrap();
        assert!(!format!("{ring:?}").contains("sk-secret"));
    }

    #[test]
    fn test_outcome_from_result() {
        let ok = GenerationOutcome::from(Ok::<_, ProviderError>(Completion {
            text: "- name: x".into(),
            model: "m".into(),
            usage: None,
        }));
        assert!(ok.success);
        assert_eq!(ok.text.as_deref(), Some("- name: x"));
        assert_eq!(ok.usage, None);

        let usage = TokenUsage {
            prompt_tokens: 40,
            completion_tokens: 12,
            total_tokens: 52,
        };
        let with_usage = GenerationOutcome::from(Ok::<_, ProviderError>(Completion {
            text: "ok".into(),
            model: "m".into(),
            usage: Some(usage),
        }));
        assert_eq!(with_usage.usage, Some(usage));

        let err = GenerationOutcome::from(Err::<Completion, _>(ProviderError::Transport(
            "timeout".into(),
        )));
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("Transport error: timeout"));
    }
}
