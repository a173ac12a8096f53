//! Extraction orchestrator.
//!
//! For each snippet: build the prompt, query every configured model through
//! the provider (bounded concurrency, results kept in model order), parse
//! each response into raw records. Consensus runs afterwards over the
//! collected outputs, one [`SnippetValidation`] per snippet.
//!
//! A model that fails after retries still appears in the results with an
//! empty record list, so it counts as a source that found nothing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use consensus::{ConsensusValidator, ModelOutputs, RawParameterRecord, ValidationResult};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ExtractorConfig;
use crate::openrouter::{ModelInfo, OpenRouterClient};
use crate::parser::parse_parameter_records;
use crate::prompts::PromptStrategy;
use crate::provider::{GenerateRequest, GenerationOutcome, KeyCursor, KeyRing, LlmProvider};
use crate::retry::RetryPolicy;

/// One model's answer for one snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExtraction {
    pub model: String,
    pub outcome: GenerationOutcome,
    /// Parsed records; always empty for a failed outcome.
    pub parameters: Vec<RawParameterRecord>,
}

impl ModelExtraction {
    pub fn succeeded(&self) -> bool {
        self.outcome.success
    }

    /// The unparsed response text, when the call succeeded.
    pub fn raw_text(&self) -> Option<&str> {
        self.outcome.text.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.error.as_deref()
    }
}

/// Every model's answer for one snippet, in model order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnippetExtraction {
    pub models: Vec<ModelExtraction>,
}

impl SnippetExtraction {
    pub fn get(&self, model: &str) -> Option<&ModelExtraction> {
        self.models.iter().find(|m| m.model == model)
    }

    /// Consensus input: failed models contribute an empty list.
    pub fn to_model_outputs(&self) -> ModelOutputs {
        self.models
            .iter()
            .map(|m| {
                let records = if m.succeeded() {
                    m.parameters.clone()
                } else {
                    Vec::new()
                };
                (m.model.clone(), records)
            })
            .collect()
    }
}

/// Snippet file name -> extraction.
pub type DirectoryExtraction = BTreeMap<String, SnippetExtraction>;

/// Consensus result tagged with the snippet it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetValidation {
    pub source_snippet: String,
    #[serde(flatten)]
    pub result: ValidationResult,
}

/// `*.txt` files directly inside `dir`, sorted by file name.
pub fn snippet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "txt") {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct ParamsExtractor {
    provider: Arc<dyn LlmProvider>,
    models: Vec<String>,
    keys: KeyRing,
    cursor: Mutex<KeyCursor>,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
    max_concurrency: usize,
    validator: ConsensusValidator,
}

impl ParamsExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, keys: KeyRing, models: Vec<String>) -> Self {
        let defaults = GenerateRequest::new("", "");
        Self {
            provider,
            models,
            keys,
            cursor: Mutex::new(KeyCursor::default()),
            retry: RetryPolicy::default(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            max_concurrency: 1,
            validator: ConsensusValidator::default(),
        }
    }

    /// OpenRouter-backed extractor configured from `config`.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self> {
        let keys = config.key_ring()?;
        let client = OpenRouterClient::new(config.base_url.clone(), config.request_delay())
            .context("Failed to build OpenRouter client")?;
        info!(keys = keys.len(), models = config.models.len(), "Extractor configured");
        Ok(Self::new(Arc::new(client), keys, config.models.clone())
            .with_retry_policy(config.retry_policy())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .with_max_concurrency(config.max_concurrency)
            .with_validator(ConsensusValidator::new(config.consensus_config()?)))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_validator(mut self, validator: ConsensusValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn model_info(&self) -> Vec<ModelInfo> {
        let access = self.provider.access_method();
        self.models
            .iter()
            .map(|m| ModelInfo::from_model_id(m, access))
            .collect()
    }

    /// The next API key in rotation. Every attempt, retries included, takes one.
    pub fn next_key(&self) -> String {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        self.keys.next(&mut cursor).to_string()
    }

    /// Send `prompt` to `model` under the retry policy.
    pub async fn generate(&self, model: &str, prompt: &str) -> GenerationOutcome {
        let request = GenerateRequest::new(model, prompt)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let result = self
            .retry
            .execute(model, |_| {
                let key = self.next_key();
                let request = &request;
                async move { self.provider.generate(request, &key).await }
            })
            .await;
        if let Err(e) = &result {
            warn!(model, error = %e, "Model call failed");
        }
        GenerationOutcome::from(result)
    }

    async fn query_model(&self, model: &str, prompt: &str) -> ModelExtraction {
        info!(model, "Processing with model");
        let outcome = self.generate(model, prompt).await;
        let parameters = match outcome.text.as_deref() {
            Some(text) if outcome.success => parse_parameter_records(text),
            _ => Vec::new(),
        };
        if outcome.success {
            info!(model, count = parameters.len(), "Parsed parameters");
        }
        ModelExtraction {
            model: model.to_string(),
            outcome,
            parameters,
        }
    }

    /// Query every model with `snippet` framed by `strategy`.
    pub async fn extract_from_snippet(
        &self,
        snippet: &str,
        strategy: PromptStrategy,
    ) -> SnippetExtraction {
        let prompt = strategy.build_prompt(snippet);
        let prompt = prompt.as_str();
        let models = stream::iter(self.models.iter())
            .map(|model| self.query_model(model, prompt))
            .buffered(self.max_concurrency)
            .collect()
            .await;
        SnippetExtraction { models }
    }

    pub async fn extract_from_file(
        &self,
        path: &Path,
        strategy: PromptStrategy,
    ) -> Result<SnippetExtraction> {
        let snippet = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snippet {}", path.display()))?;
        Ok(self.extract_from_snippet(&snippet, strategy).await)
    }

    /// Every `*.txt` file in `dir`, keyed by file name.
    pub async fn extract_from_directory(
        &self,
        dir: &Path,
        strategy: PromptStrategy,
    ) -> Result<DirectoryExtraction> {
        let files = snippet_files(dir)?;
        info!(count = files.len(), dir = %dir.display(), %strategy, "Found snippet files");

        let mut results = DirectoryExtraction::new();
        for path in files {
            let name = file_name_of(&path);
            info!(snippet = %name, "Processing snippet");
            let extraction = self.extract_from_file(&path, strategy).await?;
            results.insert(name, extraction);
        }
        Ok(results)
    }

    /// Run consensus over every snippet's model outputs.
    pub fn validate_and_merge(
        &self,
        results: &DirectoryExtraction,
    ) -> BTreeMap<String, SnippetValidation> {
        results
            .iter()
            .map(|(snippet, extraction)| {
                let result = self.validator.validate(&extraction.to_model_outputs());
                (
                    snippet.clone(),
                    SnippetValidation {
                        source_snippet: snippet.clone(),
                        result,
                    },
                )
            })
            .collect()
    }
}
