//! Parameter Extractor
//!
//! Queries several LLMs for architecture parameters named in specification
//! text and reconciles their answers with the [`consensus`] validator.
//!
//! # Flow
//!
//! ```text
//! snippets/*.txt
//!   │  prompts::PromptStrategy::build_prompt
//!   ▼
//! ParamsExtractor ──► LlmProvider (OpenRouter) under RetryPolicy + KeyRing
//!   │  parser::parse_parameter_records
//!   ▼
//! DirectoryExtraction ──► ConsensusValidator ──► reports (CSV, YAML)
//!                                                  │
//!                                                  ▼
//!                                             organize (per-source YAML)
//! ```
//!
//! `connectivity` sends one short request per model as a smoke test.
//! `evaluation` scores models against a built-in labelled set and is
//! independent of consensus scoring.

pub mod config;
pub mod connectivity;
pub mod evaluation;
pub mod extractor;
pub mod openrouter;
pub mod organize;
pub mod parser;
pub mod prompts;
pub mod provider;
pub mod reports;
pub mod retry;

pub use config::{ConfigError, ExtractorConfig};
pub use extractor::{
    DirectoryExtraction, ModelExtraction, ParamsExtractor, SnippetExtraction, SnippetValidation,
};
pub use openrouter::{ModelInfo, OpenRouterClient};
pub use parser::{extract_parameter_names, parse_parameter_records, ParseError};
pub use prompts::{PromptStrategy, UnknownStrategy};
pub use provider::{
    Completion, GenerateRequest, GenerationOutcome, KeyCursor, KeyRing, LlmProvider,
    ProviderError, TokenUsage,
};
pub use retry::RetryPolicy;
