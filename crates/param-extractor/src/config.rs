//! Extractor runtime configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (applied by the binary)
//! 2. Environment variables (a `.env` file is loaded first with `dotenvy`)
//! 3. TOML file passed with `--config`
//! 4. Built-in defaults
//!
//! API keys only come from the environment; they are never read from or
//! written to the TOML file.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use consensus::{ConsensusConfig, ConsensusError, DEFAULT_CONFIDENCE_THRESHOLD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::openrouter::{available_models, DEFAULT_BASE_URL};
use crate::provider::KeyRing;
use crate::retry::{RetryPolicy, DEFAULT_MAX_DELAY};

const ENV_API_KEY: &str = "OPENROUTER_API_KEY";
const ENV_BASE_URL: &str = "OPENROUTER_BASE_URL";
const ENV_REQUEST_DELAY: &str = "REQUEST_DELAY_SECONDS";
const ENV_ENABLE_BACKOFF: &str = "ENABLE_EXPONENTIAL_BACKOFF";
const ENV_MAX_RETRIES: &str = "MAX_RETRIES";
const ENV_RETRY_DELAY: &str = "RETRY_DELAY_SECONDS";
const ENV_CONFIDENCE_THRESHOLD: &str = "CONFIDENCE_THRESHOLD";
const ENV_MODELS: &str = "EXTRACTOR_MODELS";

const DEFAULT_REQUEST_DELAY_SECS: f64 = 0.5;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: f64 = 2.0;
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 2000;
/// Models queried at once for a single snippet.
const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error(
        "No OpenRouter API keys found. Set OPENROUTER_API_KEY or OPENROUTER_API_KEY_1, \
         OPENROUTER_API_KEY_2, ... in the environment or .env"
    )]
    MissingApiKey,

    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub base_url: String,
    /// Model identifiers queried for every snippet, in report column order.
    pub models: Vec<String>,
    /// Fixed pause before every request.
    pub request_delay_secs: f64,
    pub enable_exponential_backoff: bool,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub max_retry_delay_secs: f64,
    pub confidence_threshold: f64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_concurrency: usize,
    #[serde(skip)]
    pub api_keys: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            models: available_models(),
            request_delay_secs: DEFAULT_REQUEST_DELAY_SECS,
            enable_exponential_backoff: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_retry_delay_secs: DEFAULT_MAX_DELAY.as_secs_f64(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            api_keys: Vec::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { name, value: raw })
}

fn parse_bool(name: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value: raw }),
    }
}

fn duration_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// `OPENROUTER_API_KEY`, then `OPENROUTER_API_KEY_1`, `_2`, ... up to the
/// first gap. Blank values are ignored.
pub fn api_keys_from<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let present = |name: &str| lookup(name).filter(|k| !k.trim().is_empty());
    let mut keys: Vec<String> = present(ENV_API_KEY).into_iter().collect();
    let mut index = 1;
    while let Some(key) = present(&format!("{ENV_API_KEY}_{index}")) {
        keys.push(key);
        index += 1;
    }
    keys
}

impl ExtractorConfig {
    /// Defaults, overlaid with `path` when given, then with the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_REQUEST_DELAY) {
            self.request_delay_secs = parse_env(ENV_REQUEST_DELAY, raw)?;
        }
        if let Some(raw) = lookup(ENV_ENABLE_BACKOFF) {
            self.enable_exponential_backoff = parse_bool(ENV_ENABLE_BACKOFF, raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            self.max_retries = parse_env(ENV_MAX_RETRIES, raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRY_DELAY) {
            self.retry_delay_secs = parse_env(ENV_RETRY_DELAY, raw)?;
        }
        if let Some(raw) = lookup(ENV_CONFIDENCE_THRESHOLD) {
            self.confidence_threshold = parse_env(ENV_CONFIDENCE_THRESHOLD, raw)?;
        }
        if let Some(raw) = lookup(ENV_MODELS) {
            let models: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
            if !models.is_empty() {
                self.models = models;
            }
        }
        self.api_keys = api_keys_from(&lookup);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = |name: &'static str, secs: f64| {
            if secs.is_finite() && secs >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    name,
                    value: secs.to_string(),
                })
            }
        };
        non_negative("request_delay_secs", self.request_delay_secs)?;
        non_negative("retry_delay_secs", self.retry_delay_secs)?;
        non_negative("max_retry_delay_secs", self.max_retry_delay_secs)?;
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_concurrency",
                value: "0".into(),
            });
        }
        self.consensus_config()?;
        Ok(())
    }

    pub fn request_delay(&self) -> Duration {
        duration_from_secs(self.request_delay_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.enable_exponential_backoff {
            RetryPolicy::ExponentialBackoff {
                max_retries: self.max_retries,
                base_delay: duration_from_secs(self.retry_delay_secs),
                max_delay: duration_from_secs(self.max_retry_delay_secs),
            }
        } else {
            RetryPolicy::SkipOnError
        }
    }

    pub fn consensus_config(&self) -> Result<ConsensusConfig, ConsensusError> {
        ConsensusConfig::with_threshold(self.confidence_threshold)
    }

    /// Keys for network commands; an empty pool is a configuration error.
    pub fn key_ring(&self) -> Result<KeyRing, ConfigError> {
        KeyRing::new(self.api_keys.clone()).map_err(|_| ConfigError::MissingApiKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExtractorConfig::default();
        assert_eq!(config.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(config.models.len(), 10);
        assert_eq!(config.request_delay(), Duration::from_millis(500));
        assert_eq!(config.retry_policy(), RetryPolicy::SkipOnError);
        assert!((config.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_numbered_keys_stop_at_gap() {
        let keys = api_keys_from(lookup_from(&[
            ("OPENROUTER_API_KEY", "base"),
            ("OPENROUTER_API_KEY_1", "one"),
            ("OPENROUTER_API_KEY_2", "two"),
            ("OPENROUTER_API_KEY_4", "four"),
        ]));
        assert_eq!(keys, vec!["base", "one", "two"]);
    }

    #[test]
    fn test_numbered_keys_without_base() {
        let keys = api_keys_from(lookup_from(&[("OPENROUTER_API_KEY_1", "one")]));
        assert_eq!(keys, vec!["one"]);
        assert!(api_keys_from(lookup_from(&[("OPENROUTER_API_KEY", "  ")])).is_empty());
    }

    #[test]
    fn test_env_overlay() {
        let mut config = ExtractorConfig::default();
        config
            .apply_env_with(lookup_from(&[
                ("ENABLE_EXPONENTIAL_BACKOFF", "true"),
                ("MAX_RETRIES", "5"),
                ("RETRY_DELAY_SECONDS", "1.5"),
                ("REQUEST_DELAY_SECONDS", "0"),
                ("CONFIDENCE_THRESHOLD", "0.8"),
                ("EXTRACTOR_MODELS", "openai/gpt-4o-mini, anthropic/claude-3-haiku,"),
            ]))
            .unwrap();

        assert_eq!(config.models, vec!["openai/gpt-4o-mini", "anthropic/claude-3-haiku"]);
        assert_eq!(config.request_delay(), Duration::ZERO);
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::ExponentialBackoff {
                max_retries: 5,
                base_delay: Duration::from_millis(1500),
                max_delay: Duration::from_secs(60),
            }
        );
        assert!((config.confidence_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_env_value_is_reported() {
        let mut config = ExtractorConfig::default();
        let err = config
            .apply_env_with(lookup_from(&[("MAX_RETRIES", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "MAX_RETRIES",
                ..
            }
        ));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = ExtractorConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Consensus(_))));
    }

    #[test]
    fn test_missing_keys_is_config_error() {
        let config = ExtractorConfig::default();
        assert!(matches!(config.key_ring(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_toml_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extractor.toml");
        std::fs::write(
            &path,
            "models = [\"openai/gpt-4o-mini\"]\nmax_tokens = 1024\nenable_exponential_backoff = true\n",
        )
        .unwrap();

        let config = ExtractorConfig::from_file(&path).unwrap();
        assert_eq!(config.models, vec!["openai/gpt-4o-mini"]);
        assert_eq!(config.max_tokens, 1024);
        assert!(config.enable_exponential_backoff);
        // Unset fields keep their defaults.
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_unreadable_file() {
        let err = ExtractorConfig::from_file(Path::new("/nonexistent/extractor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
