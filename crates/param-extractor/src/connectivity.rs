//! Model connectivity check: one short extraction request per model.

use serde::Serialize;
use tracing::{info, warn};

use crate::extractor::ParamsExtractor;
use crate::provider::GenerationOutcome;

/// Completion budget for the check request.
pub const CHECK_MAX_TOKENS: u32 = 500;

/// Characters of the reply shown in the log.
const PREVIEW_CHARS: usize = 200;

pub const CHECK_PROMPT: &str = "\
Extract parameters from this text:

The cache block size is implementation-defined. Systems may use blocks from 32 to 128 bytes.

Output as YAML:
- name: parameter_name
  description: what it does
  type: implementation-defined
  keywords: [may, implementation-defined]
";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCheck {
    pub model: String,
    pub outcome: GenerationOutcome,
}

impl ModelCheck {
    pub fn passed(&self) -> bool {
        self.outcome.success
    }

    pub fn response_len(&self) -> usize {
        self.outcome.text.as_deref().map_or(0, |t| t.chars().count())
    }

    pub fn preview(&self) -> String {
        self.outcome
            .text
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(PREVIEW_CHARS)
            .collect()
    }
}

/// Per-model results of a connectivity run, in the order checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckReport {
    pub checks: Vec<ModelCheck>,
}

impl CheckReport {
    pub fn passed(&self) -> usize {
        self.checks.iter().filter(|c| c.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.checks.len() - self.passed()
    }

    /// `(provider, passed, total)` per provider prefix, first-seen order.
    pub fn by_provider(&self) -> Vec<(String, usize, usize)> {
        let mut groups: Vec<(String, usize, usize)> = Vec::new();
        for check in &self.checks {
            let provider = check.model.split('/').next().unwrap_or_default();
            let pos = match groups.iter().position(|(p, _, _)| p == provider) {
                Some(pos) => pos,
                None => {
                    groups.push((provider.to_string(), 0, 0));
                    groups.len() - 1
                }
            };
            groups[pos].1 += usize::from(check.passed());
            groups[pos].2 += 1;
        }
        groups
    }
}

/// Send [`CHECK_PROMPT`] to each model in turn.
///
/// The extractor's own token limit applies; build it with
/// `.with_max_tokens(CHECK_MAX_TOKENS)` to match the standard check.
pub async fn check_models(extractor: &ParamsExtractor, models: &[String]) -> CheckReport {
    info!(models = models.len(), "Checking model connectivity");
    let mut report = CheckReport::default();
    for model in models {
        let outcome = extractor.generate(model, CHECK_PROMPT).await;
        let check = ModelCheck {
            model: model.clone(),
            outcome,
        };
        if check.passed() {
            info!(
                model = %check.model,
                response_chars = check.response_len(),
                preview = %check.preview(),
                usage = ?check.outcome.usage,
                "SUCCESS"
            );
        } else {
            warn!(
                model = %check.model,
                error = check.outcome.error.as_deref().unwrap_or("Unknown error"),
                "FAILED"
            );
        }
        report.checks.push(check);
    }

    for (provider, passed, total) in report.by_provider() {
        info!(provider = %provider, passed, total, "Provider summary");
    }
    info!(
        passed = report.passed(),
        failed = report.failed(),
        total = report.checks.len(),
        "Connectivity check complete"
    );
    report
}
