//! Results organizer.
//!
//! Reads `parameters_<strategy>.yaml` files, keeps parameters at or above a
//! confidence floor and regroups them per source snippet as
//! `<results>/<source>/<strategy>.yaml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use consensus::{ConfidenceLevel, Constraint, MEDIUM_CONFIDENCE_FLOOR};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::openrouter::ModelInfo;
use crate::prompts::PromptStrategy;
use crate::reports::{ParametersDocument, SourcedParameter};

/// Default floor: medium confidence and above.
pub const DEFAULT_MIN_CONFIDENCE: f64 = MEDIUM_CONFIDENCE_FLOOR;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizedParameter {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub constraints: Option<Constraint>,
    pub keywords: Vec<String>,
    pub confidence_score: f64,
    pub confidence_level: ConfidenceLevel,
    pub model_agreement: String,
}

impl From<&SourcedParameter> for OrganizedParameter {
    fn from(param: &SourcedParameter) -> Self {
        Self {
            name: param.name.clone(),
            description: param.description.clone(),
            param_type: param.param_type.clone(),
            constraints: param.constraints.clone(),
            keywords: param.keywords.clone(),
            confidence_score: param.confidence.score,
            confidence_level: param.confidence.level,
            model_agreement: param.confidence.agreement.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizedMetadata {
    pub source_file: String,
    pub prompt_strategy: String,
    pub confidence_threshold: String,
    pub total_parameters: usize,
    pub extraction_date: String,
    pub models_used: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizedDocument {
    pub metadata: OrganizedMetadata,
    pub parameters: Vec<OrganizedParameter>,
}

/// Folder name for a source snippet: the file name without `.txt`.
pub fn source_name(source: &str) -> &str {
    source.strip_suffix(".txt").unwrap_or(source)
}

/// Parameters scoring at least `min_confidence`, grouped by source name.
pub fn group_by_source(
    parameters: &[SourcedParameter],
    min_confidence: f64,
) -> BTreeMap<String, Vec<&SourcedParameter>> {
    let mut groups: BTreeMap<String, Vec<&SourcedParameter>> = BTreeMap::new();
    for param in parameters {
        if param.confidence.score < min_confidence {
            continue;
        }
        groups
            .entry(source_name(&param.source).to_string())
            .or_default()
            .push(param);
    }
    groups
}

pub struct ResultsOrganizer {
    outputs_dir: PathBuf,
    results_dir: PathBuf,
    min_confidence: f64,
    strategies: Vec<PromptStrategy>,
}

impl ResultsOrganizer {
    pub fn new(outputs_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
            results_dir: results_dir.into(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            strategies: PromptStrategy::ALL.to_vec(),
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<PromptStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Process every strategy; returns the files written.
    pub fn organize_all(&self) -> Result<Vec<PathBuf>> {
        info!(
            min_confidence = self.min_confidence,
            input = %self.outputs_dir.display(),
            output = %self.results_dir.display(),
            "Organizing results"
        );
        std::fs::create_dir_all(&self.results_dir)?;

        let mut written = Vec::new();
        for strategy in &self.strategies {
            written.extend(self.organize_strategy(*strategy)?);
        }
        info!(files = written.len(), "Results organization complete");
        Ok(written)
    }

    pub fn organize_strategy(&self, strategy: PromptStrategy) -> Result<Vec<PathBuf>> {
        let input = self.outputs_dir.join(format!("parameters_{strategy}.yaml"));
        if !input.exists() {
            info!(%strategy, "Skipping strategy: file not found");
            return Ok(Vec::new());
        }

        let document = ParametersDocument::read(&input)?;
        if document.parameters.is_empty() {
            info!(%strategy, "No parameters found");
            return Ok(Vec::new());
        }

        let mut written = Vec::new();
        for (source, params) in group_by_source(&document.parameters, self.min_confidence) {
            let path = self.write_source(strategy, &source, &params, &document)?;
            written.push(path);
        }
        Ok(written)
    }

    fn write_source(
        &self,
        strategy: PromptStrategy,
        source: &str,
        params: &[&SourcedParameter],
        document: &ParametersDocument,
    ) -> Result<PathBuf> {
        let parameters: Vec<OrganizedParameter> =
            params.iter().map(|p| OrganizedParameter::from(*p)).collect();
        let organized = OrganizedDocument {
            metadata: OrganizedMetadata {
                source_file: format!("{source}.txt"),
                prompt_strategy: strategy.to_string(),
                confidence_threshold: format!(">= {:?}", self.min_confidence),
                total_parameters: parameters.len(),
                extraction_date: document.metadata.extraction_date.clone(),
                models_used: document.metadata.models_used.clone(),
            },
            parameters,
        };

        let dir = self.results_dir.join(source);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{strategy}.yaml"));
        std::fs::write(&path, serde_yaml::to_string(&organized)?)?;
        info!(
            source,
            %strategy,
            parameters = organized.parameters.len(),
            "Saved organized parameters"
        );
        Ok(path)
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }
}
