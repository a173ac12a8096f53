//! Report writers: snippet inventory, per-model comparison, detailed
//! consensus CSV, and the final parameters YAML.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use consensus::{ConfidenceLevel, Constraint};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::extractor::{file_name_of, snippet_files, DirectoryExtraction, SnippetValidation};
use crate::openrouter::ModelInfo;
use crate::prompts::PromptStrategy;

const CSV_LINE_END: &str = "\r\n";

/// Quote a CSV field when it contains a delimiter, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn write_csv_row<W, S>(writer: &mut W, fields: &[S]) -> std::io::Result<()>
where
    W: Write,
    S: AsRef<str>,
{
    let line = fields
        .iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    writer.write_all(line.as_bytes())?;
    writer.write_all(CSV_LINE_END.as_bytes())
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Two decimal places, as shown in reports.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `Filename, Path, Size (bytes)` for every snippet file. Returns the row count.
pub fn write_snippet_inventory(snippets_dir: &Path, out: &Path) -> Result<usize> {
    let files = snippet_files(snippets_dir)?;
    let mut writer = create_output(out)?;
    write_csv_row(&mut writer, &["Filename", "Path", "Size (bytes)"])?;
    for path in &files {
        let size = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        write_csv_row(
            &mut writer,
            &[
                file_name_of(path),
                path.display().to_string(),
                size.to_string(),
            ],
        )?;
    }
    writer.flush()?;
    info!(path = %out.display(), rows = files.len(), "Created snippets CSV");
    Ok(files.len())
}

/// One row per snippet, one column per model: `"<n> parameters"` or `"Error: <msg>"`.
///
/// Model columns come from the first snippet.
pub fn write_comparison_csv(results: &DirectoryExtraction, out: &Path) -> Result<()> {
    let models: Vec<String> = results
        .values()
        .next()
        .map(|first| first.models.iter().map(|m| m.model.clone()).collect())
        .unwrap_or_default();

    let mut writer = create_output(out)?;
    let header: Vec<&str> = std::iter::once("Snippet")
        .chain(models.iter().map(String::as_str))
        .collect();
    write_csv_row(&mut writer, header.as_slice())?;

    for (snippet, extraction) in results {
        let mut row = vec![snippet.clone()];
        for model in &models {
            let cell = match extraction.get(model) {
                Some(m) if m.succeeded() => format!("{} parameters", m.parameters.len()),
                Some(m) => format!("Error: {}", m.error().unwrap_or("Unknown")),
                None => "Error: Unknown".to_string(),
            };
            row.push(cell);
        }
        write_csv_row(&mut writer, row.as_slice())?;
    }
    writer.flush()?;
    info!(path = %out.display(), snippets = results.len(), "Created comparison CSV");
    Ok(())
}

/// Every consensus parameter with its snippet and confidence.
pub fn write_detailed_csv(validated: &BTreeMap<String, SnippetValidation>, out: &Path) -> Result<()> {
    let mut writer = create_output(out)?;
    write_csv_row(
        &mut writer,
        &[
            "Source Snippet",
            "Parameter Name",
            "Description",
            "Type",
            "Constraints",
            "Keywords",
            "Confidence Score",
            "Confidence Level",
            "Model Agreement",
        ],
    )?;

    let mut rows = 0;
    for (snippet, validation) in validated {
        for param in &validation.result.parameters {
            let keywords: Vec<&str> = param.keywords.iter().map(String::as_str).collect();
            write_csv_row(
                &mut writer,
                &[
                    snippet.clone(),
                    param.name.clone(),
                    param.description.clone().unwrap_or_default(),
                    param.param_type.clone().unwrap_or_default(),
                    param
                        .constraints
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    keywords.join(", "),
                    format!("{:.2}", param.confidence),
                    param.confidence_level.to_string(),
                    param.model_agreement.clone(),
                ],
            )?;
            rows += 1;
        }
    }
    writer.flush()?;
    info!(path = %out.display(), rows, "Created detailed CSV");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    #[serde(default)]
    pub extraction_date: String,
    #[serde(default)]
    pub prompt_strategy: String,
    #[serde(default)]
    pub models_used: Vec<ModelInfo>,
    #[serde(default)]
    pub total_snippets: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    pub score: f64,
    pub level: ConfidenceLevel,
    pub agreement: String,
}

/// A consensus parameter as written to the parameters YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default)]
    pub constraints: Option<Constraint>,
    #[serde(default = "unknown_source")]
    pub source: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub confidence: ConfidenceSummary,
}

fn unknown_source() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersDocument {
    #[serde(default)]
    pub metadata: ExtractionMetadata,
    #[serde(default)]
    pub parameters: Vec<SourcedParameter>,
}

impl ParametersDocument {
    /// Flatten per-snippet results into one list, snippet order preserved.
    pub fn from_validations(
        validated: &BTreeMap<String, SnippetValidation>,
        models_used: Vec<ModelInfo>,
        strategy: PromptStrategy,
        extraction_date: String,
    ) -> Self {
        let parameters = validated
            .iter()
            .flat_map(|(snippet, validation)| {
                validation
                    .result
                    .parameters
                    .iter()
                    .map(move |param| SourcedParameter {
                        name: param.name.clone(),
                        description: param.description.clone().unwrap_or_default(),
                        param_type: param.param_type.clone().unwrap_or_default(),
                        constraints: param.constraints.clone(),
                        source: snippet.clone(),
                        keywords: param.keywords.iter().cloned().collect(),
                        confidence: ConfidenceSummary {
                            score: round2(param.confidence),
                            level: param.confidence_level,
                            agreement: param.model_agreement.clone(),
                        },
                    })
            })
            .collect();

        Self {
            metadata: ExtractionMetadata {
                extraction_date,
                prompt_strategy: strategy.to_string(),
                models_used,
                total_snippets: validated.len(),
            },
            parameters,
        }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn write(&self, out: &Path) -> Result<()> {
        let mut writer = create_output(out)?;
        serde_yaml::to_writer(&mut writer, self)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        writer.flush()?;
        info!(
            path = %out.display(),
            parameters = self.parameters.len(),
            "Created parameters YAML"
        );
        Ok(())
    }
}

/// Local time in ISO-8601, the format used for `extraction_date`.
pub fn timestamp_now() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}
