//! Accuracy harness.
//!
//! Scores models against a fixed set of 20 hand-labelled snippets. Each
//! model sees every snippet with the few-shot prompt; the names it returns
//! are compared with the expected names after normalization. A name that
//! is neither equal to, nor a substring of, nor contains any expected name
//! earns nothing; a substring match earns half a true positive.
//!
//! This scoring is for comparing models only. Consensus confidence never
//! uses it.

use std::fmt::{self, Write as _};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{info, warn};

use crate::extractor::ParamsExtractor;
use crate::parser::extract_parameter_names;
use crate::prompts::PromptStrategy;
use crate::reports::{round2, write_csv_row};

/// Completion budget for accuracy runs; answers are name lists, not full records.
pub const ACCURACY_MAX_TOKENS: u32 = 1000;

/// Models compared by default.
pub const ACCURACY_MODELS: &[&str] = &[
    "deepseek/deepseek-v3.2",
    "nvidia/nemotron-3-nano-30b-a3b",
    "qwen/qwen3-coder-next",
    "openai/gpt-4o-mini",
    "openai/gpt-5.1-codex-mini",
    "anthropic/claude-3-haiku",
    "google/gemini-3-flash-preview",
    "google/gemini-2.5-flash",
    "meta-llama/llama-3.1-70b-instruct",
    "mistralai/ministral-14b-2512",
];

#[derive(Debug, Clone, Copy)]
pub struct GroundTruthCase {
    pub snippet: &'static str,
    pub parameters: &'static [&'static str],
}

pub const GROUND_TRUTH: [GroundTruthCase; 20] = [
    GroundTruthCase {
        snippet: "The number of cycles required to complete a multiplication operation may vary across implementations, and the latency of the MUL instruction may depend on operand width and pipeline structure.",
        parameters: &["MUL instruction latency", "Number of execution cycles", "Operand width", "Pipeline structure"],
    },
    GroundTruthCase {
        snippet: "A processor may include branch prediction hardware to reduce control hazards, and the size and organization of branch history storage may differ between designs.",
        parameters: &["Branch prediction support", "Branch history storage size", "Branch history organization"],
    },
    GroundTruthCase {
        snippet: "A system may include one or more levels of cache, and the total cache capacity may vary across implementations.",
        parameters: &["Number of cache levels", "Cache capacity"],
    },
    GroundTruthCase {
        snippet: "Cache blocks represent contiguous regions of memory, and the size of a cache block may vary depending on the memory hierarchy design.",
        parameters: &["Cache block size"],
    },
    GroundTruthCase {
        snippet: "The translation lookaside buffer may be unified or split between instruction and data accesses, and the number of entries in each case may differ.",
        parameters: &["TLB organization", "Instruction TLB entries", "Data TLB entries"],
    },
    GroundTruthCase {
        snippet: "An implementation may optionally support virtual memory, and the page size and page table depth may vary across systems.",
        parameters: &["Virtual memory support", "Page size", "Page table depth"],
    },
    GroundTruthCase {
        snippet: "The delay between an interrupt request and the execution of its handler may vary, and software should not assume a fixed interrupt response time.",
        parameters: &["Interrupt response latency"],
    },
    GroundTruthCase {
        snippet: "An implementation may support either precise or imprecise exceptions, and the guarantees provided for exception ordering may differ.",
        parameters: &["Exception precision", "Exception ordering guarantees"],
    },
    GroundTruthCase {
        snippet: "Atomic read-modify-write instructions may be supported, and the maximum memory region over which atomicity is guaranteed may vary.",
        parameters: &["Atomic instruction support", "Atomicity granularity"],
    },
    GroundTruthCase {
        snippet: "The memory system may enforce ordering rules stronger than those required by the base ISA, and the exact ordering behavior may vary.",
        parameters: &["Memory ordering model", "Ordering guarantees"],
    },
    GroundTruthCase {
        snippet: "A floating-point unit may optionally be present, and the supported floating-point precisions and rounding modes may differ.",
        parameters: &["Floating-point unit presence", "Floating-point precision", "Rounding modes"],
    },
    GroundTruthCase {
        snippet: "Certain control and status registers may be accessible from multiple privilege modes, and the set of CSRs available at each level may vary.",
        parameters: &["CSR accessibility", "Privilege-level access rules"],
    },
    GroundTruthCase {
        snippet: "The processor may provide low-power operating states, and the number of such states and transition latency may differ between designs.",
        parameters: &["Low-power state support", "Number of power states", "Power state transition latency"],
    },
    GroundTruthCase {
        snippet: "Instruction cache replacement behavior is chosen by the design, and policies such as random or least-recently-used replacement may be employed.",
        parameters: &["Instruction cache replacement policy"],
    },
    GroundTruthCase {
        snippet: "Unaligned memory accesses may be supported, and the performance impact of such accesses may vary across implementations.",
        parameters: &["Unaligned access support", "Unaligned access penalty"],
    },
    GroundTruthCase {
        snippet: "The maximum length of vector registers may vary, and multiple vector lengths may be supported by an implementation.",
        parameters: &["Vector register length", "Supported vector lengths"],
    },
    GroundTruthCase {
        snippet: "Debug mode may be entered through external or internal triggers, and the number of supported hardware breakpoints may differ.",
        parameters: &["Debug entry mechanisms", "Number of hardware breakpoints"],
    },
    GroundTruthCase {
        snippet: "Hardware prefetching may be employed to reduce memory access latency, and the distance and aggressiveness of prefetching may vary.",
        parameters: &["Hardware prefetching support", "Prefetch distance", "Prefetch aggressiveness"],
    },
    GroundTruthCase {
        snippet: "The machine timer provides a monotonically increasing counter, and the frequency and resolution of this counter may vary.",
        parameters: &["Timer frequency", "Timer resolution"],
    },
    GroundTruthCase {
        snippet: "A cache coherency mechanism may be used in systems with multiple agents, and the protocol used to maintain coherency may differ between implementations.",
        parameters: &["Cache coherency support", "Cache coherency protocol"],
    },
];

/// Lower-case, trim, and treat `_` and `-` as spaces.
pub fn normalize_parameter(name: &str) -> String {
    name.to_lowercase().trim().replace(['_', '-'], " ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub extracted_count: usize,
    pub ground_truth_count: usize,
    pub exact_matches: usize,
    pub partial_matches: usize,
    /// Percentages, two decimals.
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub matched_params: Vec<String>,
}

pub fn calculate_accuracy<E, T>(extracted: &[E], ground_truth: &[T]) -> AccuracyMetrics
where
    E: AsRef<str>,
    T: AsRef<str>,
{
    let extracted_norm: Vec<String> = extracted
        .iter()
        .map(|p| normalize_parameter(p.as_ref()))
        .collect();
    let truth_norm: Vec<String> = ground_truth
        .iter()
        .map(|p| normalize_parameter(p.as_ref()))
        .collect();

    let mut exact: Vec<String> = Vec::new();
    let mut partial: Vec<String> = Vec::new();
    for ext in &extracted_norm {
        if truth_norm.contains(ext) {
            exact.push(ext.clone());
        } else if truth_norm
            .iter()
            .any(|truth| truth.contains(ext.as_str()) || ext.contains(truth.as_str()))
            && !partial.contains(ext)
        {
            partial.push(ext.clone());
        }
    }

    let true_positives = exact.len() as f64 + partial.len() as f64 * 0.5;
    let ratio = |n: usize| {
        if n == 0 {
            0.0
        } else {
            true_positives / n as f64
        }
    };
    let precision = ratio(extracted_norm.len());
    let recall = ratio(truth_norm.len());
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let exact_matches = exact.len();
    let partial_matches = partial.len();
    exact.extend(partial);
    AccuracyMetrics {
        extracted_count: extracted.len(),
        ground_truth_count: ground_truth.len(),
        exact_matches,
        partial_matches,
        precision: round2(precision * 100.0),
        recall: round2(recall * 100.0),
        f1_score: round2(f1 * 100.0),
        matched_params: exact,
    }
}

/// One model on one snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetTrial {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub extracted: Vec<String>,
    pub ground_truth: Vec<String>,
    pub accuracy: AccuracyMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

impl SnippetTrial {
    pub fn scored(response_text: String, ground_truth: &[&str]) -> Self {
        let extracted = extract_parameter_names(&response_text);
        let accuracy = calculate_accuracy(&extracted, ground_truth);
        Self {
            success: true,
            error: None,
            extracted,
            ground_truth: ground_truth.iter().map(|s| s.to_string()).collect(),
            accuracy,
            response_text: Some(response_text),
        }
    }

    pub fn failed(error: String, ground_truth: &[&str]) -> Self {
        Self {
            success: false,
            error: Some(error),
            extracted: Vec::new(),
            ground_truth: ground_truth.iter().map(|s| s.to_string()).collect(),
            accuracy: calculate_accuracy::<&str, _>(&[], ground_truth),
            response_text: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub successful_tests: usize,
    pub total_tests: usize,
    pub success_rate: f64,
    pub avg_precision: f64,
    pub avg_recall: f64,
    pub avg_f1_score: f64,
    pub detailed_results: Vec<SnippetTrial>,
}

impl ModelSummary {
    pub fn from_trials(model: impl Into<String>, trials: Vec<SnippetTrial>) -> Self {
        let total = trials.len();
        let successful = trials.iter().filter(|t| t.success).count();
        let mean = |f: fn(&AccuracyMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                round2(trials.iter().map(|t| f(&t.accuracy)).sum::<f64>() / total as f64)
            }
        };
        Self {
            model: model.into(),
            successful_tests: successful,
            total_tests: total,
            success_rate: if total == 0 {
                0.0
            } else {
                round2(successful as f64 / total as f64 * 100.0)
            },
            avg_precision: mean(|a| a.precision),
            avg_recall: mean(|a| a.recall),
            avg_f1_score: mean(|a| a.f1_score),
            detailed_results: trials,
        }
    }
}

/// Per-model summaries in run order. Serializes as a `model -> summary` map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccuracyReport {
    pub models: Vec<ModelSummary>,
}

impl AccuracyReport {
    pub fn push(&mut self, summary: ModelSummary) {
        match self.models.iter_mut().find(|m| m.model == summary.model) {
            Some(existing) => *existing = summary,
            None => self.models.push(summary),
        }
    }

    /// Best F1 first; equal scores keep run order.
    pub fn ranked(&self) -> Vec<&ModelSummary> {
        let mut ranked: Vec<&ModelSummary> = self.models.iter().collect();
        ranked.sort_by(|a, b| b.avg_f1_score.total_cmp(&a.avg_f1_score));
        ranked
    }

    /// Mean `(precision, recall, f1)` across models.
    pub fn overall(&self) -> (f64, f64, f64) {
        if self.models.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let n = self.models.len() as f64;
        let sum = |f: fn(&ModelSummary) -> f64| self.models.iter().map(f).sum::<f64>() / n;
        (
            sum(|m| m.avg_precision),
            sum(|m| m.avg_recall),
            sum(|m| m.avg_f1_score),
        )
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

impl Serialize for AccuracyReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.models.len()))?;
        for summary in &self.models {
            map.serialize_entry(&summary.model, summary)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AccuracyReport {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ReportVisitor;

        impl<'de> Visitor<'de> for ReportVisitor {
            type Value = AccuracyReport;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping from model id to its accuracy summary")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut report = AccuracyReport::default();
                while let Some((model, mut summary)) = access.next_entry::<String, ModelSummary>()? {
                    summary.model = model;
                    report.push(summary);
                }
                Ok(report)
            }
        }

        deserializer.deserialize_map(ReportVisitor)
    }
}

fn short_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

/// Per-snippet breakdown of what every model extracted.
pub fn render_text_report(report: &AccuracyReport, test_date: &str) -> String {
    let rule = "=".repeat(100);
    let thin = "-".repeat(100);
    let total = GROUND_TRUTH.len();
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "{rule}\nPARAMETER EXTRACTION DETAILED REPORT\n{rule}\n");
    let _ = writeln!(out, "Test Date: {test_date}");
    let _ = writeln!(out, "Models Tested: {}", report.models.len());
    let _ = writeln!(out, "Snippets Tested: {total}\n");

    for (idx, case) in GROUND_TRUTH.iter().enumerate() {
        let _ = writeln!(out, "{rule}\nSNIPPET {}/{total}\n{rule}", idx + 1);
        let _ = writeln!(out, "Text: {}\n", case.snippet);
        let _ = writeln!(out, "GROUND TRUTH PARAMETERS ({}):", case.parameters.len());
        for (i, param) in case.parameters.iter().enumerate() {
            let _ = writeln!(out, "  {}. {param}", i + 1);
        }
        let _ = writeln!(out, "\n{thin}\nMODEL EXTRACTIONS:\n{thin}\n");

        for summary in &report.models {
            let Some(trial) = summary.detailed_results.get(idx) else {
                continue;
            };
            let _ = writeln!(out, "{}", summary.model);
            if trial.success {
                let _ = writeln!(out, "   Extracted {} parameters:", trial.extracted.len());
                if trial.extracted.is_empty() {
                    let _ = writeln!(out, "     (No parameters extracted)");
                }
                for (i, param) in trial.extracted.iter().enumerate() {
                    let _ = writeln!(out, "     {}. {param}", i + 1);
                }
                let acc = &trial.accuracy;
                let _ = writeln!(
                    out,
                    "   Accuracy: Precision={:?}%, Recall={:?}%, F1={:?}%",
                    acc.precision, acc.recall, acc.f1_score
                );
                let _ = writeln!(
                    out,
                    "   Matches: {} exact, {} partial",
                    acc.exact_matches, acc.partial_matches
                );
            } else {
                let _ = writeln!(
                    out,
                    "   FAILED: {}",
                    trial.error.as_deref().unwrap_or("Unknown error")
                );
            }
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "\n");
    }
    out
}

/// One row per (model, snippet).
pub fn write_accuracy_csv(report: &AccuracyReport, path: &Path) -> Result<()> {
    let file =
        std::fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    write_csv_row(
        &mut writer,
        &[
            "Model",
            "Model_Short",
            "Snippet_Index",
            "Snippet_Text",
            "Ground_Truth_Count",
            "Ground_Truth_Params",
            "Extracted_Count",
            "Extracted_Params",
            "Exact_Matches",
            "Partial_Matches",
            "Precision_%",
            "Recall_%",
            "F1_Score_%",
            "Success",
        ],
    )?;

    for summary in &report.models {
        for (idx, trial) in summary.detailed_results.iter().enumerate() {
            let snippet = GROUND_TRUTH.get(idx).map(|c| c.snippet).unwrap_or_default();
            let extracted = if trial.extracted.is_empty() {
                "(none)".to_string()
            } else {
                trial.extracted.join(" | ")
            };
            write_csv_row(
                &mut writer,
                &[
                    summary.model.clone(),
                    short_name(&summary.model).to_string(),
                    (idx + 1).to_string(),
                    snippet.to_string(),
                    trial.ground_truth.len().to_string(),
                    trial.ground_truth.join(" | "),
                    trial.extracted.len().to_string(),
                    extracted,
                    trial.accuracy.exact_matches.to_string(),
                    trial.accuracy.partial_matches.to_string(),
                    format!("{:?}", trial.accuracy.precision),
                    format!("{:?}", trial.accuracy.recall),
                    format!("{:?}", trial.accuracy.f1_score),
                    if trial.success { "True" } else { "False" }.to_string(),
                ],
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn log_rankings(report: &AccuracyReport) {
    for (rank, summary) in report.ranked().into_iter().enumerate() {
        info!(
            rank = rank + 1,
            model = %summary.model,
            f1 = summary.avg_f1_score,
            precision = summary.avg_precision,
            recall = summary.avg_recall,
            "Model ranking"
        );
    }
    let (precision, recall, f1) = report.overall();
    info!(
        models = report.models.len(),
        precision = round2(precision),
        recall = round2(recall),
        f1 = round2(f1),
        "Average across models"
    );
}

/// Files produced by one accuracy run.
#[derive(Debug, Clone)]
pub struct AccuracyArtifacts {
    pub report: AccuracyReport,
    pub text_report: PathBuf,
    pub csv: PathBuf,
    pub summary_json: Option<PathBuf>,
}

/// Text report and CSV for `report`, named with `timestamp`.
pub fn write_reports(report: &AccuracyReport, out_dir: &Path, timestamp: &str) -> Result<AccuracyArtifacts> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let text_report = out_dir.join(format!("parameter_extractions_{timestamp}.txt"));
    let test_date = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    std::fs::write(&text_report, render_text_report(report, &test_date))
        .with_context(|| format!("Failed to write {}", text_report.display()))?;
    info!(path = %text_report.display(), "Detailed extractions saved");

    let csv = out_dir.join(format!("parameter_accuracy_test_{timestamp}.csv"));
    write_accuracy_csv(report, &csv)?;
    info!(path = %csv.display(), "Detailed CSV saved");

    log_rankings(report);
    Ok(AccuracyArtifacts {
        report: report.clone(),
        text_report,
        csv,
        summary_json: None,
    })
}

/// Score one model on one snippet with the few-shot prompt.
pub async fn evaluate_snippet(
    extractor: &ParamsExtractor,
    model: &str,
    case: &GroundTruthCase,
) -> SnippetTrial {
    let prompt = PromptStrategy::FewShot.build_prompt(case.snippet);
    let outcome = extractor.generate(model, &prompt).await;
    match (outcome.success, outcome.text) {
        (true, Some(text)) => SnippetTrial::scored(text, case.parameters),
        _ => SnippetTrial::failed(
            outcome.error.unwrap_or_else(|| "Unknown error".to_string()),
            case.parameters,
        ),
    }
}

/// Run every model over the ground truth, saving progress after each model.
pub async fn run_accuracy(
    extractor: &ParamsExtractor,
    models: &[String],
    out_dir: &Path,
) -> Result<AccuracyArtifacts> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let progress = out_dir.join(format!("progress_{timestamp}.json"));
    info!(
        models = models.len(),
        snippets = GROUND_TRUTH.len(),
        "Starting accuracy run"
    );

    let mut report = AccuracyReport::default();
    for (model_idx, model) in models.iter().enumerate() {
        info!(model = %model, index = model_idx + 1, total = models.len(), "Testing model");
        let mut trials = Vec::with_capacity(GROUND_TRUTH.len());
        for (idx, case) in GROUND_TRUTH.iter().enumerate() {
            let trial = evaluate_snippet(extractor, model, case).await;
            match &trial.error {
                None => info!(model = %model, snippet = idx + 1, f1 = trial.accuracy.f1_score, "Scored"),
                Some(e) => warn!(model = %model, snippet = idx + 1, error = %e, "Snippet failed"),
            }
            trials.push(trial);
        }

        let summary = ModelSummary::from_trials(model.clone(), trials);
        info!(
            model = %model,
            success_rate = summary.success_rate,
            precision = summary.avg_precision,
            recall = summary.avg_recall,
            f1 = summary.avg_f1_score,
            "Model summary"
        );
        report.push(summary);
        report.write_json(&progress)?;
        info!(done = report.models.len(), total = models.len(), "Progress saved");
    }

    let mut artifacts = write_reports(&report, out_dir, &timestamp)?;
    let summary_json = out_dir.join(format!("parameter_accuracy_summary_{timestamp}.json"));
    report.write_json(&summary_json)?;
    info!(path = %summary_json.display(), "Summary JSON saved");
    artifacts.summary_json = Some(summary_json);
    Ok(artifacts)
}

/// Timestamp suffix of a `progress_<date>_<time>.json` file name.
pub fn progress_timestamp(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.strip_prefix("progress_").unwrap_or(&stem).to_string()
}

/// Rebuild the text report and CSV from a saved progress file.
pub fn regenerate_reports(progress_file: &Path, out_dir: &Path) -> Result<AccuracyArtifacts> {
    let report = AccuracyReport::read(progress_file)?;
    info!(models = report.models.len(), "Loaded progress");
    write_reports(&report, out_dir, &progress_timestamp(progress_file))
}
