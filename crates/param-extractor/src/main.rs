use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use consensus::{ConsensusConfig, ConsensusValidator, ModelOutputs};
use param_extractor::connectivity::{self, CHECK_MAX_TOKENS};
use param_extractor::evaluation::{self, ACCURACY_MAX_TOKENS, ACCURACY_MODELS};
use param_extractor::openrouter::{available_models, ModelInfo, ACCESS_METHOD};
use param_extractor::organize::{ResultsOrganizer, DEFAULT_MIN_CONFIDENCE};
use param_extractor::reports::{self, ParametersDocument};
use param_extractor::{ExtractorConfig, ParamsExtractor, PromptStrategy};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "param-extractor", version, about = "Multi-LLM architecture parameter extraction")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Full pipeline: extract, compare, validate, write reports
    Extract {
        #[arg(long, default_value = "snippets")]
        snippets: PathBuf,
        #[arg(long, default_value = "outputs")]
        out: PathBuf,
        /// Prompt strategy (repeatable; default: all)
        #[arg(long = "strategy")]
        strategies: Vec<PromptStrategy>,
        /// Model id (repeatable; default: configured models)
        #[arg(long = "model")]
        models: Vec<String>,
    },
    /// Run consensus over a JSON or YAML `model -> [records]` file
    Validate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Regroup parameters YAML files per source snippet
    Organize {
        #[arg(long, default_value = "outputs")]
        outputs: PathBuf,
        #[arg(long, default_value = "results")]
        results: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE)]
        min_confidence: f64,
    },
    /// Score models against the built-in labelled snippets
    Accuracy {
        #[arg(long, default_value = "outputs")]
        out: PathBuf,
        #[arg(long = "model")]
        models: Vec<String>,
    },
    /// Rebuild accuracy reports from a progress JSON file
    Reports {
        #[arg(long)]
        progress: PathBuf,
        #[arg(long, default_value = "outputs")]
        out: PathBuf,
    },
    /// List the built-in model catalog
    Models,
    /// Send one short request to each model and report which respond
    CheckModels {
        /// Model id (repeatable; default: configured models)
        #[arg(long = "model")]
        models: Vec<String>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = ExtractorConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Extract {
            snippets,
            out,
            strategies,
            models,
        } => run_extract(config, &snippets, &out, strategies, models).await,
        Commands::Validate { input, threshold } => run_validate(&config, &input, threshold),
        Commands::Organize {
            outputs,
            results,
            min_confidence,
        } => {
            ResultsOrganizer::new(outputs, results)
                .with_min_confidence(min_confidence)
                .organize_all()?;
            Ok(())
        }
        Commands::Accuracy { out, models } => {
            let models = if models.is_empty() {
                ACCURACY_MODELS.iter().map(|m| m.to_string()).collect()
            } else {
                models
            };
            let extractor = ParamsExtractor::from_config(&config)?
                .with_max_tokens(ACCURACY_MAX_TOKENS);
            evaluation::run_accuracy(&extractor, &models, &out).await?;
            Ok(())
        }
        Commands::Reports { progress, out } => {
            evaluation::regenerate_reports(&progress, &out)?;
            Ok(())
        }
        Commands::Models => {
            let models = available_models();
            println!("Available models ({}):", models.len());
            for model in &models {
                let info = ModelInfo::from_model_id(model, ACCESS_METHOD);
                println!("  {:<40} provider={:<12} model={}", info.full_name, info.provider, info.model);
            }
            Ok(())
        }
        Commands::CheckModels { models } => {
            let models = if models.is_empty() {
                config.models.clone()
            } else {
                models
            };
            let extractor =
                ParamsExtractor::from_config(&config)?.with_max_tokens(CHECK_MAX_TOKENS);
            let report = connectivity::check_models(&extractor, &models).await;
            if report.passed() == 0 && !report.checks.is_empty() {
                bail!("No model responded");
            }
            Ok(())
        }
    }
}

async fn run_extract(
    mut config: ExtractorConfig,
    snippets: &Path,
    out: &Path,
    strategies: Vec<PromptStrategy>,
    models: Vec<String>,
) -> Result<()> {
    if !snippets.is_dir() {
        bail!("Snippets directory not found: {}", snippets.display());
    }
    if !models.is_empty() {
        config.models = models;
    }
    let strategies = if strategies.is_empty() {
        PromptStrategy::ALL.to_vec()
    } else {
        strategies
    };

    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    reports::write_snippet_inventory(snippets, &out.join("snippets_inventory.csv"))?;

    let extractor = ParamsExtractor::from_config(&config)?;
    let model_info = extractor.model_info();
    for info in &model_info {
        info!(model = %info.full_name, access = %info.access_method, "Using model");
    }

    for strategy in strategies {
        info!(%strategy, "Extracting");
        let results = extractor.extract_from_directory(snippets, strategy).await?;
        reports::write_comparison_csv(&results, &out.join(format!("comparison_{strategy}.csv")))?;

        let validated = extractor.validate_and_merge(&results);
        for (snippet, validation) in &validated {
            let summary = &validation.result.validation_summary;
            info!(
                snippet = %snippet,
                total = summary.total_parameters,
                high = summary.high_confidence,
                medium = summary.medium_confidence,
                low = summary.low_confidence,
                "Consensus summary"
            );
        }

        reports::write_detailed_csv(
            &validated,
            &out.join(format!("detailed_results_{strategy}.csv")),
        )?;
        ParametersDocument::from_validations(
            &validated,
            model_info.clone(),
            strategy,
            reports::timestamp_now(),
        )
        .write(&out.join(format!("parameters_{strategy}.yaml")))?;
        info!(%strategy, "Completed extraction");
    }

    info!(out = %out.display(), "Extraction complete");
    Ok(())
}

fn run_validate(config: &ExtractorConfig, input: &Path, threshold: Option<f64>) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let is_json = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let outputs: ModelOutputs = if is_json {
        serde_json::from_str(&content).map_err(anyhow::Error::from)
    } else {
        serde_yaml::from_str(&content).map_err(anyhow::Error::from)
    }
    .with_context(|| format!("Failed to parse {}", input.display()))?;

    let consensus = match threshold {
        Some(t) => ConsensusConfig::with_threshold(t)?,
        None => config.consensus_config()?,
    };
    let result = ConsensusValidator::new(consensus).validate(&outputs);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
