//! Extraction pipeline against scripted providers: per-model failures,
//! retries, consensus, and the report files built from the results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use consensus::ConfidenceLevel;
use param_extractor::connectivity::{self, CHECK_MAX_TOKENS};
use param_extractor::organize::ResultsOrganizer;
use param_extractor::reports::{self, ParametersDocument};
use param_extractor::{
    Completion, GenerateRequest, KeyRing, LlmProvider, ParamsExtractor, PromptStrategy,
    ProviderError, RetryPolicy,
};

const TWO_PARAMS: &str = "Here you go:\n- name: tlb_entries\n  description: Entries in the TLB\n  type: integer\n  keywords: [tlb]\n- name: page_size\n  description: Virtual memory page size\n  type: integer\n";
const ONE_PARAM_FENCED: &str = "```yaml\n- name: TLB_Entries\n  description: Number of TLB entries\n  type: integer\n```";

enum Script {
    Reply(&'static str),
    Fail(u16),
    /// Fail with the status this many times, then reply.
    FlakyThen(u16, usize, &'static str),
}

#[derive(Default)]
struct ScriptedProvider {
    scripts: HashMap<&'static str, Script>,
    calls: Mutex<HashMap<String, usize>>,
    keys_seen: Mutex<Vec<String>>,
    max_tokens_seen: Mutex<Vec<u32>>,
}

impl ScriptedProvider {
    fn with(mut self, model: &'static str, script: Script) -> Self {
        self.scripts.insert(model, script);
        self
    }

    fn calls(&self, model: &str) -> usize {
        self.calls.lock().unwrap().get(model).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn access_method(&self) -> &str {
        "Scripted"
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        api_key: &str,
    ) -> Result<Completion, ProviderError> {
        self.keys_seen.lock().unwrap().push(api_key.to_string());
        self.max_tokens_seen.lock().unwrap().push(request.max_tokens);
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(request.model.clone()).or_default();
            *n += 1;
            *n
        };
        let reply = |text: &str| Completion {
            text: text.to_string(),
            model: request.model.clone(),
            usage: None,
        };
        match self.scripts.get(request.model.as_str()) {
            Some(Script::Reply(text)) => Ok(reply(text)),
            Some(Script::Fail(status)) => Err(ProviderError::Http {
                status: *status,
                body: "scripted failure".into(),
            }),
            Some(Script::FlakyThen(status, failures, _)) if attempt <= *failures => {
                Err(ProviderError::Http {
                    status: *status,
                    body: "try again".into(),
                })
            }
            Some(Script::FlakyThen(_, _, text)) => Ok(reply(text)),
            None => Err(ProviderError::InvalidResponse("unscripted model".into())),
        }
    }
}

fn keys(n: usize) -> KeyRing {
    KeyRing::new((1..=n).map(|i| format!("key-{i}")).collect()).unwrap()
}

fn models(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|m| m.to_string()).collect()
}

fn write_snippets(dir: &std::path::Path) {
    std::fs::write(dir.join("b_tlb.txt"), "The number of TLB entries may vary.").unwrap();
    std::fs::write(dir.join("a_pages.txt"), "Page size is implementation-defined.").unwrap();
    std::fs::write(dir.join("notes.md"), "not a snippet").unwrap();
}

#[tokio::test]
async fn failed_model_still_counts_toward_agreement() {
    let provider = ScriptedProvider::default()
        .with("good/a", Script::Reply(TWO_PARAMS))
        .with("good/b", Script::Reply(ONE_PARAM_FENCED))
        .with("bad/c", Script::Fail(401));
    let extractor = ParamsExtractor::new(
        Arc::new(provider),
        keys(2),
        models(&["good/a", "good/b", "bad/c"]),
    )
    .with_max_concurrency(3);

    let extraction = extractor
        .extract_from_snippet("The number of TLB entries may vary.", PromptStrategy::ZeroShot)
        .await;
    let order: Vec<&str> = extraction.models.iter().map(|m| m.model.as_str()).collect();
    assert_eq!(order, vec!["good/a", "good/b", "bad/c"]);

    let failed = extraction.get("bad/c").unwrap();
    assert!(!failed.succeeded());
    assert!(failed.parameters.is_empty());
    assert!(failed.error().unwrap().contains("401"));
    assert_eq!(extraction.get("good/a").unwrap().parameters.len(), 2);

    let outputs = extraction.to_model_outputs();
    assert_eq!(outputs.get("bad/c").map(|r| r.len()), Some(0));

    let result = consensus::ConsensusValidator::default().validate(&outputs);
    let tlb = &result.parameters[0];
    assert_eq!(tlb.model_agreement, "2/3 models");
    assert_eq!(tlb.confidence_level, ConfidenceLevel::Medium);
    let page = &result.parameters[1];
    assert_eq!(page.model_agreement, "1/3 models");
    assert_eq!(page.confidence_level, ConfidenceLevel::Low);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried_with_rotating_keys() {
    let provider = Arc::new(
        ScriptedProvider::default().with("flaky/m", Script::FlakyThen(503, 2, ONE_PARAM_FENCED)),
    );
    let extractor = ParamsExtractor::new(provider.clone(), keys(2), models(&["flaky/m"]))
        .with_retry_policy(RetryPolicy::backoff(3, Duration::from_secs(1)));

    let start = tokio::time::Instant::now();
    let outcome = extractor.generate("flaky/m", "prompt").await;
    assert!(outcome.success);
    assert_eq!(provider.calls("flaky/m"), 3);
    // 1s + 2s of backoff.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(
        *provider.keys_seen.lock().unwrap(),
        vec!["key-1", "key-2", "key-1"]
    );
}

#[tokio::test]
async fn skip_on_error_makes_one_attempt() {
    let provider = Arc::new(
        ScriptedProvider::default().with("flaky/m", Script::FlakyThen(503, 1, ONE_PARAM_FENCED)),
    );
    let extractor = ParamsExtractor::new(provider.clone(), keys(1), models(&["flaky/m"]));

    let outcome = extractor.generate("flaky/m", "prompt").await;
    assert!(!outcome.success);
    assert_eq!(provider.calls("flaky/m"), 1);
}

#[tokio::test]
async fn directory_run_writes_reports_and_organizes() {
    let snippets = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_snippets(snippets.path());

    let provider = ScriptedProvider::default()
        .with("good/a", Script::Reply(TWO_PARAMS))
        .with("good/b", Script::Reply(ONE_PARAM_FENCED))
        .with("bad/c", Script::Fail(400));
    let extractor = ParamsExtractor::new(
        Arc::new(provider),
        keys(3),
        models(&["good/a", "good/b", "bad/c"]),
    );
    let strategy = PromptStrategy::FewShot;

    let inventory = out.path().join("snippets_inventory.csv");
    assert_eq!(reports::write_snippet_inventory(snippets.path(), &inventory).unwrap(), 2);

    let results = extractor
        .extract_from_directory(snippets.path(), strategy)
        .await
        .unwrap();
    let names: Vec<&str> = results.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["a_pages.txt", "b_tlb.txt"]);

    let comparison = out.path().join("comparison_few_shot.csv");
    reports::write_comparison_csv(&results, &comparison).unwrap();
    let csv = std::fs::read_to_string(&comparison).unwrap();
    let mut lines = csv.split("\r\n");
    assert_eq!(lines.next(), Some("Snippet,good/a,good/b,bad/c"));
    assert_eq!(
        lines.next(),
        Some("a_pages.txt,2 parameters,1 parameters,Error: HTTP 400: scripted failure")
    );

    let validated = extractor.validate_and_merge(&results);
    assert_eq!(validated["b_tlb.txt"].source_snippet, "b_tlb.txt");
    assert_eq!(validated["b_tlb.txt"].result.validation_summary.total_parameters, 2);

    let detailed = out.path().join("detailed_results_few_shot.csv");
    reports::write_detailed_csv(&validated, &detailed).unwrap();
    let detailed_csv = std::fs::read_to_string(&detailed).unwrap();
    assert!(detailed_csv.starts_with("Source Snippet,Parameter Name,"));
    assert!(detailed_csv.contains(",0.67,medium,2/3 models\r\n"));

    let yaml = out.path().join("parameters_few_shot.yaml");
    ParametersDocument::from_validations(
        &validated,
        extractor.model_info(),
        strategy,
        reports::timestamp_now(),
    )
    .write(&yaml)
    .unwrap();
    let document = ParametersDocument::read(&yaml).unwrap();
    assert_eq!(document.metadata.total_snippets, 2);
    assert_eq!(document.metadata.prompt_strategy, "few_shot");
    assert_eq!(document.metadata.models_used[2].provider, "bad");
    assert_eq!(document.parameters.len(), 4);
    assert_eq!(document.parameters[0].source, "a_pages.txt");
    assert_eq!(document.parameters[0].confidence.score, 0.67);

    let results_dir = tempfile::tempdir().unwrap();
    let written = ResultsOrganizer::new(out.path(), results_dir.path())
        .organize_all()
        .unwrap();
    assert_eq!(written.len(), 2);

    let organized = std::fs::read_to_string(results_dir.path().join("b_tlb/few_shot.yaml")).unwrap();
    let organized: serde_yaml::Value = serde_yaml::from_str(&organized).unwrap();
    assert_eq!(organized["metadata"]["source_file"], "b_tlb.txt");
    assert_eq!(organized["metadata"]["confidence_threshold"], ">= 0.5");
    assert_eq!(organized["metadata"]["total_parameters"], 1);
    assert_eq!(organized["parameters"][0]["name"], "tlb_entries");
}

#[tokio::test]
async fn connectivity_check_reports_each_model() {
    let provider = Arc::new(
        ScriptedProvider::default()
            .with("openai/up", Script::Reply(ONE_PARAM_FENCED))
            .with("google/gone", Script::Fail(404))
            .with("openai/down", Script::Fail(500)),
    );
    let extractor = ParamsExtractor::new(provider.clone(), keys(1), Vec::new())
        .with_max_tokens(CHECK_MAX_TOKENS);
    let models = models(&["openai/up", "google/gone", "openai/down"]);

    let report = connectivity::check_models(&extractor, &models).await;

    let order: Vec<&str> = report.checks.iter().map(|c| c.model.as_str()).collect();
    assert_eq!(order, vec!["openai/up", "google/gone", "openai/down"]);
    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.checks[0].response_len(), ONE_PARAM_FENCED.chars().count());
    assert!(report.checks[1]
        .outcome
        .error
        .as_deref()
        .unwrap()
        .contains("404"));
    assert_eq!(
        report.by_provider(),
        vec![("openai".to_string(), 1, 2), ("google".to_string(), 0, 1)]
    );
    assert!(provider
        .max_tokens_seen
        .lock()
        .unwrap()
        .iter()
        .all(|&n| n == CHECK_MAX_TOKENS));
}
