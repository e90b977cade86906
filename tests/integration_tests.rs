//! Integration tests for the full bridge pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use allergen_bridge::bridge::BridgeResponse;
use allergen_bridge::config::Config;
use allergen_bridge::inference::model_loader::ModelFileInfo;
use allergen_bridge::inference::runner::{InferenceRequest, InferenceRunner, StopReason};
use allergen_bridge::inference::scripted::{Script, ScriptedBackend};

fn model_file(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("allergen-q4.gguf");
    let header = ModelFileInfo {
        version: 3,
        tensor_count: 291,
        metadata_kv_count: 24,
        file_size: 0,
    }
    .header_bytes();
    std::fs::write(&path, header).unwrap();
    path
}

fn runner(script: Script) -> InferenceRunner<ScriptedBackend> {
    InferenceRunner::new(ScriptedBackend::new(script), Arc::new(Config::default()))
}

fn wire(runner: &InferenceRunner<ScriptedBackend>, prompt: &str, model: &PathBuf) -> String {
    runner.respond(&InferenceRequest::new(prompt, model)).to_string()
}

#[test]
fn test_missing_model_is_exact_error_string() {
    let runner = runner(Script::reply("peanut"));
    let out = wire(&runner, "anything", &PathBuf::from("/nonexistent/model.gguf"));
    assert_eq!(out, "ERROR|Model Load Failed");
    assert!(runner.backend().ledger().snapshot().balanced());
}

#[test]
fn test_single_label_with_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::reply("Peanut"));
    let out = wire(&runner, "Ingredients: roasted peanuts, salt", &model_file(&dir));

    assert!(out.starts_with("peanut|TTFT_MS="), "{out}");
    let suffix = out.split_once('|').unwrap().1;
    let keys: Vec<&str> = suffix.split(';').map(|kv| kv.split_once('=').unwrap().0).collect();
    assert_eq!(keys, vec!["TTFT_MS", "ITPS", "OTPS", "OET_MS"]);
}

#[test]
fn test_no_match_returns_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::reply("None of the listed allergens."));
    let out = wire(&runner, "Ingredients: rice, water", &model_file(&dir));
    assert!(out.starts_with("EMPTY|"), "{out}");
}

#[test]
fn test_output_parses_back() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::reply("wheat, egg and sesame"));
    let out = wire(&runner, "bagel", &model_file(&dir));

    let parsed: BridgeResponse = out.parse().unwrap();
    assert_eq!(parsed.labels(), Some("egg,sesame,wheat"));
    assert_eq!(parsed.to_string(), out);
}

#[test]
fn test_empty_prompt_fails_tokenize() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::default());
    assert_eq!(wire(&runner, "", &model_file(&dir)), "ERROR|Tokenize Failed");
    assert!(runner.backend().ledger().snapshot().balanced());
}

#[test]
fn test_context_failure() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::default().fail_context());
    assert_eq!(wire(&runner, "milk", &model_file(&dir)), "ERROR|Context Failed");

    let ledger = runner.backend().ledger().snapshot();
    assert_eq!(ledger.models_loaded, 1);
    assert_eq!(ledger.models_freed, 1);
    assert_eq!(ledger.contexts_created, 0);
}

#[test]
fn test_prefill_failure() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::reply("milk").fail_prefill());
    assert_eq!(wire(&runner, "milk", &model_file(&dir)), "ERROR|Decode Failed");
    assert!(runner.backend().ledger().snapshot().balanced());
}

#[test]
fn test_backend_failure() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::default().fail_backend());
    assert_eq!(wire(&runner, "milk", &model_file(&dir)), "ERROR|Backend Init Failed");
}

#[test]
fn test_feed_failure_keeps_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::reply("milk egg soy").fail_feed_at(2));
    let result = runner
        .run(&InferenceRequest::new("custard", model_file(&dir)))
        .unwrap();

    assert_eq!(result.stop_reason, StopReason::DecodeFailed);
    assert_eq!(result.generated_tokens, 2);
    assert_eq!(result.label_field, "egg,milk");
    assert!(runner.backend().ledger().snapshot().balanced());
}

#[test]
fn test_generation_capped_at_budget() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(Script::reply("shellfish").without_eog());
    let long_prompt = vec!["word"; 300].join(" ");
    let result = runner
        .run(&InferenceRequest::new(long_prompt, model_file(&dir)))
        .unwrap();

    assert_eq!(result.stop_reason, StopReason::TokenBudget);
    assert_eq!(result.generated_tokens, 64);
    assert_eq!(result.label_field, "fish,shellfish");

    // One prefill plus one feed per token except the last.
    let ledger = runner.backend().ledger().snapshot();
    assert_eq!(ledger.decode_calls, 64);
    assert!(ledger.balanced());
}

#[test]
fn test_backend_initialized_once_across_calls() {
    let dir = tempfile::tempdir().unwrap();
    let model = model_file(&dir);
    let runner = runner(Script::reply("soy"));

    for _ in 0..3 {
        assert!(wire(&runner, "tofu", &model).starts_with("soy|"));
    }

    let ledger = runner.backend().ledger().snapshot();
    assert_eq!(ledger.backend_inits, 1);
    assert_eq!(ledger.models_loaded, 3);
    assert_eq!(ledger.contexts_created, 3);
    assert_eq!(ledger.samplers_created, 3);
    assert!(ledger.balanced());
}

#[test]
fn test_metrics_measured_with_slow_decode() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner(
        Script::reply("milk egg")
            .decode_delay(std::time::Duration::from_millis(20)),
    );
    let result = runner
        .run(&InferenceRequest::new("pancake batter", model_file(&dir)))
        .unwrap();

    let t = result.timings;
    assert!(t.ttft_ms >= 20, "{t:?}");
    assert!(t.itps > 0);
    assert!(t.otps > 0);
    assert!(t.oet_ms >= 20);
}

#[test]
fn test_wire_metrics_consistent_with_timed_generation() {
    let dir = tempfile::tempdir().unwrap();
    // Five generated pieces, each fed back before EOG.
    let runner = runner(
        Script::reply("peanut a b c d")
            .decode_delay(std::time::Duration::from_millis(20)),
    );
    // Nine words plus BOS make ten prompt tokens.
    let prompt = "list the allergens in this satay sauce made today";
    let out = wire(&runner, prompt, &model_file(&dir));

    assert!(out.starts_with("peanut|TTFT_MS="), "{out}");
    let parsed: BridgeResponse = out.parse().unwrap();
    let BridgeResponse::Success { timings, .. } = parsed else {
        panic!("unexpected {out}");
    };

    // Five feeds at 20 ms each.
    assert!(timings.oet_ms >= 100, "{out}");
    assert!(timings.oet_ms < 1_000, "{out}");
    assert_eq!(timings.otps, 5 * 1000 / timings.oet_ms, "{out}");
    // Prefill of ten tokens took at least one decode delay.
    assert!(timings.itps > 0 && timings.itps <= 10 * 1000 / 20, "{out}");
    assert!(timings.ttft_ms >= 20, "{out}");
}
