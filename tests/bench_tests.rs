//! Dataset benchmark tests: dataset → runner → records → summaries.

use std::sync::Arc;

use allergen_bridge::config::Config;
use allergen_bridge::eval::bench::{
    load_records, summarize_by_model, write_summary_csv, BenchmarkRunner, SUMMARY_CSV_HEADER,
};
use allergen_bridge::eval::dataset::load_dataset;
use allergen_bridge::inference::model_loader::ModelFileInfo;
use allergen_bridge::inference::runner::InferenceRunner;
use allergen_bridge::inference::scripted::{Script, ScriptedBackend};
use allergen_bridge::labels::LabelFilter;

const DATASET: &str = r#"
{"id": "1", "name": "Latte", "ingredients": "espresso, steamed milk", "allergens_raw": "Contains: Milk", "allergens_mapped": "milk"}
{"id": "2", "name": "Custard", "ingredients": "milk, eggs, sugar", "allergens_mapped": "milk, egg"}
{"id": "3", "name": "Sorbet", "ingredients": "mango, sugar, water"}
"#;

fn setup(dir: &tempfile::TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let model = dir.path().join("tiny-q8.gguf");
    let header = ModelFileInfo {
        version: 3,
        tensor_count: 1,
        metadata_kv_count: 1,
        file_size: 0,
    }
    .header_bytes();
    std::fs::write(&model, header).unwrap();

    let dataset = dir.path().join("foods.jsonl");
    std::fs::write(&dataset, DATASET).unwrap();
    (model, dataset)
}

#[test]
fn test_bench_scores_fixed_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (model, dataset) = setup(&dir);
    let items = load_dataset(&dataset).unwrap();
    let runner = InferenceRunner::new(
        ScriptedBackend::new(Script::reply("milk")),
        Arc::new(Config::default()),
    );

    let (records, summary) = BenchmarkRunner::new(&runner, &model).run(&items).unwrap();

    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.predicted_allergens == "milk"));
    assert_eq!(summary.model_name, "tiny-q8");
    assert_eq!(summary.errors, 0);
    // tp=2, fp=1 (sorbet), fn=1 (custard egg).
    assert!((summary.quality.precision - 2.0 / 3.0).abs() < 1e-9);
    assert!((summary.quality.recall - 2.0 / 3.0).abs() < 1e-9);
    assert!((summary.quality.exact_match_rate - 1.0 / 3.0).abs() < 1e-9);
    assert!(summary.efficiency.avg_latency_ms >= 1.0);
}

#[test]
fn test_failed_items_recorded_as_errors() {
    let dir = tempfile::tempdir().unwrap();
    let (_, dataset) = setup(&dir);
    let items = load_dataset(&dataset).unwrap();
    let runner = InferenceRunner::new(ScriptedBackend::default(), Arc::new(Config::default()));

    let (records, summary) = BenchmarkRunner::new(&runner, dir.path().join("missing.gguf"))
        .run(&items)
        .unwrap();

    assert_eq!(summary.errors, 3);
    assert_eq!(records[0].error.as_deref(), Some("Model Load Failed"));
    assert_eq!(records[0].predicted_allergens, "EMPTY");
    assert_eq!(records[0].ttft_ms, -1);
    assert_eq!(summary.quality.abstention_rate, 1.0);
}

#[test]
fn test_records_appended_and_reported_per_model() {
    let dir = tempfile::tempdir().unwrap();
    let (model, dataset) = setup(&dir);
    let records_path = dir.path().join("records.jsonl");
    let items = load_dataset(&dataset).unwrap();

    for (name, reply) in [("model-a", "milk egg"), ("model-b", "EMPTY")] {
        let runner = InferenceRunner::new(
            ScriptedBackend::new(Script::reply(reply)),
            Arc::new(Config::default()),
        );
        BenchmarkRunner::new(&runner, &model)
            .with_model_name(name)
            .with_records(&records_path)
            .unwrap()
            .run(&items)
            .unwrap();
    }

    let records = load_records(&records_path).unwrap();
    assert_eq!(records.len(), 6);

    let summaries = summarize_by_model(&records, &LabelFilter::default());
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].model_name, "model-a");
    assert!((summaries[0].quality.recall - 1.0).abs() < 1e-9);
    assert_eq!(summaries[1].model_name, "model-b");
    assert_eq!(summaries[1].quality.abstention_rate, 1.0);
}

#[test]
fn test_csv_dataset_to_summary_table() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _) = setup(&dir);
    let dataset = dir.path().join("foods.csv");
    std::fs::write(
        &dataset,
        "id,name,ingredients,allergens_raw,allergens_mapped\n\
         1,Satay,\"chicken, peanut sauce\",Contains: Peanuts,peanut\n\
         2,Rice,\"rice, water\",,\n",
    )
    .unwrap();
    let records_path = dir.path().join("records.jsonl");

    let items = load_dataset(&dataset).unwrap();
    assert_eq!(items.len(), 2);
    let runner = InferenceRunner::new(
        ScriptedBackend::new(Script::reply("peanut")),
        Arc::new(Config::default()),
    );
    BenchmarkRunner::new(&runner, &model)
        .with_records(&records_path)
        .unwrap()
        .run(&items)
        .unwrap();

    let records = load_records(&records_path).unwrap();
    #[cfg(target_os = "linux")]
    assert!(records.iter().all(|r| r.rss_kb > 0));

    let summaries = summarize_by_model(&records, &LabelFilter::default());
    let table = dir.path().join("metrics.csv");
    write_summary_csv(&summaries, std::fs::File::create(&table).unwrap()).unwrap();

    let text = std::fs::read_to_string(&table).unwrap();
    let rows: Vec<Vec<&str>> = text.lines().map(|l| l.split(',').collect()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], SUMMARY_CSV_HEADER.to_vec());
    assert_eq!(rows[1][0], "tiny-q8");
    // One of two predictions is right: precision 50%, recall 100%.
    assert_eq!(rows[1][1], "50");
    assert_eq!(rows[1][2], "100");
}
