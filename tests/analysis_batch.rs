use std::{fs, path::Path, time::Duration};

use chrono::Utc;
use toolbench::{
    analyze_batch, AgentReport, AgentTestResult, BenchError, ChatResponse, ExpectedToolCall,
    ExpectedToolPath, TestCase, TestConfig, ToolCallResult,
};

fn view_cart_case() -> TestCase {
    TestCase::new("view_cart", "What's in my cart?")
        .with_variant(ExpectedToolPath::new("direct", [ExpectedToolCall::new("view_cart")]))
}

fn result(model: &str, tools: &[&str], secs: u64) -> AgentTestResult {
    let case = view_cart_case();
    AgentTestResult {
        test_case: case,
        model_name: model.to_string(),
        config: TestConfig::default(),
        response: Some(ChatResponse {
            message: "ok".into(),
            session_id: "s".into(),
            cart_summary: None,
            timestamp: Utc::now(),
            tool_calls: tools
                .iter()
                .map(|name| ToolCallResult {
                    call_id: "call_0".into(),
                    tool_name: name.to_string(),
                    success: true,
                    result: None,
                    error: None,
                    arguments: "{}".into(),
                    schema_errors: Vec::new(),
                })
                .collect(),
            llm_requests: 2,
            llm_total_time: Duration::from_secs(secs),
        }),
        success: !tools.is_empty(),
        matched_path: None,
        error_message: None,
        timestamp: Utc::now(),
        response_time: Duration::from_secs(secs),
    }
}

fn write_report(dir: &Path, file: &str, results: Vec<AgentTestResult>) {
    AgentReport::from_results(results)
        .save(dir.join(file))
        .expect("save report");
}

fn gpt4_run(missed: usize) -> Vec<AgentTestResult> {
    (0..10)
        .map(|index| {
            if index < missed {
                result("gpt-4", &[], 1)
            } else {
                result("gpt-4", &["view_cart"], 3)
            }
        })
        .collect()
}

#[test]
fn aggregates_runs_per_model_and_ranks_by_selection_f1() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_report(dir.path(), "gpt-4_agent_test_results_20250101_000000.json", gpt4_run(1));
    write_report(dir.path(), "gpt-4_agent_test_results_20250102_000000.json", gpt4_run(1));
    fs::write(
        dir.path().join("gpt-4_agent_test_results_broken.json"),
        "{ not json",
    )
    .expect("write broken file");

    let nested = dir.path().join("nested");
    fs::create_dir_all(&nested).expect("nested dir");
    write_report(
        &nested,
        "small_agent_test_results_20250101_000000.json",
        vec![
            result("small", &["search_products"], 1),
            result("small", &[], 1),
        ],
    );
    fs::write(dir.path().join("notes.json"), "[]").expect("write unrelated file");

    let report = analyze_batch(&[dir.path()]).expect("analysis");
    assert_eq!(report.models.len(), 2);

    let gpt4 = &report.models[0];
    assert_eq!(gpt4.model_name, "gpt-4");
    assert_eq!(gpt4.total_tests, 20);
    assert_eq!(gpt4.total_runs, 2);
    assert_eq!(gpt4.result_files.len(), 2);

    let invocation = gpt4.tool_invocation;
    assert_eq!(invocation.true_positives, 18);
    assert_eq!(invocation.false_negatives, 2);
    assert_eq!(invocation.false_positives, 0);
    assert!((invocation.precision - 1.0).abs() < 1e-9);
    assert!((invocation.recall - 0.9).abs() < 1e-9);
    assert!((invocation.f1 - 0.947).abs() < 1e-3);

    let selection = gpt4.tool_selection;
    assert_eq!(selection.true_positives, 18);
    assert_eq!(selection.false_negatives, 2);
    assert!((gpt4.average_response_time - 2.8).abs() < 1e-9);

    let small = &report.models[1];
    assert_eq!(small.model_name, "small");
    assert_eq!(small.tool_invocation.true_positives, 1);
    assert_eq!(small.tool_selection.false_positives, 1);
    assert_eq!(small.tool_selection.f1, 0.0);

    let text = report.render_text();
    assert!(text.contains("Batch Analysis Report"));
    assert!(text.contains("1. gpt-4 (F1: 0.947)"));
    assert!(text.contains("2. small (F1: 0.000)"));
    assert!(text.contains("Best performing model: gpt-4 (Tool Selection F1: 0.947)"));
    assert!(text.contains("    Recall: 0.900 (18/20)"));

    let json = serde_json::to_value(&report).expect("serialize");
    assert_eq!(json["models"][0]["tool_invocation"]["true_positives"], 18);
}

#[test]
fn rejects_missing_and_empty_directories() {
    let dir = tempfile::tempdir().expect("tempdir");

    let missing = dir.path().join("does-not-exist");
    assert!(matches!(
        analyze_batch(&[&missing]),
        Err(BenchError::MissingDirectory(path)) if path == missing
    ));

    assert!(matches!(
        analyze_batch(&[dir.path()]),
        Err(BenchError::NoResultFiles(_))
    ));
}

#[test]
fn combines_several_directories() {
    let first = tempfile::tempdir().expect("tempdir");
    let second = tempfile::tempdir().expect("tempdir");
    write_report(first.path(), "gpt-4_agent_test_results_a.json", gpt4_run(0));
    write_report(second.path(), "gpt-4_agent_test_results_b.json", gpt4_run(2));

    let report = analyze_batch(&[first.path(), second.path()]).expect("analysis");
    assert_eq!(report.models.len(), 1);
    assert_eq!(report.models[0].total_tests, 20);
    assert_eq!(report.models[0].tool_invocation.false_negatives, 2);
    assert!(report.batch_directory.contains(", "));
    assert!(report
        .summary
        .contains("Analyzed 1 model (gpt-4) with 20 tests across 2 runs."));
}
