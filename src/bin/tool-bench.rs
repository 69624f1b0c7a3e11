use std::{path::PathBuf, sync::Arc, time::Instant};

use clap::Parser;
use colored::Colorize;
use toolbench::{
    eval::report::artifact_file_name,
    load_test_cases,
    providers::openai::{timeout_from_env, OpenAI, OpenAIConfig},
    AgentReport, LLMProvider, RequestLogger, TestConfig, TestRunner,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BASE_URL: &str = "http://localhost:12434/engines/v1";
const DEFAULT_API_KEY: &str = "DMR";

#[derive(Parser)]
#[command(name = "tool-bench")]
#[command(about = "Run shopping-assistant tool-calling test cases against one or more models")]
struct Args {
    /// API key (falls back to OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint (falls back to OPENAI_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Comma-separated model identifiers
    #[arg(long, value_delimiter = ',', default_value = "ai/llama3.2")]
    models: Vec<String>,

    /// Test case file (JSON or YAML)
    #[arg(long, default_value = "config/test_cases.json")]
    config: PathBuf,

    /// Run only the test case with this name
    #[arg(long)]
    test_case: Option<String>,

    /// Report output path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Request/response log path (JSONL)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Disable the request/response log
    #[arg(long)]
    no_request_log: bool,

    /// Maximum number of test executions in flight
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Completion token limit per model call
    #[arg(long, default_value_t = 1000)]
    max_tokens: u32,

    /// Replace the built-in shopping assistant system prompt
    #[arg(long)]
    system_prompt: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let models: Vec<String> = args
        .models
        .iter()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty())
        .collect();
    if models.is_empty() {
        eprintln!("No models given.");
        std::process::exit(2);
    }

    let cases = load_test_cases(&args.config, args.test_case.as_deref())?;

    let api_key = args
        .api_key
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| DEFAULT_API_KEY.to_string());
    let base_url = args
        .base_url
        .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let mut provider_config = OpenAIConfig::new(api_key).with_base_url(base_url.clone());
    if let Some(timeout) = timeout_from_env() {
        provider_config = provider_config.with_timeout(timeout);
    }
    let provider: Arc<dyn LLMProvider> = Arc::new(OpenAI::from_config(provider_config)?);

    let now = chrono::Utc::now();
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from("results").join(artifact_file_name(&models, now)));

    let config = TestConfig {
        system_prompt: args.system_prompt.clone(),
        temperature: 0.0,
        top_k: None,
        max_tokens: Some(args.max_tokens),
    };

    let mut runner = TestRunner::new(provider, models.clone())
        .with_configs(vec![config])
        .with_max_concurrency(args.max_concurrency);

    if !args.no_request_log {
        let log_file = args.log_file.unwrap_or_else(|| {
            PathBuf::from("logs").join(format!("requests_{}.jsonl", now.format("%Y%m%d_%H%M%S")))
        });
        runner = runner.with_request_sink(Arc::new(RequestLogger::create(&log_file)?));
        println!("Request log: {}", log_file.display());
    }

    println!("{}", "Starting agent tool-calling test".bold());
    println!("  Models: {}", models.join(", "));
    println!("  Base URL: {base_url}");
    if let Some(name) = &args.test_case {
        println!("  Single Test Case: {name}");
    }
    println!("  Test Cases: {}", cases.len());
    println!("  Total Tests: {}", runner.unit_count(&cases));
    println!("  Output: {}", output.display());

    let started = Instant::now();
    let report = runner.run(&cases).await;
    println!("Tests completed in {:.2?}\n", started.elapsed());

    print_summary(&report);

    report.save(&output)?;
    println!("\nResults saved to: {}", output.display());
    Ok(())
}

fn print_summary(report: &AgentReport) {
    println!("{}", "Test Summary".bold());
    println!("============");
    println!("Total Tests: {}", report.total_tests);
    println!("{} {}", "Passed:".green(), report.passed_tests);
    println!("{} {}", "Failed:".red(), report.failed_tests);
    println!("Average Response Time: {:.2?}", report.average_time);
    println!(
        "LLM Requests: {} (avg {:.2?} per request)",
        report.total_llm_requests, report.avg_time_per_request
    );

    println!("\n{}", "Results by Test Case".bold());
    for case in report.case_summaries() {
        println!("Test Case: {}", case.name);
        println!("  Total Runs: {}", case.runs);
        println!("  Passed: {}", case.passed);
        println!("  Failed: {}", case.failed);
        println!("  Average Time: {:.2?}", case.average_time);
        println!("  Success Rate: {:.2}%", case.success_rate());
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("\n{}", "Failed Tests".red().bold());
        for failed in failures {
            println!("Test Case: {}", failed.test_case.name);
            println!("Model: {}", failed.model_name);
            if let Some(error) = &failed.error_message {
                println!("Error: {error}");
            } else {
                let called = failed.called_tools();
                println!(
                    "Called: {}",
                    if called.is_empty() { "(no tools)".to_string() } else { called.join(" -> ") }
                );
            }
            println!("Response Time: {:.2?}", failed.response_time);
            println!("---");
        }
    }

    let rate = format!("{:.2}%", report.success_rate());
    let rate = if report.failed_tests == 0 { rate.green() } else { rate.yellow() };
    println!("\nOverall Success Rate: {rate}");
}
