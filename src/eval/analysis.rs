//! Post-hoc aggregation of persisted run reports into per-model classification metrics.

use std::{
    collections::BTreeMap,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::BenchError,
    eval::{
        report::{AgentReport, AgentTestResult},
        scenario::TestCase,
    },
};

static RESULT_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".*_agent_test_results_.*\.json$").unwrap());

static MODEL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)_agent_test_results_").unwrap());

pub const UNKNOWN_MODEL: &str = "unknown";

/// Precision, recall and F1 with the confusion-matrix counts they came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl MetricSet {
    /// Ratios with an empty denominator are 0, never NaN.
    pub fn from_counts(tp: usize, fp: usize, tn: usize, fn_: usize) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            true_positives: tp,
            false_positives: fp,
            true_negatives: tn,
            false_negatives: fn_,
        }
    }

    pub fn classified(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    fn tally<I: IntoIterator<Item = Outcome>>(outcomes: I) -> Self {
        let (mut tp, mut fp, mut tn, mut fn_) = (0, 0, 0, 0);
        for outcome in outcomes {
            match outcome {
                Outcome::TruePositive => tp += 1,
                Outcome::FalsePositive => fp += 1,
                Outcome::TrueNegative => tn += 1,
                Outcome::FalseNegative => fn_ += 1,
            }
        }
        Self::from_counts(tp, fp, tn, fn_)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

/// Did the model call any tool when some variant expected one?
pub fn invocation_outcome(result: &AgentTestResult) -> Outcome {
    let expected = result.test_case.expects_tools();
    let actual = !result.called_tools().is_empty();
    match (expected, actual) {
        (true, true) => Outcome::TruePositive,
        (false, false) => Outcome::TrueNegative,
        (false, true) => Outcome::FalsePositive,
        (true, false) => Outcome::FalseNegative,
    }
}

/// Did the model call exactly the tool names of some variant, in order?
///
/// Emptiness is judged on every variant's tool names flattened together, which differs
/// from the outcome matcher when variants have different lengths. Arguments are ignored.
pub fn selection_outcome(result: &AgentTestResult) -> Outcome {
    let expected = flattened_tool_names(&result.test_case);
    let actual = result.called_tools();

    match (expected.is_empty(), actual.is_empty()) {
        (true, true) => Outcome::TrueNegative,
        (true, false) => Outcome::FalsePositive,
        (false, true) => Outcome::FalseNegative,
        (false, false) if matches_any_variant(&result.test_case, &actual) => Outcome::TruePositive,
        (false, false) => Outcome::FalsePositive,
    }
}

fn flattened_tool_names(case: &TestCase) -> Vec<&str> {
    case.expected_tools_variants
        .iter()
        .flat_map(|variant| variant.tools.iter())
        .map(|tool| tool.name.as_str())
        .collect()
}

fn matches_any_variant(case: &TestCase, actual: &[&str]) -> bool {
    case.expected_tools_variants
        .iter()
        .any(|variant| variant.tool_names() == actual)
}

pub fn tool_invocation_metrics(results: &[AgentTestResult]) -> MetricSet {
    MetricSet::tally(results.iter().map(invocation_outcome))
}

pub fn tool_selection_metrics(results: &[AgentTestResult]) -> MetricSet {
    MetricSet::tally(results.iter().map(selection_outcome))
}

/// Mean response time in seconds.
pub fn average_response_secs(results: &[AgentTestResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let total: f64 = results
        .iter()
        .map(|result| result.response_time.as_secs_f64())
        .sum();
    total / results.len() as f64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAnalysis {
    pub model_name: String,
    pub tool_invocation: MetricSet,
    pub tool_selection: MetricSet,
    /// Seconds.
    pub average_response_time: f64,
    pub total_tests: usize,
    pub total_runs: usize,
    pub result_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAnalysisReport {
    pub batch_directory: String,
    pub analysis_date: DateTime<Utc>,
    pub models: Vec<ModelAnalysis>,
    pub summary: String,
}

/// Every `*_agent_test_results_*.json` below `dir`, recursively, sorted by path.
pub fn find_result_files(dir: &Path) -> Result<Vec<PathBuf>, BenchError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| RESULT_FILE.is_match(name))
            {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Model key embedded in an artifact file name.
pub fn model_key(file_name: &str) -> String {
    if let Some(captures) = MODEL_PREFIX.captures(file_name) {
        return captures[1].to_string();
    }
    let parts: Vec<&str> = file_name.split('_').collect();
    if parts.len() >= 4 {
        parts[0].to_string()
    } else {
        UNKNOWN_MODEL.to_string()
    }
}

pub fn group_files_by_model(files: &[PathBuf]) -> BTreeMap<String, Vec<PathBuf>> {
    let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        grouped.entry(model_key(&name)).or_default().push(file.clone());
    }
    grouped
}

/// Concatenates the results of every readable file. Unreadable files are skipped with a
/// warning; `None` when nothing usable remains.
pub fn analyze_model(model_name: &str, files: &[PathBuf]) -> Option<ModelAnalysis> {
    let mut results = Vec::new();
    let mut loaded = Vec::new();

    for file in files {
        match AgentReport::load(file) {
            Ok(report) => {
                debug!(file = %file.display(), results = report.results.len(), "loaded result file");
                results.extend(report.results);
                loaded.push(file.display().to_string());
            }
            Err(error) => warn!(file = %file.display(), %error, "skipping unreadable result file"),
        }
    }

    if results.is_empty() {
        warn!(model = model_name, "no test results found for model");
        return None;
    }

    Some(ModelAnalysis {
        model_name: model_name.to_string(),
        tool_invocation: tool_invocation_metrics(&results),
        tool_selection: tool_selection_metrics(&results),
        average_response_time: average_response_secs(&results),
        total_tests: results.len(),
        total_runs: loaded.len(),
        result_files: loaded,
    })
}

/// Analyzes the artifacts under every directory together, ranked by tool-selection F1.
pub fn analyze_batch<P: AsRef<Path>>(dirs: &[P]) -> Result<BatchAnalysisReport, BenchError> {
    let mut files = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(BenchError::MissingDirectory(dir.to_path_buf()));
        }
        let found = find_result_files(dir)?;
        if found.is_empty() {
            return Err(BenchError::NoResultFiles(dir.to_path_buf()));
        }
        files.extend(found);
    }

    let mut models: Vec<ModelAnalysis> = group_files_by_model(&files)
        .iter()
        .filter_map(|(model, files)| analyze_model(model, files))
        .collect();
    models.sort_by(|a, b| b.tool_selection.f1.total_cmp(&a.tool_selection.f1));

    let batch_directory = dirs
        .iter()
        .map(|dir| dir.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(", ");

    Ok(BatchAnalysisReport {
        batch_directory,
        analysis_date: Utc::now(),
        summary: summary(&models),
        models,
    })
}

fn summary(models: &[ModelAnalysis]) -> String {
    let Some(best) = models.first() else {
        return "No models analyzed.".to_string();
    };

    let mut out = String::from("Summary:\n--------\n");
    if models.len() == 1 {
        let _ = writeln!(
            out,
            "Analyzed 1 model ({}) with {} tests across {} runs.",
            best.model_name, best.total_tests, best.total_runs
        );
    } else {
        let tests: usize = models.iter().map(|model| model.total_tests).sum();
        let runs: usize = models.iter().map(|model| model.total_runs).sum();
        let _ = writeln!(
            out,
            "Analyzed {} models with {tests} total tests across {runs} runs.",
            models.len()
        );
        let _ = writeln!(
            out,
            "Best performing model: {} (Tool Selection F1: {:.3})",
            best.model_name, best.tool_selection.f1
        );
    }
    out
}

impl BatchAnalysisReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Batch Analysis Report\n=====================\n");
        let _ = writeln!(out, "Batch Directory: {}", self.batch_directory);
        let _ = writeln!(
            out,
            "Analysis Date: {}\n",
            self.analysis_date.format("%Y-%m-%d %H:%M:%S")
        );

        out.push_str("Model Performance Summary:\n--------------------------\n");
        for model in &self.models {
            let _ = writeln!(out, "{}:", model.model_name);
            let _ = writeln!(out, "  Runs: {}, Tests: {}", model.total_runs, model.total_tests);
            let _ = writeln!(out, "  Average Response Time: {:.2}s", model.average_response_time);
            out.push_str("  Tool Invocation (Binary):\n");
            render_metrics(&mut out, &model.tool_invocation);
            out.push_str("  Tool Selection:\n");
            render_metrics(&mut out, &model.tool_selection);
            out.push('\n');
        }

        if self.models.len() > 1 {
            out.push_str("Overall Rankings (by Tool Selection F1):\n");
            out.push_str("-----------------------------------------\n");
            for (rank, model) in self.models.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. {} (F1: {:.3})",
                    rank + 1,
                    model.model_name,
                    model.tool_selection.f1
                );
            }
            out.push('\n');
        }

        out.push_str(&self.summary);
        out
    }
}

fn render_metrics(out: &mut String, metrics: &MetricSet) {
    let _ = writeln!(
        out,
        "    Precision: {:.3} ({}/{})",
        metrics.precision,
        metrics.true_positives,
        metrics.true_positives + metrics.false_positives
    );
    let _ = writeln!(
        out,
        "    Recall: {:.3} ({}/{})",
        metrics.recall,
        metrics.true_positives,
        metrics.true_positives + metrics.false_negatives
    );
    let _ = writeln!(out, "    F1: {:.3}", metrics.f1);
}
