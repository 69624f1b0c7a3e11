use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    agent_loop::ChatResponse,
    error::BenchError,
    eval::scenario::{TestCase, TestConfig},
    types::{duration_nanos, null_as_default},
};

pub const TEST_SUITE: &str = "Agent Loop Tool Efficiency Test";

/// Marker between the model key and the timestamp in artifact file names.
pub const ARTIFACT_MARKER: &str = "_agent_test_results_";

/// One (test case, model, config) execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTestResult {
    pub test_case: TestCase,
    pub model_name: String,
    #[serde(default)]
    pub config: TestConfig,
    #[serde(default)]
    pub response: Option<ChatResponse>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, with = "duration_nanos")]
    pub response_time: Duration,
}

impl AgentTestResult {
    /// Names of the tools the model called, in order. A missing response counts as none.
    pub fn called_tools(&self) -> Vec<&str> {
        self.response
            .iter()
            .flat_map(|response| response.tool_calls.iter())
            .map(|call| call.tool_name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub timestamp: DateTime<Utc>,
    pub test_suite: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<AgentTestResult>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    #[serde(default, with = "duration_nanos")]
    pub average_time: Duration,
    #[serde(default)]
    pub total_llm_requests: usize,
    #[serde(default, with = "duration_nanos")]
    pub total_llm_time: Duration,
    #[serde(default, with = "duration_nanos")]
    pub avg_time_per_request: Duration,
}

impl AgentReport {
    /// Aggregates counts and timings. LLM totals only include results that got a response.
    pub fn from_results(results: Vec<AgentTestResult>) -> Self {
        let passed_tests = results.iter().filter(|result| result.success).count();
        let total_time: Duration = results.iter().map(|result| result.response_time).sum();
        let (total_llm_requests, total_llm_time) = results
            .iter()
            .filter_map(|result| result.response.as_ref())
            .fold((0usize, Duration::ZERO), |(requests, time), response| {
                (requests + response.llm_requests, time + response.llm_total_time)
            });

        Self {
            timestamp: Utc::now(),
            test_suite: TEST_SUITE.to_string(),
            total_tests: results.len(),
            passed_tests,
            failed_tests: results.len() - passed_tests,
            average_time: mean(total_time, results.len()),
            total_llm_requests,
            total_llm_time,
            avg_time_per_request: mean(total_llm_time, total_llm_requests),
            results,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.passed_tests as f64 / self.total_tests as f64 * 100.0
        }
    }

    /// Per test case pass/fail counts and mean response time, ordered by case name.
    pub fn case_summaries(&self) -> Vec<CaseSummary> {
        let mut grouped: BTreeMap<&str, Vec<&AgentTestResult>> = BTreeMap::new();
        for result in &self.results {
            grouped
                .entry(result.test_case.name.as_str())
                .or_default()
                .push(result);
        }

        grouped
            .into_iter()
            .map(|(name, results)| {
                let passed = results.iter().filter(|result| result.success).count();
                let total: Duration = results.iter().map(|result| result.response_time).sum();
                CaseSummary {
                    name: name.to_string(),
                    runs: results.len(),
                    passed,
                    failed: results.len() - passed,
                    average_time: mean(total, results.len()),
                }
            })
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &AgentTestResult> {
        self.results.iter().filter(|result| !result.success)
    }

    /// Writes pretty-printed JSON, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BenchError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BenchError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseSummary {
    pub name: String,
    pub runs: usize,
    pub passed: usize,
    pub failed: usize,
    pub average_time: Duration,
}

impl CaseSummary {
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.passed as f64 / self.runs as f64 * 100.0
        }
    }
}

/// `<models>_agent_test_results_<YYYYmmdd_HHMMSS>.json`, with path separators in model names replaced.
pub fn artifact_file_name(models: &[String], timestamp: DateTime<Utc>) -> String {
    let models: Vec<String> = models
        .iter()
        .map(|model| model.replace(['/', '\\', ':'], "_"))
        .collect();
    format!(
        "{}{ARTIFACT_MARKER}{}.json",
        models.join("_"),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

fn mean(total: Duration, count: usize) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => total / count,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}
