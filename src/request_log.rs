//! Append-only JSONL record of every model round-trip.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::BenchError,
    types::{CompletionRequest, CompletionResponse},
    LLMError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub test_case: String,
    pub iteration: usize,
    pub request: LogRequest,
    pub response: LogResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRequest {
    pub method: String,
    pub url: String,
    pub body: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogResponse {
    pub status_code: u16,
    pub body: Value,
}

impl LogEntry {
    pub fn success(
        test_case: &str,
        iteration: usize,
        url: &str,
        request: &CompletionRequest,
        response: &CompletionResponse,
    ) -> Self {
        Self::build(
            test_case,
            iteration,
            url,
            request,
            LogResponse {
                status_code: 200,
                body: to_body(response),
            },
            None,
        )
    }

    /// Status code is 0 because a transport error carries no reliable status.
    pub fn failure(
        test_case: &str,
        iteration: usize,
        url: &str,
        request: &CompletionRequest,
        error: &LLMError,
    ) -> Self {
        Self::build(
            test_case,
            iteration,
            url,
            request,
            LogResponse {
                status_code: 0,
                body: Value::Null,
            },
            Some(error.to_string()),
        )
    }

    fn build(
        test_case: &str,
        iteration: usize,
        url: &str,
        request: &CompletionRequest,
        response: LogResponse,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            test_case: test_case.to_string(),
            iteration,
            request: LogRequest {
                method: "POST".to_string(),
                url: url.to_string(),
                body: to_body(request),
            },
            response,
            error,
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Write-only destination for round-trip records.
pub trait RequestSink: Send + Sync {
    fn record(&self, entry: &LogEntry) -> Result<(), BenchError>;
}

/// Writes one JSON object per line and flushes after each record.
pub struct RequestLogger {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl RequestLogger {
    /// Creates (or truncates) `path`, creating missing parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BenchError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RequestSink for RequestLogger {
    fn record(&self, entry: &LogEntry) -> Result<(), BenchError> {
        let line = serde_json::to_string(entry)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
