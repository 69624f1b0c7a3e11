use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),

    #[error("unknown tool: {0}")]
    UnknownFunction(String),

    #[error("invalid function arguments: {0}")]
    InvalidFunctionArguments(String),

    #[error("kernel function execution failed ({function}): {message}")]
    FunctionExecution { function: String, message: String },
}

/// Failures of the harness itself: configuration, artifacts and file I/O.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("test case '{0}' not found in configuration file")]
    TestCaseNotFound(String),

    #[error("no test cases defined in {0}")]
    NoTestCases(PathBuf),

    #[error("no result files found in directory: {0}")]
    NoResultFiles(PathBuf),

    #[error("batch directory does not exist: {0}")]
    MissingDirectory(PathBuf),
}
