use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{cart::InitialCartState, error::BenchError, types::null_as_default};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_cart_state: Option<InitialCartState>,
    /// Acceptable tool sequences. Empty means the model should call no tool.
    #[serde(default, deserialize_with = "null_as_default")]
    pub expected_tools_variants: Vec<ExpectedToolPath>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            initial_cart_state: None,
            expected_tools_variants: Vec::new(),
        }
    }

    pub fn with_variant(mut self, variant: ExpectedToolPath) -> Self {
        self.expected_tools_variants.push(variant);
        self
    }

    pub fn with_initial_cart(mut self, state: InitialCartState) -> Self {
        self.initial_cart_state = Some(state);
        self
    }

    /// Whether any variant calls at least one tool.
    pub fn expects_tools(&self) -> bool {
        self.expected_tools_variants
            .iter()
            .any(|variant| !variant.tools.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedToolPath {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tools: Vec<ExpectedToolCall>,
}

impl ExpectedToolPath {
    pub fn new<I>(name: impl Into<String>, tools: I) -> Self
    where
        I: IntoIterator<Item = ExpectedToolCall>,
    {
        Self {
            name: name.into(),
            description: String::new(),
            tools: tools.into_iter().collect(),
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedToolCall {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub arguments: Map<String, Value>,
}

impl ExpectedToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Per-run model settings recorded alongside each result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Loads a JSON or YAML list of test cases, optionally keeping only the case named `only`.
pub fn load_test_cases(
    path: impl AsRef<Path>,
    only: Option<&str>,
) -> Result<Vec<TestCase>, BenchError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let cases: Vec<TestCase> = if matches!(ext, "yaml" | "yml") {
        serde_yaml::from_slice(&bytes)?
    } else {
        serde_json::from_slice(&bytes)?
    };

    if cases.is_empty() {
        return Err(BenchError::NoTestCases(path.to_path_buf()));
    }

    match only.filter(|name| !name.is_empty()) {
        None => Ok(cases),
        Some(name) => {
            let filtered: Vec<_> = cases.into_iter().filter(|case| case.name == name).collect();
            if filtered.is_empty() {
                Err(BenchError::TestCaseNotFound(name.to_string()))
            } else {
                Ok(filtered)
            }
        }
    }
}
