pub mod error;
pub mod types;
pub mod functions;
pub mod providers;
pub mod catalog;
pub mod cart;
pub mod plugins;
pub mod executor;
pub mod agent_loop;
pub mod request_log;
pub mod eval;

pub use error::{BenchError, LLMError};
pub use providers::LLMProvider;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage};
pub use functions::{
    DynKernelFunction, FunctionCall, FunctionDefinition, FunctionRegistry, KernelFunction, Tool,
    ToolCall, ToolChoice,
};
pub use cart::{CartStore, CartSummary};
pub use executor::{ToolCallResult, ToolExecutor};
pub use agent_loop::{AgentLoop, ChatResponse, ChatSession};
pub use request_log::{RequestLogger, RequestSink};
pub use eval::{
    analysis::{analyze_batch, BatchAnalysisReport, MetricSet, ModelAnalysis},
    matcher::{evaluate, Verdict},
    report::{AgentReport, AgentTestResult},
    runner::TestRunner,
    scenario::{load_test_cases, ExpectedToolCall, ExpectedToolPath, TestCase, TestConfig},
};
pub use schemars::JsonSchema;
