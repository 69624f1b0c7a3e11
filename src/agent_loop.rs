//! Bounded tool-calling conversation between one model and the shopping tools.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    cart::{CartStore, CartSummary},
    executor::{ToolCallResult, ToolExecutor},
    functions::{ToolCall, ToolChoice},
    plugins::shopping::shopping_registry,
    providers::LLMProvider,
    request_log::{LogEntry, RequestSink},
    types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole},
    LLMError,
};

pub const MAX_ITERATIONS: usize = 5;

pub const MAX_ITERATIONS_MESSAGE: &str =
    "I've reached the maximum number of operations I can perform. Let me know if you need anything else!";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful shopping assistant. You can help users search for products, manage their shopping cart, and complete purchases.

Available tools:
- search_products: Search for products by query, category, or both
- add_to_cart: Add products to the shopping cart
- remove_from_cart: Remove products from the shopping cart
- view_cart: View current cart contents and totals
- checkout: Process checkout for the current cart

Always be helpful and provide clear information about products and cart operations.
If the user asks anything else, politely decline and say you are a shopping assistant.
";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Conversation history replayed ahead of each new prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, role: MessageRole, content: impl Into<String>) {
        let now = Utc::now();
        self.messages.push(SessionMessage {
            role,
            content: content.into(),
            timestamp: now,
        });
        self.updated_at = now;
    }

    fn history(&self) -> impl Iterator<Item = ChatMessage> + '_ {
        self.messages.iter().filter_map(|message| match message.role {
            MessageRole::User => Some(ChatMessage::user(message.content.clone())),
            MessageRole::Assistant => Some(ChatMessage::assistant(message.content.clone())),
            MessageRole::System | MessageRole::Tool => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_summary: Option<CartSummary>,
    pub timestamp: DateTime<Utc>,
    /// Every tool call across all iterations, in emission order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallResult>,
    #[serde(default)]
    pub llm_requests: usize,
    #[serde(default, with = "crate::types::duration_nanos")]
    pub llm_total_time: Duration,
}

enum LoopState {
    AwaitingModel,
    ToolCallsRequested(Vec<ToolCall>),
    Done(String),
}

/// Drives the request/tool-execution cycle for a single prompt.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn LLMProvider>,
    store: Arc<CartStore>,
    model: String,
    system_prompt: String,
    max_iterations: usize,
    max_tokens: Option<u32>,
    sink: Option<Arc<dyn RequestSink>>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        store: Arc<CartStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: MAX_ITERATIONS,
            max_tokens: None,
            sink: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_request_sink(mut self, sink: Arc<dyn RequestSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn store(&self) -> &Arc<CartStore> {
        &self.store
    }

    /// Runs `prompt` to completion. Only a failed model round-trip is an error;
    /// hitting the iteration cap yields [`MAX_ITERATIONS_MESSAGE`].
    pub async fn run(
        &self,
        prompt: &str,
        session: &ChatSession,
        test_case: &str,
    ) -> Result<ChatResponse, LLMError> {
        let session_id = if session.session_id.is_empty() {
            generate_session_id()
        } else {
            session.session_id.clone()
        };

        let executor = ToolExecutor::new(shopping_registry(Arc::clone(&self.store), &session_id));

        let mut messages = Vec::with_capacity(session.messages.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(session.history());
        messages.push(ChatMessage::user(prompt));

        let mut trace: Vec<ToolCallResult> = Vec::new();
        let mut llm_requests = 0usize;
        let mut llm_total_time = Duration::ZERO;
        let mut iteration = 0usize;
        let mut state = LoopState::AwaitingModel;

        let final_message = loop {
            state = match state {
                LoopState::AwaitingModel if iteration >= self.max_iterations => {
                    LoopState::Done(MAX_ITERATIONS_MESSAGE.to_string())
                }
                LoopState::AwaitingModel => {
                    let request = CompletionRequest::new(self.model.clone(), messages.clone())
                        .with_function_registry(executor.registry())
                        .with_tool_choice(ToolChoice::auto())
                        .with_temperature(0.0);
                    let request = match self.max_tokens {
                        Some(max_tokens) => request.with_max_tokens(max_tokens),
                        None => request,
                    };

                    let started = Instant::now();
                    let outcome = self.provider.complete(request.clone()).await;
                    llm_total_time += started.elapsed();
                    llm_requests += 1;

                    self.log_round_trip(test_case, iteration + 1, &request, &outcome);
                    let mut message = outcome?.message;

                    debug!(
                        model = %self.model,
                        test_case,
                        iteration = iteration + 1,
                        tool_calls = message.tool_calls.len(),
                        "model round-trip"
                    );

                    if message.tool_calls.is_empty() {
                        LoopState::Done(message.text().unwrap_or_default().to_string())
                    } else {
                        for (i, call) in message.tool_calls.iter_mut().enumerate() {
                            if call.id.as_deref().map_or(true, str::is_empty) {
                                call.id = Some(format!("call_{iteration}_{i}"));
                            }
                        }
                        let calls = message.tool_calls.clone();
                        messages.push(message);
                        LoopState::ToolCallsRequested(calls)
                    }
                }
                LoopState::ToolCallsRequested(calls) => {
                    let results = executor.execute_all(&calls).await;
                    for result in &results {
                        messages.push(ChatMessage::tool(
                            result.call_id.clone(),
                            result.message_content(),
                        ));
                    }
                    trace.extend(results);
                    iteration += 1;
                    LoopState::AwaitingModel
                }
                LoopState::Done(message) => break message,
            };
        };

        Ok(ChatResponse {
            message: final_message,
            cart_summary: Some(self.store.summary(&session_id)),
            session_id,
            timestamp: Utc::now(),
            tool_calls: trace,
            llm_requests,
            llm_total_time,
        })
    }

    fn log_round_trip(
        &self,
        test_case: &str,
        iteration: usize,
        request: &CompletionRequest,
        outcome: &Result<CompletionResponse, LLMError>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        let url = format!(
            "{}/chat/completions",
            self.provider
                .endpoint()
                .unwrap_or_default()
                .trim_end_matches('/')
        );
        let entry = match outcome {
            Ok(response) => LogEntry::success(test_case, iteration, &url, request, response),
            Err(error) => LogEntry::failure(test_case, iteration, &url, request, error),
        };
        if let Err(error) = sink.record(&entry) {
            warn!(test_case, iteration, %error, "failed to write request log entry");
        }
    }
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default();
    let sequence = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("session_{nanos:016x}{sequence:08x}")
}
