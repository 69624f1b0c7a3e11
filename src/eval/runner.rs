//! Fan-out of (test case × model × config) executions and fan-in into one report.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use chrono::Utc;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinSet,
};
use tracing::{info, warn};

use crate::{
    agent_loop::{AgentLoop, ChatSession},
    cart::CartStore,
    eval::{
        matcher::{actual_tool_calls, evaluate},
        report::{AgentReport, AgentTestResult},
        scenario::{TestCase, TestConfig},
    },
    providers::LLMProvider,
    request_log::RequestSink,
};

pub struct TestRunner {
    provider: Arc<dyn LLMProvider>,
    store: Arc<CartStore>,
    models: Vec<String>,
    configs: Vec<TestConfig>,
    max_concurrency: Option<usize>,
    sink: Option<Arc<dyn RequestSink>>,
    sessions: AtomicU64,
}

impl TestRunner {
    pub fn new(provider: Arc<dyn LLMProvider>, models: Vec<String>) -> Self {
        Self {
            provider,
            store: Arc::new(CartStore::new()),
            models,
            configs: vec![TestConfig::default()],
            max_concurrency: None,
            sink: None,
            sessions: AtomicU64::new(0),
        }
    }

    pub fn with_configs(mut self, configs: Vec<TestConfig>) -> Self {
        if !configs.is_empty() {
            self.configs = configs;
        }
        self
    }

    pub fn with_store(mut self, store: Arc<CartStore>) -> Self {
        self.store = store;
        self
    }

    /// Caps simultaneous executions. Unset means one task per unit, all at once.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.map(|limit| limit.max(1));
        self
    }

    pub fn with_request_sink(mut self, sink: Arc<dyn RequestSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<CartStore> {
        &self.store
    }

    pub fn unit_count(&self, cases: &[TestCase]) -> usize {
        cases.len() * self.models.len() * self.configs.len()
    }

    /// Runs every unit concurrently and aggregates the results in completion order.
    ///
    /// A failing unit becomes a failed result and never stops the others. Dropping
    /// the returned future aborts every unit still in flight.
    pub async fn run(&self, cases: &[TestCase]) -> AgentReport {
        let units = self.unit_count(cases);
        info!(
            cases = cases.len(),
            models = self.models.len(),
            units,
            "starting agent test suite"
        );

        let (tx, mut rx) = mpsc::channel::<AgentTestResult>(units.max(1));
        let limiter = self.max_concurrency.map(|limit| Arc::new(Semaphore::new(limit)));
        let mut tasks = JoinSet::new();

        for case in cases {
            for model in &self.models {
                for config in &self.configs {
                    let agent = self.agent_for(model, config);
                    let session_id = self.next_session_id(&case.name);
                    let case = case.clone();
                    let config = config.clone();
                    let limiter = limiter.clone();
                    let tx = tx.clone();

                    tasks.spawn(async move {
                        let _permit = match limiter {
                            Some(limiter) => limiter.acquire_owned().await.ok(),
                            None => None,
                        };
                        let result = run_unit(&agent, case, config, session_id).await;
                        if tx.send(result).await.is_err() {
                            warn!("result channel closed before the unit finished");
                        }
                    });
                }
            }
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(%error, "test unit did not complete");
            }
        }

        let mut results = Vec::with_capacity(units);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }

        let report = AgentReport::from_results(results);
        info!(
            total = report.total_tests,
            passed = report.passed_tests,
            failed = report.failed_tests,
            "agent test suite finished"
        );
        report
    }

    fn agent_for(&self, model: &str, config: &TestConfig) -> AgentLoop {
        let mut agent = AgentLoop::new(Arc::clone(&self.provider), Arc::clone(&self.store), model)
            .with_max_tokens(config.max_tokens);
        if let Some(prompt) = config.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            agent = agent.with_system_prompt(prompt);
        }
        if let Some(sink) = &self.sink {
            agent = agent.with_request_sink(Arc::clone(sink));
        }
        agent
    }

    fn next_session_id(&self, case_name: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let sequence = self.sessions.fetch_add(1, Ordering::Relaxed);
        format!("test_{case_name}_{nanos}_{sequence}")
    }
}

async fn run_unit(
    agent: &AgentLoop,
    case: TestCase,
    config: TestConfig,
    session_id: String,
) -> AgentTestResult {
    info!(test_case = %case.name, model = agent.model(), "running agent test");
    let started = Instant::now();

    if let Some(state) = &case.initial_cart_state {
        agent.store().initialize(&session_id, state);
    }

    let session = ChatSession::new(session_id);
    let outcome = agent.run(&case.prompt, &session, &case.name).await;
    let response_time = started.elapsed();

    match outcome {
        Ok(response) => {
            let verdict = evaluate(&case, &actual_tool_calls(&response.tool_calls));
            AgentTestResult {
                test_case: case,
                model_name: agent.model().to_string(),
                config,
                response: Some(response),
                success: verdict.success,
                matched_path: verdict.matched_path,
                error_message: None,
                timestamp: Utc::now(),
                response_time,
            }
        }
        Err(error) => {
            warn!(test_case = %case.name, model = agent.model(), %error, "agent loop failed");
            AgentTestResult {
                test_case: case,
                model_name: agent.model().to_string(),
                config,
                response: None,
                success: false,
                matched_path: None,
                error_message: Some(error.to_string()),
                timestamp: Utc::now(),
                response_time,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::time::sleep;

    use super::*;
    use crate::{
        cart::{InitialCartItem, InitialCartState},
        eval::scenario::{ExpectedToolCall, ExpectedToolPath},
        functions::{FunctionCall, ToolCall},
        types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole},
        LLMError,
    };

    /// Answers by prompt: a configured tool call on the first turn, text once tool results arrive.
    #[derive(Default)]
    struct PromptProvider {
        calls: HashMap<String, (String, Value)>,
        failing_models: Vec<String>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl PromptProvider {
        fn with_call(mut self, prompt: &str, tool: &str, arguments: Value) -> Self {
            self.calls
                .insert(prompt.to_string(), (tool.to_string(), arguments));
            self
        }
    }

    #[async_trait]
    impl LLMProvider for PromptProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_models.contains(&request.model) {
                return Err(LLMError::Provider("model unavailable".into()));
            }

            let last = request.messages.last().expect("request has messages");
            let message = match (&last.role, last.text().and_then(|p| self.calls.get(p))) {
                (MessageRole::User, Some((tool, arguments))) => ChatMessage::tool_request(vec![
                    ToolCall::new(FunctionCall::new(tool.clone(), arguments.clone())),
                ]),
                _ => ChatMessage::assistant("done"),
            };
            Ok(CompletionResponse {
                message,
                usage: None,
            })
        }

        fn name(&self) -> &'static str {
            "prompt"
        }
    }

    fn cases() -> Vec<TestCase> {
        vec![
            TestCase::new("greeting", "Hello"),
            TestCase::new("add_iphone", "Add an iPhone 15").with_variant(ExpectedToolPath::new(
                "direct",
                [ExpectedToolCall::new("add_to_cart").with_argument("product_name", json!("iPhone 15"))],
            )),
            TestCase::new("view", "Show my cart")
                .with_initial_cart(InitialCartState {
                    items: vec![InitialCartItem {
                        product_name: "Cookbook".into(),
                        quantity: 2,
                    }],
                })
                .with_variant(ExpectedToolPath::new("view", [ExpectedToolCall::new("view_cart")])),
        ]
    }

    fn provider() -> PromptProvider {
        PromptProvider::default()
            .with_call("Add an iPhone 15", "add_to_cart", json!({"product_name": "iPhone 15", "quantity": 1}))
            .with_call("Show my cart", "view_cart", json!({}))
    }

    #[tokio::test]
    async fn runs_every_case_for_every_model() {
        let runner = TestRunner::new(
            Arc::new(provider()),
            vec!["model-a".to_string(), "model-b".to_string()],
        );
        let report = runner.run(&cases()).await;

        assert_eq!(report.total_tests, 6);
        assert_eq!(report.passed_tests, 6);
        assert_eq!(report.total_llm_requests, 2 * (1 + 2 + 2));

        let view = report
            .results
            .iter()
            .find(|r| r.test_case.name == "view" && r.model_name == "model-a")
            .unwrap();
        let cart = view.response.as_ref().unwrap().cart_summary.as_ref().unwrap();
        assert_eq!(cart.item_count, 2);

        let greeting = report
            .results
            .iter()
            .find(|r| r.test_case.name == "greeting")
            .unwrap();
        assert_eq!(greeting.matched_path.as_deref(), Some("no_tools_expected"));
    }

    #[tokio::test]
    async fn failing_model_does_not_abort_the_suite() {
        let mut provider = provider();
        provider.failing_models = vec!["broken".to_string()];
        let runner = TestRunner::new(
            Arc::new(provider),
            vec!["ok".to_string(), "broken".to_string()],
        );
        let report = runner.run(&cases()).await;

        assert_eq!(report.total_tests, 6);
        assert_eq!(report.passed_tests, 3);
        assert_eq!(report.failed_tests, 3);
        for failed in report.failures() {
            assert_eq!(failed.model_name, "broken");
            assert!(failed.response.is_none());
            assert!(failed.error_message.as_deref().unwrap().contains("model unavailable"));
        }
        assert_eq!(report.total_llm_requests, 1 + 2 + 2);
    }

    #[tokio::test]
    async fn concurrency_limit_is_respected() {
        let mut provider = provider();
        provider.delay = Some(Duration::from_millis(20));
        let provider = Arc::new(provider);
        let runner = TestRunner::new(provider.clone(), vec!["m".to_string()])
            .with_configs(vec![TestConfig::default(), TestConfig::default()])
            .with_max_concurrency(Some(2));

        let report = runner.run(&cases()).await;
        assert_eq!(report.total_tests, 6);
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn sessions_are_unique_per_unit() {
        let runner = TestRunner::new(Arc::new(provider()), vec!["m".to_string()])
            .with_configs(vec![TestConfig::default(), TestConfig::default()]);
        let report = runner.run(&cases()[1..2]).await;

        let sessions: Vec<_> = report
            .results
            .iter()
            .map(|r| r.response.as_ref().unwrap().session_id.clone())
            .collect();
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0], sessions[1]);
        for result in &report.results {
            assert_eq!(result.response.as_ref().unwrap().cart_summary.as_ref().unwrap().item_count, 1);
        }
    }

    #[tokio::test]
    async fn view_cart_reports_seeded_cart_totals() {
        let provider = crate::providers::scripted::ScriptedProvider::new(vec![
            crate::providers::scripted::ScriptedReply::tool_call("view_cart", json!({})),
            crate::providers::scripted::ScriptedReply::text("You have 3 items."),
        ]);
        let case = TestCase::new("view_seeded", "What's in my cart?")
            .with_initial_cart(InitialCartState {
                items: vec![
                    InitialCartItem {
                        product_name: "iPhone 15".into(),
                        quantity: 2,
                    },
                    InitialCartItem {
                        product_name: "Wireless Headphones".into(),
                        quantity: 1,
                    },
                ],
            })
            .with_variant(ExpectedToolPath::new("view", [ExpectedToolCall::new("view_cart")]));

        let runner = TestRunner::new(Arc::new(provider), vec!["m".to_string()]);
        let report = runner.run(&[case]).await;

        let result = &report.results[0];
        assert!(result.success);
        assert_eq!(result.matched_path.as_deref(), Some("view"));

        let view = &result.response.as_ref().unwrap().tool_calls[0];
        assert_eq!(view.tool_name, "view_cart");
        assert!(view.success);
        let cart = view.result.as_ref().unwrap();
        assert_eq!(cart["item_count"], json!(3));
        let total = cart["total"].as_f64().unwrap();
        assert!((total - (2.0 * 999.99 + 199.99)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn custom_system_prompt_is_sent() {
        struct Capture(std::sync::Mutex<Vec<String>>);

        #[async_trait]
        impl LLMProvider for Capture {
            async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
                let system = request.messages[0].text().unwrap_or_default().to_string();
                self.0.lock().unwrap().push(system);
                Ok(CompletionResponse {
                    message: ChatMessage::assistant("hi"),
                    usage: None,
                })
            }

            fn name(&self) -> &'static str {
                "capture"
            }
        }

        let capture = Arc::new(Capture(Default::default()));
        let config = TestConfig {
            system_prompt: Some("Be terse.".into()),
            max_tokens: Some(64),
            ..TestConfig::default()
        };
        let runner = TestRunner::new(capture.clone(), vec!["m".to_string()]).with_configs(vec![config]);
        let report = runner.run(&cases()[..1]).await;

        assert!(report.results[0].success);
        assert_eq!(report.results[0].config.max_tokens, Some(64));
        assert_eq!(capture.0.lock().unwrap().as_slice(), ["Be terse.".to_string()]);
    }
}
