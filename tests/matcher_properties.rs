use proptest::prelude::*;
use serde_json::{json, Map, Value};
use toolbench::{
    eval::{matcher::NO_TOOLS_EXPECTED, scenario::ActualToolCall},
    evaluate, ExpectedToolCall, ExpectedToolPath, TestCase,
};

const TOOLS: &[&str] = &[
    "search_products",
    "add_to_cart",
    "remove_from_cart",
    "view_cart",
    "checkout",
];

fn call(name: &str, arguments: Value) -> ActualToolCall {
    ActualToolCall {
        name: name.to_string(),
        arguments: arguments.as_object().cloned().unwrap_or_default(),
    }
}

fn trace() -> impl Strategy<Value = Vec<ActualToolCall>> {
    prop::collection::vec(
        (prop::sample::select(TOOLS), "[a-z]{0,8}")
            .prop_map(|(name, query)| call(name, json!({ "query": query }))),
        0..5,
    )
}

proptest! {
    #[test]
    fn no_variants_pass_only_without_tool_calls(actual in trace()) {
        let case = TestCase::new("chat", "hello");
        let verdict = evaluate(&case, &actual);

        prop_assert_eq!(verdict.success, actual.is_empty());
        if verdict.success {
            prop_assert_eq!(verdict.matched_path.as_deref(), Some(NO_TOOLS_EXPECTED));
        } else {
            prop_assert!(verdict.matched_path.is_none());
        }
    }

    #[test]
    fn name_only_variant_matches_any_arguments(actual in trace()) {
        let path = ExpectedToolPath::new(
            "names",
            actual.iter().map(|call| ExpectedToolCall::new(call.name.clone())),
        );
        let case = TestCase::new("names", "p").with_variant(path);
        let verdict = evaluate(&case, &actual);

        prop_assert!(verdict.success);
        prop_assert_eq!(verdict.matched_path.as_deref(), Some("names"));
    }

    #[test]
    fn evaluation_is_deterministic(actual in trace(), expected in trace()) {
        let path = ExpectedToolPath::new(
            "p",
            expected.iter().map(|call| {
                let mut tool = ExpectedToolCall::new(call.name.clone());
                tool.arguments = call.arguments.clone();
                tool
            }),
        );
        let case = TestCase::new("d", "p").with_variant(path);
        prop_assert_eq!(evaluate(&case, &actual), evaluate(&case, &actual));
    }

    #[test]
    fn extra_and_reordered_keys_do_not_matter(
        query in "[a-zA-Z ]{1,12}",
        extra in "[a-z]{1,6}",
        limit in 1i64..50,
    ) {
        let expected = ExpectedToolCall::new("search_products")
            .with_argument("query", Value::String(query.to_uppercase()))
            .with_argument("limit", json!(limit));

        let mut arguments = Map::new();
        arguments.insert(format!("x_{extra}"), json!(true));
        arguments.insert("limit".to_string(), json!(limit as f64));
        arguments.insert("query".to_string(), Value::String(query.to_lowercase()));

        let case = TestCase::new("search", "p")
            .with_variant(ExpectedToolPath::new("search", [expected]));
        let actual = [ActualToolCall { name: "search_products".into(), arguments }];

        let verdict = evaluate(&case, &actual);
        prop_assert!(verdict.success);
        prop_assert_eq!(verdict.matched_path.as_deref(), Some("search"));
    }

    #[test]
    fn trace_of_different_length_never_matches(actual in trace()) {
        let mut tools: Vec<ExpectedToolCall> = actual
            .iter()
            .map(|call| ExpectedToolCall::new(call.name.clone()))
            .collect();
        tools.push(ExpectedToolCall::new("checkout"));

        let case = TestCase::new("long", "p").with_variant(ExpectedToolPath::new("long", tools));
        prop_assert!(!evaluate(&case, &actual).success);
    }
}
