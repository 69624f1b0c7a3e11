//! Pass/fail decision for a tool-call trace against a test case's expected variants.

use serde_json::{Map, Value};

use crate::{
    eval::scenario::{ActualToolCall, ExpectedToolCall, ExpectedToolPath, TestCase},
    executor::ToolCallResult,
    functions::parse_arguments,
};

/// Path name recorded when a case expects no tool calls and none were made.
pub const NO_TOOLS_EXPECTED: &str = "no_tools_expected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub success: bool,
    pub matched_path: Option<String>,
}

impl Verdict {
    fn pass(path: impl Into<String>) -> Self {
        Self {
            success: true,
            matched_path: Some(path.into()),
        }
    }

    fn fail() -> Self {
        Self {
            success: false,
            matched_path: None,
        }
    }
}

/// Rebuilds the trace the matcher compares, parsing each call's raw argument string.
pub fn actual_tool_calls(results: &[ToolCallResult]) -> Vec<ActualToolCall> {
    results
        .iter()
        .map(|result| ActualToolCall {
            name: result.tool_name.clone(),
            arguments: parse_arguments(&result.arguments),
        })
        .collect()
}

/// The first variant (declaration order) that the trace matches exactly.
pub fn evaluate(case: &TestCase, actual: &[ActualToolCall]) -> Verdict {
    if case.expected_tools_variants.is_empty() {
        return if actual.is_empty() {
            Verdict::pass(NO_TOOLS_EXPECTED)
        } else {
            Verdict::fail()
        };
    }

    case.expected_tools_variants
        .iter()
        .find(|variant| path_matches(variant, actual))
        .map(|variant| Verdict::pass(variant.name.clone()))
        .unwrap_or_else(Verdict::fail)
}

/// Same length, and every position matches.
pub fn path_matches(path: &ExpectedToolPath, actual: &[ActualToolCall]) -> bool {
    path.tools.len() == actual.len()
        && path
            .tools
            .iter()
            .zip(actual)
            .all(|(expected, actual)| call_matches(expected, actual))
}

/// Names equal and every expected argument present with an equal value; extra actual keys are ignored.
pub fn call_matches(expected: &ExpectedToolCall, actual: &ActualToolCall) -> bool {
    expected.name == actual.name && arguments_match(&expected.arguments, &actual.arguments)
}

fn arguments_match(expected: &Map<String, Value>, actual: &Map<String, Value>) -> bool {
    expected.iter().all(|(key, expected_value)| {
        actual
            .get(key)
            .is_some_and(|actual_value| values_equal(expected_value, actual_value))
    })
}

fn values_equal(expected: &Value, actual: &Value) -> bool {
    plain_string(expected).to_lowercase() == plain_string(actual).to_lowercase()
}

/// Renders a value the way a loosely typed caller would print it: strings unquoted,
/// integral numbers without a fraction, so `1`, `1.0` and `"1"` compare equal.
pub fn plain_string(value: &Value) -> String {
    match value {
        Value::Null => "<nil>".to_string(),
        Value::String(text) => text.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() && float.fract() == 0.0 && float.abs() < 1e15 => {
                format!("{}", float as i64)
            }
            _ => number.to_string(),
        },
        Value::Array(items) => {
            let parts: Vec<_> = items.iter().map(plain_string).collect();
            format!("[{}]", parts.join(" "))
        }
        Value::Object(map) => {
            let parts: Vec<_> = map
                .iter()
                .map(|(key, value)| format!("{key}:{}", plain_string(value)))
                .collect();
            format!("map[{}]", parts.join(" "))
        }
        Value::Bool(flag) => flag.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn actual(name: &str, arguments: Value) -> ActualToolCall {
        ActualToolCall {
            name: name.to_string(),
            arguments: arguments.as_object().cloned().unwrap_or_default(),
        }
    }

    fn add_iphone_case() -> TestCase {
        TestCase::new("add_iphone", "Add an iPhone 15").with_variant(ExpectedToolPath::new(
            "direct_add",
            [ExpectedToolCall::new("add_to_cart")
                .with_argument("product_name", json!("iPhone 15"))
                .with_argument("quantity", json!(1))],
        ))
    }

    #[test]
    fn no_variants_passes_only_without_tool_calls() {
        let case = TestCase::new("greeting", "Hello");
        assert_eq!(
            evaluate(&case, &[]),
            Verdict {
                success: true,
                matched_path: Some(NO_TOOLS_EXPECTED.to_string())
            }
        );
        assert_eq!(evaluate(&case, &[actual("view_cart", json!({}))]), Verdict::fail());
    }

    #[test]
    fn exact_call_matches_variant() {
        let verdict = evaluate(
            &add_iphone_case(),
            &[actual("add_to_cart", json!({"product_name": "iPhone 15", "quantity": 1}))],
        );
        assert!(verdict.success);
        assert_eq!(verdict.matched_path.as_deref(), Some("direct_add"));
    }

    #[test]
    fn extra_leading_call_fails() {
        let verdict = evaluate(
            &add_iphone_case(),
            &[
                actual("search_products", json!({"query": "iPhone"})),
                actual("add_to_cart", json!({"product_name": "iPhone 15", "quantity": 1})),
            ],
        );
        assert_eq!(verdict, Verdict::fail());
    }

    #[test]
    fn comparison_is_case_insensitive_and_type_loose() {
        let case = add_iphone_case();
        assert!(evaluate(&case, &[actual("add_to_cart", json!({"product_name": "IPHONE 15", "quantity": "1"}))]).success);
        assert!(evaluate(&case, &[actual("add_to_cart", json!({"product_name": "iphone 15", "quantity": 1.0}))]).success);
        assert!(!evaluate(&case, &[actual("add_to_cart", json!({"product_name": "iPhone 15", "quantity": 2}))]).success);
        assert!(!evaluate(&case, &[actual("add_to_cart", json!({"product_name": "iPhone 15"}))]).success);
    }

    #[test]
    fn extra_argument_keys_are_ignored() {
        let verdict = evaluate(
            &add_iphone_case(),
            &[actual(
                "add_to_cart",
                json!({"quantity": 1, "product_name": "iPhone 15", "note": "gift"}),
            )],
        );
        assert!(verdict.success);
    }

    #[test]
    fn first_matching_variant_wins() {
        let case = TestCase::new("view", "What's in my cart?")
            .with_variant(ExpectedToolPath::new("strict", [ExpectedToolCall::new("view_cart")
                .with_argument("verbose", json!(true))]))
            .with_variant(ExpectedToolPath::new("plain", [ExpectedToolCall::new("view_cart")]))
            .with_variant(ExpectedToolPath::new("also_plain", [ExpectedToolCall::new("view_cart")]));

        let verdict = evaluate(&case, &[actual("view_cart", json!({}))]);
        assert_eq!(verdict.matched_path.as_deref(), Some("plain"));
    }

    #[test]
    fn order_within_trace_matters() {
        let case = TestCase::new("swap", "Swap").with_variant(ExpectedToolPath::new(
            "remove_then_add",
            [ExpectedToolCall::new("remove_from_cart"), ExpectedToolCall::new("add_to_cart")],
        ));
        let trace = [actual("add_to_cart", json!({})), actual("remove_from_cart", json!({}))];
        assert!(!evaluate(&case, &trace).success);
    }

    #[test]
    fn malformed_arguments_never_match_expected_keys() {
        let result = ToolCallResult {
            call_id: "call_0_0".into(),
            tool_name: "add_to_cart".into(),
            success: false,
            result: None,
            error: Some("Invalid arguments".into()),
            arguments: "{\"product_name\":".into(),
            schema_errors: Vec::new(),
        };
        let trace = actual_tool_calls(&[result]);
        assert!(trace[0].arguments.contains_key(crate::functions::RAW_ARGUMENTS_KEY));
        assert!(!evaluate(&add_iphone_case(), &trace).success);
    }

    #[test]
    fn plain_string_matches_loose_printing() {
        assert_eq!(plain_string(&json!("iPhone 15")), "iPhone 15");
        assert_eq!(plain_string(&json!(2.0)), "2");
        assert_eq!(plain_string(&json!(2.5)), "2.5");
        assert_eq!(plain_string(&json!(true)), "true");
        assert_eq!(plain_string(&Value::Null), "<nil>");
    }
}
