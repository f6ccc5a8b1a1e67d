use core::fmt;
use std::cmp::Ordering;
use std::fmt::Display;

use serde_json::Value;
use thiserror::Error;

use crate::model::AssertionKind;
use crate::model::AssertionOutcome;
use crate::model::AssertionSpec;
use crate::model::Evaluation;
use crate::model::Operator;
use crate::model::ResponseEnvelope;
use crate::model::TestDefinition;
use crate::script;

#[derive(Error, Debug, PartialEq)]
pub enum AssertionError {
    #[error("`{0}` assertion is missing `{1}`")]
    MissingField(AssertionKind, &'static str),

    #[error("cannot apply `{operator}` to {actual} and {expected}")]
    Incomparable {
        operator: &'static str,
        actual: String,
        expected: String,
    },
}

/// Runs every assertion plus the optional script stage. Never aborts early:
/// a faulty assertion is recorded as failed and the rest still run.
pub fn evaluate(response: &ResponseEnvelope, test: &TestDefinition) -> Evaluation {
    let assertions: Vec<AssertionOutcome> = test
        .assertions
        .iter()
        .map(|spec| evaluate_assertion(spec, response))
        .collect();

    let script = test
        .script
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(script::check);

    let passed = assertions.iter().all(|a| a.passed) && script.as_ref().is_none_or(|s| s.passed);

    Evaluation {
        passed,
        assertions,
        script,
    }
}

pub fn evaluate_assertion(spec: &AssertionSpec, response: &ResponseEnvelope) -> AssertionOutcome {
    let message = spec.message.clone().unwrap_or_default();

    let outcome = actual_value(spec, response).and_then(|actual| {
        compare(&actual, &spec.expected, spec.operator).map(|passed| (actual, passed))
    });

    match outcome {
        Ok((actual, passed)) => AssertionOutcome {
            kind: spec.kind,
            expected: spec.expected.clone(),
            actual,
            passed,
            message,
        },
        Err(err) => AssertionOutcome {
            kind: spec.kind,
            expected: spec.expected.clone(),
            actual: actual_value(spec, response).unwrap_or(Value::Null),
            passed: false,
            message: format!("Assertion error: {err}"),
        },
    }
}

fn actual_value(
    spec: &AssertionSpec,
    response: &ResponseEnvelope,
) -> Result<Value, AssertionError> {
    let actual = match spec.kind {
        AssertionKind::StatusCode => response.status_code.map_or(Value::Null, Value::from),
        AssertionKind::ResponseTime => Value::from(response.elapsed_ms),
        AssertionKind::Header => {
            let name = spec
                .header_name
                .as_deref()
                .ok_or(AssertionError::MissingField(spec.kind, "header_name"))?;
            response.header(name).map_or(Value::Null, Value::from)
        }
        AssertionKind::BodyContains => {
            let text = spec
                .text
                .as_deref()
                .ok_or(AssertionError::MissingField(spec.kind, "text"))?;
            Value::Bool(response.body.contains(text))
        }
        AssertionKind::BodyJson => match serde_json::from_str::<Value>(&response.body) {
            Ok(document) => json_path(&document, spec.json_path.as_deref().unwrap_or_default())
                .cloned()
                .unwrap_or(Value::Null),
            Err(_) => Value::Null,
        },
    };

    Ok(actual)
}

/// Dot-separated lookup. Numeric segments index into arrays; anything that
/// does not resolve yields `None`. An empty path is the whole document.
pub fn json_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(document);
    }

    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) if is_index(segment) => {
            segment.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        _ => None,
    })
}

fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

pub fn compare(
    actual: &Value,
    expected: &Value,
    operator: Operator,
) -> Result<bool, AssertionError> {
    let result = match operator {
        Operator::Equals => values_equal(actual, expected),
        Operator::NotEquals => !values_equal(actual, expected),
        Operator::Contains => render(actual).contains(&render(expected)),
        Operator::NotContains => !render(actual).contains(&render(expected)),
        Operator::GreaterThan => order(actual, expected, operator)? == Ordering::Greater,
        Operator::LessThan => order(actual, expected, operator)? == Ordering::Less,
        Operator::GreaterThanOrEqual => order(actual, expected, operator)? != Ordering::Less,
        Operator::LessThanOrEqual => order(actual, expected, operator)? != Ordering::Greater,
    };

    Ok(result)
}

/// JSON equality, except numbers compare by value so `200 == 200.0`.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}

fn order(actual: &Value, expected: &Value, operator: Operator) -> Result<Ordering, AssertionError> {
    let ordering = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    ordering.ok_or_else(|| AssertionError::Incomparable {
        operator: operator.as_str(),
        actual: actual.to_string(),
        expected: expected.to_string(),
    })
}

/// Strings render bare, everything else as JSON text (`null`, `true`).
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertionKind::StatusCode => write!(f, "status_code"),
            AssertionKind::ResponseTime => write!(f, "response_time"),
            AssertionKind::Header => write!(f, "header"),
            AssertionKind::BodyContains => write!(f, "body_contains"),
            AssertionKind::BodyJson => write!(f, "body_json"),
        }
    }
}

impl Display for AssertionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed {
            return write!(
                f,
                "{} {} {} = {}",
                console::style("✔").green().bold(),
                console::style("PASS!").green().bold(),
                self.kind,
                self.actual
            );
        }

        writeln!(
            f,
            "{} {} {}",
            console::style("✘").red().bold(),
            console::style("FAIL!").red().bold(),
            console::style(self.kind).yellow().bold(),
        )?;
        writeln!(
            f,
            "  {} {}",
            console::style("Expected:").green(),
            console::style(&self.expected).green()
        )?;
        write!(
            f,
            "  {} {}",
            console::style("Actual:  ").red(),
            console::style(&self.actual).red()
        )?;
        if !self.message.is_empty() {
            write!(f, "\n  {}", console::style(&self.message).dim())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::model::RequestTemplate;

    fn response(status: u16, body: &str) -> ResponseEnvelope {
        ResponseEnvelope {
            status_code: Some(status),
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: body.into(),
            elapsed_ms: 120.0,
            error: None,
        }
    }

    fn test_with(assertions: Vec<AssertionSpec>, script: Option<&str>) -> TestDefinition {
        let request = Arc::new(RequestTemplate::new("r", Method::GET, "http://h/"));
        let mut test = TestDefinition::new("t", request);
        test.assertions = assertions;
        test.script = script.map(str::to_string);
        test
    }

    #[test]
    fn operator_table() {
        let cases = [
            (json!(200), json!(200), Operator::Equals, true),
            (json!(200), json!(200.0), Operator::Equals, true),
            (json!(200), json!("200"), Operator::Equals, false),
            (json!(404), json!(200), Operator::NotEquals, true),
            (json!("hello world"), json!("wor"), Operator::Contains, true),
            (json!("hello world"), json!("xyz"), Operator::NotContains, true),
            (json!([1, 2, 3]), json!(2), Operator::Contains, true),
            (json!(5), json!(3), Operator::GreaterThan, true),
            (json!(3), json!(5), Operator::LessThan, true),
            (json!(5), json!(5), Operator::GreaterThanOrEqual, true),
            (json!(4.5), json!(5), Operator::LessThanOrEqual, true),
            (json!("b"), json!("a"), Operator::GreaterThan, true),
            (json!(5), json!(3), Operator::LessThan, false),
        ];

        for (actual, expected, operator, want) in cases {
            assert_eq!(
                compare(&actual, &expected, operator),
                Ok(want),
                "{actual} {operator:?} {expected}"
            );
        }
    }

    #[test]
    fn contains_matches_against_json_text() {
        assert_eq!(compare(&Value::Null, &json!("null"), Operator::Contains), Ok(true));
        assert_eq!(compare(&json!(true), &json!("true"), Operator::Contains), Ok(true));
        assert_eq!(compare(&json!(true), &json!("True"), Operator::Contains), Ok(false));
        assert_eq!(
            compare(&json!({"id": 7}), &json!("\"id\":7"), Operator::Contains),
            Ok(true)
        );
    }

    #[test]
    fn ordering_incompatible_types_is_an_error() {
        let err = compare(&Value::Null, &json!(3), Operator::GreaterThan).unwrap_err();

        assert_eq!(
            err,
            AssertionError::Incomparable {
                operator: "greater_than",
                actual: "null".into(),
                expected: "3".into(),
            }
        );
    }

    #[test]
    fn json_path_walks_objects_and_arrays() {
        let doc = json!({"data": {"users": [{"id": 1}, {"id": 2, "tags": ["a"]}]}});

        assert_eq!(json_path(&doc, "data.users.1.id"), Some(&json!(2)));
        assert_eq!(json_path(&doc, "data.users.1.tags.0"), Some(&json!("a")));
        assert_eq!(json_path(&doc, ""), Some(&doc));
        assert_eq!(json_path(&doc, "data.users.7"), None);
        assert_eq!(json_path(&doc, "data.users.first"), None);
        assert_eq!(json_path(&doc, "data.missing.id"), None);
    }

    #[test]
    fn derives_actual_per_kind() {
        let resp = response(201, r#"{"user": {"name": "ada"}}"#);

        let status = evaluate_assertion(
            &AssertionSpec::new(AssertionKind::StatusCode, 201, Operator::Equals),
            &resp,
        );
        assert!(status.passed);
        assert_eq!(status.actual, json!(201));

        let time = evaluate_assertion(
            &AssertionSpec::new(AssertionKind::ResponseTime, 500, Operator::LessThan),
            &resp,
        );
        assert!(time.passed);

        let header = evaluate_assertion(
            &AssertionSpec::new(AssertionKind::Header, "json", Operator::Contains)
                .with_header_name("Content-Type"),
            &resp,
        );
        assert!(header.passed);
        assert_eq!(header.actual, json!("application/json"));

        let contains = evaluate_assertion(
            &AssertionSpec::new(AssertionKind::BodyContains, true, Operator::Equals)
                .with_text("ada"),
            &resp,
        );
        assert!(contains.passed);

        let body = evaluate_assertion(
            &AssertionSpec::new(AssertionKind::BodyJson, "ada", Operator::Equals)
                .with_json_path("user.name"),
            &resp,
        );
        assert!(body.passed);
    }

    #[test]
    fn missing_header_and_bad_json_are_null() {
        let resp = response(200, "not json");

        let header = evaluate_assertion(
            &AssertionSpec::new(AssertionKind::Header, Value::Null, Operator::Equals)
                .with_header_name("x-missing"),
            &resp,
        );
        assert!(header.passed);
        assert_eq!(header.actual, Value::Null);

        let body = evaluate_assertion(
            &AssertionSpec::new(AssertionKind::BodyJson, 1, Operator::Equals)
                .with_json_path("a"),
            &resp,
        );
        assert!(!body.passed);
        assert_eq!(body.actual, Value::Null);
    }

    #[test]
    fn faulty_assertion_fails_without_aborting_batch() {
        let test = test_with(
            vec![
                AssertionSpec::new(AssertionKind::ResponseTime, "fast", Operator::LessThan),
                AssertionSpec::new(AssertionKind::BodyContains, true, Operator::Equals),
                AssertionSpec::new(AssertionKind::StatusCode, 200, Operator::Equals)
                    .with_message("status ok"),
            ],
            None,
        );

        let evaluation = evaluate(&response(200, "{}"), &test);

        assert!(!evaluation.passed);
        assert_eq!(evaluation.assertions.len(), 3);
        assert!(
            evaluation.assertions[0]
                .message
                .starts_with("Assertion error: cannot apply `less_than`")
        );
        assert_eq!(
            evaluation.assertions[1].message,
            "Assertion error: `body_contains` assertion is missing `text`"
        );
        assert!(evaluation.assertions[2].passed);
        assert_eq!(evaluation.assertions[2].message, "status ok");
    }

    #[test]
    fn script_stage_participates_in_verdict() {
        let status = AssertionSpec::new(AssertionKind::StatusCode, 200, Operator::Equals);

        let accepted = evaluate(
            &response(200, ""),
            &test_with(vec![status.clone()], Some("pm.test('x', () => pm.response)")),
        );
        assert!(accepted.passed);
        assert!(accepted.script.is_some());

        let rejected = evaluate(
            &response(200, ""),
            &test_with(vec![status.clone()], Some("expect(200)")),
        );
        assert!(!rejected.passed);

        let empty = evaluate(&response(200, ""), &test_with(vec![status.clone()], Some("")));
        assert!(empty.passed);
        assert!(empty.script.is_none());
    }

    #[test]
    fn whitespace_script_is_rejected() {
        let status = AssertionSpec::new(AssertionKind::StatusCode, 200, Operator::Equals);

        let evaluation = evaluate(&response(200, ""), &test_with(vec![status], Some("  \n")));

        assert!(!evaluation.passed);
        let script = evaluation.script.unwrap();
        assert_eq!(script.message, "Invalid test script format");
        assert!(!script.executed);
    }

    #[test]
    fn no_assertions_passes() {
        let evaluation = evaluate(&response(500, ""), &test_with(vec![], None));

        assert!(evaluation.passed);
        assert!(evaluation.assertions.is_empty());
    }
}
