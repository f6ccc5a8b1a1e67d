use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Flat `{{key}}` -> value mapping used for templating.
pub type Variables = BTreeMap<String, String>;

pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub variables: Variables,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    #[default]
    Json,
    Form,
    Raw,
}

impl BodyKind {
    /// Anything that is not `json` or `form` is opaque text.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "json" => BodyKind::Json,
            "form" => BodyKind::Form,
            _ => BodyKind::Raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthDescriptor {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        key_name: String,
        key_value: String,
    },
}

/// Stored, parameterized description of an HTTP call. Every string field may
/// carry `{{placeholders}}`.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub name: String,
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub body: Option<String>,
    pub body_kind: BodyKind,
    pub auth: AuthDescriptor,
    pub timeout: Duration,
}

impl RequestTemplate {
    pub fn new(name: &str, method: Method, url: &str) -> Self {
        Self {
            name: name.into(),
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            body_kind: BodyKind::default(),
            auth: AuthDescriptor::None,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    StatusCode,
    ResponseTime,
    Header,
    BodyContains,
    BodyJson,
}

impl AssertionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "status_code" => Some(AssertionKind::StatusCode),
            "response_time" => Some(AssertionKind::ResponseTime),
            "header" => Some(AssertionKind::Header),
            "body_contains" => Some(AssertionKind::BodyContains),
            "body_json" => Some(AssertionKind::BodyJson),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "equals" => Some(Operator::Equals),
            "not_equals" => Some(Operator::NotEquals),
            "contains" => Some(Operator::Contains),
            "not_contains" => Some(Operator::NotContains),
            "greater_than" => Some(Operator::GreaterThan),
            "less_than" => Some(Operator::LessThan),
            "greater_than_or_equal" => Some(Operator::GreaterThanOrEqual),
            "less_than_or_equal" => Some(Operator::LessThanOrEqual),
            _ => None,
        }
    }

    /// Unknown operator names compare for equality.
    pub fn from_name_lenient(name: &str) -> Self {
        Self::from_name(name).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::GreaterThanOrEqual => "greater_than_or_equal",
            Operator::LessThanOrEqual => "less_than_or_equal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertionSpec {
    pub kind: AssertionKind,
    pub expected: Value,
    pub operator: Operator,
    pub header_name: Option<String>,
    pub json_path: Option<String>,
    pub text: Option<String>,
    pub message: Option<String>,
}

impl AssertionSpec {
    pub fn new(kind: AssertionKind, expected: impl Into<Value>, operator: Operator) -> Self {
        Self {
            kind,
            expected: expected.into(),
            operator,
            header_name: None,
            json_path: None,
            text: None,
            message: None,
        }
    }

    pub fn with_header_name(mut self, name: &str) -> Self {
        self.header_name = Some(name.into());
        self
    }

    pub fn with_json_path(mut self, path: &str) -> Self {
        self.json_path = Some(path.into());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct TestDefinition {
    pub name: String,
    pub request: Arc<RequestTemplate>,
    pub assertions: Vec<AssertionSpec>,
    pub script: Option<String>,
    pub enabled: bool,
}

impl TestDefinition {
    pub fn new(name: &str, request: Arc<RequestTemplate>) -> Self {
        Self {
            name: name.into(),
            request,
            assertions: Vec::new(),
            script: None,
            enabled: true,
        }
    }

    pub fn with_assertion(mut self, assertion: AssertionSpec) -> Self {
        self.assertions.push(assertion);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SuiteDefinition {
    pub name: String,
    pub tests: Vec<TestDefinition>,
}

impl SuiteDefinition {
    pub fn enabled_tests(&self) -> impl Iterator<Item = &TestDefinition> {
        self.tests.iter().filter(|test| test.enabled)
    }
}

/// Uniform outcome of one HTTP call. A transport failure is carried in
/// `error` with `status_code` unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status_code: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub elapsed_ms: f64,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn failed(error: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            status_code: None,
            headers: BTreeMap::new(),
            body: String::new(),
            elapsed_ms,
            error: Some(error.into()),
        }
    }

    /// Header lookup ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    #[serde(rename = "type")]
    pub kind: AssertionKind,
    pub expected: Value,
    pub actual: Value,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub passed: bool,
    pub executed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub passed: bool,
    pub assertions: Vec<AssertionOutcome>,
    pub script: Option<ScriptOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Passed,
    Failed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: Uuid,
    pub test_name: String,
    pub request_name: String,
    pub method: String,
    pub environment: Option<String>,
    pub status: ExecutionStatus,
    pub response: Option<ResponseEnvelope>,
    pub error_message: Option<String>,
    pub evaluation: Option<Evaluation>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn start(test: &TestDefinition, environment: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_name: test.name.clone(),
            request_name: test.request.name.clone(),
            method: test.request.method.to_string(),
            environment: environment.map(str::to_string),
            status: ExecutionStatus::Running,
            response: None,
            error_message: None,
            evaluation: None,
            executed_at: Utc::now(),
        }
    }

    /// Consumes the running record and produces its terminal form. A response
    /// carrying a transport error yields `Error` regardless of `evaluation`.
    pub fn finalize(self, response: ResponseEnvelope, evaluation: Option<Evaluation>) -> Self {
        let (status, error_message, evaluation) = match &response.error {
            Some(error) => (ExecutionStatus::Error, Some(error.clone()), None),
            None => {
                let passed = evaluation.as_ref().is_none_or(|e| e.passed);
                let status = if passed {
                    ExecutionStatus::Passed
                } else {
                    ExecutionStatus::Failed
                };
                (status, None, evaluation)
            }
        };

        Self {
            status,
            response: Some(response),
            error_message,
            evaluation,
            ..self
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    pub fn counts_as_failure(&self) -> bool {
        matches!(self.status, ExecutionStatus::Failed | ExecutionStatus::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub id: Uuid,
    pub suite_name: String,
    pub environment: Option<String>,
    pub status: SuiteStatus,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub total_time_ms: f64,
    pub results: Vec<ExecutionResult>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SuiteResult {
    pub fn start(suite: &SuiteDefinition, environment: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            suite_name: suite.name.clone(),
            environment: environment.map(str::to_string),
            status: SuiteStatus::Running,
            total_tests: 0,
            passed_tests: 0,
            failed_tests: 0,
            total_time_ms: 0.0,
            results: Vec::new(),
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Terminal transition. Counts are reduced from `results`; a `fault`
    /// forces `Failed` even when every finished test passed.
    pub fn finish(
        self,
        results: Vec<ExecutionResult>,
        total_time_ms: f64,
        fault: Option<String>,
    ) -> Self {
        let passed_tests = results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Passed)
            .count();
        let failed_tests = results.iter().filter(|r| r.counts_as_failure()).count();

        let status = if fault.is_none() && failed_tests == 0 {
            SuiteStatus::Completed
        } else {
            SuiteStatus::Failed
        };

        Self {
            status,
            total_tests: results.len(),
            passed_tests,
            failed_tests,
            total_time_ms,
            results,
            error: fault,
            completed_at: Some(Utc::now()),
            ..self
        }
    }
}
