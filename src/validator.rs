use std::collections::BTreeMap;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use miette::NamedSource;
use miette::SourceSpan;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::model::AssertionKind;
use crate::model::AssertionSpec;
use crate::model::AuthDescriptor;
use crate::model::BodyKind;
use crate::model::Environment;
use crate::model::Operator;
use crate::model::RequestTemplate;
use crate::model::SuiteDefinition;
use crate::model::TestDefinition;
use crate::model::Variables;
use crate::parser;
use crate::parser::Assay;
use crate::parser::Settings;
use crate::parser::scalar_to_string;

const IMPLICIT_SUITE: &str = "default";

#[derive(Debug, Error, Diagnostic)]
#[error("Invalid field `{field}`: {message}")]
pub struct ValidationError {
    field: String,
    message: String,
    #[source_code]
    src: Option<NamedSource<String>>,
    #[label("invalid value here")]
    span: Option<SourceSpan>,
}

impl ValidationError {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

macro_rules! validation_err {
    ($field:expr, $msg:expr, $self:expr, $span:expr) => {
        ValidationError {
            field: $field.to_string(),
            message: $msg.to_string(),
            src: Some(NamedSource::new(
                $self.file_name.clone(),
                $self.toml_src.clone(),
            )),
            span: $span,
        }
    };
}

/// Everything a run needs, resolved and cross-checked.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub settings: Settings,
    pub environments: Vec<Environment>,
    pub requests: Vec<Arc<RequestTemplate>>,
    pub tests: Vec<TestDefinition>,
    pub suites: Vec<SuiteDefinition>,
}

impl Workspace {
    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }

    pub fn default_environment(&self) -> Option<&Environment> {
        self.environments.iter().find(|env| env.is_default)
    }

    pub fn request(&self, name: &str) -> Option<&Arc<RequestTemplate>> {
        self.requests.iter().find(|request| request.name == name)
    }

    pub fn suite(&self, name: &str) -> Option<&SuiteDefinition> {
        self.suites.iter().find(|suite| suite.name == name)
    }
}

pub struct Validator {
    assay: Assay,
    toml_src: String,
    file_name: String,
}

impl Validator {
    pub fn new(assay: &Assay, toml_src: &str, file_name: &str) -> Self {
        Self {
            assay: assay.clone(),
            toml_src: toml_src.into(),
            file_name: file_name.into(),
        }
    }

    pub fn validate(&self) -> miette::Result<Workspace, ValidationError> {
        let settings = self.validate_settings()?;
        let environments = self.validate_environments()?;
        let requests = self.validate_requests(&settings)?;
        let tests = self.validate_tests(&requests)?;
        let suites = self.validate_suites(&tests)?;

        Ok(Workspace {
            settings,
            environments,
            requests,
            tests,
            suites,
        })
    }

    fn validate_settings(&self) -> Result<Settings, ValidationError> {
        let settings = &self.assay.settings;

        if settings.timeout_secs == 0 {
            return Err(validation_err!(
                "settings.timeout_secs",
                "timeout must be at least one second",
                self,
                find_key_span("timeout_secs", &self.toml_src)
            ));
        }
        if settings.concurrency == 0 {
            return Err(validation_err!(
                "settings.concurrency",
                "concurrency must be at least 1",
                self,
                find_key_span("concurrency", &self.toml_src)
            ));
        }

        Ok(settings.clone())
    }

    fn validate_environments(&self) -> Result<Vec<Environment>, ValidationError> {
        self.check_unique(
            "environments",
            self.assay.environments.iter().map(|e| e.name.as_str()),
        )?;

        let defaults: Vec<_> = self
            .assay
            .environments
            .iter()
            .filter(|env| env.default)
            .collect();
        if let [_, second, ..] = defaults.as_slice() {
            return Err(validation_err!(
                format!("environments.{}.default", second.name),
                "only one environment can be the default",
                self,
                find_span(&second.name, &self.toml_src)
            ));
        }

        self.assay
            .environments
            .iter()
            .map(|env| {
                let variables = self.stringify(
                    &format!("environments.{}.variables", env.name),
                    env.variables.as_ref(),
                )?;
                Ok(Environment {
                    name: env.name.clone(),
                    variables,
                    is_default: env.default,
                })
            })
            .collect()
    }

    fn validate_requests(
        &self,
        settings: &Settings,
    ) -> Result<Vec<Arc<RequestTemplate>>, ValidationError> {
        self.check_unique("requests", self.assay.requests.iter().map(|r| r.name.as_str()))?;

        self.assay
            .requests
            .iter()
            .map(|request| self.create_request(request, settings).map(Arc::new))
            .collect()
    }

    fn create_request(
        &self,
        request: &parser::Request,
        settings: &Settings,
    ) -> Result<RequestTemplate, ValidationError> {
        let method = parse_method(&request.method.to_uppercase()).map_err(|e| {
            validation_err!(
                format!("{} - method", request.name),
                e,
                self,
                find_span(&request.method, &self.toml_src)
            )
        })?;

        let timeout = match request.timeout_secs {
            Some(0) => {
                return Err(validation_err!(
                    format!("requests.{}.timeout_secs", request.name),
                    "timeout must be at least one second",
                    self,
                    find_span(&request.name, &self.toml_src)
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => settings.timeout(),
        };

        let mut template = RequestTemplate::new(&request.name, method, &request.url);
        template.headers = self.stringify(
            &format!("requests.{}.headers", request.name),
            request.headers.as_ref(),
        )?;
        template.params = self.stringify(
            &format!("requests.{}.params", request.name),
            request.params.as_ref(),
        )?;
        template.body = request.body.clone();
        template.body_kind = request
            .body_type
            .as_deref()
            .map(BodyKind::from_name)
            .unwrap_or_default();
        template.auth = request
            .auth
            .as_ref()
            .map(|auth| create_auth(&request.name, auth))
            .unwrap_or_default();
        template.timeout = timeout;

        Ok(template)
    }

    fn validate_tests(
        &self,
        requests: &[Arc<RequestTemplate>],
    ) -> Result<Vec<TestDefinition>, ValidationError> {
        self.check_unique("tests", self.assay.tests.iter().map(|t| t.name.as_str()))?;

        self.assay
            .tests
            .iter()
            .map(|test| {
                let request = requests
                    .iter()
                    .find(|r| r.name == test.request)
                    .ok_or_else(|| {
                        validation_err!(
                            format!("tests.{}.request", test.name),
                            format!("unknown request `{}`", test.request),
                            self,
                            find_span(&test.request, &self.toml_src)
                        )
                    })?;

                let assertions = test
                    .assertions
                    .iter()
                    .map(|assertion| self.create_assertion(&test.name, assertion))
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(TestDefinition {
                    name: test.name.clone(),
                    request: Arc::clone(request),
                    assertions,
                    script: test.script.clone(),
                    enabled: test.enabled.unwrap_or(true),
                })
            })
            .collect()
    }

    fn create_assertion(
        &self,
        test_name: &str,
        assertion: &parser::Assertion,
    ) -> Result<AssertionSpec, ValidationError> {
        let field = format!("tests.{test_name}.assertions");

        let kind = AssertionKind::from_name(&assertion.kind).ok_or_else(|| {
            validation_err!(
                field,
                format!("unknown assertion type `{}`", assertion.kind),
                self,
                find_span(&assertion.kind, &self.toml_src)
            )
        })?;

        match kind {
            AssertionKind::Header if assertion.header_name.is_none() => {
                return Err(validation_err!(
                    field,
                    "a `header` assertion needs `header_name`",
                    self,
                    find_span(&assertion.kind, &self.toml_src)
                ));
            }
            AssertionKind::BodyContains if assertion.text.is_none() => {
                return Err(validation_err!(
                    field,
                    "a `body_contains` assertion needs `text`",
                    self,
                    find_span(&assertion.kind, &self.toml_src)
                ));
            }
            _ => {}
        }

        let operator = match assertion.operator.as_deref() {
            None => Operator::default(),
            Some(name) => Operator::from_name(name).unwrap_or_else(|| {
                warn!(test = test_name, operator = name, "unknown operator, comparing with equals");
                Operator::default()
            }),
        };

        // `body_contains` yields a boolean, so the natural default is `true`.
        let expected = match (&assertion.expected, kind) {
            (Some(expected), _) => expected.clone(),
            (None, AssertionKind::BodyContains) => Value::Bool(true),
            (None, _) => Value::Null,
        };

        Ok(AssertionSpec {
            kind,
            expected,
            operator,
            header_name: assertion.header_name.clone(),
            json_path: assertion.json_path.clone(),
            text: assertion.text.clone(),
            message: assertion.message.clone(),
        })
    }

    fn validate_suites(
        &self,
        tests: &[TestDefinition],
    ) -> Result<Vec<SuiteDefinition>, ValidationError> {
        let Some(suites) = &self.assay.suites else {
            return Ok(vec![SuiteDefinition {
                name: IMPLICIT_SUITE.into(),
                tests: tests.to_vec(),
            }]);
        };

        self.check_unique("suites", suites.iter().map(|s| s.name.as_str()))?;

        suites
            .iter()
            .map(|suite| {
                let Some(names) = &suite.tests else {
                    return Ok(SuiteDefinition {
                        name: suite.name.clone(),
                        tests: tests.to_vec(),
                    });
                };

                let members = names
                    .iter()
                    .map(|name| {
                        tests.iter().find(|t| &t.name == name).cloned().ok_or_else(|| {
                            validation_err!(
                                format!("suites.{}.tests", suite.name),
                                format!("unknown test `{name}`"),
                                self,
                                find_span(name, &self.toml_src)
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(SuiteDefinition {
                    name: suite.name.clone(),
                    tests: members,
                })
            })
            .collect()
    }

    fn check_unique<'a>(
        &self,
        section: &str,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name) {
                return Err(validation_err!(
                    format!("{section}.name"),
                    format!("duplicate name `{name}`"),
                    self,
                    find_last_span(name, &self.toml_src)
                ));
            }
        }
        Ok(())
    }

    fn stringify(
        &self,
        field: &str,
        table: Option<&BTreeMap<String, toml::Value>>,
    ) -> Result<Variables, ValidationError> {
        table
            .into_iter()
            .flatten()
            .map(|(key, value)| {
                scalar_to_string(value)
                    .map(|value| (key.clone(), value))
                    .ok_or_else(|| {
                        validation_err!(
                            format!("{field}.{key}"),
                            "value must be a string, number or boolean",
                            self,
                            find_key_span(key, &self.toml_src)
                        )
                    })
            })
            .collect()
    }
}

fn create_auth(request: &str, auth: &parser::Auth) -> AuthDescriptor {
    let field = |value: &Option<String>| value.clone().unwrap_or_default();

    match auth.kind.as_str() {
        "none" => AuthDescriptor::None,
        "bearer" => AuthDescriptor::Bearer {
            token: field(&auth.token),
        },
        "basic" => AuthDescriptor::Basic {
            username: field(&auth.username),
            password: field(&auth.password),
        },
        "api_key" => AuthDescriptor::ApiKey {
            key_name: field(&auth.key_name),
            key_value: field(&auth.key_value),
        },
        other => {
            warn!(request, auth = other, "unknown auth type, sending without credentials");
            AuthDescriptor::None
        }
    }
}

fn parse_method(method: &str) -> Result<reqwest::Method, String> {
    let method = Method::from_str(method).map_err(|e| e.to_string())?;

    if !matches!(
        method,
        Method::GET
            | Method::POST
            | Method::PUT
            | Method::DELETE
            | Method::PATCH
            | Method::HEAD
            | Method::OPTIONS
    ) {
        return Err(format!("Invalid HTTP method: {}", method));
    }

    Ok(method)
}

fn find_span(needle: &str, toml_src: &str) -> Option<SourceSpan> {
    let pattern = format!("\"{}\"", needle);
    toml_src
        .find(&pattern)
        .map(|start| SourceSpan::new((start + 1).into(), needle.len()))
}

fn find_last_span(needle: &str, toml_src: &str) -> Option<SourceSpan> {
    let pattern = format!("\"{}\"", needle);
    toml_src
        .rfind(&pattern)
        .map(|start| SourceSpan::new((start + 1).into(), needle.len()))
}

fn find_key_span(key: &str, toml_src: &str) -> Option<SourceSpan> {
    toml_src
        .find(key)
        .map(|start| SourceSpan::new(start.into(), key.len()))
}
