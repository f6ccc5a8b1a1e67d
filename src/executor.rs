use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::materializer::JsonBody;
use crate::materializer::MaterializedRequest;
use crate::materializer::PreparedBody;
use crate::model::ResponseEnvelope;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("invalid header name `{0}`")]
    InvalidHeaderName(String),

    #[error("invalid value for header `{0}`")]
    InvalidHeaderValue(String),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Issues one materialized request. Implementations never fail: every problem
/// is reported through [`ResponseEnvelope::error`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &MaterializedRequest) -> ResponseEnvelope;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    pub follow_redirects: bool,
    pub max_redirects: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: concat!("assay/", env!("CARGO_PKG_VERSION")).into(),
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

/// reqwest-backed transport. The client only holds connection pools; headers,
/// credentials and timeouts are attached per request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(options: &ClientOptions) -> Result<Self, ExecutorError> {
        let redirect = if options.follow_redirects {
            Policy::limited(options.max_redirects)
        } else {
            Policy::none()
        };

        let client = Client::builder()
            .user_agent(options.user_agent.as_str())
            .redirect(redirect)
            .build()
            .map_err(ExecutorError::ClientBuild)?;

        Ok(Self { client })
    }

    fn build(&self, request: &MaterializedRequest) -> Result<RequestBuilder, ExecutorError> {
        let mut headers = build_headers(&request.headers)?;

        if request.basic_auth.is_some() {
            headers.remove(AUTHORIZATION);
        }
        if matches!(request.body, PreparedBody::Json(JsonBody::Raw(_)))
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .headers(headers);

        if request.timeout > Duration::ZERO {
            builder = builder.timeout(request.timeout);
        }

        if let Some(credentials) = &request.basic_auth {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        builder = match &request.body {
            PreparedBody::Empty => builder,
            PreparedBody::Json(JsonBody::Parsed(value)) => builder.json(value),
            PreparedBody::Json(JsonBody::Raw(text)) | PreparedBody::Raw(text) => {
                builder.body(text.clone())
            }
            PreparedBody::Form(fields) => builder.form(fields),
        };

        Ok(builder)
    }

    async fn try_send(&self, request: &MaterializedRequest) -> Result<Captured, ExecutorError> {
        let response = self.build(request)?.send().await?;
        Ok(Captured::from_response(response).await?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &MaterializedRequest) -> ResponseEnvelope {
        let started = Instant::now();
        let result = self.try_send(request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(captured) => {
                debug!(status = captured.status, elapsed_ms, "response received");
                ResponseEnvelope {
                    status_code: Some(captured.status),
                    headers: captured.headers,
                    body: captured.body,
                    elapsed_ms,
                    error: None,
                }
            }
            Err(err) => {
                warn!(error = %err, elapsed_ms, "request failed");
                ResponseEnvelope::failed(describe(&err), elapsed_ms)
            }
        }
    }
}

struct Captured {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
}

impl Captured {
    async fn from_response(resp: Response) -> Result<Self, reqwest::Error> {
        let status = resp.status().as_u16();
        let headers = flatten_headers(resp.headers());
        let body = resp.text().await?;

        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

pub fn build_headers(input: &BTreeMap<String, String>) -> Result<HeaderMap, ExecutorError> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ExecutorError::InvalidHeaderName(key.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ExecutorError::InvalidHeaderValue(key.clone()))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Repeated headers are joined with `, `.
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();

    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }

    flat
}

/// reqwest's top-level message hides the root cause, so walk the source chain.
fn describe(err: &ExecutorError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }

    message
}
