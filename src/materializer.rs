//! Turns a [`RequestTemplate`] plus variables into a concrete request value.
//!
//! Nothing here fails: malformed input degrades to a best-effort value that
//! the executor sends as-is.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::auth;
use crate::auth::BasicCredentials;
use crate::model::BodyKind;
use crate::model::RequestTemplate;
use crate::model::Variables;
use crate::substitution::substitute;

/// JSON body after substitution. `Raw` keeps text that did not parse.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonBody {
    Parsed(Value),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreparedBody {
    Empty,
    Json(JsonBody),
    Form(BTreeMap<String, String>),
    Raw(String),
}

/// Fully resolved, per-execution request. Built fresh for every call so no
/// header or credential outlives the request it was made for.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: PreparedBody,
    pub basic_auth: Option<BasicCredentials>,
    pub timeout: Duration,
}

impl MaterializedRequest {
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|key| key.eq_ignore_ascii_case(name))
    }
}

/// Resolves URL, headers and body, then applies the template's auth.
pub fn materialize(template: &RequestTemplate, variables: &Variables) -> MaterializedRequest {
    let headers = template
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), substitute(value, variables)))
        .collect();

    let mut request = MaterializedRequest {
        method: template.method.clone(),
        url: build_url(&template.url, &template.params, variables),
        headers,
        body: prepare_body(template.body.as_deref(), template.body_kind, variables),
        basic_auth: None,
        timeout: template.timeout,
    };

    auth::apply(&template.auth, variables, &mut request);

    request
}

/// Substitutes the URL and appends `key=value` pairs verbatim. No percent
/// encoding is applied, so stored templates with pre-encoded text keep working.
pub fn build_url(url: &str, params: &BTreeMap<String, String>, variables: &Variables) -> String {
    let mut url = substitute(url, variables);

    if params.is_empty() {
        return url;
    }

    let query = params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                substitute(key, variables),
                substitute(value, variables)
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&query);
    url
}

pub fn prepare_body(body: Option<&str>, kind: BodyKind, variables: &Variables) -> PreparedBody {
    let Some(body) = body.filter(|b| !b.is_empty()) else {
        return PreparedBody::Empty;
    };

    let body = substitute(body, variables);

    match kind {
        BodyKind::Json => match serde_json::from_str::<Value>(&body) {
            Ok(value) => PreparedBody::Json(JsonBody::Parsed(value)),
            Err(err) => {
                debug!(error = %err, "json body did not parse, sending raw text");
                PreparedBody::Json(JsonBody::Raw(body))
            }
        },
        BodyKind::Form => PreparedBody::Form(parse_form(&body)),
        BodyKind::Raw => PreparedBody::Raw(body),
    }
}

/// `key=value` per line; lines without `=` are dropped.
fn parse_form(body: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();

    for line in body.lines() {
        match line.split_once('=') {
            Some((key, value)) => {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
            None if !line.trim().is_empty() => {
                debug!(line, "ignoring form line without `=`");
            }
            None => {}
        }
    }

    fields
}
