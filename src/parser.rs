use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::executor::ClientOptions;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Raw shape of a workspace file, before validation.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Assay {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub requests: Vec<Request>,
    #[serde(default)]
    pub tests: Vec<Test>,
    pub suites: Option<Vec<Suite>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub user_agent: Option<String>,
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: default_concurrency(),
            user_agent: None,
            follow_redirects: default_follow_redirects(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn client_options(&self) -> ClientOptions {
        let defaults = ClientOptions::default();
        ClientOptions {
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            follow_redirects: self.follow_redirects,
            max_redirects: self.max_redirects,
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_concurrency() -> usize {
    1
}

fn default_follow_redirects() -> bool {
    true
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

#[derive(Deserialize, Debug, Clone)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    pub variables: Option<BTreeMap<String, toml::Value>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Request {
    pub name: String,
    pub method: String,
    pub url: String,
    pub headers: Option<BTreeMap<String, toml::Value>>,
    pub params: Option<BTreeMap<String, toml::Value>>,
    pub body_type: Option<String>,
    pub body: Option<String>,
    pub timeout_secs: Option<u64>,
    pub auth: Option<Auth>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Auth {
    #[serde(rename = "type")]
    pub kind: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_name: Option<String>,
    pub key_value: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Test {
    pub name: String,
    pub request: String,
    pub enabled: Option<bool>,
    pub script: Option<String>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Assertion {
    #[serde(rename = "type")]
    pub kind: String,
    pub expected: Option<serde_json::Value>,
    pub operator: Option<String>,
    pub header_name: Option<String>,
    pub json_path: Option<String>,
    pub text: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub tests: Option<Vec<String>>,
}

/// Header, param and variable values may be any TOML scalar.
pub fn scalar_to_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}
