//! Client configuration: REST defaults, per-call overrides and GraphQL settings.
//!
//! `ClientDefaults` and `GraphQlSettings` deserialize from JSON with every
//! field optional, or from `FINANCE_API_*` environment variables. Durations
//! are given in milliseconds. Callbacks are not part of this surface; they
//! are attached through `GraphQlClientBuilder`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::http::{set_header, HttpMethod, APPLICATION_JSON, CONTENT_TYPE};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_ORIGIN: &str = "http://localhost";
pub const DEFAULT_GRAPHQL_RETRY_ATTEMPTS: u32 = 3;

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([(CONTENT_TYPE.to_string(), APPLICATION_JSON.to_string())])
}

/// Client-level defaults for every REST call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientDefaults {
    pub headers: BTreeMap<String, String>,

    #[serde(rename = "timeout_ms", deserialize_with = "millis")]
    pub timeout: Duration,

    pub retries: u32,

    #[serde(rename = "retry_delay_ms", deserialize_with = "millis")]
    pub retry_delay: Duration,

    /// Origin that relative base URLs are resolved against.
    pub origin: String,
}

impl Default for ClientDefaults {
    fn default() -> Self {
        Self {
            headers: default_headers(),
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            origin: DEFAULT_ORIGIN.to_string(),
        }
    }
}

impl ClientDefaults {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read overrides from `FINANCE_API_TIMEOUT_MS`, `FINANCE_API_RETRIES`,
    /// `FINANCE_API_RETRY_DELAY_MS` and `FINANCE_API_ORIGIN`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut defaults = Self::default();
        if let Some(ms) = parse_var(&lookup, "FINANCE_API_TIMEOUT_MS")? {
            defaults.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var(&lookup, "FINANCE_API_RETRIES")? {
            defaults.retries = retries;
        }
        if let Some(ms) = parse_var(&lookup, "FINANCE_API_RETRY_DELAY_MS")? {
            defaults.retry_delay = Duration::from_millis(ms);
        }
        if let Some(origin) = lookup("FINANCE_API_ORIGIN") {
            defaults.origin = origin;
        }
        Ok(defaults)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Merge a per-call config over these defaults.
    ///
    /// Headers merge with the call's value winning per name (compared
    /// case-insensitively); every other field overrides when set.
    pub fn resolve(&self, config: RequestConfig) -> ResolvedConfig {
        let mut headers: Vec<(String, String)> = Vec::new();
        for (name, value) in &self.headers {
            set_header(&mut headers, name, value.clone());
        }
        for (name, value) in config.headers {
            set_header(&mut headers, &name, value);
        }

        ResolvedConfig {
            method: config.method.unwrap_or(HttpMethod::Get),
            headers,
            body: config.body,
            params: config.params,
            timeout: config.timeout.unwrap_or(self.timeout),
            retries: config.retries.unwrap_or(self.retries),
            retry_delay: config.retry_delay.unwrap_or(self.retry_delay),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar {
                name: name.to_string(),
                value,
            }),
    }
}

/// Per-call configuration. Unset fields fall back to [`ClientDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestConfig {
    pub method: Option<HttpMethod>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub params: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }
}

/// A [`RequestConfig`] with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    DEFAULT_GRAPHQL_RETRY_ATTEMPTS
}

/// Serializable part of the GraphQL client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphQlSettings {
    pub uri: String,

    #[serde(default = "default_true")]
    pub enable_retry: bool,

    /// Maximum attempts, including the first one.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default)]
    pub token_refresh_endpoint: Option<String>,

    /// Defaults to `/csrf-token` on the origin of `uri`.
    #[serde(default)]
    pub csrf_endpoint: Option<String>,
}

impl GraphQlSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            enable_retry: true,
            retry_attempts: DEFAULT_GRAPHQL_RETRY_ATTEMPTS,
            token_refresh_endpoint: None,
            csrf_endpoint: None,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read `FINANCE_API_GRAPHQL_URI` (required), `FINANCE_API_GRAPHQL_RETRY`,
    /// `FINANCE_API_GRAPHQL_RETRY_ATTEMPTS`, `FINANCE_API_REFRESH_ENDPOINT`
    /// and `FINANCE_API_CSRF_ENDPOINT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let uri = lookup("FINANCE_API_GRAPHQL_URI").ok_or_else(|| ConfigError::InvalidVar {
            name: "FINANCE_API_GRAPHQL_URI".to_string(),
            value: String::new(),
        })?;
        let mut settings = Self::new(uri);
        if let Some(enable) = parse_var(&lookup, "FINANCE_API_GRAPHQL_RETRY")? {
            settings.enable_retry = enable;
        }
        if let Some(attempts) = parse_var(&lookup, "FINANCE_API_GRAPHQL_RETRY_ATTEMPTS")? {
            settings.retry_attempts = attempts;
        }
        settings.token_refresh_endpoint = lookup("FINANCE_API_REFRESH_ENDPOINT");
        settings.csrf_endpoint = lookup("FINANCE_API_CSRF_ENDPOINT");
        Ok(settings)
    }
}
