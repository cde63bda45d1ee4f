//! HTTP transport types and the transport seam.
//!
//! # Design
//! Requests and responses are plain data. The REST client and the GraphQL
//! link chain build `HttpRequest` values and interpret `HttpResponse` values;
//! a [`Transport`] performs the actual round-trip. `ReqwestTransport` is the
//! production implementation and keeps a shared cookie jar so every request
//! carries the session cookies. Tests substitute scripted transports.
//!
//! Header lookups are case-insensitive, matching HTTP semantics.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use serde_json::Value;

use crate::error::TransportError;

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const APPLICATION_JSON: &str = "application/json";

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        set_header(&mut self.headers, name, value.into());
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.header(CONTENT_TYPE)
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }
}

/// A parsed response body: JSON when the content type says so, text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Parse strictly: a JSON content type with an unparseable body is an error.
    pub fn parse(response: &HttpResponse) -> Result<Self, serde_json::Error> {
        if response.is_json() && !response.body.trim().is_empty() {
            serde_json::from_str(&response.body).map(ResponseBody::Json)
        } else {
            Ok(ResponseBody::Text(response.body.clone()))
        }
    }

    /// Parse for error reporting; falls back to text instead of failing.
    pub fn parse_lossy(response: &HttpResponse) -> Self {
        Self::parse(response).unwrap_or_else(|_| ResponseBody::Text(response.body.clone()))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            ResponseBody::Json(_) => None,
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Json(value) => write!(f, "{value}"),
            ResponseBody::Text(text) => f.write_str(text),
        }
    }
}

/// Executes a single HTTP round-trip.
///
/// Implementations report only transport-level failures as errors; any HTTP
/// status, including 4xx and 5xx, comes back as an `HttpResponse`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`, with a cookie jar shared by every call.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_cookie_jar(Arc::new(Jar::default()))
    }

    /// Share `cookies` with other transports, e.g. the REST and GraphQL
    /// clients of one session.
    pub fn with_cookie_jar(cookies: Arc<Jar>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_provider(cookies)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method.into(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub(crate) fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(entry) => entry.1 = value,
        None => headers.push((name.to_string(), value)),
    }
}

pub(crate) fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content_type: &str, body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.to_string(),
        }
    }

    #[test]
    fn transports_can_share_a_cookie_jar() {
        let jar = Arc::new(Jar::default());
        assert!(ReqwestTransport::with_cookie_jar(jar.clone()).is_ok());
        assert!(ReqwestTransport::with_cookie_jar(jar).is_ok());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut req = HttpRequest::new(HttpMethod::Get, "http://localhost/x");
        req.set_header("x-csrf-token", "a");
        assert_eq!(req.header(CSRF_HEADER), Some("a"));

        req.set_header(CSRF_HEADER, "b");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("X-Csrf-Token"), Some("b"));
    }

    #[test]
    fn json_content_type_parses_as_json() {
        let body = ResponseBody::parse(&response("application/json; charset=utf-8", r#"{"a":1}"#)).unwrap();
        assert_eq!(body.as_json().unwrap()["a"], 1);
    }

    #[test]
    fn other_content_types_parse_as_text() {
        let body = ResponseBody::parse(&response("text/plain", "hello")).unwrap();
        assert_eq!(body.as_text(), Some("hello"));
    }

    #[test]
    fn empty_json_body_is_text() {
        let body = ResponseBody::parse(&response(APPLICATION_JSON, "")).unwrap();
        assert_eq!(body, ResponseBody::Text(String::new()));
    }

    #[test]
    fn lossy_parse_falls_back_to_text() {
        let resp = response(APPLICATION_JSON, "not json");
        assert!(ResponseBody::parse(&resp).is_err());
        assert_eq!(ResponseBody::parse_lossy(&resp), ResponseBody::Text("not json".to_string()));
    }

    #[test]
    fn method_display() {
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
    }
}
