//! REST client with timeout, retry and one-shot reauthentication.
//!
//! # Design
//! Each call is split the same way as the rest of the crate: `build_request`
//! produces an `HttpRequest` from the merged config, the [`Transport`] runs
//! it, and `check_status` turns the `HttpResponse` into either an
//! [`ApiResponse`] or a typed [`ApiError`]. Around that sit two policies:
//!
//! - a bounded retry loop that absorbs transport failures, timeouts and 5xx
//!   responses, sleeping the configured delay between attempts;
//! - a 401 path that refreshes the bearer token once via
//!   `POST /auth/refresh-token` and replays the request once. A 401 on the
//!   replay is final.
//!
//! Concurrent 401s share one refresh: the refresh runs under the session's
//! refresh lock, and a caller that finds the session token changed since it
//! sent its request replays with the new token instead of refreshing again.
//! The comparison uses the session token observed at send time, so an
//! explicit `Authorization` header does not suppress the refresh.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ClientDefaults, RequestConfig, ResolvedConfig};
use crate::error::{ApiError, ClientError};
use crate::http::{
    bearer, HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, ResponseBody, Transport, AUTHORIZATION,
};
use crate::session::Session;
use crate::types::RefreshTokenResponse;

/// Endpoint, relative to the base URL, that issues a fresh bearer token.
pub const REFRESH_TOKEN_PATH: &str = "/auth/refresh-token";

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::http::find_header(&self.headers, name)
    }

    /// Deserialize the body, whether it arrived as JSON or as text.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let parsed = match &self.body {
            ResponseBody::Json(value) => T::deserialize(value),
            ResponseBody::Text(text) => serde_json::from_str(text),
        };
        parsed.map_err(|e| ClientError::Deserialization(e.to_string()))
    }
}

/// REST client bound to one base URL.
#[derive(Clone)]
pub struct HttpClient {
    base_url: Url,
    defaults: ClientDefaults,
    session: Session,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url.as_str())
            .field("defaults", &self.defaults)
            .field("session", &self.session)
            .finish()
    }
}

impl HttpClient {
    /// Create a client backed by [`ReqwestTransport`].
    ///
    /// `base_url` may be absolute or origin-relative (`/api`); relative
    /// values resolve against `defaults.origin`.
    pub fn new(base_url: &str, defaults: ClientDefaults, session: Session) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new()?;
        Self::with_transport(base_url, defaults, session, Arc::new(transport))
    }

    pub fn with_transport(
        base_url: &str,
        defaults: ClientDefaults,
        session: Session,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let base_url = resolve_base_url(base_url, &defaults.origin)?;
        Ok(Self {
            base_url,
            defaults,
            session,
            transport,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn defaults(&self) -> &ClientDefaults {
        &self.defaults
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Join `endpoint` onto the base URL and append query parameters.
    pub fn build_url(&self, endpoint: &str, params: &[(String, String)]) -> Result<Url, ClientError> {
        let mut url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Url::parse(endpoint)?
        } else {
            let base = self.base_url.as_str().trim_end_matches('/');
            let path = endpoint.trim_start_matches('/');
            Url::parse(&format!("{base}/{path}"))?
        };
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }

    /// Build the wire request for `endpoint`, attaching the stored bearer
    /// token unless the caller supplied an `Authorization` header.
    pub fn build_request(&self, endpoint: &str, config: &ResolvedConfig) -> Result<HttpRequest, ClientError> {
        let url = self.build_url(endpoint, &config.params)?;
        let mut request = HttpRequest::new(config.method, url.as_str());
        request.headers = config.headers.clone();
        if request.header(AUTHORIZATION).is_none() {
            if let Some(token) = self.session.token() {
                request.set_header(AUTHORIZATION, bearer(&token));
            }
        }
        request.body = config.body.clone();
        Ok(request)
    }

    /// Perform one logical call: merge config, retry transient failures,
    /// and refresh-and-replay once on 401.
    pub async fn request(&self, endpoint: &str, config: RequestConfig) -> Result<ApiResponse, ClientError> {
        let config = self.defaults.resolve(config);
        let sent_with = self.session.token();
        let request = self.build_request(endpoint, &config)?;

        let result = self.send_with_retry(&request, &config).await;
        match result {
            Err(ClientError::Api(err)) if err.is_unauthorized() => {
                self.refresh_and_replay(request, &config, sent_with.as_deref(), err)
                    .await
            }
            other => other,
        }
    }

    pub async fn get(&self, endpoint: &str, config: RequestConfig) -> Result<ApiResponse, ClientError> {
        self.request(endpoint, config.method(HttpMethod::Get)).await
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        config: RequestConfig,
    ) -> Result<ApiResponse, ClientError> {
        self.request(endpoint, config.method(HttpMethod::Post).body(to_json(body)?))
            .await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        config: RequestConfig,
    ) -> Result<ApiResponse, ClientError> {
        self.request(endpoint, config.method(HttpMethod::Put).body(to_json(body)?))
            .await
    }

    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        config: RequestConfig,
    ) -> Result<ApiResponse, ClientError> {
        self.request(endpoint, config.method(HttpMethod::Patch).body(to_json(body)?))
            .await
    }

    pub async fn delete(&self, endpoint: &str, config: RequestConfig) -> Result<ApiResponse, ClientError> {
        self.request(endpoint, config.method(HttpMethod::Delete)).await
    }

    async fn send_with_retry(&self, request: &HttpRequest, config: &ResolvedConfig) -> Result<ApiResponse, ClientError> {
        let mut remaining = config.retries;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.send_once(request.clone(), config).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && remaining > 0 => {
                    remaining -= 1;
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        attempt,
                        remaining,
                        error = %err,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, request: HttpRequest, config: &ResolvedConfig) -> Result<ApiResponse, ClientError> {
        debug!(method = %request.method, url = %request.url, "sending request");
        let response = match tokio::time::timeout(config.timeout, self.transport.send(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout(config.timeout)),
        };
        check_status(response)
    }

    async fn refresh_and_replay(
        &self,
        mut request: HttpRequest,
        config: &ResolvedConfig,
        sent_with: Option<&str>,
        original: ApiError,
    ) -> Result<ApiResponse, ClientError> {
        let token = match self.refresh_token(sent_with).await {
            Ok(token) => token,
            Err(err) => {
                warn!(url = %request.url, error = %err, "token refresh failed, clearing session token");
                self.session.clear_token();
                return Err(original.into());
            }
        };

        request.set_header(AUTHORIZATION, bearer(&token));
        debug!(method = %request.method, url = %request.url, "replaying request with refreshed token");
        self.send_with_retry(&request, config).await
    }

    /// Obtain a fresh bearer token and store it in the session.
    ///
    /// `seen` is the session token observed when the failed request was
    /// sent. If the session now holds a different token, another caller
    /// refreshed in the meantime and that token is returned without a new
    /// refresh call.
    pub async fn refresh_token(&self, seen: Option<&str>) -> Result<String, ClientError> {
        let _guard = self.session.refresh_guard().lock().await;

        if let Some(current) = self.session.token() {
            if seen != Some(current.as_str()) {
                debug!("token already refreshed by a concurrent call");
                return Ok(current);
            }
        }

        let url = self.build_url(REFRESH_TOKEN_PATH, &[])?;
        let mut request = HttpRequest::new(HttpMethod::Post, url.as_str());
        for (name, value) in &self.defaults.headers {
            request.set_header(name, value.clone());
        }

        let response = match tokio::time::timeout(self.defaults.timeout, self.transport.send(request)).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout(self.defaults.timeout)),
        };
        let refreshed: RefreshTokenResponse = check_status(response)?.json()?;
        if refreshed.token.is_empty() {
            return Err(ClientError::Deserialization("refresh response carried an empty token".to_string()));
        }

        self.session.set_token(&refreshed.token);
        info!("bearer token refreshed");
        Ok(refreshed.token)
    }
}

/// Map non-2xx statuses to [`ApiError`] and parse successful bodies.
fn check_status(response: HttpResponse) -> Result<ApiResponse, ClientError> {
    if !response.is_success() {
        return Err(ApiError::from_response(&response).into());
    }
    let body = ResponseBody::parse(&response).map_err(|e| ClientError::Deserialization(e.to_string()))?;
    Ok(ApiResponse {
        status: response.status,
        status_text: response.status_text,
        headers: response.headers,
        body,
    })
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<String, ClientError> {
    serde_json::to_string(body).map_err(|e| ClientError::Serialization(e.to_string()))
}

/// Resolve an absolute or origin-relative base URL.
pub(crate) fn resolve_base_url(base_url: &str, origin: &str) -> Result<Url, ClientError> {
    match Url::parse(base_url) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Url::parse(origin)?.join(base_url)?),
        Err(err) => Err(err.into()),
    }
}
