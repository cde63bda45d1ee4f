//! GraphQL client: composes the link chain and owns the result cache.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::client::resolve_base_url;
use crate::config::{GraphQlSettings, DEFAULT_ORIGIN};
use crate::error::{ClientError, LinkError};
use crate::graphql::auth_link::{AuthLink, CsrfLink};
use crate::graphql::cache::{FieldPolicy, InMemoryCache};
use crate::graphql::error_link::{ErrorCallback, ErrorLink, TokenRefresher};
use crate::graphql::http_link::HttpLink;
use crate::graphql::link::LinkChain;
use crate::graphql::retry_link::RetryLink;
use crate::graphql::types::{GraphQlResponse, Operation};
use crate::http::{ReqwestTransport, Transport};
use crate::retry::ExponentialBackoff;
use crate::session::{Session, TokenClearer, TokenGetter, TokenSetter};

pub const CSRF_TOKEN_PATH: &str = "/csrf-token";

/// Configures a [`GraphQlClient`].
pub struct GraphQlClientBuilder {
    settings: GraphQlSettings,
    origin: String,
    session: Option<Session>,
    transport: Option<Arc<dyn Transport>>,
    get_token: Option<TokenGetter>,
    on_token_refresh: Option<TokenSetter>,
    on_refresh_failure: Option<TokenClearer>,
    on_error: Option<ErrorCallback>,
    backoff: ExponentialBackoff,
    cache: InMemoryCache,
}

impl GraphQlClientBuilder {
    fn new(settings: GraphQlSettings) -> Self {
        Self {
            settings,
            origin: DEFAULT_ORIGIN.to_string(),
            session: None,
            transport: None,
            get_token: None,
            on_token_refresh: None,
            on_refresh_failure: None,
            on_error: None,
            backoff: ExponentialBackoff::default(),
            cache: InMemoryCache::new(),
        }
    }

    /// Origin used to resolve a relative `uri`.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Session holding the cached CSRF token.
    #[must_use]
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn get_token(mut self, get_token: TokenGetter) -> Self {
        self.get_token = Some(get_token);
        self
    }

    #[must_use]
    pub fn on_token_refresh(mut self, on_token_refresh: TokenSetter) -> Self {
        self.on_token_refresh = Some(on_token_refresh);
        self
    }

    /// Called when the token refresh fails. Defaults to clearing the
    /// session's bearer token.
    #[must_use]
    pub fn on_refresh_failure(mut self, on_refresh_failure: TokenClearer) -> Self {
        self.on_refresh_failure = Some(on_refresh_failure);
        self
    }

    #[must_use]
    pub fn on_error(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = Some(on_error);
        self
    }

    #[must_use]
    pub fn token_refresh_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings.token_refresh_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn csrf_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings.csrf_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn enable_retry(mut self, enable: bool) -> Self {
        self.settings.enable_retry = enable;
        self
    }

    #[must_use]
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.settings.retry_attempts = attempts;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Register a merge policy for a list field.
    #[must_use]
    pub fn field_policy(mut self, field: impl Into<String>, policy: FieldPolicy) -> Self {
        self.cache = self.cache.with_policy(field, policy);
        self
    }

    pub fn build(self) -> Result<GraphQlClient, ClientError> {
        let uri = resolve_base_url(&self.settings.uri, &self.origin)?;
        let csrf_endpoint = match &self.settings.csrf_endpoint {
            Some(endpoint) => resolve_against(&uri, endpoint)?,
            None => uri.join(CSRF_TOKEN_PATH)?,
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let session = self.session.unwrap_or_default();

        let mut error_link = ErrorLink::new();
        if let (Some(endpoint), Some(on_token_refresh)) =
            (&self.settings.token_refresh_endpoint, self.on_token_refresh)
        {
            let endpoint = resolve_against(&uri, endpoint)?;
            let on_refresh_failure = self.on_refresh_failure.unwrap_or_else(|| session.token_clearer());
            error_link = error_link.with_refresher(
                TokenRefresher::new(endpoint.as_str(), on_token_refresh, transport.clone())
                    .with_on_refresh_failure(on_refresh_failure),
            );
        }
        if let Some(on_error) = self.on_error {
            error_link = error_link.with_on_error(on_error);
        }

        let mut chain =
            LinkChain::new(Arc::new(HttpLink::new(uri.as_str(), transport.clone()))).with(Arc::new(error_link));
        if self.settings.enable_retry {
            chain = chain.with(Arc::new(
                RetryLink::new(self.settings.retry_attempts).with_backoff(self.backoff),
            ));
        }
        if let Some(get_token) = self.get_token {
            chain = chain.with(Arc::new(AuthLink::new(get_token)));
        }
        chain = chain.with(Arc::new(CsrfLink::new(
            csrf_endpoint.as_str(),
            session.clone(),
            transport,
        )));

        debug!(uri = %uri, links = chain.len(), "graphql client ready");
        Ok(GraphQlClient {
            uri,
            chain,
            cache: self.cache,
            session,
        })
    }
}

fn resolve_against(base: &Url, endpoint: &str) -> Result<Url, ClientError> {
    Ok(base.join(endpoint)?)
}

/// Entry point for GraphQL operations.
pub struct GraphQlClient {
    uri: Url,
    chain: LinkChain,
    cache: InMemoryCache,
    session: Session,
}

impl GraphQlClient {
    pub fn builder(uri: impl Into<String>) -> GraphQlClientBuilder {
        GraphQlClientBuilder::new(GraphQlSettings::new(uri))
    }

    pub fn from_settings(settings: GraphQlSettings) -> GraphQlClientBuilder {
        GraphQlClientBuilder::new(settings)
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run a query and merge list fields that have a registered policy into
    /// the cache. The returned `data` carries the merged lists.
    pub async fn query(&self, operation: Operation) -> Result<GraphQlResponse, LinkError> {
        let variables = operation.request.variables.clone();
        let mut response = self.chain.execute(operation).await?;

        if let Some(Value::Object(data)) = response.data.as_mut() {
            for (field, value) in data.iter_mut() {
                if self.cache.policy(field).is_none() {
                    continue;
                }
                if let Value::Array(items) = value {
                    let merged = self.cache.write(field, &variables, std::mem::take(items));
                    *items = merged;
                }
            }
        }
        Ok(response)
    }

    /// Run a mutation. Results are not written to the cache.
    pub async fn mutate(&self, operation: Operation) -> Result<GraphQlResponse, LinkError> {
        self.chain.execute(operation).await
    }

    pub fn cache(&self) -> &InMemoryCache {
        &self.cache
    }

    pub fn reset_cache(&self) {
        self.cache.clear();
    }
}

impl std::fmt::Debug for GraphQlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQlClient")
            .field("uri", &self.uri.as_str())
            .field("links", &self.chain.len())
            .field("cache", &self.cache)
            .finish()
    }
}
