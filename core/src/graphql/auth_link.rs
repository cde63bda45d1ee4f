//! Header-injecting links: bearer auth and CSRF.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::LinkError;
use crate::graphql::link::{Link, Next};
use crate::graphql::types::{GraphQlResponse, Operation};
use crate::http::{bearer, HttpMethod, HttpRequest, Transport, AUTHORIZATION, CSRF_HEADER};
use crate::session::{Session, TokenGetter};
use crate::types::CsrfTokenResponse;

/// Sets `Authorization: Bearer <token>` from the token getter on every
/// request, or an empty `Authorization` header when there is no token.
pub struct AuthLink {
    get_token: TokenGetter,
}

impl AuthLink {
    pub fn new(get_token: TokenGetter) -> Self {
        Self { get_token }
    }
}

#[async_trait]
impl Link for AuthLink {
    async fn request(&self, mut operation: Operation, next: Next<'_>) -> Result<GraphQlResponse, LinkError> {
        let token = operation
            .context
            .bearer_override
            .clone()
            .or_else(|| (self.get_token)())
            .filter(|t| !t.is_empty());
        let value = token.as_deref().map(bearer).unwrap_or_default();
        operation.context.set_header(AUTHORIZATION, value);
        next.run(operation).await
    }
}

/// Attaches `X-CSRF-Token`, fetching the token lazily on first use.
///
/// The token is cached in the session. If it cannot be obtained the header
/// is sent empty and the operation proceeds. A 403 answer drops the cached
/// token so the next operation fetches a fresh one.
pub struct CsrfLink {
    endpoint: String,
    session: Session,
    transport: Arc<dyn Transport>,
}

impl CsrfLink {
    pub fn new(endpoint: impl Into<String>, session: Session, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            session,
            transport,
        }
    }

    async fn fetch_token(&self) -> Result<String, LinkError> {
        let request = HttpRequest::new(HttpMethod::Get, self.endpoint.as_str());
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| LinkError::Network(e.to_string()))?;
        if !response.is_success() {
            return Err(LinkError::Http {
                status: response.status,
                body: response.body,
            });
        }
        let parsed: CsrfTokenResponse =
            serde_json::from_str(&response.body).map_err(|e| LinkError::Deserialization(e.to_string()))?;
        Ok(parsed.csrf_token)
    }
}

#[async_trait]
impl Link for CsrfLink {
    async fn request(&self, mut operation: Operation, next: Next<'_>) -> Result<GraphQlResponse, LinkError> {
        let token = self
            .session
            .csrf()
            .get_or_fetch(|| self.fetch_token())
            .await
            .unwrap_or_default();
        operation.context.set_header(CSRF_HEADER, token);
        let result = next.run(operation).await;
        if matches!(&result, Err(err) if err.status() == Some(403)) {
            debug!("csrf token rejected, clearing cached token");
            self.session.csrf().clear().await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::graphql::link::{LinkChain, Terminal};
    use crate::testing::ScriptedTransport;

    /// Returns the headers it received as `data`.
    struct Headers;

    #[async_trait]
    impl Terminal for Headers {
        async fn execute(&self, operation: Operation) -> Result<GraphQlResponse, LinkError> {
            let map: serde_json::Map<String, serde_json::Value> = operation
                .context
                .headers
                .into_iter()
                .map(|(k, v)| (k, json!(v)))
                .collect();
            Ok(GraphQlResponse {
                data: Some(serde_json::Value::Object(map)),
                errors: None,
            })
        }
    }

    #[tokio::test]
    async fn auth_link_reads_token_on_every_request() {
        let session = Session::new();
        let chain = LinkChain::new(Arc::new(Headers)).with(Arc::new(AuthLink::new(session.token_getter())));

        let data = chain.execute(Operation::new("{ a }")).await.unwrap().data.unwrap();
        assert_eq!(data[AUTHORIZATION], "");

        session.set_token("t1");
        let data = chain.execute(Operation::new("{ a }")).await.unwrap().data.unwrap();
        assert_eq!(data[AUTHORIZATION], "Bearer t1");
    }

    #[tokio::test]
    async fn auth_link_prefers_override() {
        let session = Session::new();
        session.set_token("old");
        let chain = LinkChain::new(Arc::new(Headers)).with(Arc::new(AuthLink::new(session.token_getter())));

        let mut op = Operation::new("{ a }");
        op.context.bearer_override = Some("new".to_string());
        let data = chain.execute(op).await.unwrap().data.unwrap();
        assert_eq!(data[AUTHORIZATION], "Bearer new");
    }

    #[tokio::test]
    async fn csrf_token_is_fetched_once_and_attached_every_time() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.json(200, r#"{"csrfToken":"csrf-xyz"}"#);
        let session = Session::new();
        let chain = LinkChain::new(Arc::new(Headers)).with(Arc::new(CsrfLink::new(
            "http://localhost/csrf-token",
            session.clone(),
            transport.clone(),
        )));

        for _ in 0..3 {
            let data = chain.execute(Operation::new("{ a }")).await.unwrap().data.unwrap();
            assert_eq!(data[CSRF_HEADER], "csrf-xyz");
        }
        let fetches = transport.requests();
        assert_eq!(fetches.len(), 1);
        assert_eq!(fetches[0].method, HttpMethod::Get);
        assert_eq!(session.csrf().peek().as_deref(), Some("csrf-xyz"));
    }

    #[tokio::test]
    async fn rejected_csrf_token_is_fetched_again() {
        struct Forbidden;

        #[async_trait]
        impl Terminal for Forbidden {
            async fn execute(&self, _operation: Operation) -> Result<GraphQlResponse, LinkError> {
                Err(LinkError::Http {
                    status: 403,
                    body: r#"{"error":"invalid csrf token"}"#.to_string(),
                })
            }
        }

        let transport = Arc::new(ScriptedTransport::new());
        transport
            .json(200, r#"{"csrfToken":"old"}"#)
            .json(200, r#"{"csrfToken":"new"}"#);
        let session = Session::new();
        let chain = LinkChain::new(Arc::new(Forbidden)).with(Arc::new(CsrfLink::new(
            "http://localhost/csrf-token",
            session.clone(),
            transport.clone(),
        )));

        let err = chain.execute(Operation::new("{ a }")).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(session.csrf().peek().is_none());

        chain.execute(Operation::new("{ a }")).await.unwrap_err();
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(session.csrf().peek().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn csrf_fetch_failure_sends_empty_header() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.json(500, "{}").json(200, r#"{"token":"late"}"#);
        let chain = LinkChain::new(Arc::new(Headers)).with(Arc::new(CsrfLink::new(
            "http://localhost/csrf-token",
            Session::new(),
            transport.clone(),
        )));

        let data = chain.execute(Operation::new("{ a }")).await.unwrap().data.unwrap();
        assert_eq!(data[CSRF_HEADER], "");

        let data = chain.execute(Operation::new("{ a }")).await.unwrap().data.unwrap();
        assert_eq!(data[CSRF_HEADER], "late");
        assert_eq!(transport.requests().len(), 2);
    }
}
