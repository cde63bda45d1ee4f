//! Outermost link: error reporting and `UNAUTHENTICATED` recovery.
//!
//! # Design
//! Per operation the link walks `Idle → Sent → {Success | ErrorIntercepted}`.
//! Only an `UNAUTHENTICATED` error with a configured refresher moves on to
//! `RefreshAttempted`, after which the operation is replayed once with the
//! new bearer token. The replay's outcome is returned as-is: it is neither
//! reported nor refreshed again.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::graphql::link::{Link, Next};
use crate::graphql::types::{GraphQlError, GraphQlResponse, Operation, UNAUTHENTICATED};
use crate::http::{bearer, HttpMethod, HttpRequest, Transport, APPLICATION_JSON, AUTHORIZATION, CONTENT_TYPE};
use crate::session::{TokenClearer, TokenSetter};
use crate::types::RefreshTokenResponse;

/// Lifecycle of one operation as seen by [`ErrorLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Sent,
    Success,
    ErrorIntercepted,
    RefreshAttempted,
    ReplayedSuccess,
    ReplayedFailure,
}

/// What the error callback is told about.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorEvent {
    /// Structured errors returned by the execution layer.
    GraphQl { operation: String, errors: Vec<GraphQlError> },
    /// Transport or HTTP-level failure.
    Network { operation: String, error: LinkError },
    /// The token refresh after `UNAUTHENTICATED` failed.
    RefreshFailed { operation: String, error: LinkError },
}

pub type ErrorCallback = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;

/// POSTs to the refresh endpoint and hands the new token to a callback.
///
/// When the refresh fails, `on_refresh_failure` drops the stored
/// credentials so later operations stop sending the rejected token.
pub struct TokenRefresher {
    endpoint: String,
    on_token_refresh: TokenSetter,
    on_refresh_failure: Option<TokenClearer>,
    transport: Arc<dyn Transport>,
}

impl TokenRefresher {
    pub fn new(endpoint: impl Into<String>, on_token_refresh: TokenSetter, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            on_token_refresh,
            on_refresh_failure: None,
            transport,
        }
    }

    #[must_use]
    pub fn with_on_refresh_failure(mut self, on_refresh_failure: TokenClearer) -> Self {
        self.on_refresh_failure = Some(on_refresh_failure);
        self
    }

    /// Refresh, clearing stored credentials if that fails.
    pub async fn refresh(&self) -> Result<String, LinkError> {
        let result = self.request_token().await;
        if result.is_err() {
            if let Some(clear) = &self.on_refresh_failure {
                clear();
            }
        }
        result
    }

    async fn request_token(&self) -> Result<String, LinkError> {
        let mut request = HttpRequest::new(HttpMethod::Post, self.endpoint.as_str());
        request.set_header(CONTENT_TYPE, APPLICATION_JSON);
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| LinkError::Refresh(e.to_string()))?;
        if !response.is_success() {
            return Err(LinkError::Refresh(format!("refresh endpoint returned {}", response.status)));
        }
        let refreshed: RefreshTokenResponse =
            serde_json::from_str(&response.body).map_err(|e| LinkError::Refresh(e.to_string()))?;
        if refreshed.token.is_empty() {
            return Err(LinkError::Refresh("empty token".to_string()));
        }
        (self.on_token_refresh)(refreshed.token.clone());
        Ok(refreshed.token)
    }
}

#[derive(Default)]
pub struct ErrorLink {
    refresher: Option<TokenRefresher>,
    on_error: Option<ErrorCallback>,
}

impl ErrorLink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_refresher(mut self, refresher: TokenRefresher) -> Self {
        self.refresher = Some(refresher);
        self
    }

    #[must_use]
    pub fn with_on_error(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = Some(on_error);
        self
    }

    fn report(&self, event: ErrorEvent) {
        if let Some(on_error) = &self.on_error {
            on_error(&event);
        }
    }

    fn report_result(&self, operation: &Operation, result: &Result<GraphQlResponse, LinkError>) {
        match result {
            Ok(response) if !response.errors().is_empty() => self.report(ErrorEvent::GraphQl {
                operation: operation.name().to_string(),
                errors: response.errors().to_vec(),
            }),
            Ok(_) => {}
            Err(error) => self.report(ErrorEvent::Network {
                operation: operation.name().to_string(),
                error: error.clone(),
            }),
        }
    }
}

fn is_unauthenticated(result: &Result<GraphQlResponse, LinkError>) -> bool {
    match result {
        Ok(response) => response.is_unauthenticated(),
        Err(err) => err
            .graphql_errors()
            .iter()
            .any(|e| e.code() == Some(UNAUTHENTICATED)),
    }
}

fn transition(operation: &Operation, state: OperationState) {
    debug!(operation = operation.name(), state = ?state, "graphql operation state");
}

#[async_trait]
impl Link for ErrorLink {
    async fn request(&self, operation: Operation, next: Next<'_>) -> Result<GraphQlResponse, LinkError> {
        transition(&operation, OperationState::Idle);
        transition(&operation, OperationState::Sent);
        let result = next.run(operation.clone()).await;

        let failed = match &result {
            Ok(response) => !response.errors().is_empty(),
            Err(_) => true,
        };
        if !failed {
            transition(&operation, OperationState::Success);
            return result;
        }
        transition(&operation, OperationState::ErrorIntercepted);

        let refresher = match &self.refresher {
            Some(refresher) if is_unauthenticated(&result) => refresher,
            _ => {
                self.report_result(&operation, &result);
                return result;
            }
        };

        transition(&operation, OperationState::RefreshAttempted);
        let token = match refresher.refresh().await {
            Ok(token) => token,
            Err(error) => {
                warn!(operation = operation.name(), error = %error, "token refresh failed");
                self.report(ErrorEvent::RefreshFailed {
                    operation: operation.name().to_string(),
                    error,
                });
                return result;
            }
        };
        info!(operation = operation.name(), "token refreshed, replaying operation");

        let mut replay = operation;
        replay.context.set_header(AUTHORIZATION, bearer(&token));
        replay.context.bearer_override = Some(token);
        let replayed = next.run(replay.clone()).await;

        let state = match &replayed {
            Ok(response) if response.errors().is_empty() => OperationState::ReplayedSuccess,
            _ => OperationState::ReplayedFailure,
        };
        transition(&replay, state);
        replayed
    }
}
