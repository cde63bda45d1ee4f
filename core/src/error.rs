//! Error types for the REST client, the GraphQL link chain and the transport.
//!
//! # Design
//! `ApiError` is the typed non-2xx error: it carries the status, status text
//! and parsed body, and is the only error that can trigger the 401 refresh
//! path. Transport failures and timeouts are kept apart from it because they
//! are the failures the retry loops are allowed to absorb.

use std::time::Duration;

use thiserror::Error;

use crate::graphql::types::{GraphQlError, GraphQlResponse};
use crate::http::{HttpResponse, ResponseBody};

/// Failures below HTTP: no response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transport failure: {0}")]
    Other(String),
}

/// The server answered with a non-2xx status.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("HTTP {status} {status_text}: {body}")]
pub struct ApiError {
    pub status: u16,
    pub status_text: String,
    pub body: ResponseBody,
}

impl ApiError {
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: response.status,
            status_text: response.status_text.clone(),
            body: ResponseBody::parse_lossy(response),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// Errors returned by [`HttpClient`](crate::client::HttpClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl ClientError {
    /// HTTP status of the failed call, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api(err) => Some(err.status),
            _ => None,
        }
    }

    /// Transport failures, timeouts and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Api(err) => err.is_server_error(),
            ClientError::Transport(_) | ClientError::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(err) => Some(err),
            _ => None,
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

/// Errors surfaced by the GraphQL link chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    /// No HTTP response was received.
    #[error("network error: {0}")]
    Network(String),

    #[error("server responded with status {status}")]
    Http { status: u16, body: String },

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid response: {0}")]
    Deserialization(String),
}

impl LinkError {
    pub fn status(&self) -> Option<u16> {
        match self {
            LinkError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Network failures and 5xx responses; client errors never retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Network(_) => true,
            LinkError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Structured GraphQL errors carried in a non-2xx response body.
    pub fn graphql_errors(&self) -> Vec<GraphQlError> {
        match self {
            LinkError::Http { body, .. } => serde_json::from_str::<GraphQlResponse>(body)
                .map(|r| r.errors.unwrap_or_default())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

/// Errors loading client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {name}")]
    InvalidVar { name: String, value: String },
}
