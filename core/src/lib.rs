//! Client layer for the personal-finance API.
//!
//! # Overview
//! Two clients share one [`Session`]:
//! - [`HttpClient`] for REST calls, with per-attempt timeouts, bounded
//!   retries and a single token refresh and replay on 401;
//! - [`GraphQlClient`] for GraphQL operations, built from a link chain that
//!   handles error reporting, retry, bearer auth and CSRF, plus a cache that
//!   merges offset-paginated lists.
//!
//! # Design
//! - All network I/O goes through the [`Transport`] trait. The default
//!   [`ReqwestTransport`] keeps a cookie jar so every call carries
//!   credentials; tests swap in a scripted transport.
//! - Token and CSRF state live in the `Session` the caller creates, not in
//!   globals.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod client;
pub mod config;
pub mod error;
pub mod graphql;
pub mod http;
pub mod retry;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{ApiResponse, HttpClient};
pub use config::{ClientDefaults, GraphQlSettings, RequestConfig, ResolvedConfig};
pub use error::{ApiError, ClientError, ConfigError, LinkError, TransportError};
pub use graphql::{FieldPolicy, GraphQlClient, InMemoryCache, Operation};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, ResponseBody, Transport};
pub use retry::ExponentialBackoff;
pub use session::{Session, SessionStorage, TokenStore};
pub use types::{Account, CreateAccount, CreateTransaction, Transaction, UpdateAccount};
