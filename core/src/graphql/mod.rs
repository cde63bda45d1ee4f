//! GraphQL transport: link chain, client facade and paginated cache.
//!
//! The chain runs outermost to innermost as
//! `ErrorLink → RetryLink → AuthLink → CsrfLink → HttpLink`; retry and auth
//! are included only when configured.

pub mod auth_link;
pub mod cache;
pub mod client;
pub mod error_link;
pub mod http_link;
pub mod link;
pub mod retry_link;
pub mod types;

pub use auth_link::{AuthLink, CsrfLink};
pub use cache::{CacheKey, FieldPolicy, InMemoryCache};
pub use client::{GraphQlClient, GraphQlClientBuilder};
pub use error_link::{ErrorCallback, ErrorEvent, ErrorLink, OperationState, TokenRefresher};
pub use http_link::HttpLink;
pub use link::{Link, LinkChain, Next, Terminal};
pub use retry_link::RetryLink;
pub use types::{GraphQlError, GraphQlRequest, GraphQlResponse, Operation, OperationContext};
