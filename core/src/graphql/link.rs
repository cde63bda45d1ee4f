//! The link chain: an ordered middleware pipeline ending in a terminal link.
//!
//! # Design
//! Each [`Link`] receives the operation and a [`Next`] handle for the rest
//! of the chain. A link may rewrite the operation before forwarding, inspect
//! or replace the result, or forward more than once (retry, replay). `Next`
//! is `Copy`, so forwarding again is just another `run` call.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LinkError;
use crate::graphql::types::{GraphQlResponse, Operation};

/// A request/response interceptor.
#[async_trait]
pub trait Link: Send + Sync {
    async fn request(&self, operation: Operation, next: Next<'_>) -> Result<GraphQlResponse, LinkError>;
}

/// The innermost link; performs the network call.
#[async_trait]
pub trait Terminal: Send + Sync {
    async fn execute(&self, operation: Operation) -> Result<GraphQlResponse, LinkError>;
}

/// Handle to the remainder of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    links: &'a [Arc<dyn Link>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub async fn run(self, operation: Operation) -> Result<GraphQlResponse, LinkError> {
        match self.links.split_first() {
            Some((link, rest)) => {
                let next = Next {
                    links: rest,
                    terminal: self.terminal,
                };
                link.request(operation, next).await
            }
            None => self.terminal.execute(operation).await,
        }
    }
}

/// Ordered links, outermost first, and the terminal link.
#[derive(Clone)]
pub struct LinkChain {
    links: Vec<Arc<dyn Link>>,
    terminal: Arc<dyn Terminal>,
}

impl LinkChain {
    pub fn new(terminal: Arc<dyn Terminal>) -> Self {
        Self {
            links: Vec::new(),
            terminal,
        }
    }

    /// Append a link inside the ones already added.
    #[must_use]
    pub fn with(mut self, link: Arc<dyn Link>) -> Self {
        self.links.push(link);
        self
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub async fn execute(&self, operation: Operation) -> Result<GraphQlResponse, LinkError> {
        Next {
            links: &self.links,
            terminal: self.terminal.as_ref(),
        }
        .run(operation)
        .await
    }
}
