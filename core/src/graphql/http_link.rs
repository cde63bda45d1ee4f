//! Terminal link: POSTs the operation as JSON to the GraphQL endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::LinkError;
use crate::graphql::link::Terminal;
use crate::graphql::types::{GraphQlResponse, Operation};
use crate::http::{HttpMethod, HttpRequest, Transport, APPLICATION_JSON, CONTENT_TYPE};

pub struct HttpLink {
    uri: String,
    transport: Arc<dyn Transport>,
}

impl HttpLink {
    pub fn new(uri: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            uri: uri.into(),
            transport,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn build_request(&self, operation: Operation) -> Result<HttpRequest, LinkError> {
        let body =
            serde_json::to_string(&operation.request).map_err(|e| LinkError::Serialization(e.to_string()))?;
        let mut request = HttpRequest::new(HttpMethod::Post, self.uri.as_str());
        request.set_header(CONTENT_TYPE, APPLICATION_JSON);
        for (name, value) in operation.context.headers {
            request.set_header(&name, value);
        }
        request.body = Some(body);
        Ok(request)
    }
}

#[async_trait]
impl Terminal for HttpLink {
    async fn execute(&self, operation: Operation) -> Result<GraphQlResponse, LinkError> {
        debug!(operation = operation.name(), uri = %self.uri, "sending graphql operation");
        let request = self.build_request(operation)?;
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
        serde_json::from_str(&response.body).map_err(|e| LinkError::Deserialization(e.to_string()))
    }
}
