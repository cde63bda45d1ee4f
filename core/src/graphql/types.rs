//! GraphQL request, response and operation types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::http::set_header;

/// Extension code the server uses for an expired or missing session.
pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";

/// Body POSTed to the GraphQL endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

/// Standard GraphQL response shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQlError>>,
}

impl GraphQlResponse {
    pub fn errors(&self) -> &[GraphQlError] {
        self.errors.as_deref().unwrap_or_default()
    }

    pub fn has_error_code(&self, code: &str) -> bool {
        self.errors().iter().any(|e| e.code() == Some(code))
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.has_error_code(UNAUTHENTICATED)
    }
}

/// A structured error from the execution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQlError {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

/// Per-operation context threaded through the link chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    pub headers: Vec<(String, String)>,
    /// Bearer token that wins over the auth link's getter. Set on replay.
    pub bearer_override: Option<String>,
}

impl OperationContext {
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::http::find_header(&self.headers, name)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        set_header(&mut self.headers, name, value.into());
    }
}

/// A GraphQL operation travelling through the link chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub request: GraphQlRequest,
    pub context: OperationContext,
}

impl Operation {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            request: GraphQlRequest {
                query: query.into(),
                variables: Value::Object(Map::new()),
                operation_name: None,
            },
            context: OperationContext::default(),
        }
    }

    #[must_use]
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.request.variables = variables;
        self
    }

    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.request.operation_name = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        self.request.operation_name.as_deref().unwrap_or("anonymous")
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.request.variables.get(name)
    }
}
