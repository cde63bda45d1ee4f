//! Wire DTOs for the finance API.
//!
//! These mirror the mock-server's schema but are defined independently;
//! the integration tests catch schema drift between the two crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a successful `POST /auth/refresh-token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenResponse {
    pub token: String,
}

/// Body of `GET /csrf-token`. Accepts both `csrfToken` and `token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    #[serde(rename = "csrfToken", alias = "token")]
    pub csrf_token: String,
}

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    #[serde(default)]
    pub balance: f64,
}

/// Partial update; omitted fields remain unchanged on the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAccount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

/// A posted transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: f64,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransaction {
    pub account_id: Uuid,
    pub amount: f64,
    pub category: String,
}
