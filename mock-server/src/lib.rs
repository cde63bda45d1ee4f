//! In-memory stand-in for the finance API.
//!
//! Serves the REST surface (`/accounts`, `/tx`), the session endpoints
//! (`/csrf-token`, `/auth/refresh-token`) and a small `/graphql` endpoint.
//! Tests drive it through [`AppState`]: inject faults per path, toggle
//! auth, and read back hit counts and the headers each request carried.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const UNAUTHENTICATED: &str = "UNAUTHENTICATED";
pub const DEFAULT_CSRF_TOKEN: &str = "csrf-mock-token";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub balance: f64,
}

#[derive(Deserialize)]
pub struct CreateAccount {
    pub name: String,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Deserialize)]
pub struct UpdateAccount {
    pub name: Option<String>,
    pub balance: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: f64,
    pub category: String,
}

#[derive(Deserialize)]
pub struct CreateTransaction {
    pub account_id: Uuid,
    pub amount: f64,
    pub category: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub operation_name: Option<String>,
}

/// A scripted misbehaviour for the next request to a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this status instead of running the handler.
    Status(u16),
    /// Sleep before running the handler.
    Delay(Duration),
}

/// What the server saw for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub csrf_token: Option<String>,
}

#[derive(Debug)]
struct Control {
    tokens: HashSet<String>,
    csrf_token: String,
    require_auth: bool,
    refresh_enabled: bool,
    next_refresh_token: Option<String>,
    faults: HashMap<String, VecDeque<Fault>>,
    requests: Vec<RecordedRequest>,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            tokens: HashSet::new(),
            csrf_token: DEFAULT_CSRF_TOKEN.to_string(),
            require_auth: false,
            refresh_enabled: true,
            next_refresh_token: None,
            faults: HashMap::new(),
            requests: Vec::new(),
        }
    }
}

/// Shared server state. Clones share the same data.
#[derive(Clone, Debug, Default)]
pub struct AppState {
    accounts: Arc<RwLock<HashMap<Uuid, Account>>>,
    transactions: Arc<RwLock<Vec<Transaction>>>,
    control: Arc<Mutex<Control>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    fn control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a fault for the next request whose path equals `path`.
    pub fn inject(&self, path: &str, fault: Fault) {
        self.control().faults.entry(path.to_string()).or_default().push_back(fault);
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.control().requests.clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.control().requests.iter().filter(|r| r.path == path).count()
    }

    /// Mark `token` as a valid bearer token.
    pub fn issue_token(&self, token: &str) {
        self.control().tokens.insert(token.to_string());
    }

    pub fn revoke_token(&self, token: &str) {
        self.control().tokens.remove(token);
    }

    /// When set, REST routes answer 401 and `/graphql` answers
    /// `UNAUTHENTICATED` unless the bearer token is valid.
    pub fn set_require_auth(&self, require: bool) {
        self.control().require_auth = require;
    }

    /// When cleared, `/auth/refresh-token` answers 401.
    pub fn set_refresh_enabled(&self, enabled: bool) {
        self.control().refresh_enabled = enabled;
    }

    /// Token handed out by the next refresh. Defaults to a random one.
    pub fn set_next_refresh_token(&self, token: &str) {
        self.control().next_refresh_token = Some(token.to_string());
    }

    pub fn csrf_token(&self) -> String {
        self.control().csrf_token.clone()
    }

    /// Replace the CSRF token; requests carrying the old one get 403.
    pub fn rotate_csrf_token(&self, token: &str) {
        self.control().csrf_token = token.to_string();
    }

    pub async fn add_transaction(&self, account_id: Uuid, amount: f64, category: &str) -> Transaction {
        let tx = Transaction {
            id: Uuid::new_v4(),
            account_id,
            amount,
            category: category.to_string(),
        };
        self.transactions.write().await.push(tx.clone());
        tx
    }

    fn take_fault(&self, path: &str) -> Option<Fault> {
        self.control().faults.get_mut(path)?.pop_front()
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let control = self.control();
        if !control.require_auth {
            return true;
        }
        bearer_token(headers).is_some_and(|token| control.tokens.contains(token))
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

pub fn app() -> Router {
    app_with_state(AppState::new())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/csrf-token", get(csrf_token))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/accounts", get(list_accounts).post(create_account))
        .route(
            "/accounts/{id}",
            get(get_account).put(update_account).patch(update_account).delete(delete_account),
        )
        .route("/tx", post(create_transaction))
        .route("/graphql", post(graphql))
        .layer(middleware::from_fn_with_state(state.clone(), record_and_inject))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, AppState::new()).await
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

async fn record_and_inject(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let headers = request.headers();
    state.control().requests.push(RecordedRequest {
        method: request.method().to_string(),
        path: path.clone(),
        authorization: header_value(headers, "authorization"),
        csrf_token: header_value(headers, "x-csrf-token"),
    });

    match state.take_fault(&path) {
        Some(Fault::Status(code)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            info!(%path, status = code, "injected status");
            return (status, Json(json!({ "error": "injected fault" }))).into_response();
        }
        Some(Fault::Delay(delay)) => {
            info!(%path, delay_ms = delay.as_millis() as u64, "injected delay");
            tokio::time::sleep(delay).await;
        }
        None => {}
    }
    next.run(request).await
}

async fn csrf_token(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "csrfToken": state.csrf_token() }))
}

async fn refresh_token(State(state): State<AppState>) -> Response {
    let mut control = state.control();
    if !control.refresh_enabled {
        debug!("refresh rejected");
        return unauthorized();
    }
    let token = control
        .next_refresh_token
        .take()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    control.tokens.insert(token.clone());
    info!("issued refreshed token");
    Json(json!({ "token": token })).into_response()
}

async fn list_accounts(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    let accounts = state.accounts.read().await;
    let mut list: Vec<Account> = accounts.values().cloned().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    Json(list).into_response()
}

async fn create_account(State(state): State<AppState>, headers: HeaderMap, Json(input): Json<CreateAccount>) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    let account = Account {
        id: Uuid::new_v4(),
        name: input.name,
        balance: input.balance,
    };
    state.accounts.write().await.insert(account.id, account.clone());
    (StatusCode::CREATED, Json(account)).into_response()
}

async fn get_account(State(state): State<AppState>, Path(id): Path<Uuid>, headers: HeaderMap) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    let accounts = state.accounts.read().await;
    match accounts.get(&id) {
        Some(account) => Json(account.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<UpdateAccount>,
) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    let mut accounts = state.accounts.write().await;
    let Some(account) = accounts.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(name) = input.name {
        account.name = name;
    }
    if let Some(balance) = input.balance {
        account.balance = balance;
    }
    Json(account.clone()).into_response()
}

async fn delete_account(State(state): State<AppState>, Path(id): Path<Uuid>, headers: HeaderMap) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    let mut accounts = state.accounts.write().await;
    match accounts.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Post a transaction and apply it to the account balance.
async fn create_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateTransaction>,
) -> Response {
    if !state.is_authorized(&headers) {
        return unauthorized();
    }
    let mut accounts = state.accounts.write().await;
    let Some(account) = accounts.get_mut(&input.account_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "account not found" }))).into_response();
    };
    account.balance += input.amount;
    let tx = Transaction {
        id: Uuid::new_v4(),
        account_id: input.account_id,
        amount: input.amount,
        category: input.category,
    };
    state.transactions.write().await.push(tx.clone());
    (StatusCode::CREATED, Json(tx)).into_response()
}

fn graphql_error(message: &str, code: &str) -> Value {
    json!({ "data": null, "errors": [{ "message": message, "extensions": { "code": code } }] })
}

/// Dispatches on the root field named in the query text. Supports
/// `transactions(filter, offset, limit)` and `accounts`.
async fn graphql(State(state): State<AppState>, headers: HeaderMap, Json(request): Json<GraphQlRequest>) -> Response {
    let expected = state.csrf_token();
    if header_value(&headers, "x-csrf-token").as_deref() != Some(expected.as_str()) {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "invalid csrf token" }))).into_response();
    }
    if !state.is_authorized(&headers) {
        return Json(graphql_error("session expired", UNAUTHENTICATED)).into_response();
    }

    if request.query.contains("transactions") {
        let vars = &request.variables;
        let category = vars
            .get("filter")
            .and_then(|f| f.get("category"))
            .and_then(Value::as_str);
        let offset = vars.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = vars.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;

        let transactions = state.transactions.read().await;
        let page: Vec<&Transaction> = transactions
            .iter()
            .filter(|tx| category.map_or(true, |c| tx.category == c))
            .skip(offset)
            .take(limit)
            .collect();
        debug!(offset, limit, returned = page.len(), "graphql transactions");
        return Json(json!({ "data": { "transactions": page } })).into_response();
    }

    if request.query.contains("accounts") {
        let accounts = state.accounts.read().await;
        let mut list: Vec<&Account> = accounts.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        return Json(json!({ "data": { "accounts": list } })).into_response();
    }

    let name = request.operation_name.as_deref().unwrap_or("anonymous");
    (
        StatusCode::BAD_REQUEST,
        Json(graphql_error(&format!("unknown operation {name}"), "GRAPHQL_VALIDATION_FAILED")),
    )
        .into_response()
}
