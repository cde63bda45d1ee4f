use std::time::Duration;

use axum::http::{self, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mock_server::{app, app_with_state, Account, AppState, Fault, Transaction, DEFAULT_CSRF_TOKEN};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn graphql_request(csrf: Option<&str>, bearer: Option<&str>, body: &str) -> Request<String> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/graphql")
        .header(http::header::CONTENT_TYPE, "application/json");
    if let Some(csrf) = csrf {
        builder = builder.header("X-CSRF-Token", csrf);
    }
    if let Some(token) = bearer {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body.to_string()).unwrap()
}

async fn send(app: &Router, request: Request<String>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

// --- session endpoints ---

#[tokio::test]
async fn csrf_token_endpoint_returns_token() {
    let resp = app().oneshot(get("/csrf-token")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert_eq!(body["csrfToken"], DEFAULT_CSRF_TOKEN);
}

#[tokio::test]
async fn refresh_issues_a_token_that_authorizes() {
    let state = AppState::new();
    state.set_require_auth(true);
    state.set_next_refresh_token("abc");
    let app = app_with_state(state.clone());

    let resp = send(&app, json_request("POST", "/auth/refresh-token", "")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert_eq!(body["token"], "abc");

    let resp = send(
        &app,
        Request::builder()
            .uri("/accounts")
            .header(http::header::AUTHORIZATION, "Bearer abc")
            .body(String::new())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_can_be_disabled() {
    let state = AppState::new();
    state.set_refresh_enabled(false);
    let app = app_with_state(state);

    let resp = send(&app, json_request("POST", "/auth/refresh-token", "")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn required_auth_rejects_missing_bearer() {
    let state = AppState::new();
    state.set_require_auth(true);
    let app = app_with_state(state);

    let resp = send(&app, get("/accounts")).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- fault injection ---

#[tokio::test]
async fn injected_status_is_served_once() {
    let state = AppState::new();
    state.inject("/accounts", Fault::Status(503));
    let app = app_with_state(state.clone());

    let resp = send(&app, get("/accounts")).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let resp = send(&app, get("/accounts")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(state.hits("/accounts"), 2);
}

#[tokio::test(start_paused = true)]
async fn injected_delay_postpones_handler() {
    let state = AppState::new();
    state.inject("/csrf-token", Fault::Delay(Duration::from_secs(5)));
    let app = app_with_state(state);
    let start = tokio::time::Instant::now();

    let resp = send(&app, get("/csrf-token")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn requests_record_auth_and_csrf_headers() {
    let state = AppState::new();
    let app = app_with_state(state.clone());

    send(&app, graphql_request(Some("c"), Some("t"), r#"{"query":"{ accounts { id } }"}"#)).await;

    let seen = state.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/graphql");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer t"));
    assert_eq!(seen[0].csrf_token.as_deref(), Some("c"));
}

// --- graphql ---

#[tokio::test]
async fn graphql_requires_csrf_token() {
    let app = app();

    let resp = send(&app, graphql_request(None, None, r#"{"query":"{ accounts { id } }"}"#)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = send(&app, graphql_request(Some("wrong"), None, r#"{"query":"{ accounts { id } }"}"#)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = send(
        &app,
        graphql_request(Some(DEFAULT_CSRF_TOKEN), None, r#"{"query":"{ accounts { id } }"}"#),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn rotated_csrf_token_rejects_the_old_one() {
    let state = AppState::new();
    state.rotate_csrf_token("rotated");
    let app = app_with_state(state);

    let body = r#"{"query":"{ accounts { id } }"}"#;
    let resp = send(&app, graphql_request(Some(DEFAULT_CSRF_TOKEN), None, body)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = send(&app, get("/csrf-token")).await;
    let token: Value = body_json(resp).await;
    assert_eq!(token["csrfToken"], "rotated");

    let resp = send(&app, graphql_request(Some("rotated"), None, body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn graphql_reports_unauthenticated_for_unknown_bearer() {
    let state = AppState::new();
    state.set_require_auth(true);
    let app = app_with_state(state);

    let resp = send(
        &app,
        graphql_request(Some(DEFAULT_CSRF_TOKEN), Some("stale"), r#"{"query":"{ accounts { id } }"}"#),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    assert!(body["data"].is_null());
    assert_eq!(body["errors"][0]["extensions"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn graphql_pages_transactions_by_filter() {
    let state = AppState::new();
    let account = Uuid::new_v4();
    for i in 0..25 {
        let category = if i % 5 == 0 { "rent" } else { "food" };
        state.add_transaction(account, i as f64, category).await;
    }
    let app = app_with_state(state);

    let body = r#"{
        "query": "query Transactions($filter: Filter, $offset: Int, $limit: Int) { transactions { id } }",
        "variables": {"filter": {"category": "food"}, "offset": 10, "limit": 10}
    }"#;
    let resp = send(&app, graphql_request(Some(DEFAULT_CSRF_TOKEN), None, body)).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = body_json(resp).await;
    let page: Vec<Transaction> = serde_json::from_value(body["data"]["transactions"].clone()).unwrap();
    assert_eq!(page.len(), 10);
    assert!(page.iter().all(|tx| tx.category == "food"));
}

#[tokio::test]
async fn graphql_unknown_operation_is_bad_request() {
    let resp = app()
        .oneshot(graphql_request(Some(DEFAULT_CSRF_TOKEN), None, r#"{"query":"{ budgets { id } }"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- accounts ---

#[tokio::test]
async fn list_accounts_empty() {
    let resp = app().oneshot(get("/accounts")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let accounts: Vec<Account> = body_json(resp).await;
    assert!(accounts.is_empty());
}

#[tokio::test]
async fn create_account_malformed_json_returns_422() {
    let resp = app()
        .oneshot(json_request("POST", "/accounts", r#"{"not_name":1}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn get_account_bad_uuid_returns_400() {
    let resp = app().oneshot(get("/accounts/not-a-uuid")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transaction_for_unknown_account_is_404() {
    let body = format!(r#"{{"account_id":"{}","amount":5.0,"category":"food"}}"#, Uuid::nil());
    let resp = app().oneshot(json_request("POST", "/tx", &body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn account_lifecycle() {
    let app = app();

    // create
    let resp = send(&app, json_request("POST", "/accounts", r#"{"name":"Checking","balance":100.0}"#)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Account = body_json(resp).await;
    assert_eq!(created.name, "Checking");
    let id = created.id;

    // post a transaction against it
    let tx = format!(r#"{{"account_id":"{id}","amount":-25.5,"category":"food"}}"#);
    let resp = send(&app, json_request("POST", "/tx", &tx)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let posted: Transaction = body_json(resp).await;
    assert_eq!(posted.account_id, id);

    // balance reflects the transaction
    let resp = send(&app, get(&format!("/accounts/{id}"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let fetched: Account = body_json(resp).await;
    assert_eq!(fetched.balance, 74.5);

    // partial update keeps the balance
    let resp = send(&app, json_request("PATCH", &format!("/accounts/{id}"), r#"{"name":"Main"}"#)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Account = body_json(resp).await;
    assert_eq!(updated.name, "Main");
    assert_eq!(updated.balance, 74.5);

    // delete
    let resp = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/accounts/{id}"))
            .body(String::new())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(resp).await.is_empty());

    let resp = send(&app, get(&format!("/accounts/{id}"))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
