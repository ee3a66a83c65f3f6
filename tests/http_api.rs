//! Integration tests for the HTTP surface.
//!
//! Uses `tower::ServiceExt::oneshot` to drive the router without binding a
//! TCP port. Every test builds fresh in-memory state.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt; // .oneshot()
use virtual_api_server::server::{build_router, AppState};
use virtual_api_server::ServerConfig;

const ADMIN_KEY: &str = "test-admin-key";

// ── Helpers ───────────────────────────────────────────────────

async fn make_state(endpoints_yaml: &str) -> AppState {
    let yaml = format!("admin:\n  api_key: {}\nendpoints:\n{}", ADMIN_KEY, endpoints_yaml);
    let config = ServerConfig::from_yaml(&yaml).unwrap();
    AppState::from_config(&config).await.unwrap()
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin(mut req: Request<Body>) -> Request<Body> {
    req.headers_mut()
        .insert("x-admin-key", ADMIN_KEY.parse().unwrap());
    req
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn logs(state: &AppState, count: usize) -> Value {
    for _ in 0..200 {
        if state.audit_log.len().await >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let resp = build_router(state.clone())
        .oneshot(admin(request(Method::GET, "/_system/logs")))
        .await
        .unwrap();
    body_json(resp).await
}

const USERS: &str = r#"
  - path: /users/:id
    method: GET
    response:
      statusCode: 200
      body:
        id: "{{params.id}}"
"#;

// ── Data plane ────────────────────────────────────────────────

#[tokio::test]
async fn get_user_renders_path_param() {
    let state = make_state(USERS).await;
    let resp = build_router(state.clone())
        .oneshot(request(Method::GET, "/api/users/123"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "id": "123" }));

    let entries = logs(&state, 1).await;
    assert_eq!(entries[0]["responseStatus"], 200);
    assert_eq!(entries[0]["path"], "/users/123");
}

#[tokio::test]
async fn unknown_route_returns_404_and_is_logged() {
    let state = make_state("  []\n").await;
    let resp = build_router(state.clone())
        .oneshot(request(Method::GET, "/api/anything"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(body_json(resp).await["error"].is_string());

    let entries = logs(&state, 1).await;
    assert_eq!(entries[0]["responseStatus"], 404);
    assert_eq!(entries[0]["error"], "Route not found");
}

#[tokio::test]
async fn missing_required_header_returns_400() {
    let state = make_state(
        r#"
  - path: /secure
    method: GET
    requiredHeaders: [x-token]
"#,
    )
    .await;

    let resp = build_router(state.clone())
        .oneshot(request(Method::GET, "/api/secure"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let entries = logs(&state, 1).await;
    assert_eq!(entries[0]["error"], "Missing Headers");

    let mut ok = request(Method::GET, "/api/secure");
    ok.headers_mut().insert("X-Token", "abc".parse().unwrap());
    let resp = build_router(state).oneshot(ok).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn schema_failure_returns_violation_details() {
    let state = make_state(
        r#"
  - path: /people
    method: POST
    bodySchema:
      type: object
      required: [name]
      properties:
        name: { type: string }
    response:
      statusCode: 201
      body:
        greeting: "Hi {{body.name}}"
"#,
    )
    .await;

    let resp = build_router(state.clone())
        .oneshot(json_request(Method::POST, "/api/people", json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "Schema validation failed");
    assert!(body["details"][0]["message"].as_str().unwrap().contains("name"));

    let resp = build_router(state)
        .oneshot(json_request(Method::POST, "/api/people", json!({ "name": "Ahmed" })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(body_json(resp).await, json!({ "greeting": "Hi Ahmed" }));
}

#[tokio::test]
async fn query_string_feeds_templates() {
    let state = make_state(
        r#"
  - path: /search
    method: GET
    response:
      body:
        q: "{{query.q}}"
        page: "{{query.page}}"
"#,
    )
    .await;

    let resp = build_router(state)
        .oneshot(request(Method::GET, "/api/search?q=rust%20lang"))
        .await
        .unwrap();
    assert_eq!(
        body_json(resp).await,
        json!({ "q": "rust lang", "page": "{{query.page}}" })
    );
}

#[tokio::test]
async fn query_and_path_values_are_decoded() {
    let state = make_state(
        r#"
  - path: /cities/:name
    method: GET
    response:
      body:
        name: "{{params.name}}"
        city: "{{query.city}}"
        flag: "{{query.flag}}"
"#,
    )
    .await;

    let resp = build_router(state)
        .oneshot(request(Method::GET, "/api/cities/caf%C3%A9?city=New+York&flag"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({ "name": "café", "city": "New York", "flag": "{{query.flag}}" })
    );
}

#[tokio::test]
async fn plain_text_body_is_not_parsed() {
    let state = make_state(
        r#"
  - path: /echo
    method: POST
    response:
      body:
        text: "{{body.text}}"
"#,
    )
    .await;

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/echo")
        .header("content-type", "text/plain")
        .body(Body::from("hello world"))
        .unwrap();
    let resp = build_router(state).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "text": "{{body.text}}" }));
}

#[tokio::test]
async fn random_id_is_generated_per_request() {
    let state = make_state(
        r#"
  - path: /ids
    method: GET
    response:
      body:
        id: "{{$randomId}}"
"#,
    )
    .await;

    let first = body_json(
        build_router(state.clone())
            .oneshot(request(Method::GET, "/api/ids"))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        build_router(state)
            .oneshot(request(Method::GET, "/api/ids"))
            .await
            .unwrap(),
    )
    .await;

    let id = first["id"].as_str().unwrap();
    assert_ne!(id, "{{$randomId}}");
    assert_eq!(id.len(), 36);
    assert_ne!(first["id"], second["id"]);
}

// ── Management API ────────────────────────────────────────────

#[tokio::test]
async fn management_requires_admin_key() {
    let state = make_state("  []\n").await;

    let resp = build_router(state.clone())
        .oneshot(request(Method::GET, "/_system/endpoints"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(body_json(resp).await["error"]
        .as_str()
        .unwrap()
        .contains("Invalid Admin Key"));

    let mut wrong = request(Method::GET, "/_system/endpoints");
    wrong.headers_mut().insert("x-admin-key", "nope".parse().unwrap());
    let resp = build_router(state).oneshot(wrong).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_then_serve_endpoint() {
    let state = make_state("  []\n").await;

    let definition = json!({
        "path": "/orders/:orderId",
        "method": "get",
        "response": { "statusCode": 200, "body": { "order": "{{params.orderId}}" } }
    });
    let resp = build_router(state.clone())
        .oneshot(admin(json_request(Method::POST, "/_system/create-endpoint", definition)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["message"], "Virtual API Created");
    assert!(created["id"].is_string());

    let resp = build_router(state)
        .oneshot(request(Method::GET, "/api/orders/77"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "order": "77" }));
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let state = make_state(USERS).await;

    let resp = build_router(state)
        .oneshot(admin(json_request(
            Method::POST,
            "/_system/create-endpoint",
            json!({ "path": "/users/:id", "method": "GET" }),
        )))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn update_and_delete_endpoint() {
    let state = make_state(USERS).await;

    let resp = build_router(state.clone())
        .oneshot(admin(request(Method::GET, "/_system/endpoints")))
        .await
        .unwrap();
    let list = body_json(resp).await;
    let id = list[0]["id"].as_str().unwrap().to_string();

    let updated = json!({
        "path": "/users/:id",
        "method": "GET",
        "response": { "statusCode": 202, "body": { "user": "{{params.id}}" } }
    });
    let resp = build_router(state.clone())
        .oneshot(admin(json_request(Method::PUT, &format!("/_system/endpoints/{}", id), updated)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["message"], "Updated Successfully");

    let resp = build_router(state.clone())
        .oneshot(request(Method::GET, "/api/users/5"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(resp).await, json!({ "user": "5" }));

    let resp = build_router(state.clone())
        .oneshot(admin(request(Method::DELETE, &format!("/_system/endpoints/{}", id))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = build_router(state)
        .oneshot(request(Method::GET, "/api/users/5"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_unknown_endpoint_returns_404() {
    let state = make_state("  []\n").await;
    let resp = build_router(state)
        .oneshot(admin(json_request(
            Method::PUT,
            "/_system/endpoints/missing",
            json!({ "path": "/x", "method": "GET" }),
        )))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_reports_counters() {
    let state = make_state(USERS).await;
    build_router(state.clone())
        .oneshot(request(Method::GET, "/api/users/1"))
        .await
        .unwrap();
    build_router(state.clone())
        .oneshot(request(Method::GET, "/api/nowhere"))
        .await
        .unwrap();

    let resp = build_router(state)
        .oneshot(admin(request(Method::GET, "/_system/stats")))
        .await
        .unwrap();
    let stats = body_json(resp).await;
    assert_eq!(stats["endpoints"], 1);
    assert_eq!(stats["dispatch"]["requests_total"], 2);
    assert_eq!(stats["dispatch"]["requests_unmatched"], 1);
}
