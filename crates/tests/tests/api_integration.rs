use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use enquiry_api::{build_app, ApiConfig, BOUNDARY_APOLOGY};
use serde_json::{json, Value};
use tower::ServiceExt;

const KEY: &str = "test-enquiry-key";

fn config() -> ApiConfig {
    let mut config = ApiConfig {
        api_key: KEY.to_string(),
        ..ApiConfig::default()
    };
    config.agent.rng_seed = Some(7);
    config
}

fn app() -> Router {
    build_app(&config()).expect("app should build")
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", KEY)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["classifier"], "weighted");
    assert_eq!(body["providers"], json!([]));
}

#[tokio::test]
async fn chat_requires_api_key() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "message": "hello" }).to_string()))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "unauthorized");
}

#[tokio::test]
async fn greeting_is_answered_locally() {
    let response = app()
        .oneshot(post("/v1/chat", json!({ "message": "hello" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["intent"], "greeting");
    assert_eq!(body["source"], "local");
    assert!(!body["response"].as_str().unwrap().is_empty());
    assert!(!body["session_id"].as_str().unwrap().is_empty());
    assert!(body["suggestions"].as_array().unwrap().len() <= 3);
    assert!(body.get("timestamp").is_some());
}

#[tokio::test]
async fn empty_and_missing_messages_are_rejected() {
    let app = app();

    for payload in [json!({ "message": "   " }), json!({ "session_id": "s-1" })] {
        let response = app.clone().oneshot(post("/v1/chat", payload)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "empty_message");
    }
}

#[tokio::test]
async fn gibberish_is_unknown_without_providers() {
    let response = app()
        .oneshot(post("/v1/chat", json!({ "message": "asdf qwer zxcv" })))
        .await
        .unwrap();
    let body = json_body(response).await;

    assert_eq!(body["intent"], "unknown");
    assert_eq!(body["confidence"], 0.0);
    assert_eq!(body["source"], "local");
    assert_ne!(body["response"], BOUNDARY_APOLOGY);
}

#[tokio::test]
async fn context_tracks_the_session_until_reset() {
    let app = app();

    let reply = json_body(
        app.clone()
            .oneshot(post(
                "/v1/chat",
                json!({ "message": "what documents are required for admission", "session_id": "s-42" }),
            ))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(reply["intent"], "documents_required");
    assert_eq!(reply["session_id"], "s-42");

    let response = app
        .clone()
        .oneshot(get("/v1/context?session_id=s-42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let context = json_body(response).await;
    assert_eq!(context["history_length"], 1);
    assert_eq!(context["message_count"], 1);
    assert_eq!(context["recent"].as_array().unwrap().len(), 1);
    assert!(context["asked_topics"]
        .as_array()
        .unwrap()
        .contains(&json!("admission")));

    let reset = json_body(
        app.clone()
            .oneshot(post("/v1/reset", json!({ "session_id": "s-42" })))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(reset["existed"], true);

    let response = app
        .oneshot(get("/v1/context?session_id=s-42"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn new_sessions_get_opening_suggestions() {
    let response = app()
        .oneshot(get("/v1/suggestions?session_id=never-seen"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let suggestions = body["suggestions"].as_array().unwrap();
    assert_eq!(suggestions.len(), 4);
    assert!(suggestions.contains(&json!("Tell me about admissions")));
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let mut config = config();
    config.rate_limit_max = 2;
    let app = build_app(&config).unwrap();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(get("/v1/suggestions?session_id=a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(get("/v1/suggestions?session_id=a"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(response).await["error"], "rate_limited");
}
