pub mod config;
mod rate_limit;

use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, Request, State};
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, Response as HttpResponse, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use enquiry_agents::{EnquiryAgent, ProviderChain};
use enquiry_core::{ChatInput, EnquiryError, KnowledgeBase};
use enquiry_observability::{AppMetrics, MetricsSnapshot};
use enquiry_storage::MemoryContextStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub use config::ApiConfig;
use rate_limit::IpRateLimiter;

/// Body returned for any failure the client cannot act on.
pub const BOUNDARY_APOLOGY: &str = "I'm sorry, I encountered an error. Please try again.";

const RECENT_EXCHANGES: usize = 5;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    agent: Arc<EnquiryAgent<MemoryContextStore>>,
    metrics: Arc<AppMetrics>,
    api_key: Arc<String>,
    limiter: IpRateLimiter,
    allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionRequest {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    classifier: &'static str,
    providers: Vec<String>,
    active_sessions: usize,
    metrics: MetricsSnapshot,
}

pub fn build_app(config: &ApiConfig) -> Result<Router> {
    let knowledge = KnowledgeBase::load(config.knowledge_dir.as_deref())?;
    let providers = ProviderChain::from_settings(&config.providers)?;
    let store = MemoryContextStore::with_limits(config.agent.limits);
    let metrics = AppMetrics::shared();

    let agent = EnquiryAgent::new(
        &knowledge,
        store,
        config.agent.clone(),
        providers,
        metrics.clone(),
    );
    info!(
        classifier = agent.classifier_name(),
        providers = ?agent.provider_names(),
        intents = knowledge.intents.intents.len(),
        "enquiry agent ready"
    );

    let state = ApiState {
        agent: Arc::new(agent),
        metrics,
        api_key: Arc::new(config.api_key.clone()),
        limiter: IpRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
        allowed_origins: Arc::new(config.allowed_origins.clone()),
    };

    Ok(build_router(state))
}

fn build_router(state: ApiState) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let cors = build_cors_layer(&state.allowed_origins);

    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/reset", post(reset))
        .route("/v1/suggestions", get(suggestions))
        .route("/v1/context", get(context))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            timestamp_utc: Utc::now().to_rfc3339(),
            classifier: state.agent.classifier_name(),
            providers: state.agent.provider_names(),
            active_sessions: state.agent.session_count(),
            metrics: state.metrics.snapshot(),
        }),
    )
}

async fn chat(State(state): State<ApiState>, Json(request): Json<ChatRequest>) -> Response {
    let input = ChatInput {
        session_id: request.session_id,
        message: request.message.unwrap_or_default(),
    };

    match state.agent.handle_chat(input).await {
        Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
        Err(EnquiryError::EmptyMessage) => error_response(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "message must not be empty",
        ),
        Err(err) => {
            error!(error = %err, "chat turn failed");
            boundary_error()
        }
    }
}

async fn reset(State(state): State<ApiState>, Json(request): Json<SessionRequest>) -> Response {
    let existed = state.agent.reset(&request.session_id);
    (
        StatusCode::OK,
        Json(json!({
            "status": "reset",
            "session_id": request.session_id,
            "existed": existed,
        })),
    )
        .into_response()
}

async fn suggestions(
    State(state): State<ApiState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let session_id = query.session_id.unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({ "suggestions": state.agent.suggestions(&session_id) })),
    )
        .into_response()
}

async fn context(State(state): State<ApiState>, Query(query): Query<SessionQuery>) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.trim().is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_session",
            "session_id query parameter is required",
        );
    };

    match state.agent.context(&session_id, RECENT_EXCHANGES) {
        Some(view) => (StatusCode::OK, Json(view)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "unknown_session",
            "no active session with that id",
        ),
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": code, "message": message }))).into_response()
}

fn boundary_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "response": BOUNDARY_APOLOGY, "error": true })),
    )
        .into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> HttpResponse<String> {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "handler panicked");

    let body = json!({ "response": BOUNDARY_APOLOGY, "error": true }).to_string();
    let mut response = HttpResponse::new(body);
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

async fn api_key_middleware(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS || is_public_path(req.uri().path()) {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided != state.api_key.as_str() {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid x-api-key",
        );
    }

    next.run(req).await
}

async fn rate_limit_middleware(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS || is_public_path(req.uri().path()) {
        return next.run(req).await;
    }

    let ip = request_ip(req.headers());
    if !state.limiter.allow(&ip) {
        warn!(ip = %ip, "rate limit exceeded");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded for this IP",
        );
    }

    next.run(req).await
}

fn is_public_path(path: &str) -> bool {
    path == "/health"
}

fn request_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-api-key")])
}
