use crate::error::{AppError, AppResult};
use crate::thinking::ThinkTagsMode;
use axum::Router;
use axum::extract::Request;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub http: reqwest::Client,
}

/// Static configuration, resolved once at startup and injected everywhere.
/// Tests construct it directly instead of going through the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub upstream_base: String,
    pub downstream_key: String,
    pub upstream_token: String,
    pub anon_token_enabled: bool,
    pub think_tags: ThinkTagsMode,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let listen = env_or("ZBRIDGE_LISTEN", "0.0.0.0:8080");
        let upstream_base = env_or("ZBRIDGE_UPSTREAM_BASE", "https://chat.z.ai");
        let downstream_key = env_or("ZBRIDGE_DOWNSTREAM_KEY", "sk-dummy");
        let upstream_token = env_or("ZBRIDGE_UPSTREAM_TOKEN", "");
        let anon_token_enabled = match std::env::var("ZBRIDGE_ANON_TOKEN") {
            Ok(v) => matches!(v.trim(), "true" | "1"),
            Err(_) => true,
        };
        let think_tags = std::env::var("ZBRIDGE_THINK_TAGS")
            .ok()
            .and_then(|v| match v.trim().parse::<ThinkTagsMode>() {
                Ok(mode) => Some(mode),
                Err(err) => {
                    tracing::warn!("{err}, defaulting to strip");
                    None
                }
            })
            .unwrap_or_default();
        Self {
            listen,
            upstream_base,
            downstream_key,
            upstream_token,
            anon_token_enabled,
            think_tags,
        }
    }

    pub fn listen_addr(&self) -> AppResult<SocketAddr> {
        self.listen.parse().map_err(|err| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "listen_invalid",
                format!("invalid listen address {:?}: {err}", self.listen),
            )
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env())
}

pub fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let http = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|err| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;
    Ok(AppState {
        runtime: Arc::new(runtime),
        http,
    })
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);
    Router::new()
        .route("/v1/models", get(crate::handlers::list_models))
        .route(
            "/v1/chat/completions",
            post(crate::handlers::chat_completions),
        )
        .with_state(state)
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
}

// Preflight responses carry no body; the CORS layer answers them with 200.
async fn preflight_no_content(req: Request, next: Next) -> Response {
    let preflight = req.method() == Method::OPTIONS
        && req.headers().contains_key("access-control-request-method");
    let mut resp = next.run(req).await;
    if preflight && resp.status() == StatusCode::OK {
        *resp.status_mut() = StatusCode::NO_CONTENT;
    }
    resp
}
