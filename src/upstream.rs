use crate::app::RuntimeConfig;
use crate::openai::{ChatCompletionRequest, ChatMessage};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Fixed routing identifier sent as the upstream `model` field. The
/// client-visible model name only selects feature toggles and is never
/// forwarded.
pub const UPSTREAM_MODEL_ID: &str = "0727-360B-API";
pub const SEARCH_MCP_SERVER: &str = "deep-web-search";

const ANON_TOKEN_TIMEOUT_MS: u64 = 10_000;

/// Browser-profile headers the upstream expects on every call.
const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36 Edg/139.0.0.0",
    ),
    ("Accept-Language", "zh-CN, en-US"),
    (
        "sec-ch-ua",
        "\"Not;A=Brand\";v=\"99\", \"Microsoft Edge\";v=\"139\", \"Chromium\";v=\"139\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"Windows\""),
    ("X-FE-Version", "prod-fe-1.0.70"),
];

#[derive(Debug, Error)]
pub enum UpstreamCallError {
    #[error("upstream request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("upstream response malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    Default,
    Thinking,
    Search,
}

impl ModelVariant {
    /// Suffix on the client-visible model name selects the variant.
    pub fn from_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.ends_with("-search") {
            ModelVariant::Search
        } else if lower.ends_with("-thinking") {
            ModelVariant::Thinking
        } else {
            ModelVariant::Default
        }
    }

    fn thinking_enabled(self) -> bool {
        !matches!(self, ModelVariant::Default)
    }
}

/// Per-call chat and message identifiers. Epoch millis plus a v4 uuid keeps
/// concurrent calls from colliding.
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub chat_id: String,
    pub message_id: String,
}

impl RequestIds {
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        Self {
            chat_id: format!("{millis}-{}", uuid::Uuid::new_v4().simple()),
            message_id: format!("{millis}-{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Features {
    pub enable_thinking: bool,
    pub web_search: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundTasks {
    pub title_generation: bool,
    pub tags_generation: bool,
}

/// Wire request toward the upstream chat service. Always streamed regardless
/// of the downstream preference; built once per call, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub stream: bool,
    pub chat_id: String,
    pub id: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub params: Value,
    pub features: Features,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,
    pub background_tasks: BackgroundTasks,
}

pub fn build_upstream_request(req: &ChatCompletionRequest, ids: &RequestIds) -> UpstreamRequest {
    let variant = ModelVariant::from_model(&req.model);
    let mcp_servers = if variant == ModelVariant::Search {
        vec![SEARCH_MCP_SERVER.to_string()]
    } else {
        Vec::new()
    };
    UpstreamRequest {
        stream: true,
        chat_id: ids.chat_id.clone(),
        id: ids.message_id.clone(),
        model: UPSTREAM_MODEL_ID.to_string(),
        messages: req.messages.clone(),
        params: Value::Object(serde_json::Map::new()),
        features: Features {
            enable_thinking: variant.thinking_enabled(),
            web_search: variant == ModelVariant::Search,
        },
        mcp_servers,
        background_tasks: BackgroundTasks {
            title_generation: false,
            tags_generation: false,
        },
    }
}

fn apply_browser_headers(mut req: reqwest::RequestBuilder, base: &str) -> reqwest::RequestBuilder {
    for (name, value) in BROWSER_HEADERS {
        req = req.header(*name, *value);
    }
    req.header("Origin", base)
}

fn base_url(runtime: &RuntimeConfig) -> &str {
    runtime.upstream_base.trim_end_matches('/')
}

/// Returns a token for the next upstream call. Prefers a fresh anonymous
/// credential; any acquisition failure falls back to the configured static
/// token and is only logged. Tokens are never cached across requests.
pub async fn acquire_token(client: &reqwest::Client, runtime: &RuntimeConfig) -> String {
    if !runtime.anon_token_enabled {
        return runtime.upstream_token.clone();
    }
    match fetch_anonymous_token(client, runtime).await {
        Ok(token) => {
            tracing::debug!("anonymous token acquired");
            token
        }
        Err(err) => {
            tracing::warn!("anonymous token fetch failed, using configured token: {err}");
            runtime.upstream_token.clone()
        }
    }
}

async fn fetch_anonymous_token(
    client: &reqwest::Client,
    runtime: &RuntimeConfig,
) -> Result<String, UpstreamCallError> {
    let base = base_url(runtime);
    let req = client
        .get(format!("{base}/api/v1/auths/"))
        .timeout(std::time::Duration::from_millis(ANON_TOKEN_TIMEOUT_MS))
        .header("Referer", format!("{base}/"));
    let resp = apply_browser_headers(req, base).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UpstreamCallError::Status { status, body });
    }
    let value: Value = resp.json().await?;
    value
        .get("token")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .ok_or_else(|| UpstreamCallError::Malformed("missing token field".to_string()))
}

/// Issues the completion call and hands back the raw streaming response.
/// A non-2xx status is fatal for the request; no retry.
pub async fn call_completions(
    client: &reqwest::Client,
    runtime: &RuntimeConfig,
    body: &UpstreamRequest,
    token: &str,
) -> Result<reqwest::Response, UpstreamCallError> {
    let base = base_url(runtime);
    let req = client
        .post(format!("{base}/api/chat/completions"))
        .json(body)
        .bearer_auth(token)
        .header("Accept", "application/json, text/event-stream")
        .header("Referer", format!("{base}/c/{}", body.chat_id))
        .header("Cookie", format!("token={token}"));
    let resp = apply_browser_headers(req, base).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UpstreamCallError::Status { status, body });
    }
    Ok(resp)
}

/// Fetches the upstream model catalog as raw JSON.
pub async fn fetch_models(
    client: &reqwest::Client,
    runtime: &RuntimeConfig,
    token: &str,
) -> Result<Value, UpstreamCallError> {
    let base = base_url(runtime);
    let req = client
        .get(format!("{base}/api/models"))
        .timeout(std::time::Duration::from_millis(ANON_TOKEN_TIMEOUT_MS))
        .bearer_auth(token)
        .header("Accept", "application/json")
        .header("Referer", format!("{base}/"))
        .header("Cookie", format!("token={token}"));
    let resp = apply_browser_headers(req, base).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UpstreamCallError::Status { status, body });
    }
    Ok(resp.json().await?)
}
