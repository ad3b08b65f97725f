use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const SYSTEM_FINGERPRINT: &str = "fp_zbridge_proxy";

/// Closed role set. The wire label `developer` is coerced to `system` at
/// decode time, so nothing downstream of deserialization sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "developer")]
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

impl ChatCompletionRequest {
    pub fn include_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .is_some_and(|opts| opts.include_usage)
    }
}

/// Identity shared by every chunk of one streamed response.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ChunkMeta {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: Utc::now().timestamp(),
            model: model.to_string(),
        }
    }
}

fn delta_chunk(meta: &ChunkMeta, delta: Value, finish_reason: Value) -> Value {
    json!({
        "id": meta.id,
        "object": "chat.completion.chunk",
        "created": meta.created,
        "model": meta.model,
        "system_fingerprint": SYSTEM_FINGERPRINT,
        "choices": [{
            "index": 0,
            "delta": delta,
            "logprobs": Value::Null,
            "finish_reason": finish_reason
        }]
    })
}

pub fn role_chunk(meta: &ChunkMeta) -> Value {
    delta_chunk(
        meta,
        json!({ "role": "assistant", "content": "" }),
        Value::Null,
    )
}

pub fn content_chunk(meta: &ChunkMeta, text: &str) -> Value {
    delta_chunk(meta, json!({ "content": text }), Value::Null)
}

pub fn reasoning_chunk(meta: &ChunkMeta, text: &str) -> Value {
    delta_chunk(meta, json!({ "reasoning_content": text }), Value::Null)
}

pub fn finish_chunk(meta: &ChunkMeta) -> Value {
    delta_chunk(meta, json!({}), json!("stop"))
}

/// Usage is not computed; the chunk carries zeros so clients that requested
/// `include_usage` still get a well-formed record.
pub fn usage_chunk(meta: &ChunkMeta) -> Value {
    json!({
        "id": meta.id,
        "object": "chat.completion.chunk",
        "created": meta.created,
        "model": meta.model,
        "system_fingerprint": SYSTEM_FINGERPRINT,
        "choices": [],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0
        }
    })
}

pub fn completion_response(model: &str, content: &str) -> Value {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content,
                "refusal": Value::Null,
                "annotations": []
            },
            "logprobs": Value::Null,
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0,
            "prompt_tokens_details": { "cached_tokens": 0, "audio_tokens": 0 },
            "completion_tokens_details": {
                "reasoning_tokens": 0,
                "audio_tokens": 0,
                "accepted_prediction_tokens": 0,
                "rejected_prediction_tokens": 0
            }
        },
        "service_tier": "default",
        "system_fingerprint": SYSTEM_FINGERPRINT
    })
}
