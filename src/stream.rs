use crate::thinking::{ThinkTagsMode, transform_thinking};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

/// Normalized unit produced by the translator. The assemblers add the
/// role-announcement chunk, the finish chunk, the optional usage chunk and
/// the `[DONE]` marker around this sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Content(String),
    Reasoning(String),
    Finished,
}

/// One decoded upstream SSE `data:` payload.
#[derive(Debug, Deserialize)]
pub struct UpstreamEvent {
    #[serde(default)]
    pub data: Option<UpstreamEventData>,
    #[serde(default)]
    pub error: Option<UpstreamError>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamEventData {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub delta_content: Option<String>,
    #[serde(default)]
    pub edit_content: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<UpstreamError>,
    #[serde(default)]
    pub data: Option<InnerEnvelope>,
}

#[derive(Debug, Deserialize)]
pub struct InnerEnvelope {
    #[serde(default)]
    pub error: Option<UpstreamError>,
}

#[derive(Debug, Deserialize)]
pub struct UpstreamError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl UpstreamEvent {
    /// Resolves the error carried anywhere in the record. Precedence: top
    /// level, then the data envelope, then one level deeper inside it.
    pub fn error(&self) -> Option<&UpstreamError> {
        self.error
            .as_ref()
            .or_else(|| self.data.as_ref().and_then(|d| d.error.as_ref()))
            .or_else(|| {
                self.data
                    .as_ref()
                    .and_then(|d| d.data.as_ref())
                    .and_then(|inner| inner.error.as_ref())
            })
    }
}

/// Per-stream state machine turning upstream payloads into [`StreamChunk`]s.
pub struct Translator {
    mode: ThinkTagsMode,
    answer_prelude_seen: bool,
}

impl Translator {
    pub fn new(mode: ThinkTagsMode) -> Self {
        Self {
            mode,
            answer_prelude_seen: false,
        }
    }

    /// Translates one `data:` payload. Returns the chunks to emit, in order,
    /// and whether the stream has terminated. After a terminal return the
    /// remainder of the upstream body must be abandoned.
    pub fn translate_payload(&mut self, payload: &str) -> (Vec<StreamChunk>, bool) {
        let mut out = Vec::new();
        let event: UpstreamEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!("skipping malformed upstream event: {err}");
                return (out, false);
            }
        };
        if let Some(err) = event.error() {
            tracing::warn!(
                code = err.code,
                "upstream signaled an error: {}",
                err.detail.as_deref().unwrap_or("unknown")
            );
            out.push(StreamChunk::Finished);
            return (out, true);
        }
        let Some(data) = event.data else {
            return (out, false);
        };
        let phase = data.phase.as_deref().unwrap_or("");

        // The first answer event may carry a full replacement that still
        // contains the tail of the thinking block; only the text after the
        // closing tag belongs to the answer. Fires at most once per stream.
        if !self.answer_prelude_seen && phase == "answer" {
            if let Some(edit) = data.edit_content.as_deref() {
                self.answer_prelude_seen = true;
                if let Some((_, tail)) = edit.split_once("</details>") {
                    if !tail.is_empty() {
                        out.push(StreamChunk::Content(tail.to_string()));
                    }
                }
            }
        }

        if let Some(delta) = data.delta_content.as_deref().filter(|d| !d.is_empty()) {
            if phase == "thinking" {
                let cleaned = transform_thinking(delta, self.mode);
                if !cleaned.is_empty() {
                    out.push(StreamChunk::Reasoning(cleaned));
                }
            } else {
                out.push(StreamChunk::Content(delta.to_string()));
            }
        }

        if data.done || phase == "done" {
            out.push(StreamChunk::Finished);
            return (out, true);
        }
        (out, false)
    }
}

/// Drives the upstream SSE body through the translator, sending chunks into
/// `tx`. Exactly one `Finished` is sent unless the receiver goes away first;
/// a dropped receiver aborts the upstream read, which closes the connection.
pub async fn translate_stream(
    upstream: reqwest::Response,
    mode: ThinkTagsMode,
    tx: mpsc::Sender<StreamChunk>,
) {
    let mut translator = Translator::new(mode);
    let mut stream = upstream.bytes_stream().eventsource();
    let mut finished = false;
    while let Some(event) = stream.next().await {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!("upstream sse decode error: {err}");
                continue;
            }
        };
        let payload = event.data.trim();
        if payload.is_empty() || payload == "[DONE]" {
            continue;
        }
        let (chunks, done) = translator.translate_payload(payload);
        for chunk in chunks {
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
        if done {
            finished = true;
            break;
        }
    }
    if !finished {
        // Upstream closed without a completion flag; terminate normally.
        let _ = tx.send(StreamChunk::Finished).await;
    }
}

/// Aggregating assembler: concatenates content chunks in arrival order into
/// one string. Reasoning chunks are dropped; the non-streaming completion
/// carries answer text only.
pub async fn collect_completion(upstream: reqwest::Response, mode: ThinkTagsMode) -> String {
    let (tx, mut rx) = mpsc::channel(64);
    let reader = tokio::spawn(translate_stream(upstream, mode, tx));
    let mut full = String::new();
    while let Some(chunk) = rx.recv().await {
        match chunk {
            StreamChunk::Content(text) => full.push_str(&text),
            StreamChunk::Reasoning(_) => {}
            StreamChunk::Finished => break,
        }
    }
    drop(rx);
    let _ = reader.await;
    full
}
