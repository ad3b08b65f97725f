use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::openai::{self, ChatCompletionRequest, ChunkMeta};
use crate::stream::{self, StreamChunk};
use crate::thinking::ThinkTagsMode;
use crate::upstream::{self, RequestIds};
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Lists models from the upstream catalog in OpenAI shape. Catalog failures
/// degrade to an empty list so clients keep working.
pub async fn list_models(State(state): State<AppState>) -> Response {
    let token = upstream::acquire_token(&state.http, &state.runtime).await;
    let data = match upstream::fetch_models(&state.http, &state.runtime, &token).await {
        Ok(catalog) => catalog
            .get("data")
            .and_then(|v| v.as_array())
            .map(|models| {
                models
                    .iter()
                    .map(|model| {
                        json!({
                            "id": model.get("id").and_then(|v| v.as_str()).unwrap_or(""),
                            "object": "model",
                            "created": model.get("created_at").and_then(|v| v.as_i64()).unwrap_or(0),
                            "owned_by": model.get("owned_by").and_then(|v| v.as_str()).unwrap_or("z.ai"),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
        Err(err) => {
            tracing::warn!("upstream model catalog fetch failed: {err}");
            Vec::new()
        }
    };
    Json(json!({ "object": "list", "data": data })).into_response()
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AppResult<Response> {
    authorize(&headers, &state)?;
    let req: ChatCompletionRequest = serde_json::from_value(body)
        .map_err(|err| AppError::bad_request("invalid_request", err.to_string()))?;
    if req.messages.is_empty() {
        return Err(AppError::bad_request(
            "invalid_request",
            "messages must not be empty",
        ));
    }
    tracing::debug!(model = %req.model, stream = req.stream, "chat completion request");

    let ids = RequestIds::generate();
    let token = upstream::acquire_token(&state.http, &state.runtime).await;
    let upstream_req = upstream::build_upstream_request(&req, &ids);
    let upstream_resp =
        upstream::call_completions(&state.http, &state.runtime, &upstream_req, &token)
            .await
            .map_err(|err| {
                tracing::warn!("upstream completion call failed: {err}");
                AppError::bad_gateway("upstream_error", err.to_string())
            })?;

    let mode = state.runtime.think_tags;
    if req.stream {
        Ok(Sse::new(stream_response(upstream_resp, mode, &req)).into_response())
    } else {
        let content = stream::collect_completion(upstream_resp, mode).await;
        Ok(Json(openai::completion_response(&req.model, &content)).into_response())
    }
}

fn authorize(headers: &HeaderMap, state: &AppState) -> AppResult<()> {
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if presented != state.runtime.downstream_key {
        return Err(AppError::unauthorized("invalid API key"));
    }
    Ok(())
}

/// Streaming assembler. The role chunk always leads; the translator's chunks
/// follow in arrival order; `Finished` closes with the finish chunk, an
/// optional usage chunk and the `[DONE]` marker. A downstream disconnect
/// drops the receiver, which unwinds through both channels and abandons the
/// upstream read.
fn stream_response(
    upstream_resp: reqwest::Response,
    mode: ThinkTagsMode,
    req: &ChatCompletionRequest,
) -> impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static {
    let meta = ChunkMeta::new(&req.model);
    let include_usage = req.include_usage();
    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(async move {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<StreamChunk>(64);
        let reader = tokio::spawn(stream::translate_stream(upstream_resp, mode, chunk_tx));

        let role = Event::default().data(openai::role_chunk(&meta).to_string());
        if tx.send(role).await.is_ok() {
            while let Some(chunk) = chunk_rx.recv().await {
                let event = match chunk {
                    StreamChunk::Content(text) => {
                        Event::default().data(openai::content_chunk(&meta, &text).to_string())
                    }
                    StreamChunk::Reasoning(text) => {
                        Event::default().data(openai::reasoning_chunk(&meta, &text).to_string())
                    }
                    StreamChunk::Finished => {
                        let finish = Event::default().data(openai::finish_chunk(&meta).to_string());
                        if tx.send(finish).await.is_ok() && include_usage {
                            let usage =
                                Event::default().data(openai::usage_chunk(&meta).to_string());
                            let _ = tx.send(usage).await;
                        }
                        let _ = tx.send(Event::default().data("[DONE]")).await;
                        break;
                    }
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        }
        drop(chunk_rx);
        let _ = reader.await;
    });
    tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok)
}
