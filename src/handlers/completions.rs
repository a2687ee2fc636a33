//! Routed completions endpoint
//!
//! Handles POST /v1/completions. With `stream: true` the response is a
//! Server-Sent Events stream, one event per chunk, terminated by `[DONE]`.

use crate::backend::{CompletionRequest, ResponseChunk, TokenUsage};
use crate::error::AppError;
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::wrapper::{RoutedStream, WrapperType};
use axum::{
    Extension, Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;

/// Request body: a completion request plus an optional wrapper pin
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionBody {
    /// Route to this wrapper instead of selecting one
    #[serde(default)]
    pub wrapper: Option<String>,
    #[serde(flatten)]
    pub request: CompletionRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionReply {
    pub id: String,
    pub wrapper: String,
    pub wrapper_type: WrapperType,
    pub model: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One SSE `data:` payload
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReply<'a> {
    pub id: &'a str,
    pub wrapper: &'a str,
    pub index: usize,
    pub content: &'a str,
    pub finished: bool,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CompletionBody>,
) -> Result<Response, AppError> {
    tracing::debug!(
        request_id = %request_id,
        wrapper = ?body.wrapper,
        stream = body.request.stream,
        prompt_chars = body.request.prompt.chars().count(),
        "Received completion request"
    );

    let completion_id = format!("cmpl-{}", request_id.as_uuid().simple());

    if body.request.stream {
        let routed = state
            .service()
            .execute_stream_request(&body.request, body.wrapper.as_deref())
            .await?;

        tracing::info!(
            request_id = %request_id,
            wrapper_name = %routed.wrapper_name,
            "Starting streaming response"
        );

        let stream = create_sse_stream(routed, completion_id, request_id);
        return Ok(Sse::new(stream)
            .keep_alive(
                KeepAlive::new()
                    .interval(Duration::from_secs(15))
                    .text(":\n\n"),
            )
            .into_response());
    }

    let routed = state
        .service()
        .execute_request(&body.request, body.wrapper.as_deref())
        .await?;

    tracing::info!(
        request_id = %request_id,
        wrapper_name = %routed.wrapper_name,
        model = %routed.response.model,
        "Completion served"
    );

    Ok(Json(CompletionReply {
        id: completion_id,
        wrapper: routed.wrapper_name,
        wrapper_type: routed.wrapper_type,
        model: routed.response.model,
        content: routed.response.content,
        usage: routed.response.usage,
        finish_reason: routed.response.finish_reason,
    })
    .into_response())
}

/// Map chunks to events; the first error ends the stream with an `error`
/// event before `[DONE]`
fn create_sse_stream(
    routed: RoutedStream,
    completion_id: String,
    request_id: RequestId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let wrapper = routed.wrapper_name;
    let chunks = routed.stream.scan(false, move |failed, item| {
        if *failed {
            return futures::future::ready(None);
        }
        let event = match item {
            Ok(chunk) => chunk_event(&completion_id, &wrapper, &chunk),
            Err(e) => {
                *failed = true;
                tracing::warn!(
                    request_id = %request_id,
                    wrapper_name = %wrapper,
                    error = %e,
                    "Stream error during content delivery"
                );
                let payload = serde_json::json!({
                    "error": {
                        "message": e.to_string(),
                        "type": e.error_type(),
                    }
                });
                Event::default().event("error").data(payload.to_string())
            }
        };
        futures::future::ready(Some(Ok(event)))
    });

    chunks.chain(stream::once(async { Ok(Event::default().data("[DONE]")) }))
}

fn chunk_event(id: &str, wrapper: &str, chunk: &ResponseChunk) -> Event {
    let reply = ChunkReply {
        id,
        wrapper,
        index: chunk.index,
        content: &chunk.content,
        finished: chunk.finished,
    };
    Event::default().data(serde_json::to_string(&reply).unwrap_or_default())
}
