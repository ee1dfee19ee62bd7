//! OpenAI-compatible wire types and handlers.
//!
//! Two endpoints: model listing and chat completions (plain JSON or SSE
//! streaming). Request bodies tolerate unknown fields so newer client
//! libraries keep working against the harness.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use mimic_models::{ChatMessage, ChatModel, ChatRequest, Completion};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::state::AppState;

/// `created` value reported for catalog entries in the model listing.
const MODEL_CREATED: i64 = 1_677_610_602;

/// `owned_by` value reported in the model listing.
const OWNED_BY: &str = "mimic";

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

/// A chat message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /v1/chat/completions`. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

fn default_top_p() -> f32 {
    mimic_models::chat::DEFAULT_TOP_P
}

impl ChatCompletionRequest {
    fn to_chat_request(&self) -> ChatRequest {
        ChatRequest {
            messages: self
                .messages
                .iter()
                .map(|m| ChatMessage::new(m.role.clone(), m.content.clone()))
                .collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Response types
// ────────────────────────────────────────────────────────────────────────────

/// Response of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

/// One entry in the model listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Non-streaming chat completion object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

/// Chat completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: WireMessage,
    pub finish_reason: String,
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatCompletionResponse {
    fn new(id: String, model: String, completion: Completion) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created: epoch_secs(),
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: WireMessage {
                    role: "assistant".to_string(),
                    content: completion.text,
                },
                finish_reason: completion.finish_reason.as_str().to_string(),
            }],
            usage: Usage {
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
                total_tokens: completion.prompt_tokens + completion.completion_tokens,
            },
        }
    }
}

/// Streaming chunk object (`chat.completion.chunk`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChunkChoice>,
}

/// Streaming choice with a delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunkChoice {
    pub index: usize,
    pub delta: ChatDelta,
    pub finish_reason: Option<String>,
}

/// Delta content for streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    fn new(id: &str, model: &str, content: Option<String>, finish_reason: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: epoch_secs(),
            model: model.to_string(),
            choices: vec![ChatChunkChoice {
                index: 0,
                delta: ChatDelta {
                    role: if content.is_none() && finish_reason.is_none() {
                        Some("assistant".to_string())
                    } else {
                        None
                    },
                    content,
                },
                finish_reason,
            }],
        }
    }

    /// First chunk of a stream, carrying the assistant role only.
    fn initial(id: &str, model: &str) -> Self {
        Self::new(id, model, None, None)
    }
}

/// OpenAI-style error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// The `error` object inside an [`ErrorResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail {
            message,
            kind: kind.to_string(),
        },
    };
    (status, Json(body)).into_response()
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// Liveness response for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// `GET /v1/models` — every configured identifier and alias. Static for the
/// life of the server.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let data = state
        .models
        .model_ids()
        .into_iter()
        .map(|id| ModelEntry {
            id,
            object: "model".to_string(),
            created: MODEL_CREATED,
            owned_by: OWNED_BY.to_string(),
        })
        .collect();
    Json(ModelsResponse {
        object: "list".to_string(),
        data,
    })
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let Some(handle) = state.models.get(&request.model) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "model_not_found",
            format!("model '{}' not found", request.model),
        );
    };

    let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    let chat_request = request.to_chat_request();

    if request.stream {
        stream_completion(handle, chat_request, id, request.model)
    } else {
        complete_blocking(handle, chat_request, id, request.model).await
    }
}

/// Run a non-streaming completion on the blocking pool.
async fn complete_blocking(
    handle: Arc<dyn ChatModel>,
    request: ChatRequest,
    id: String,
    model: String,
) -> Response {
    let result = tokio::task::spawn_blocking(move || handle.complete(&request)).await;
    match result {
        Ok(Ok(completion)) => Json(ChatCompletionResponse::new(id, model, completion)).into_response(),
        Ok(Err(e)) => {
            tracing::warn!(model = %model, error = %e, "inference failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "inference_error",
                e.to_string(),
            )
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "inference_error",
            format!("inference task failed: {e}"),
        ),
    }
}

/// Respond with an SSE stream of `chat.completion.chunk` objects,
/// terminated by `data: [DONE]`.
fn stream_completion(
    handle: Arc<dyn ChatModel>,
    request: ChatRequest,
    id: String,
    model: String,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::channel::<Event>(32);
    tokio::task::spawn_blocking(move || pump_chunks(&handle, &request, &id, &model, &tx));
    let stream = ReceiverStream::new(rx).map(Ok::<Event, std::convert::Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Drive the blocking chunk iterator, forwarding chunks as SSE events.
/// Stops early if the client disconnects.
fn pump_chunks(
    handle: &Arc<dyn ChatModel>,
    request: &ChatRequest,
    id: &str,
    model: &str,
    tx: &tokio::sync::mpsc::Sender<Event>,
) {
    let send = |chunk: &ChatCompletionChunk| -> bool {
        match Event::default().json_data(chunk) {
            Ok(event) => tx.blocking_send(event).is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode stream chunk");
                false
            }
        }
    };

    if !send(&ChatCompletionChunk::initial(id, model)) {
        return;
    }

    match handle.complete_stream(request) {
        Ok(chunks) => {
            for item in chunks {
                match item {
                    Ok(chunk) => {
                        let finish = chunk.finish_reason.map(|r| r.as_str().to_string());
                        if !send(&ChatCompletionChunk::new(id, model, chunk.delta, finish)) {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(model, error = %e, "inference failed mid-stream");
                        send_error_event(tx, e.to_string());
                        break;
                    }
                }
            }
        }
        Err(e) => {
            tracing::warn!(model, error = %e, "inference failed");
            send_error_event(tx, e.to_string());
        }
    }

    let _ = tx.blocking_send(Event::default().data("[DONE]"));
}

/// The response status is already committed once streaming starts, so
/// failures are reported as an in-stream error object.
fn send_error_event(tx: &tokio::sync::mpsc::Sender<Event>, message: String) {
    let body = ErrorResponse {
        error: ErrorDetail {
            message,
            kind: "inference_error".to_string(),
        },
    };
    if let Ok(event) = Event::default().json_data(&body) {
        let _ = tx.blocking_send(event);
    }
}
