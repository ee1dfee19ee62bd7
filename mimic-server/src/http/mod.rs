//! HTTP router for the OpenAI-compatible surface.

mod openai;

use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub use openai::{
    ChatChoice, ChatChunkChoice, ChatCompletionChunk, ChatCompletionRequest,
    ChatCompletionResponse, ChatDelta, ErrorDetail, ErrorResponse, HealthResponse, ModelEntry,
    ModelsResponse, Usage, WireMessage,
};

/// Create the HTTP router with all routes configured.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(openai::health))
        .route("/v1/models", get(openai::list_models))
        .route("/v1/chat/completions", post(openai::chat_completions))
        .with_state(state)
}
