//! Model management for mimic.
//!
//! This crate provides:
//! - A catalog of small instruction-tuned models and identifier resolution
//! - Artifact download through the Hugging Face Hub cache
//! - Runtime handles wrapping llama.cpp for local inference
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    ModelSpec::resolve                │
//! │   catalog short name ──────┐   owner/repo listing    │
//! └────────────────────────────┼─────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            HubClient (download → LocalArtifact)      │
//! └────────────────────────────┬─────────────────────────┘
//!                              ▼
//! ┌──────────────────────────────────────────────────────┐
//! │        LlmHandle (llama.cpp, impl ChatModel)         │
//! └──────────────────────────────────────────────────────┘
//! ```

mod error;

pub mod catalog;
pub mod chat;
pub mod hub;
pub mod runtime;
pub mod template;

pub use catalog::{LocalArtifact, ModelSpec, known_models};
pub use chat::{
    ChatMessage, ChatModel, ChatRequest, ChunkIter, Completion, CompletionChunk, FinishReason,
};
pub use error::{Error, Result};
pub use hub::HubClient;
pub use runtime::{LlmHandle, LoadOptions};
