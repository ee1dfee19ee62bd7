//! Shared test utilities for mimic-server integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use mimic_models::{
    ChatModel, ChatRequest, ChunkIter, Completion, CompletionChunk, FinishReason,
};
use mimic_server::{LlmServer, ServerOptions, ServingConfig};

/// Stub model that answers with a fixed tag plus the last user message, so
/// tests can tell which underlying handle served a request.
pub struct StubModel {
    tag: &'static str,
}

impl StubModel {
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

impl ChatModel for StubModel {
    fn complete(&self, request: &ChatRequest) -> mimic_models::Result<Completion> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(Completion {
            text: format!("{}:{last}", self.tag),
            prompt_tokens: 1,
            completion_tokens: 1,
            finish_reason: FinishReason::Stop,
        })
    }

    fn complete_stream(&self, request: &ChatRequest) -> mimic_models::Result<ChunkIter<'_>> {
        let completion = self.complete(request)?;
        let chunks = vec![
            Ok(CompletionChunk {
                delta: Some(completion.text),
                finish_reason: None,
            }),
            Ok(CompletionChunk {
                delta: None,
                finish_reason: Some(FinishReason::Stop),
            }),
        ];
        Ok(Box::new(chunks.into_iter()))
    }
}

/// Serving configuration with one stub model under `id` and every alias
/// sharing the same handle.
#[allow(dead_code)]
pub fn stub_config(id: &str, aliases: &[&str]) -> ServingConfig {
    let handle: Arc<dyn ChatModel> = Arc::new(StubModel::new("stub"));
    let mut map: HashMap<String, Arc<dyn ChatModel>> = HashMap::new();
    map.insert(id.to_string(), Arc::clone(&handle));
    for alias in aliases {
        map.insert((*alias).to_string(), Arc::clone(&handle));
    }
    ServingConfig::from_handles(map)
}

/// Start a thread-mode server over a stub configuration.
#[allow(dead_code)]
pub fn start_stub_server(id: &str, aliases: &[&str]) -> LlmServer {
    let options = ServerOptions::new([id]);
    LlmServer::start_with_config(stub_config(id, aliases), &options)
        .expect("stub server should start")
}
