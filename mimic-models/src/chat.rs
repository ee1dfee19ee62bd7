//! Chat request/response types and the [`ChatModel`] seam.
//!
//! These are the neutral, wire-format-free types exchanged between the HTTP
//! router and a loaded runtime handle. The router owns the OpenAI JSON
//! marshalling; a [`ChatModel`] only sees messages and sampling parameters.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Default nucleus-sampling threshold when a request does not set one.
pub const DEFAULT_TOP_P: f32 = 0.95;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the sender ("system", "user", "assistant", ...). Passed
    /// through to the chat template verbatim.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an arbitrary role.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Sampling parameters and messages for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Cap on generated tokens. `None` uses the runtime default.
    pub max_tokens: Option<u32>,
    /// Sampling temperature. The default of 0.0 selects greedy sampling,
    /// which makes repeated identical requests byte-identical.
    pub temperature: f32,
    /// Nucleus-sampling threshold.
    pub top_p: f32,
}

impl ChatRequest {
    /// Create a request with default sampling (deterministic).
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: 0.0,
            top_p: DEFAULT_TOP_P,
        }
    }

    /// Set the generated-token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the nucleus-sampling threshold.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model produced an end-of-generation token.
    Stop,
    /// The `max_tokens` cap was reached.
    Length,
}

impl FinishReason {
    /// Wire-format string used by the OpenAI schema.
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
        }
    }
}

/// A complete (non-streaming) generation result.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Tokens in the rendered prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
}

/// One increment of a streaming generation.
///
/// The final chunk of a stream carries `finish_reason`; every chunk before
/// it carries a `delta`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionChunk {
    /// Newly generated text, if any.
    pub delta: Option<String>,
    /// Set on the final chunk only.
    pub finish_reason: Option<FinishReason>,
}

/// A finite, lazily produced sequence of chunks. Consumed once.
pub type ChunkIter<'a> = Box<dyn Iterator<Item = Result<CompletionChunk>> + 'a>;

/// The seam between the HTTP router and a loaded model.
///
/// Implemented by [`LlmHandle`](crate::LlmHandle) over llama.cpp and by
/// in-tree stubs in tests. Both operations are synchronous; callers that
/// serve async traffic run them on a blocking thread.
pub trait ChatModel: Send + Sync {
    /// Produce a complete response for the request.
    fn complete(&self, request: &ChatRequest) -> Result<Completion>;

    /// Produce the response incrementally. The returned iterator yields at
    /// least one chunk and ends with one whose `finish_reason` is set.
    fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkIter<'_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_are_deterministic() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        assert_eq!(request.temperature, 0.0);
        assert_eq!(request.top_p, DEFAULT_TOP_P);
        assert!(request.max_tokens.is_none());
    }

    #[test]
    fn request_builders_set_fields() {
        let request = ChatRequest::new(vec![])
            .with_max_tokens(32)
            .with_temperature(0.7)
            .with_top_p(0.9);
        assert_eq!(request.max_tokens, Some(32));
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.top_p, 0.9);
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
        assert_eq!(ChatMessage::new("tool", "t").role, "tool");
    }

    #[test]
    fn finish_reason_wire_strings() {
        assert_eq!(FinishReason::Stop.as_str(), "stop");
        assert_eq!(FinishReason::Length.as_str(), "length");
    }
}
