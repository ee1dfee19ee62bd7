//! Prompt rendering through the model's chat template.
//!
//! Some catalog models ship templates llama.cpp cannot apply (smollm3's
//! uses unsupported tags). Rather than patching the formatter, the adapter
//! tries the model's embedded template and falls back to neutral ChatML
//! formatting on any template failure.

use llama_cpp_2::model::{LlamaChatMessage, LlamaModel};

use crate::ChatMessage;

/// Render a conversation into a prompt string.
///
/// Never fails: a template the engine cannot handle downgrades to the
/// ChatML fallback.
pub fn render_chat(model: &LlamaModel, messages: &[ChatMessage]) -> String {
    match apply_native_template(model, messages) {
        Ok(prompt) => prompt,
        Err(reason) => {
            tracing::debug!(%reason, "chat template unusable, falling back to chatml");
            render_chatml(messages)
        }
    }
}

/// Apply the template embedded in the model file.
fn apply_native_template(
    model: &LlamaModel,
    messages: &[ChatMessage],
) -> std::result::Result<String, String> {
    let template = model.chat_template(None).map_err(|e| e.to_string())?;
    let chat: Vec<LlamaChatMessage> = messages
        .iter()
        .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| e.to_string())?;
    model
        .apply_chat_template(&template, &chat, true)
        .map_err(|e| e.to_string())
}

/// Neutral ChatML rendering, with the assistant cue appended.
fn render_chatml(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str("<|im_start|>");
        out.push_str(&message.role);
        out.push('\n');
        out.push_str(&message.content);
        out.push_str("<|im_end|>\n");
    }
    out.push_str("<|im_start|>assistant\n");
    out
}
