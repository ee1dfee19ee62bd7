//! llama.cpp runtime handle.
//!
//! An [`LlmHandle`] owns one loaded model bound to a local gguf artifact.
//! Each generation request gets a fresh context, so requests never share KV
//! state and greedy sampling stays reproducible across calls. The handle is
//! shared (`Arc`) between every identifier and alias that maps to the same
//! artifact.

use std::num::NonZeroU32;
use std::sync::OnceLock;

use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;

use crate::catalog::LocalArtifact;
use crate::chat::{ChatModel, ChatRequest, ChunkIter, Completion, CompletionChunk, FinishReason};
use crate::{Error, Result, template};

/// Generated-token cap applied when a request does not set `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 256;

/// Fixed seed for the non-greedy sampler chain.
const SAMPLER_SEED: u32 = 42;

/// Wrapper so the process-wide backend can live in a `OnceLock`.
struct SharedBackend(LlamaBackend);

// SAFETY: llama_backend_init is global in the C library and the handle is
// only used to create models/contexts, which llama.cpp synchronizes.
unsafe impl Send for SharedBackend {}
unsafe impl Sync for SharedBackend {}

/// The C library's backend init is process-global; initialize it once and
/// share it. Loaded models are per-handle, never global.
fn backend() -> Result<&'static LlamaBackend> {
    static BACKEND: OnceLock<std::result::Result<SharedBackend, String>> = OnceLock::new();
    let entry = BACKEND.get_or_init(|| {
        LlamaBackend::init()
            .map(SharedBackend)
            .map_err(|e| e.to_string())
    });
    match entry {
        Ok(shared) => Ok(&shared.0),
        Err(e) => Err(Error::Load(format!("llama backend init: {e}"))),
    }
}

/// Options for loading a model.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Worker threads for inference. `None` detects from the host.
    pub n_threads: Option<i32>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            n_ctx: 2048,
            n_threads: None,
        }
    }
}

/// One loaded inference engine bound to a local artifact.
pub struct LlmHandle {
    model: LlamaModel,
    n_ctx: u32,
    n_threads: i32,
}

// SAFETY: LlamaModel is immutable after load; per-request contexts are
// created and dropped inside a single call.
unsafe impl Send for LlmHandle {}
unsafe impl Sync for LlmHandle {}

impl LlmHandle {
    /// Load a gguf artifact from disk.
    pub fn load(artifact: &LocalArtifact, options: &LoadOptions) -> Result<Self> {
        let backend = backend()?;
        let n_threads = options.n_threads.unwrap_or_else(default_threads);
        tracing::info!(model = %artifact.name, path = %artifact.path.display(), n_threads, "loading model");
        let params = LlamaModelParams::default();
        let model = LlamaModel::load_from_file(backend, &artifact.path, &params)
            .map_err(|e| Error::Load(format!("{}: {e}", artifact.path.display())))?;
        Ok(Self {
            model,
            n_ctx: options.n_ctx,
            n_threads,
        })
    }

    fn create_context(&self) -> Result<LlamaContext<'_>> {
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_threads(self.n_threads)
            .with_n_threads_batch(self.n_threads);
        self.model
            .new_context(backend()?, params)
            .map_err(|e| Error::Inference(format!("context: {e}")))
    }

    fn tokenize(&self, text: &str) -> Result<Vec<LlamaToken>> {
        self.model
            .str_to_token(text, AddBos::Always)
            .map_err(|e| Error::Inference(format!("tokenize: {e}")))
    }

    fn detokenize(&self, tokens: &[LlamaToken]) -> Result<String> {
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut out = String::new();
        for &token in tokens {
            let piece = self
                .model
                .token_to_piece(token, &mut decoder, false, None)
                .map_err(|e| Error::Inference(format!("detokenize: {e}")))?;
            out.push_str(&piece);
        }
        Ok(out)
    }

    /// Render the prompt, prefill the context, and prepare the sampler.
    fn prefill(&self, request: &ChatRequest) -> Result<(LlamaContext<'_>, Prefilled)> {
        let prompt = template::render_chat(&self.model, &request.messages);
        let tokens = self.tokenize(&prompt)?;
        let mut ctx = self.create_context()?;
        let mut batch = LlamaBatch::new(tokens.len().max(1), 1);
        add_prompt(&mut batch, &tokens)?;
        decode(&mut ctx, &mut batch)?;
        let mut sampler = build_sampler(request);
        sampler.accept_many(tokens.iter().copied());
        let prompt_tokens = u32::try_from(tokens.len()).unwrap_or(u32::MAX);
        Ok((
            ctx,
            Prefilled {
                batch,
                sampler,
                pos: tokens.len() as i32,
                prompt_tokens,
            },
        ))
    }
}

/// State carried out of the prompt prefill.
struct Prefilled {
    batch: LlamaBatch,
    sampler: LlamaSampler,
    pos: i32,
    prompt_tokens: u32,
}

impl ChatModel for LlmHandle {
    fn complete(&self, request: &ChatRequest) -> Result<Completion> {
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let (mut ctx, mut state) = self.prefill(request)?;
        let mut out = Vec::new();
        let mut finish_reason = FinishReason::Length;
        for _ in 0..max_tokens {
            // -1 samples from the last token that has logits computed.
            let token = state.sampler.sample(&ctx, -1);
            state.sampler.accept(token);
            if self.model.is_eog_token(token) {
                finish_reason = FinishReason::Stop;
                break;
            }
            out.push(token);
            state.batch.clear();
            add_one(&mut state.batch, token, state.pos)?;
            decode(&mut ctx, &mut state.batch)?;
            state.pos += 1;
        }
        let text = self.detokenize(&out)?;
        Ok(Completion {
            text,
            prompt_tokens: state.prompt_tokens,
            completion_tokens: u32::try_from(out.len()).unwrap_or(u32::MAX),
            finish_reason,
        })
    }

    fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkIter<'_>> {
        let max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let (ctx, state) = self.prefill(request)?;
        Ok(Box::new(CompletionStream {
            model: &self.model,
            ctx,
            batch: state.batch,
            sampler: state.sampler,
            decoder: encoding_rs::UTF_8.new_decoder(),
            pos: state.pos,
            remaining: max_tokens,
            done: false,
        }))
    }
}

/// Lazily samples one token per `next` call. Ends with a chunk carrying
/// `finish_reason`; not restartable.
struct CompletionStream<'m> {
    model: &'m LlamaModel,
    ctx: LlamaContext<'m>,
    batch: LlamaBatch,
    sampler: LlamaSampler,
    decoder: encoding_rs::Decoder,
    pos: i32,
    remaining: u32,
    done: bool,
}

impl Iterator for CompletionStream<'_> {
    type Item = Result<CompletionChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.remaining == 0 {
            self.done = true;
            return Some(Ok(CompletionChunk {
                delta: None,
                finish_reason: Some(FinishReason::Length),
            }));
        }
        let token = self.sampler.sample(&self.ctx, -1);
        self.sampler.accept(token);
        if self.model.is_eog_token(token) {
            self.done = true;
            return Some(Ok(CompletionChunk {
                delta: None,
                finish_reason: Some(FinishReason::Stop),
            }));
        }
        let piece = match self
            .model
            .token_to_piece(token, &mut self.decoder, false, None)
        {
            Ok(piece) => piece,
            Err(e) => {
                self.done = true;
                return Some(Err(Error::Inference(format!("detokenize: {e}"))));
            }
        };
        self.remaining -= 1;
        if self.remaining == 0 {
            self.done = true;
            return Some(Ok(CompletionChunk {
                delta: Some(piece),
                finish_reason: Some(FinishReason::Length),
            }));
        }
        self.batch.clear();
        if let Err(e) = add_one(&mut self.batch, token, self.pos) {
            self.done = true;
            return Some(Err(e));
        }
        if let Err(e) = decode(&mut self.ctx, &mut self.batch) {
            self.done = true;
            return Some(Err(e));
        }
        self.pos += 1;
        Some(Ok(CompletionChunk {
            delta: Some(piece),
            finish_reason: None,
        }))
    }
}

fn add_prompt(batch: &mut LlamaBatch, tokens: &[LlamaToken]) -> Result<()> {
    // Only the last prompt token needs logits; it is the sampling point.
    let n = tokens.len();
    for (i, &token) in tokens.iter().enumerate() {
        let logits = i == n - 1;
        batch
            .add(token, i as i32, &[0], logits)
            .map_err(|e| Error::Inference(format!("batch: {e}")))?;
    }
    Ok(())
}

fn add_one(batch: &mut LlamaBatch, token: LlamaToken, pos: i32) -> Result<()> {
    batch
        .add(token, pos, &[0], true)
        .map_err(|e| Error::Inference(format!("batch: {e}")))
}

fn decode(ctx: &mut LlamaContext<'_>, batch: &mut LlamaBatch) -> Result<()> {
    ctx.decode(batch)
        .map_err(|e| Error::Inference(format!("decode: {e}")))
}

/// Greedy when the temperature is zero (or below); otherwise a seeded
/// top-p → temperature → dist chain.
fn build_sampler(request: &ChatRequest) -> LlamaSampler {
    if request.temperature <= 0.0 {
        return LlamaSampler::greedy();
    }
    LlamaSampler::chain_simple([
        LlamaSampler::top_p(request.top_p, 1),
        LlamaSampler::temp(request.temperature),
        LlamaSampler::dist(SAMPLER_SEED),
    ])
}

/// Physical cores, then logical cores, then one.
fn default_threads() -> i32 {
    let mut cores = num_cpus::get_physical();
    if cores == 0 {
        cores = num_cpus::get();
    }
    if cores == 0 {
        cores = 1;
    }
    i32::try_from(cores).unwrap_or(1)
}
