//! Model identifier resolution.
//!
//! An identifier is either a short name from the built-in catalog or an
//! `owner/repo` Hugging Face reference. Short names resolve to a pinned
//! artifact; repo references are resolved dynamically by listing the repo's
//! files and picking the preferred quantization.

use std::path::PathBuf;

use crate::hub::HubClient;
use crate::{Error, Result};

/// Preferred quantization tag when picking among a repo's gguf files.
const PREFERRED_QUANT: &str = "q4_k_m";

/// Built-in catalog of short names: (name, repo id, artifact filename).
const CATALOG: &[(&str, &str, &str)] = &[
    (
        "qwen-2.5-coder-3b",
        "Qwen/Qwen2.5-Coder-3B-Instruct-GGUF",
        "qwen2.5-coder-3b-instruct-q4_k_m.gguf",
    ),
    (
        "qwen-2.5-coder-1.5b",
        "Qwen/Qwen2.5-Coder-1.5B-Instruct-GGUF",
        "qwen2.5-coder-1.5b-instruct-q4_k_m.gguf",
    ),
    (
        "llama-3.2-3b-instruct",
        "bartowski/Llama-3.2-3B-Instruct-GGUF",
        "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
    ),
    ("smollm3", "ggml-org/SmolLM3-3B-GGUF", "SmolLM3-Q4_K_M.gguf"),
    (
        "gemma-3-1b",
        "unsloth/gemma-3-1b-it-GGUF",
        "gemma-3-1b-it-Q4_K_M.gguf",
    ),
    (
        "gemma-3-270m",
        "unsloth/gemma-3-270m-it-GGUF",
        "gemma-3-270m-it-Q4_K_M.gguf",
    ),
];

/// A resolved model: identifier plus the artifact it downloads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// The identifier the spec was resolved from.
    pub name: String,
    /// Hugging Face repo id.
    pub repo_id: String,
    /// Artifact filename within the repo.
    pub filename: String,
}

/// A downloaded model artifact on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    /// The identifier the artifact was resolved from.
    pub name: String,
    /// Path to the gguf file.
    pub path: PathBuf,
}

impl ModelSpec {
    /// Resolve an identifier to a concrete artifact descriptor.
    ///
    /// Catalog short names resolve without touching the network. An
    /// `owner/repo` reference is resolved by listing the repo's files;
    /// anything else fails with [`Error::UnsupportedModel`].
    pub fn resolve(name: &str, hub: &HubClient) -> Result<Self> {
        if let Some(spec) = catalog_lookup(name) {
            return Ok(spec);
        }
        if name.contains('/') {
            return Self::from_repo(name, hub);
        }
        Err(Error::UnsupportedModel {
            name: name.to_string(),
            known: known_models().join(", "),
        })
    }

    /// Resolve an `owner/repo` reference by listing its files.
    fn from_repo(repo_id: &str, hub: &HubClient) -> Result<Self> {
        let files = hub.list_files(repo_id)?;
        let filename = select_gguf(&files).ok_or_else(|| Error::NoArtifact {
            repo: repo_id.to_string(),
        })?;
        tracing::debug!(repo = repo_id, file = %filename, "resolved repo artifact");
        Ok(Self {
            name: repo_id.to_string(),
            repo_id: repo_id.to_string(),
            filename,
        })
    }

    /// Download the artifact, returning its local path.
    pub fn download(&self, hub: &HubClient) -> Result<LocalArtifact> {
        hub.download(self)
    }
}

/// Look up a short name in the built-in catalog.
pub fn catalog_lookup(name: &str) -> Option<ModelSpec> {
    CATALOG
        .iter()
        .find(|(short, _, _)| *short == name)
        .map(|(short, repo_id, filename)| ModelSpec {
            name: (*short).to_string(),
            repo_id: (*repo_id).to_string(),
            filename: (*filename).to_string(),
        })
}

/// Short names available in the built-in catalog.
pub fn known_models() -> Vec<&'static str> {
    CATALOG.iter().map(|(short, _, _)| *short).collect()
}

/// Pick the artifact to download from a repo file listing.
///
/// Filters to `.gguf` files and prefers the `q4_k_m` quantization
/// (case-insensitive), falling back to the first gguf listed.
fn select_gguf(files: &[String]) -> Option<String> {
    let ggufs: Vec<&String> = files.iter().filter(|f| f.ends_with(".gguf")).collect();
    ggufs
        .iter()
        .find(|f| f.to_lowercase().contains(PREFERRED_QUANT))
        .or_else(|| ggufs.first())
        .map(|f| (*f).clone())
}
