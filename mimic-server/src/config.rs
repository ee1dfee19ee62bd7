//! Serving configuration: the identifier → runtime-handle mapping.
//!
//! Built once before the worker starts and read-only afterwards, so request
//! handlers can share it without further synchronization.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::Arc;

use mimic_models::{ChatModel, HubClient, LlmHandle, LoadOptions, LocalArtifact, ModelSpec};

use crate::error::{Result, ServerError};

/// Immutable mapping from every configured identifier and alias to a shared
/// runtime handle.
#[derive(Clone)]
pub struct ServingConfig {
    models: Arc<HashMap<String, Arc<dyn ChatModel>>>,
}

impl ServingConfig {
    /// Resolve, download, and load every identifier, then wire aliases.
    ///
    /// Validation (non-empty set, alias targets present in the base set)
    /// happens before any network I/O. Two identifiers that resolve to the
    /// same artifact path share one loaded handle.
    pub fn build(model_names: &[String], aliases: &HashMap<String, String>) -> Result<Self> {
        validate(model_names, aliases)?;

        let hub = HubClient::new()?;
        let mut loaded: HashMap<PathBuf, Arc<LlmHandle>> = HashMap::new();
        let mut models: HashMap<String, Arc<dyn ChatModel>> = HashMap::new();

        for name in model_names {
            if models.contains_key(name) {
                continue; // duplicate identifiers are harmless
            }
            let artifact = fetch_artifact(&hub, name)?;
            let handle = match loaded.entry(artifact.path.clone()) {
                Entry::Occupied(entry) => {
                    tracing::debug!(model = %name, path = %artifact.path.display(), "reusing loaded handle");
                    Arc::clone(entry.get())
                }
                Entry::Vacant(entry) => {
                    let handle = Arc::new(LlmHandle::load(&artifact, &LoadOptions::default())?);
                    entry.insert(Arc::clone(&handle));
                    handle
                }
            };
            models.insert(name.clone(), handle);
        }

        for (alias, target) in aliases {
            let handle = models.get(target).cloned().ok_or_else(|| {
                ServerError::Config(format!("alias '{alias}' targets unknown model '{target}'"))
            })?;
            models.insert(alias.clone(), handle);
        }

        Ok(Self::from_handles(models))
    }

    /// Wrap an already-built mapping. Used by tests and embedders that
    /// supply their own [`ChatModel`] implementations.
    pub fn from_handles(models: HashMap<String, Arc<dyn ChatModel>>) -> Self {
        Self {
            models: Arc::new(models),
        }
    }

    /// Look up the handle serving an identifier or alias.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ChatModel>> {
        self.models.get(id).cloned()
    }

    /// Every configured identifier and alias, sorted.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of identifiers and aliases configured.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Pre-I/O validation: a non-empty identifier set, then alias targets
/// checked against the base set. Alias resolution is a single lookup, so an
/// alias targeting another alias is rejected here.
pub(crate) fn validate(
    model_names: &[String],
    aliases: &HashMap<String, String>,
) -> Result<()> {
    if model_names.is_empty() {
        return Err(ServerError::Config(
            "at least one model identifier is required".to_string(),
        ));
    }
    for (alias, target) in aliases {
        if !model_names.contains(target) {
            return Err(ServerError::Config(format!(
                "alias '{alias}' targets '{target}', which is not in the configured model set"
            )));
        }
    }
    Ok(())
}

/// Resolve and download one identifier.
pub(crate) fn fetch_artifact(hub: &HubClient, name: &str) -> Result<LocalArtifact> {
    let spec = ModelSpec::resolve(name, hub)?;
    Ok(spec.download(hub)?)
}

/// Resolve and download every identifier without loading any model.
///
/// Used by the process worker mode: the parent warms the artifact cache and
/// surfaces resolution/download errors with the construction-time taxonomy,
/// while the child process does the actual loading.
pub(crate) fn fetch_artifacts(model_names: &[String]) -> Result<Vec<LocalArtifact>> {
    let hub = HubClient::new()?;
    model_names
        .iter()
        .map(|name| fetch_artifact(&hub, name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_models::{ChatRequest, ChunkIter, Completion, CompletionChunk, FinishReason};

    struct FixedModel(&'static str);

    impl ChatModel for FixedModel {
        fn complete(&self, _request: &ChatRequest) -> mimic_models::Result<Completion> {
            Ok(Completion {
                text: self.0.to_string(),
                prompt_tokens: 1,
                completion_tokens: 1,
                finish_reason: FinishReason::Stop,
            })
        }

        fn complete_stream(&self, _request: &ChatRequest) -> mimic_models::Result<ChunkIter<'_>> {
            Ok(Box::new(std::iter::once(Ok(CompletionChunk {
                delta: None,
                finish_reason: Some(FinishReason::Stop),
            }))))
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn empty_model_set_is_rejected_before_io() {
        let err = validate(&[], &HashMap::new()).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn alias_to_missing_target_is_rejected() {
        let aliases = HashMap::from([("a".to_string(), "nope".to_string())]);
        let err = validate(&names(&["m"]), &aliases).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'a'"));
        assert!(text.contains("'nope'"));
    }

    #[test]
    fn alias_to_alias_is_rejected_naming_the_target() {
        // a2 -> a1 is invalid because a1 is itself an alias, not a base
        // identifier; resolution is a single non-recursive lookup.
        let aliases = HashMap::from([
            ("a1".to_string(), "m".to_string()),
            ("a2".to_string(), "a1".to_string()),
        ]);
        let err = validate(&names(&["m"]), &aliases).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("'a2'"));
        assert!(text.contains("'a1'"));
    }

    #[test]
    fn valid_aliases_pass_validation() {
        let aliases = HashMap::from([("a".to_string(), "m".to_string())]);
        assert!(validate(&names(&["m", "n"]), &aliases).is_ok());
    }

    #[test]
    fn build_with_invalid_aliases_fails_without_network() {
        // An unresolvable model name would fail later; the alias check
        // must reject first.
        let aliases = HashMap::from([("a".to_string(), "missing".to_string())]);
        let err = ServingConfig::build(&names(&["m"]), &aliases).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn from_handles_shares_and_sorts() {
        let handle: Arc<dyn ChatModel> = Arc::new(FixedModel("out"));
        let map: HashMap<String, Arc<dyn ChatModel>> = HashMap::from([
            ("m".to_string(), Arc::clone(&handle)),
            ("a".to_string(), Arc::clone(&handle)),
        ]);
        let config = ServingConfig::from_handles(map);

        assert_eq!(config.model_ids(), vec!["a".to_string(), "m".to_string()]);
        assert_eq!(config.len(), 2);
        assert!(!config.is_empty());

        let via_name = config.get("m").unwrap();
        let via_alias = config.get("a").unwrap();
        assert!(Arc::ptr_eq(&via_name, &via_alias));
        assert!(config.get("other").is_none());
    }

    #[test]
    #[ignore = "downloads models from huggingface.co"]
    fn integration_same_artifact_loads_once() {
        // The short name and its repo id resolve to the same gguf file, so
        // both identifiers must share one handle.
        let model_names = names(&["gemma-3-270m", "unsloth/gemma-3-270m-it-GGUF"]);
        let config = ServingConfig::build(&model_names, &HashMap::new()).unwrap();
        let by_short = config.get("gemma-3-270m").unwrap();
        let by_repo = config.get("unsloth/gemma-3-270m-it-GGUF").unwrap();
        assert!(Arc::ptr_eq(&by_short, &by_repo));
    }
}
