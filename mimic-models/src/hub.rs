//! Hugging Face Hub access: repo file listings and artifact downloads.
//!
//! Credentials (`HF_TOKEN`) and the cache directory are resolved by the
//! `hf-hub` crate itself; downloads land in the shared Hugging Face cache,
//! so repeated harness runs reuse already-fetched artifacts.

use hf_hub::api::sync::{Api, ApiBuilder};

use crate::catalog::{LocalArtifact, ModelSpec};
use crate::{Error, Result};

/// Thin wrapper over the synchronous hub API.
pub struct HubClient {
    api: Api,
}

impl HubClient {
    /// Build a client, picking up `HF_TOKEN` from the environment when set.
    pub fn new() -> Result<Self> {
        let mut builder = ApiBuilder::new();
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        Ok(Self {
            api: builder.build()?,
        })
    }

    /// List the files available in a model repo.
    pub fn list_files(&self, repo_id: &str) -> Result<Vec<String>> {
        let info = self
            .api
            .model(repo_id.to_string())
            .info()
            .map_err(|source| Error::Resolution {
                repo: repo_id.to_string(),
                source,
            })?;
        Ok(info.siblings.into_iter().map(|s| s.rfilename).collect())
    }

    /// Fetch the spec's artifact into the local cache.
    pub fn download(&self, spec: &ModelSpec) -> Result<LocalArtifact> {
        tracing::info!(model = %spec.name, repo = %spec.repo_id, file = %spec.filename, "downloading model artifact");
        let path = self
            .api
            .model(spec.repo_id.clone())
            .get(&spec.filename)
            .map_err(|source| Error::Download {
                repo: spec.repo_id.clone(),
                filename: spec.filename.clone(),
                source,
            })?;
        Ok(LocalArtifact {
            name: spec.name.clone(),
            path,
        })
    }
}
