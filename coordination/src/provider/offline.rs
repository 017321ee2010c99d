//! Deterministic offline provider.
//!
//! Used for tests, dry runs and air-gapped environments. Output depends only
//! on the input, so repeated runs produce identical cycles.

use async_trait::async_trait;

use super::{GenerateParams, LlmProvider, ProviderError};

/// Default embedding dimensionality.
pub const DEFAULT_EMBEDDING_DIM: usize = 64;

/// Provider that answers from a content digest instead of a model.
#[derive(Debug, Clone)]
pub struct OfflineProvider {
    name: String,
    embedding_dim: usize,
}

impl OfflineProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
        }
    }

    /// Override the embedding dimensionality.
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim.max(1);
        self
    }

    fn digest(system_prompt: Option<&str>, prompt: &str) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        if let Some(system) = system_prompt {
            hasher.update(system.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(prompt.as_bytes());
        hasher.finalize()
    }
}

#[async_trait]
impl LlmProvider for OfflineProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<String, ProviderError> {
        let digest = Self::digest(params.system_prompt.as_deref(), prompt).to_hex();
        Ok(format!("[offline:{} {}] {}", self.name, &digest[..12], prompt))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut reader = blake3::Hasher::new().update(text.as_bytes()).finalize_xof();
        let mut bytes = vec![0u8; self.embedding_dim];
        reader.fill(&mut bytes);
        Ok(bytes.into_iter().map(|b| b as f32 / 256.0).collect())
    }
}
