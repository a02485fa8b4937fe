use quarry_core::ProviderError;
use sha2::{Digest, Sha256};
use std::sync::Arc;

mod http_embeddings;
mod llm;

pub use http_embeddings::HttpEmbeddingProvider;
pub use llm::{
    COMPLETION_TIMEOUT, ChatMessage, EXPANSION_TIMEOUT, HttpLlmProvider, LlmChain, LlmProvider,
};

/// Backend for turning text into dense vectors.
///
/// Object-safe so backends can be swapped at runtime: a deterministic mock in
/// tests, an HTTP service in production, or a chain of both.
pub trait EmbeddingProvider: Send + Sync {
    /// Short stable identifier, used in error reporting.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Dimensionality of produced vectors.
    fn dimension(&self) -> usize;

    /// Cheap availability probe; unavailable providers are skipped by chains.
    fn is_available(&self) -> bool;

    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Batch embedding. The default loops over `embed` per item.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic hash-based embeddings for tests and offline operation.
///
/// The SHA-256 digest of the input is spread across the configured dimension
/// and L2-normalized: equal inputs give equal vectors, distinct inputs give
/// distinct directions, and no model has to be loaded.
pub struct MockEmbeddings {
    dimension: usize,
}

impl MockEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingProvider for MockEmbeddings {
    fn id(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        "mock-embeddings"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        true
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let hash = Sha256::digest(text.as_bytes());
        let bytes = hash.as_slice();
        let mut vector = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let byte = bytes[i % bytes.len()] as f32;
            let wrap = (i / bytes.len()) as f32;
            vector.push((byte + wrap * 31.0) % 256.0 / 127.5 - 1.0);
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Ordered chain of embedding providers: unavailable ones are skipped, the
/// first success wins, and only when every provider has failed does an
/// aggregate error escape.
pub struct EmbeddingChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
}

impl EmbeddingChain {
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Self {
        Self { providers }
    }

    fn first_available(&self) -> Option<&Arc<dyn EmbeddingProvider>> {
        self.providers.iter().find(|p| p.is_available())
    }

    fn try_each<T>(
        &self,
        op: impl Fn(&dyn EmbeddingProvider) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut failures: Vec<String> = Vec::new();
        for provider in &self.providers {
            if !provider.is_available() {
                failures.push(format!("{}: not available", provider.id()));
                continue;
            }
            match op(provider.as_ref()) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::debug!(provider = provider.id(), %err, "embedding provider failed");
                    failures.push(format!("{}: {err}", provider.id()));
                }
            }
        }
        Err(ProviderError::AllProvidersFailed {
            summary: if failures.is_empty() {
                "no providers configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }
}

impl EmbeddingProvider for EmbeddingChain {
    fn id(&self) -> &str {
        "chain"
    }

    fn name(&self) -> &str {
        "embedding-chain"
    }

    fn dimension(&self) -> usize {
        self.first_available()
            .or_else(|| self.providers.first())
            .map(|p| p.dimension())
            .unwrap_or(0)
    }

    fn is_available(&self) -> bool {
        self.first_available().is_some()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.try_each(|p| p.embed(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.try_each(|p| p.embed_batch(texts))
    }
}
