//! Provider Seams
//!
//! The engine treats embedding and text generation as opaque collaborators
//! behind narrow traits. Implementations are injected at construction; no
//! hidden globals.

use async_trait::async_trait;

use crate::vectors;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Provider error type
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The generator is not wired up
    #[error("LLM provider not configured")]
    NotConfigured,
    /// Generation failed
    #[error("Generation failed: {0}")]
    Generation(String),
    /// The provider did not answer within its deadline
    #[error("Provider timed out after {0}ms")]
    Timeout(u64),
    /// Embedding failed
    #[error("Embedding failed: {0}")]
    Embedding(String),
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured => "LLM_NOT_CONFIGURED",
            ProviderError::Generation(_) => "LLM_GENERATION_ERROR",
            ProviderError::Timeout(_) => "TIMEOUT",
            ProviderError::Embedding(_) => "EMBEDDING_ERROR",
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Produces a fixed-dimension vector for a text.
///
/// Synchronous from the engine's point of view; callers never block on
/// network inside a store transaction.
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding dimension, >= 1 and constant for the provider's lifetime.
    fn dimension(&self) -> usize;

    /// Embed a text into a unit-length vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Generates text from a prompt under a system role.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, prompt: &str, system: &str) -> Result<String, ProviderError>;
}

// ============================================================================
// HASHING EMBEDDER
// ============================================================================

/// Default embedding dimension (matches the stored-vector layout).
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 256;

/// Deterministic local embedder.
///
/// Feature-hashes word bigrams into a fixed-dimension unit vector. Texts
/// sharing vocabulary land near each other, which is enough for clustering
/// and similarity search when no external model is wired up.
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn hash_token(token: &str) -> u64 {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        if tokens.is_empty() {
            return Err(ProviderError::Embedding("empty text".to_string()));
        }

        for (i, token) in tokens.iter().enumerate() {
            let unigram = Self::hash_token(token);
            let slot = (unigram % self.dimension as u64) as usize;
            let sign = if (unigram >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;

            if let Some(next) = tokens.get(i + 1) {
                let bigram = Self::hash_token(&format!("{} {}", token, next));
                let slot = (bigram % self.dimension as u64) as usize;
                let sign = if (bigram >> 32) & 1 == 0 { 1.0 } else { -1.0 };
                vector[slot] += 0.5 * sign;
            }
        }

        vectors::normalize(&mut vector);
        Ok(vector)
    }
}
