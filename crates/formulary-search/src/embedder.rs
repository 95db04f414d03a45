//! Term embedder: one vector per search term, bounded by the request deadline.

use formulary_core::{Error, Result};
use formulary_vector::EmbeddingProvider;
use std::sync::Arc;
use tokio::time::Instant;

/// Requests term vectors from the embedding collaborator.
///
/// Nothing is cached here; an empty vector, or one whose length differs from
/// the provider's declared dimension, is an embedding failure.
#[derive(Clone)]
pub struct TermEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
}

impl TermEmbedder {
    /// Wrap an embedding provider.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Embed one term, failing with a timeout error at `deadline`.
    pub async fn embed(&self, text: &str, deadline: Instant) -> Result<Vec<f32>> {
        let vector = tokio::time::timeout_at(deadline, self.provider.embed(text))
            .await
            .map_err(|_| {
                Error::timeout(format!("embedding '{text}' exceeded the request deadline"))
            })??;

        if vector.is_empty() {
            return Err(Error::embedding(format!(
                "provider {} returned an empty vector for '{text}'",
                self.provider.name()
            )));
        }

        let expected = self.provider.dimension();
        if expected > 0 && vector.len() != expected {
            return Err(Error::embedding(format!(
                "provider {} returned {} dimensions for '{text}', expected {expected}",
                self.provider.name(),
                vector.len()
            )));
        }

        Ok(vector)
    }
}

impl std::fmt::Debug for TermEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermEmbedder")
            .field("provider", &self.provider.name())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use formulary_vector::StaticEmbeddingProvider;
    use std::time::Duration;

    struct ScriptedProvider {
        vector: Vec<f32>,
        dimension: usize,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(self.delay).await;
            Ok(self.vector.clone())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_embed_passes_through() {
        let provider = StaticEmbeddingProvider::new(3).with_vector("crestor", vec![1.0, 0.0, 0.0]);
        let embedder = TermEmbedder::new(Arc::new(provider));
        let vector = embedder.embed("Crestor", far_deadline()).await.unwrap();
        assert_eq!(vector, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_embed_propagates_provider_error() {
        let provider = StaticEmbeddingProvider::new(3).fail_on("zocor");
        let embedder = TermEmbedder::new(Arc::new(provider));
        let err = embedder.embed("zocor", far_deadline()).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_and_wrong_dimension() {
        let empty = TermEmbedder::new(Arc::new(ScriptedProvider {
            vector: Vec::new(),
            dimension: 0,
            delay: Duration::ZERO,
        }));
        assert!(matches!(
            empty.embed("x", far_deadline()).await.unwrap_err(),
            Error::Embedding(_)
        ));

        let wrong = TermEmbedder::new(Arc::new(ScriptedProvider {
            vector: vec![1.0, 2.0],
            dimension: 3,
            delay: Duration::ZERO,
        }));
        assert!(matches!(
            wrong.embed("x", far_deadline()).await.unwrap_err(),
            Error::Embedding(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_embed_times_out_at_deadline() {
        let slow = TermEmbedder::new(Arc::new(ScriptedProvider {
            vector: vec![1.0],
            dimension: 1,
            delay: Duration::from_secs(10),
        }));
        let deadline = Instant::now() + Duration::from_millis(100);
        let err = slow.embed("x", deadline).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
