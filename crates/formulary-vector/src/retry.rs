//! Retry decorator for embedding providers.
//!
//! The search engine never retries a failed sub-query itself. Deployments
//! that want retries put them on the collaborator side by wrapping their
//! provider in [`RetryingEmbeddingProvider`].

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use formulary_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::EmbeddingProvider;

/// Wraps an embedding provider with exponential-backoff retries.
pub struct RetryingEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryingEmbeddingProvider {
    /// Creates a new retry wrapper with default settings.
    ///
    /// Default settings:
    /// - Max retries: 2
    /// - Initial delay: 50 milliseconds
    /// - Max delay: 500 milliseconds
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner: provider,
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
        }
    }

    /// Sets the maximum number of retries after the first attempt.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial delay between retries.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between retries.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    fn should_retry(error: &Error) -> bool {
        error.is_retryable()
    }
}

#[async_trait]
impl EmbeddingProvider for RetryingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts as usize);

        let provider = self.inner.clone();

        (|| async { provider.embed(text).await })
            .retry(backoff)
            .when(Self::should_retry)
            .notify(|err: &Error, dur: Duration| {
                log::warn!(
                    "embedding via '{}' failed, retrying in {:?}: {}",
                    self.inner.name(),
                    dur,
                    err
                );
            })
            .await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
