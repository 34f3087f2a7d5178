//! Streaming continuation client: one model turn per call

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rho_ai::providers::{self, ModelBackend};
use rho_ai::{Context, Error, Message, Model, Result, Tool, TurnEventStream};
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Performs one model turn and reports it as a cold stream of turn events
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `history` with `tools` to `model`. The returned stream always ends
    /// with exactly one `Done` or `Error` event.
    async fn continue_turn(
        &self,
        history: Vec<Message>,
        tools: Vec<Tool>,
        model: &Model,
        cancel: CancellationToken,
    ) -> Result<TurnEventStream>;
}

/// Transport over a model backend, retrying only the opening of the stream
pub struct ProviderTransport {
    backend: Arc<dyn ModelBackend>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            retry_config: RetryConfig::default(),
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn continue_turn(
        &self,
        history: Vec<Message>,
        tools: Vec<Tool>,
        model: &Model,
        cancel: CancellationToken,
    ) -> Result<TurnEventStream> {
        let context = Context {
            system_prompt: None,
            messages: history,
            tools,
        };

        let mut attempt = 0u32;
        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Aborted),
                r = providers::continue_turn(self.backend.as_ref(), model, &context) => r,
            };

            match opened {
                Ok(turn) => return Ok(turn),
                Err(e) if attempt < self.retry_config.max_retries && e.is_retryable() => {
                    let delay = self.retry_config.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.retry_config.max_retries + 1,
                        error = %e,
                        ?delay,
                        "Model request failed, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use rho_ai::{ProviderEvent, ProviderEventStream, TurnEvent};

    /// Backend that fails with the queued errors before succeeding.
    struct FlakyBackend {
        failures: Mutex<Vec<Error>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ModelBackend for FlakyBackend {
        async fn stream(&self, _model: &Model, _context: &Context) -> Result<ProviderEventStream> {
            *self.calls.lock() += 1;
            if let Some(e) = self.failures.lock().pop() {
                return Err(e);
            }
            Ok(Box::pin(tokio_stream::iter(vec![
                Ok(ProviderEvent::TextDelta("ok".into())),
                Ok(ProviderEvent::Finish("stop".into())),
            ])))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn model() -> Model {
        Model::openai_compatible("test", "http://localhost")
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retries_retryable_open_failures() {
        let backend = Arc::new(FlakyBackend {
            failures: Mutex::new(vec![Error::api(503, "unavailable"), Error::RateLimited { retry_after: None }]),
            calls: Mutex::new(0),
        });
        let transport = ProviderTransport::new(backend.clone()).with_retry_config(fast_retry());

        let stream = transport
            .continue_turn(vec![Message::user("hi")], vec![], &model(), CancellationToken::new())
            .await
            .unwrap();
        let events: Vec<TurnEvent> = stream.collect().await;

        assert_eq!(*backend.calls.lock(), 3);
        assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_does_not_retry_auth_errors() {
        let backend = Arc::new(FlakyBackend {
            failures: Mutex::new(vec![Error::Auth("bad key".into())]),
            calls: Mutex::new(0),
        });
        let transport = ProviderTransport::new(backend.clone()).with_retry_config(fast_retry());

        let result = transport
            .continue_turn(vec![], vec![], &model(), CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(*backend.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let backend = Arc::new(FlakyBackend {
            failures: Mutex::new((0..5).map(|_| Error::api(500, "boom")).collect()),
            calls: Mutex::new(0),
        });
        let transport = ProviderTransport::new(backend.clone()).with_retry_config(fast_retry());

        let result = transport
            .continue_turn(vec![], vec![], &model(), CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert_eq!(*backend.calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let backend = Arc::new(FlakyBackend {
            failures: Mutex::new(vec![]),
            calls: Mutex::new(0),
        });
        let transport = ProviderTransport::new(backend);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport.continue_turn(vec![], vec![], &model(), cancel).await;
        assert!(matches!(result, Err(Error::Aborted)));
    }
}
