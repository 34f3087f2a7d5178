//! Model endpoint implementations

pub mod openai;

use crate::stream::{ProviderEventStream, TurnEventStream, assemble_turn};
use crate::{Context, Error, Model, Result};
use async_trait::async_trait;

pub use openai::OpenAiCompatible;

/// Trait for streaming chat backends
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Open a streaming response. Returns once the endpoint has accepted the
    /// request, so connection and status failures surface here.
    async fn stream(&self, model: &Model, context: &Context) -> Result<ProviderEventStream>;
}

/// Run one turn against a backend and fold its output into turn events
pub async fn continue_turn(
    backend: &dyn ModelBackend,
    model: &Model,
    context: &Context,
) -> Result<TurnEventStream> {
    let raw = backend.stream(model, context).await?;
    Ok(assemble_turn(raw))
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provided_key_wins() {
        let key = get_api_key(Some("sk-test"), "RHO_TEST_UNSET_KEY_VAR").unwrap();
        assert_eq!(key, "sk-test");
    }

    #[test]
    fn test_missing_key_is_error() {
        let err = get_api_key(None, "RHO_TEST_UNSET_KEY_VAR").unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
    }
}
