//! Provider contract and vendor adapters

pub mod openai_compat;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{ErrorKind, ProviderError};
use crate::request::{GenerationRequest, GenerationResponse};
use crate::ProviderId;

// Re-export for convenience
pub use openai_compat::OpenAiCompatProvider;

/// Lazy, finite, non-restartable sequence of text fragments from one
/// provider call; upstream failure arrives as a terminal `Err`
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// The only surface the orchestrator depends on.
///
/// Implementations make at most one upstream call per invocation and
/// never retry internally; retries across providers belong to the
/// orchestrator.
#[async_trait]
pub trait Provider: Send + Sync
{   fn id(&self) -> ProviderId;

    /// Model used for every call
    fn model(&self) -> &str;

    /// Models this provider can serve; `model()` is always among them
    fn available_models(&self) -> Vec<String>
    {   vec![self.model().to_string()]
    }

    /// One generation round trip, bounded by the provider's own timeout.
    async fn generate(
      &self
    , request: &GenerationRequest
    ) -> Result<GenerationResponse, ProviderError>;

    fn supports_streaming(&self) -> bool
    {   false
    }

    async fn generate_stream(
      &self
    , _request: &GenerationRequest
    ) -> Result<TextStream, ProviderError>
    {   Err(ProviderError::new(
          self.id()
        , ErrorKind::MalformedRequest
        , "streaming not supported"
        ))
    }

    /// Cheap liveness check. Returns false on any error.
    async fn health_probe(&self) -> bool;
}
