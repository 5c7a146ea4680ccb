use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ProviderId;

/// Machine-readable category of a failed provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind
{   /// Upstream throttled the request (HTTP 429)
    RateLimited
  , /// Key rejected or provider misconfigured (HTTP 401/403)
    BadCredentials
  , /// No answer within the call's bounded timeout
    Timeout
  , /// Upstream refused the payload as invalid (HTTP 400/422)
    MalformedRequest
  , /// Upstream 5xx or an unusable response body
    UpstreamFault
  , /// Policy or safety filtering (HTTP 451)
    ContentRejected
  , /// Account quota or billing exhausted
    QuotaExhausted
  , /// Anything not classified above
    Unknown
}

impl ErrorKind
{   /// Whether the same request is worth sending to another provider.
    pub fn retryable(self) -> bool
    {   !matches!(
          self
        , ErrorKind::BadCredentials
            | ErrorKind::MalformedRequest
            | ErrorKind::ContentRejected
        )
    }

    pub fn as_str(self) -> &'static str
    {   match self
        {   ErrorKind::RateLimited => "rate-limited"
          , ErrorKind::BadCredentials => "bad-credentials"
          , ErrorKind::Timeout => "timeout"
          , ErrorKind::MalformedRequest => "malformed-request"
          , ErrorKind::UpstreamFault => "upstream-fault"
          , ErrorKind::ContentRejected => "content-rejected"
          , ErrorKind::QuotaExhausted => "quota-exhausted"
          , ErrorKind::Unknown => "unknown"
        }
    }
}

impl fmt::Display for ErrorKind
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.as_str())
    }
}

/// Failure of one call against one provider
/// Implements Clone so the last failure can outlive the attempt loop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} failed ({kind}): {message}")]
pub struct ProviderError
{   pub provider: ProviderId
  , pub kind: ErrorKind
  , pub message: String
}

impl ProviderError
{   pub fn new(
      provider: ProviderId
    , kind: ErrorKind
    , message: impl Into<String>
    ) -> Self
    {   ProviderError
        {   provider
          , kind
          , message: message.into()
        }
    }

    pub fn timeout(provider: ProviderId, after: Duration) -> Self
    {   ProviderError::new(
          provider
        , ErrorKind::Timeout
        , format!("request timed out after {}ms", after.as_millis())
        )
    }

    pub fn retryable(&self) -> bool
    {   self.kind.retryable()
    }
}

/// Error returned by the orchestrator to its callers
#[derive(Debug, Error)]
pub enum Error
{   /// Nothing was registered at startup
    #[error("no generation providers are registered")]
    NoProviders
  , /// Every candidate was skipped or failed
    #[error(
      "all generation providers failed after {attempts} attempt(s); \
       last error: {last}"
    )]
    AllProvidersFailed
    {   last: ProviderError
      , attempts: usize
    }
  , /// The caller's outer deadline fired; `provider` is the call that
    /// was abandoned, or the next candidate if none was in flight
    #[error("deadline of {deadline_ms}ms exceeded at {provider}")]
    DeadlineExceeded
    {   provider: ProviderId
      , deadline_ms: u64
    }
  , #[error("provider not registered: {0}")]
    ProviderNotRegistered(ProviderId)
  , #[error("streaming not supported by {0}")]
    StreamingUnsupported(ProviderId)
  , /// Failure surfaced directly, without fallback (streaming path)
    #[error(transparent)]
    Provider(#[from] ProviderError)
  , #[error("invalid configuration: {0}")]
    InvalidConfiguration(String)
  , #[error("invalid request: {0}")]
    InvalidRequest(String)
  , #[error("background task failed: {0}")]
    Background(String)
  , #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error)
  , #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error)
}

impl Error
{   /// Provider the failure is attributed to, if any
    pub fn provider(&self) -> Option<ProviderId>
    {   match self
        {   Error::AllProvidersFailed { last, .. } => Some(last.provider)
          , Error::DeadlineExceeded { provider, .. } => Some(*provider)
          , Error::ProviderNotRegistered(id)
          | Error::StreamingUnsupported(id) => Some(*id)
          , Error::Provider(e) => Some(e.provider)
          , _ => None
        }
    }

    /// Machine-readable kind of the underlying provider failure, if any
    pub fn kind(&self) -> Option<ErrorKind>
    {   match self
        {   Error::AllProvidersFailed { last, .. } => Some(last.kind)
          , Error::DeadlineExceeded { .. } => Some(ErrorKind::Timeout)
          , Error::Provider(e) => Some(e.kind)
          , _ => None
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
