//! Unified request and response types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::{ProviderId, TaskKind};

pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Generation request; fields are private so a constructed request
/// cannot be changed afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest
{   task: TaskKind
  , prompt: String
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<Map<String, Value>>
  , max_tokens: u32
  , temperature: f32
  , #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_provider: Option<ProviderId>
}

impl GenerationRequest
{   /// Create a request with default sizing and sampling
    pub fn new(
      task: TaskKind
    , prompt: impl Into<String>
    ) -> Result<Self, Error>
    {   let prompt = prompt.into();
        if prompt.trim().is_empty()
        {   return Err(Error::InvalidRequest(
              "prompt must not be empty".to_string()
            ));
        }
        Ok(GenerationRequest
        {   task
          , prompt
          , context: None
          , max_tokens: DEFAULT_MAX_TOKENS
          , temperature: DEFAULT_TEMPERATURE
          , preferred_provider: None
        })
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self
    {   self.context = if context.is_empty() { None } else { Some(context) };
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32)
      -> Result<Self, Error>
    {   if max_tokens == 0
        {   return Err(Error::InvalidRequest(
              "max_tokens must be positive".to_string()
            ));
        }
        self.max_tokens = max_tokens;
        Ok(self)
    }

    pub fn with_temperature(mut self, temperature: f32)
      -> Result<Self, Error>
    {   if !(0.0..=1.0).contains(&temperature)
        {   return Err(Error::InvalidRequest(format!(
              "temperature {} outside 0.0..=1.0", temperature
            )));
        }
        self.temperature = temperature;
        Ok(self)
    }

    pub fn with_preferred_provider(mut self, provider: ProviderId) -> Self
    {   self.preferred_provider = Some(provider);
        self
    }

    pub fn task(&self) -> TaskKind
    {   self.task
    }

    pub fn prompt(&self) -> &str
    {   &self.prompt
    }

    pub fn context(&self) -> Option<&Map<String, Value>>
    {   self.context.as_ref()
    }

    pub fn max_tokens(&self) -> u32
    {   self.max_tokens
    }

    pub fn temperature(&self) -> f32
    {   self.temperature
    }

    pub fn preferred_provider(&self) -> Option<ProviderId>
    {   self.preferred_provider
    }
}

/// Generation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse
{   /// Generated text
    pub text: String
  , /// Provider that generated it
    pub provider: ProviderId
  , /// Model that generated it
    pub model: String
  , /// Tokens used, when the provider reports them
    pub tokens_used: Option<u32>
  , /// Wall-clock latency of the successful call
    pub latency_ms: u64
  , /// Served by a candidate other than the first one selected
    #[serde(default)]
    pub fallback: bool
}
