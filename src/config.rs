//! Configuration for providers and orchestration timing

use std::path::Path;
use std::time::Duration;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ProviderId;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 5 * 60;

pub const REQUEST_TIMEOUT_VAR: &str = "GENROUTE_REQUEST_TIMEOUT_SECS";
pub const PROBE_TIMEOUT_VAR: &str = "GENROUTE_PROBE_TIMEOUT_SECS";
pub const HEALTH_INTERVAL_VAR: &str = "GENROUTE_HEALTH_INTERVAL_SECS";

/// Vendor wired to each role when configured from the environment
struct RoleDefaults
{   id: ProviderId
  , keys_var: &'static str
  , base_url: &'static str
  , model: &'static str
  , models: &'static [&'static str]
}

const ROLE_DEFAULTS: [RoleDefaults; 3] = [
  RoleDefaults
  {   id: ProviderId::FastTier
    , keys_var: "CEREBRAS_API_KEYS"
    , base_url: "https://api.cerebras.ai/v1"
    , model: "llama-3.3-70b"
    , models: &[
        "llama3.1-8b"
      , "llama-3.3-70b"
      , "gpt-oss-120b"
      , "qwen-3-32b"
      , "qwen-3-235b-a22b-instruct-2507"
      , "qwen-3-235b-a22b-thinking-2507"
      , "zai-glm-4.6"
      ]
  }
, RoleDefaults
  {   id: ProviderId::CapableTier
    , keys_var: "GEMINI_API_KEYS"
    , base_url: "https://generativelanguage.googleapis.com/v1beta/openai"
    , model: "gemini-2.0-flash-exp"
    , models: &["gemini-2.0-flash-exp", "gemini-1.5-pro", "gemini-1.5-flash"]
  }
, RoleDefaults
  {   id: ProviderId::ReliableTier
    , keys_var: "NVIDIA_API_KEYS"
    , base_url: "https://integrate.api.nvidia.com/v1"
    , model: "meta/llama-3.1-70b-instruct"
    , models: &[
        "meta/llama-3.1-405b-instruct"
      , "meta/llama-3.1-70b-instruct"
      , "meta/llama-3.1-8b-instruct"
      , "mistralai/mistral-large-2-instruct"
      , "google/gemma-2-27b-it"
      ]
  }
];

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig
{   /// Role this provider fills
    pub id: ProviderId
  , /// API base URL, without trailing slash
    pub base_url: String
  , /// Model requested from the upstream
    pub model: String
  , /// Keys rotated round-robin, one per call
    pub api_keys: Vec<String>
  , /// Models the upstream offers; `model` must be one of them.
    /// Empty means `model` alone.
    #[serde(default)]
    pub models: Vec<String>
  , /// Per-call timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>
}

impl ProviderConfig
{   /// Built-in vendor defaults for a role
    pub fn for_role(id: ProviderId, api_keys: Vec<String>) -> Self
    {   let defaults = role_defaults(id);
        ProviderConfig
        {   id
          , base_url: defaults.base_url.to_string()
          , model: defaults.model.to_string()
          , models: defaults.models.iter().map(|m| m.to_string()).collect()
          , api_keys
          , timeout_secs: None
        }
    }

    /// Built-in default model for a role
    pub fn default_model(id: ProviderId) -> &'static str
    {   role_defaults(id).model
    }

    /// Environment variable holding this role's key list
    pub fn keys_var(id: ProviderId) -> &'static str
    {   role_defaults(id).keys_var
    }
}

fn role_defaults(id: ProviderId) -> &'static RoleDefaults
{   match id
    {   ProviderId::FastTier => &ROLE_DEFAULTS[0]
      , ProviderId::CapableTier => &ROLE_DEFAULTS[1]
      , ProviderId::ReliableTier => &ROLE_DEFAULTS[2]
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig
{   /// Providers to build; roles without keys are left out
    #[serde(default)]
    pub providers: Vec<ProviderConfig>
  , /// Bound on each generate attempt
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64
  , /// Bound on each health probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64
  , /// Period of the background health scheduler
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64
}

fn default_request_timeout() -> u64 { DEFAULT_REQUEST_TIMEOUT_SECS }
fn default_probe_timeout() -> u64 { DEFAULT_PROBE_TIMEOUT_SECS }
fn default_health_interval() -> u64 { DEFAULT_HEALTH_INTERVAL_SECS }

impl Default for OrchestratorConfig
{   fn default() -> Self
    {   OrchestratorConfig
        {   providers: vec![]
          , request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS
          , probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS
          , health_check_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS
        }
    }
}

impl OrchestratorConfig
{   /// Read credentials and timing from the process environment
    pub fn from_env() -> Result<Self, Error>
    {   Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, with variables resolved through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
      F: Fn(&str) -> Option<String>
    {   let mut config = OrchestratorConfig::default();

        for defaults in ROLE_DEFAULTS.iter()
        {   let keys = lookup(defaults.keys_var)
              .map(|v| parse_api_keys(&v))
              .unwrap_or_default();
            if keys.is_empty()
            {   info!(
                  "{} not set, {} will not be registered"
                , defaults.keys_var
                , defaults.id
                );
                continue;
            }
            debug!("{} configured with {} key(s)", defaults.id, keys.len());
            config.providers.push(
              ProviderConfig::for_role(defaults.id, keys)
            );
        }

        if let Some(v) = lookup(REQUEST_TIMEOUT_VAR)
        {   config.request_timeout_secs = parse_secs(REQUEST_TIMEOUT_VAR, &v)?;
        }
        if let Some(v) = lookup(PROBE_TIMEOUT_VAR)
        {   config.probe_timeout_secs = parse_secs(PROBE_TIMEOUT_VAR, &v)?;
        }
        if let Some(v) = lookup(HEALTH_INTERVAL_VAR)
        {   config.health_check_interval_secs
              = parse_secs(HEALTH_INTERVAL_VAR, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error>
    {   let raw = std::fs::read_to_string(path.as_ref())?;
        let config: OrchestratorConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error>
    {   if self.request_timeout_secs == 0
        {   return Err(Error::InvalidConfiguration(
              "request timeout must be positive".to_string()
            ));
        }
        if self.probe_timeout_secs == 0
          || self.probe_timeout_secs > MAX_PROBE_TIMEOUT_SECS
        {   return Err(Error::InvalidConfiguration(format!(
              "probe timeout must be between 1 and {} seconds"
            , MAX_PROBE_TIMEOUT_SECS
            )));
        }
        if self.health_check_interval_secs == 0
        {   return Err(Error::InvalidConfiguration(
              "health check interval must be positive".to_string()
            ));
        }
        for (i, provider) in self.providers.iter().enumerate()
        {   if self.providers[..i].iter().any(|p| p.id == provider.id)
            {   return Err(Error::InvalidConfiguration(format!(
                  "{} configured more than once", provider.id
                )));
            }
            if provider.timeout_secs == Some(0)
            {   return Err(Error::InvalidConfiguration(format!(
                  "{} timeout must be positive", provider.id
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration
    {   Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration
    {   Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration
    {   Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Split a whitespace-separated credential list
pub fn parse_api_keys(raw: &str) -> Vec<String>
{   raw.split_whitespace()
      .map(str::to_string)
      .collect()
}

fn parse_secs(var: &str, raw: &str) -> Result<u64, Error>
{   raw.trim()
      .parse::<u64>()
      .map_err(|_| Error::InvalidConfiguration(format!(
        "{} must be a whole number of seconds, got {:?}", var, raw
      )))
}

#[cfg(test)]
mod tests
{   use super::*;
    use std::collections::HashMap;

    fn lookup_from(
      pairs: &[(&str, &str)]
    ) -> impl Fn(&str) -> Option<String>
    {   let map: HashMap<String, String> = pairs.iter()
          .map(|(k, v)| (k.to_string(), v.to_string()))
          .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn keys_split_on_any_whitespace()
    {   assert_eq!(
          parse_api_keys("  k1 k2\tk3\n ")
        , vec!["k1", "k2", "k3"]
        );
        assert!(parse_api_keys("   ").is_empty());
    }

    #[test]
    fn missing_credentials_omit_role()
    {   let config = OrchestratorConfig::from_lookup(lookup_from(&[
          ("CEREBRAS_API_KEYS", "a b")
        , ("GEMINI_API_KEYS", "   ")
        ])).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].id, ProviderId::FastTier);
        assert_eq!(config.providers[0].api_keys, vec!["a", "b"]);
        assert_eq!(config.providers[0].model, "llama-3.3-70b");
    }

    #[test]
    fn no_credentials_is_not_an_error()
    {   let config = OrchestratorConfig::from_lookup(lookup_from(&[]))
          .unwrap();
        assert!(config.providers.is_empty());
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.probe_timeout(), Duration::from_secs(5));
        assert_eq!(
          config.health_check_interval()
        , Duration::from_secs(300)
        );
    }

    #[test]
    fn timing_overrides_are_parsed_and_validated()
    {   let config = OrchestratorConfig::from_lookup(lookup_from(&[
          (REQUEST_TIMEOUT_VAR, "10")
        , (HEALTH_INTERVAL_VAR, "60")
        ])).unwrap();
        assert_eq!(config.request_timeout_secs, 10);
        assert_eq!(config.health_check_interval_secs, 60);

        assert!(OrchestratorConfig::from_lookup(lookup_from(&[
          (PROBE_TIMEOUT_VAR, "9")
        ])).is_err());
        assert!(OrchestratorConfig::from_lookup(lookup_from(&[
          (REQUEST_TIMEOUT_VAR, "soon")
        ])).is_err());
    }

    #[test]
    fn json_defaults_fill_missing_fields()
    {   let config: OrchestratorConfig = serde_json::from_str(r#"{
          "providers": [{
            "id": "reliable-tier",
            "base_url": "http://localhost:9000/v1",
            "model": "test-model",
            "api_keys": ["k"]
          }]
        }"#).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.providers[0].id, ProviderId::ReliableTier);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn duplicate_roles_are_rejected()
    {   let mut config = OrchestratorConfig::default();
        config.providers.push(
          ProviderConfig::for_role(ProviderId::FastTier, vec!["a".into()])
        );
        config.providers.push(
          ProviderConfig::for_role(ProviderId::FastTier, vec!["b".into()])
        );
        assert!(config.validate().is_err());
    }
}
