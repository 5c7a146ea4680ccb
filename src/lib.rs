//! genroute: routes content-generation requests across interchangeable
//! upstream providers, tracks their health, and fails over between them.
//!
//! ```text
//! caller ──► Orchestrator::generate
//!              │  failover::select + FailoverSequence (reads HealthTracker)
//!              ▼
//!            Provider::generate  ── ok ──► record_success, return
//!              │ err
//!              └─► record_failure, next candidate … AllProvidersFailed
//!
//! HealthScheduler ── every interval ──► Provider::health_probe
//!                                       └─► record_probe_success
//! ```

pub mod error;
pub mod config;
pub mod providers;
pub mod request;
pub mod registry;
pub mod health;
pub mod failover;
pub mod scheduler;
pub mod orchestrator;

use std::fmt;
use serde::{Deserialize, Serialize};

pub use error::{Error, ErrorKind, ProviderError, Result};
pub use config::{OrchestratorConfig, ProviderConfig};
pub use health::{HealthTracker, ProviderHealth};
pub use orchestrator::Orchestrator;
pub use providers::{Provider, TextStream};
pub use registry::ProviderRegistry;
pub use request::{GenerationRequest, GenerationResponse};

/// Logical provider role, decoupled from the vendor behind it.
/// Declaration order is the fixed fallback priority order.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash
, Deserialize, Serialize
)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId
{   /// Lowest latency, default first choice
    FastTier
  , /// Most capable models, default for streaming
    CapableTier
  , /// Most reliable, last resort
    ReliableTier
}

impl ProviderId
{   /// Every role, in priority order
    pub const ALL: [ProviderId; 3] = [
      ProviderId::FastTier
    , ProviderId::CapableTier
    , ProviderId::ReliableTier
    ];

    pub fn as_str(self) -> &'static str
    {   match self
        {   ProviderId::FastTier => "fast-tier"
          , ProviderId::CapableTier => "capable-tier"
          , ProviderId::ReliableTier => "reliable-tier"
        }
    }
}

impl fmt::Display for ProviderId
{   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {   f.write_str(self.as_str())
    }
}

/// Fixed content kinds the marketplace asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind
{   AdCopy
  , Headline
  , CtaButton
  , ChannelDescription
  , TargetingSuggestions
  , ContentImprovement
  , Translation
}
