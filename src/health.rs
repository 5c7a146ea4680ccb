//! Per-provider rolling health state

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::ProviderId;

/// Consecutive failures at which a provider is marked unhealthy
pub const FAILURE_THRESHOLD: u32 = 3;
/// Weight of the newest latency sample in the moving average
pub const LATENCY_SMOOTHING: f64 = 0.2;

/// Health of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth
{   pub healthy: bool
  , pub consecutive_failures: u32
  , /// Exponential moving average, 0.8 history / 0.2 newest sample
    pub average_latency_ms: f64
  , pub last_checked_at: DateTime<Utc>
}

impl ProviderHealth
{   fn fresh() -> Self
    {   ProviderHealth
        {   healthy: true
          , consecutive_failures: 0
          , average_latency_ms: 0.0
          , last_checked_at: Utc::now()
        }
    }
}

/// Single source of truth for provider viability.
///
/// The set of entries is fixed at construction. Each entry sits behind
/// its own lock, so traffic to different providers never contends and
/// updates to one provider are serialized.
#[derive(Debug)]
pub struct HealthTracker
{   entries: HashMap<ProviderId, Mutex<ProviderHealth>>
}

impl HealthTracker
{   pub fn new(providers: impl IntoIterator<Item = ProviderId>) -> Self
    {   let entries = providers.into_iter()
          .map(|id| (id, Mutex::new(ProviderHealth::fresh())))
          .collect();
        HealthTracker { entries }
    }

    fn entry(&self, provider: ProviderId)
      -> Option<MutexGuard<'_, ProviderHealth>>
    {   match self.entries.get(&provider)
        {   Some(lock) => {
              // State stays consistent even if a holder panicked.
              Some(lock.lock().unwrap_or_else(|e| e.into_inner()))
            }
          , None => {
              warn!("health update for unregistered provider {}", provider);
              None
            }
        }
    }

    pub fn record_success(&self, provider: ProviderId, latency_ms: f64)
    {   let Some(mut health) = self.entry(provider) else { return };
        if !health.healthy
        {   info!("{} recovered after successful call", provider);
        }
        health.healthy = true;
        health.consecutive_failures = 0;
        health.average_latency_ms = health.average_latency_ms
          * (1.0 - LATENCY_SMOOTHING)
          + latency_ms * LATENCY_SMOOTHING;
        health.last_checked_at = Utc::now();
        debug!(
          "{} success: latency={:.0}ms avg={:.1}ms"
        , provider, latency_ms, health.average_latency_ms
        );
    }

    pub fn record_failure(&self, provider: ProviderId)
    {   let Some(mut health) = self.entry(provider) else { return };
        health.consecutive_failures =
          health.consecutive_failures.saturating_add(1);
        if health.consecutive_failures >= FAILURE_THRESHOLD && health.healthy
        {   health.healthy = false;
            warn!(
              "{} marked unhealthy after {} consecutive failures"
            , provider, health.consecutive_failures
            );
        }
        health.last_checked_at = Utc::now();
        debug!(
          "{} failure: consecutive={}"
        , provider, health.consecutive_failures
        );
    }

    /// Reset after a successful out-of-band probe; no latency sample
    pub fn record_probe_success(&self, provider: ProviderId)
    {   let Some(mut health) = self.entry(provider) else { return };
        if !health.healthy || health.consecutive_failures > 0
        {   info!("{} recovered after health probe", provider);
        }
        health.healthy = true;
        health.consecutive_failures = 0;
        health.last_checked_at = Utc::now();
    }

    /// Unregistered providers count as unhealthy
    pub fn is_healthy(&self, provider: ProviderId) -> bool
    {   self.entries.get(&provider)
          .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()).healthy)
          .unwrap_or(false)
    }

    pub fn get(&self, provider: ProviderId) -> Option<ProviderHealth>
    {   self.entries.get(&provider)
          .map(|lock| lock.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    /// Owned copy of every entry
    pub fn snapshot(&self) -> HashMap<ProviderId, ProviderHealth>
    {   self.entries.iter()
          .map(|(id, lock)| {
            (*id, lock.lock().unwrap_or_else(|e| e.into_inner()).clone())
          })
          .collect()
    }
}
