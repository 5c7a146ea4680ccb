//! Generation entry point with sequential failover

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::config::OrchestratorConfig;
use crate::error::{Error, ProviderError};
use crate::failover::{self, FailoverSequence, RoundRobin, Selection};
use crate::health::{HealthTracker, ProviderHealth};
use crate::providers::TextStream;
use crate::registry::ProviderRegistry;
use crate::request::{GenerationRequest, GenerationResponse};
use crate::scheduler::{self, HealthScheduler, ProbeOutcome};
use crate::ProviderId;

/// Provider used for streaming when the request names none
pub const DEFAULT_STREAM_PROVIDER: ProviderId = ProviderId::CapableTier;

/// Text fragments of a streamed generation
pub type GenerationStream = BoxStream<'static, Result<String, Error>>;

/// Routes requests across the registered providers.
///
/// Construct one per process (or per test) and share it by reference or
/// `Arc`; there is no global instance.
pub struct Orchestrator
{   registry: ProviderRegistry
  , order: Vec<ProviderId>
  , health: Arc<HealthTracker>
  , round_robin: RoundRobin
  , attempt_timeout: Duration
  , probe_timeout: Duration
  , scheduler: Mutex<Option<HealthScheduler>>
}

impl Orchestrator
{   /// Build the orchestrator and start its health scheduler.
    /// Must be called from within a Tokio runtime.
    pub fn new(registry: ProviderRegistry, config: &OrchestratorConfig)
      -> Self
    {   let order = registry.ids();
        let health = Arc::new(HealthTracker::new(order.iter().copied()));
        let scheduler = HealthScheduler::spawn(
          registry.clone()
        , Arc::clone(&health)
        , config.health_check_interval()
        , config.probe_timeout()
        );
        info!("orchestrator ready with {} provider(s)", order.len());

        Orchestrator
        {   registry
          , order
          , health
          , round_robin: RoundRobin::new()
          , attempt_timeout: config.request_timeout()
          , probe_timeout: config.probe_timeout()
          , scheduler: Mutex::new(Some(scheduler))
        }
    }

    /// Build adapters from the configuration, then start
    pub fn from_config(config: &OrchestratorConfig) -> Self
    {   Orchestrator::new(ProviderRegistry::from_config(config), config)
    }

    /// Configure from environment credentials, then start
    pub fn from_env() -> Result<Self, Error>
    {   let config = OrchestratorConfig::from_env()?;
        Ok(Orchestrator::from_config(&config))
    }

    /// Generate with transparent failover across providers
    pub async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResponse, Error>
    {   self.run(request, None).await
    }

    /// Like `generate`, with an outer deadline on the whole request.
    /// When it fires the in-flight provider call is dropped and counted
    /// as a failure for that provider.
    pub async fn generate_with_deadline(
      &self
    , request: &GenerationRequest
    , deadline: Duration
    ) -> Result<GenerationResponse, Error>
    {   self.run(request, Some(deadline)).await
    }

    async fn run(
      &self
    , request: &GenerationRequest
    , deadline: Option<Duration>
    ) -> Result<GenerationResponse, Error>
    {   let deadline_at = deadline.map(|d| (Instant::now() + d, d));

        let selection = failover::select(
            request.preferred_provider()
          , &self.order
          , &self.health
          , &self.round_robin
          )
          .ok_or(Error::NoProviders)?;
        if let Selection::Degraded(_) = selection
        {   warn!("no healthy providers, trying all in priority order");
        }
        let sequence = FailoverSequence::new(selection, &self.order);

        let mut last_error: Option<ProviderError> = None;
        let mut attempts = 0usize;

        for (index, &id) in sequence.providers().iter().enumerate()
        {   let Some(provider) = self.registry.get(id) else { continue };

            if sequence.should_skip(index, self.health.is_healthy(id))
            {   info!("skipping unhealthy provider {}", id);
                continue;
            }

            if let Some((at, budget)) = deadline_at
            {   if Instant::now() >= at
                {   warn!("deadline reached before trying {}", id);
                    return Err(Error::DeadlineExceeded
                    {   provider: id
                      , deadline_ms: budget.as_millis() as u64
                    });
                }
            }

            attempts += 1;
            debug!("attempting generation with {} (candidate {})", id, index);
            let started = Instant::now();
            let call = tokio::time::timeout(
              self.attempt_timeout
            , provider.generate(request)
            );

            let outcome = match deadline_at
            {   Some((at, budget)) => {
                  match tokio::time::timeout_at(at, call).await
                  {   Ok(outcome) => outcome
                    , Err(_) => {
                        self.health.record_failure(id);
                        warn!("deadline fired during {} call, abandoned", id);
                        return Err(Error::DeadlineExceeded
                        {   provider: id
                          , deadline_ms: budget.as_millis() as u64
                        });
                      }
                  }
                }
              , None => call.await
            };

            let error = match outcome
            {   Ok(Ok(mut response)) => {
                  let elapsed = started.elapsed();
                  self.health.record_success(id, elapsed.as_secs_f64() * 1000.0);
                  response.latency_ms = elapsed.as_millis() as u64;
                  response.fallback = index > 0;
                  if response.fallback
                  {   info!("request served by fallback provider {}", id);
                  }
                  return Ok(response);
                }
              , Ok(Err(e)) => e
              , Err(_) => ProviderError::timeout(id, self.attempt_timeout)
            };

            self.health.record_failure(id);
            warn!(
              "{} failed ({}, retryable={}), trying next provider"
            , id, error.kind, error.retryable()
            );
            last_error = Some(error);
        }

        match last_error
        {   Some(last) => Err(Error::AllProvidersFailed { last, attempts })
          , None => Err(Error::NoProviders)
        }
    }

    /// Stream from a single provider: the preferred one, else
    /// `DEFAULT_STREAM_PROVIDER`. No fallback once the stream exists.
    pub async fn generate_stream(&self, request: &GenerationRequest)
      -> Result<GenerationStream, Error>
    {   let id = request.preferred_provider()
          .unwrap_or(DEFAULT_STREAM_PROVIDER);
        let provider = self.registry.get(id)
          .ok_or(Error::ProviderNotRegistered(id))?;
        if !provider.supports_streaming()
        {   return Err(Error::StreamingUnsupported(id));
        }

        debug!("opening stream with {}", id);
        let started = Instant::now();
        let opened = tokio::time::timeout(
            self.attempt_timeout
          , provider.generate_stream(request)
          )
          .await
          .unwrap_or_else(|_| Err(ProviderError::timeout(id, self.attempt_timeout)));

        let inner = match opened
        {   Ok(inner) => inner
          , Err(e) => {
              self.health.record_failure(id);
              warn!("{} failed to open stream: {}", id, e);
              return Err(Error::Provider(e));
            }
        };

        Ok(track_stream(id, inner, Arc::clone(&self.health), started))
    }

    /// Owned copy of every provider's health
    pub fn health_status(&self) -> HashMap<ProviderId, ProviderHealth>
    {   self.health.snapshot()
    }

    pub fn available_providers(&self) -> BTreeSet<ProviderId>
    {   self.order.iter().copied().collect()
    }

    pub fn provider_models(&self) -> BTreeMap<ProviderId, String>
    {   self.registry.iter()
          .map(|(id, p)| (id, p.model().to_string()))
          .collect()
    }

    /// Every model each registered provider offers
    pub fn available_models(&self) -> BTreeMap<ProviderId, Vec<String>>
    {   self.registry.iter()
          .map(|(id, p)| (id, p.available_models()))
          .collect()
    }

    /// Run one probe round now, outside the schedule
    pub async fn check_health_now(&self) -> Vec<ProbeOutcome>
    {   scheduler::run_probe_round(
          &self.registry
        , &self.health
        , self.probe_timeout
        ).await
    }

    pub fn is_scheduler_running(&self) -> bool
    {   self.scheduler_slot()
          .as_ref()
          .map(HealthScheduler::is_running)
          .unwrap_or(false)
    }

    /// Stop the health scheduler. Requests keep working afterwards,
    /// without background recovery. Calling it twice is a no-op.
    pub async fn shutdown(&self) -> Result<(), Error>
    {   let scheduler = self.scheduler_slot().take();
        match scheduler
        {   Some(scheduler) => {
              info!("orchestrator shutting down");
              scheduler.shutdown().await
            }
          , None => Ok(())
        }
    }

    fn scheduler_slot(&self)
      -> std::sync::MutexGuard<'_, Option<HealthScheduler>>
    {   self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pass fragments through, recording success when the stream ends
/// normally and failure when it ends with an error
fn track_stream(
  id: ProviderId
, inner: TextStream
, health: Arc<HealthTracker>
, started: Instant
) -> GenerationStream
{   stream::unfold(Some((inner, health)), move |state| async move {
      let (mut inner, health) = state?;
      match inner.next().await
      {   Some(Ok(text)) => Some((Ok(text), Some((inner, health))))
        , Some(Err(e)) => {
            health.record_failure(id);
            warn!("{} stream failed: {}", id, e);
            Some((Err(Error::Provider(e)), None))
          }
        , None => {
            let elapsed = started.elapsed();
            health.record_success(id, elapsed.as_secs_f64() * 1000.0);
            debug!("{} stream completed in {}ms", id, elapsed.as_millis());
            None
          }
      }
    }).boxed()
}
