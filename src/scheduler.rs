//! Periodic out-of-band health probing

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use futures::future::{join_all, FutureExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Error;
use crate::health::HealthTracker;
use crate::registry::ProviderRegistry;
use crate::ProviderId;

/// Outcome of one provider probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome
{   pub provider: ProviderId
  , pub alive: bool
}

struct KillArgs
{   reply: mpsc::UnboundedSender<()>
}

/// Owns the background probe task
pub struct HealthScheduler
{   kill_tx: mpsc::UnboundedSender<KillArgs>
  , task: tokio::task::JoinHandle<()>
}

impl HealthScheduler
{   /// Spawn the probe loop. The first round runs one full `interval`
    /// after start. Must be called from within a Tokio runtime.
    pub fn spawn(
      registry: ProviderRegistry
    , health: Arc<HealthTracker>
    , interval: Duration
    , probe_timeout: Duration
    ) -> Self
    {   debug!(
          "starting health scheduler: interval={}s probe_timeout={}s"
        , interval.as_secs(), probe_timeout.as_secs()
        );
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
          run_scheduler_loop(registry, health, interval, probe_timeout, kill_rx)
            .await
        });
        HealthScheduler
        {   kill_tx
          , task
        }
    }

    pub fn is_running(&self) -> bool
    {   !self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit. An in-flight probe round
    /// completes first, bounded by the probe timeout.
    pub async fn shutdown(self) -> Result<(), Error>
    {   debug!("shutting down health scheduler");
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        if self.kill_tx.send(KillArgs { reply: reply_tx }).is_ok()
        {   if reply_rx.recv().await.is_none()
            {   warn!("health scheduler exited before confirming shutdown");
            }
        } else
        {   debug!("health scheduler already stopped");
        }

        if let Err(e) = self.task.await
        {   error!("health scheduler task failed: {}", e);
            return Err(Error::Background(e.to_string()));
        }
        Ok(())
    }
}

/// Probe every registered provider once, concurrently.
///
/// A live provider is reset to healthy; a dead or slow one is left as
/// it is, since demotion comes only from live traffic.
pub async fn run_probe_round(
  registry: &ProviderRegistry
, health: &HealthTracker
, probe_timeout: Duration
) -> Vec<ProbeOutcome>
{   info!("performing provider health checks");

    let probes = registry.iter().map(|(id, provider)| async move {
      let probe = AssertUnwindSafe(provider.health_probe()).catch_unwind();
      let alive = match tokio::time::timeout(probe_timeout, probe).await
      {   Ok(Ok(alive)) => alive
        , Ok(Err(_)) => {
            error!("{} health probe panicked", id);
            false
          }
        , Err(_) => {
            warn!(
              "{} health probe timed out after {}ms"
            , id, probe_timeout.as_millis()
            );
            false
          }
      };
      ProbeOutcome { provider: id, alive }
    });

    let outcomes = join_all(probes).await;
    for outcome in &outcomes
    {   if outcome.alive
        {   health.record_probe_success(outcome.provider);
        } else
        {   warn!("{} health probe failed", outcome.provider);
        }
    }
    outcomes
}

async fn run_scheduler_loop(
  registry: ProviderRegistry
, health: Arc<HealthTracker>
, interval: Duration
, probe_timeout: Duration
, mut kill_rx: mpsc::UnboundedReceiver<KillArgs>
)
{   let mut ticker = tokio::time::interval_at(
      Instant::now() + interval
    , interval
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop
    { tokio::select!
      { _ = ticker.tick() => {
          run_probe_round(&registry, &health, probe_timeout).await;
        }
      , cmd = kill_rx.recv() => {
          match cmd
          {   Some(cmd) => {
                let _ = cmd.reply.send(());
                info!("health scheduler shutting down");
              }
            , None => {
                debug!("scheduler handle dropped, stopping");
              }
          }
          break;
        }
      }
    }
}
