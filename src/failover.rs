//! Provider selection and fallback ordering

use std::sync::atomic::{AtomicUsize, Ordering};
use log::debug;

use crate::health::HealthTracker;
use crate::ProviderId;

/// Shared, monotonically advancing round-robin cursor
#[derive(Debug, Default)]
pub struct RoundRobin
{   cursor: AtomicUsize
}

impl RoundRobin
{   pub fn new() -> Self
    {   RoundRobin::default()
    }

    /// Next candidate; concurrent callers each get a distinct slot
    pub fn pick(&self, candidates: &[ProviderId]) -> Option<ProviderId>
    {   if candidates.is_empty()
        {   return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(candidates[slot % candidates.len()])
    }
}

/// How the first candidate of a sequence was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection
{   /// Caller named a registered provider
    Preferred(ProviderId)
  , /// Rotation over the currently healthy providers
    RoundRobin(ProviderId)
  , /// Nothing healthy; walk the full priority order regardless
    Degraded(ProviderId)
}

impl Selection
{   pub fn provider(self) -> ProviderId
    {   match self
        {   Selection::Preferred(id)
          | Selection::RoundRobin(id)
          | Selection::Degraded(id) => id
        }
    }
}

/// Choose the first provider for a request.
///
/// `registered` must be in priority order. Returns `None` only when it
/// is empty.
pub fn select(
  preferred: Option<ProviderId>
, registered: &[ProviderId]
, health: &HealthTracker
, round_robin: &RoundRobin
) -> Option<Selection>
{   if let Some(id) = preferred
    {   if registered.contains(&id)
        {   return Some(Selection::Preferred(id));
        }
        debug!("preferred provider {} not registered, ignoring", id);
    }

    let healthy: Vec<ProviderId> = registered.iter()
      .copied()
      .filter(|id| health.is_healthy(*id))
      .collect();

    match round_robin.pick(&healthy)
    {   Some(id) => Some(Selection::RoundRobin(id))
      , None => registered.first().copied().map(Selection::Degraded)
    }
}

/// Per-request ordered list of providers to attempt
#[derive(Debug, Clone)]
pub struct FailoverSequence
{   selection: Selection
  , providers: Vec<ProviderId>
}

impl FailoverSequence
{   /// Selected provider first, then every other registered provider in
    /// priority order, each exactly once
    pub fn new(selection: Selection, registered: &[ProviderId]) -> Self
    {   let first = selection.provider();
        let mut providers = Vec::with_capacity(registered.len());
        providers.push(first);
        for id in registered
        {   if !providers.contains(id)
            {   providers.push(*id);
            }
        }
        debug!(
          "failover sequence {:?} ({:?})"
        , providers, selection
        );
        FailoverSequence
        {   selection
          , providers
        }
    }

    pub fn selection(&self) -> Selection
    {   self.selection
    }

    pub fn providers(&self) -> &[ProviderId]
    {   &self.providers
    }

    /// Unhealthy entries after the first are skipped, except in
    /// degraded mode where every provider gets a chance
    pub fn should_skip(&self, index: usize, healthy: bool) -> bool
    {   index > 0
          && !healthy
          && !matches!(self.selection, Selection::Degraded(_))
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    use crate::ProviderId::{CapableTier, FastTier, ReliableTier};

    fn mark_down(tracker: &HealthTracker, id: ProviderId)
    {   for _ in 0..3
        {   tracker.record_failure(id);
        }
    }

    #[test]
    fn rotation_visits_each_provider_once_per_cycle()
    {   let tracker = HealthTracker::new(ProviderId::ALL);
        let rr = RoundRobin::new();
        let picks: Vec<ProviderId> = (0..6)
          .map(|_| select(None, &ProviderId::ALL, &tracker, &rr)
            .unwrap()
            .provider())
          .collect();
        assert_eq!(
          picks
        , vec![
            FastTier, CapableTier, ReliableTier
          , FastTier, CapableTier, ReliableTier
          ]
        );
    }

    #[test]
    fn rotation_skips_unhealthy()
    {   let tracker = HealthTracker::new(ProviderId::ALL);
        mark_down(&tracker, CapableTier);
        let rr = RoundRobin::new();
        let picks: Vec<ProviderId> = (0..4)
          .map(|_| select(None, &ProviderId::ALL, &tracker, &rr)
            .unwrap()
            .provider())
          .collect();
        assert_eq!(picks, vec![FastTier, ReliableTier, FastTier, ReliableTier]);
    }

    #[test]
    fn preference_wins_even_when_unhealthy()
    {   let tracker = HealthTracker::new(ProviderId::ALL);
        mark_down(&tracker, ReliableTier);
        let rr = RoundRobin::new();
        let selection = select(
          Some(ReliableTier), &ProviderId::ALL, &tracker, &rr
        );
        assert_eq!(selection, Some(Selection::Preferred(ReliableTier)));
    }

    #[test]
    fn unregistered_preference_falls_back_to_rotation()
    {   let registered = [FastTier, ReliableTier];
        let tracker = HealthTracker::new(registered);
        let rr = RoundRobin::new();
        let selection = select(Some(CapableTier), &registered, &tracker, &rr);
        assert_eq!(selection, Some(Selection::RoundRobin(FastTier)));
    }

    #[test]
    fn nothing_healthy_degrades_to_priority_order()
    {   let tracker = HealthTracker::new(ProviderId::ALL);
        for id in ProviderId::ALL
        {   mark_down(&tracker, id);
        }
        let rr = RoundRobin::new();
        let selection = select(None, &ProviderId::ALL, &tracker, &rr)
          .unwrap();
        assert_eq!(selection, Selection::Degraded(FastTier));

        let seq = FailoverSequence::new(selection, &ProviderId::ALL);
        assert_eq!(seq.providers(), &[FastTier, CapableTier, ReliableTier]);
        assert!(!seq.should_skip(1, false));
        assert!(!seq.should_skip(2, false));
    }

    #[test]
    fn empty_registry_selects_nothing()
    {   let tracker = HealthTracker::new(Vec::new());
        let rr = RoundRobin::new();
        assert_eq!(select(None, &[], &tracker, &rr), None);
    }

    #[test]
    fn sequence_covers_all_without_duplicates()
    {   let seq = FailoverSequence::new(
          Selection::RoundRobin(ReliableTier)
        , &ProviderId::ALL
        );
        assert_eq!(seq.providers(), &[ReliableTier, FastTier, CapableTier]);

        let seq = FailoverSequence::new(
          Selection::Preferred(CapableTier)
        , &[CapableTier, ReliableTier]
        );
        assert_eq!(seq.providers(), &[CapableTier, ReliableTier]);
    }

    #[test]
    fn only_non_first_unhealthy_entries_are_skipped()
    {   let seq = FailoverSequence::new(
          Selection::Preferred(FastTier)
        , &ProviderId::ALL
        );
        assert!(!seq.should_skip(0, false));
        assert!(seq.should_skip(1, false));
        assert!(!seq.should_skip(1, true));
    }
}
