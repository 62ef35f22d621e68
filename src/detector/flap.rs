//! Route-flap detection.
//!
//! Only announce→withdraw and withdraw→announce transitions count.
//! The per-(origin, prefix) history is bounded by the flap window,
//! and a finding for the same key is suppressed for a short dedup
//! window so one flapping route cannot storm the pool.

use {
  super::{AttackFinding, AttackKind, Severity},
  crate::{
    observation::{Observation, ObservationKind},
    primitives::Ipv4Prefix,
  },
  std::{
    collections::{HashMap, VecDeque},
    time::Duration,
  },
};

#[derive(Debug, Default)]
struct FlapHistory {
  last_kind: Option<ObservationKind>,
  transitions: VecDeque<i64>,
  last_emitted: Option<i64>,
}

#[derive(Debug)]
pub struct FlapTracker {
  window: i64,
  threshold: usize,
  dedup: i64,
  histories: HashMap<(u32, Ipv4Prefix), FlapHistory>,
}

impl FlapTracker {
  pub fn new(window: Duration, threshold: usize, dedup: Duration) -> Self {
    Self {
      window: window.as_secs() as i64,
      threshold,
      dedup: dedup.as_secs() as i64,
      histories: HashMap::new(),
    }
  }

  /// Feeds one observation into the history and reports a flap
  /// once transitions within the window exceed the threshold.
  pub fn observe(&mut self, observation: &Observation) -> Option<AttackFinding> {
    let key = (observation.origin_asn, observation.prefix);
    let now = observation.timestamp;
    let history = self.histories.entry(key).or_default();

    let transitioned = matches!(
      (history.last_kind, observation.kind),
      (Some(ObservationKind::Announce), ObservationKind::Withdraw)
        | (Some(ObservationKind::Withdraw), ObservationKind::Announce)
    );
    history.last_kind = Some(observation.kind);

    if transitioned {
      history.transitions.push_back(now);
    }
    while history
      .transitions
      .front()
      .map(|ts| now - ts > self.window)
      .unwrap_or(false)
    {
      history.transitions.pop_front();
    }

    if history.transitions.len() <= self.threshold {
      return None;
    }
    if let Some(last) = history.last_emitted {
      if now - last <= self.dedup {
        return None;
      }
    }
    history.last_emitted = Some(now);
    Some(AttackFinding {
      kind: AttackKind::RouteFlap,
      severity: Severity::Medium,
      attacker_asn: observation.origin_asn,
      victim_asn: None,
      prefix: observation.prefix,
      confidence: 0.8,
    })
  }

  /// Read-only check against the local history, used to corroborate
  /// a peer's flap claim.
  pub fn is_flapping(
    &self,
    origin_asn: u32,
    prefix: &Ipv4Prefix,
    now: i64,
  ) -> bool {
    self
      .histories
      .get(&(origin_asn, *prefix))
      .map(|history| {
        history
          .transitions
          .iter()
          .filter(|&&ts| now - ts <= self.window)
          .count()
          > self.threshold
      })
      .unwrap_or(false)
  }

  /// Drops histories that have gone quiet for a full window. Called
  /// from the node's periodic cleanup.
  pub fn prune(&mut self, now: i64) {
    let window = self.window;
    self.histories.retain(|_, history| {
      history
        .transitions
        .back()
        .map(|ts| now - ts <= window * 2)
        .unwrap_or(false)
    });
  }

  pub fn tracked_keys(&self) -> usize {
    self.histories.len()
  }
}
