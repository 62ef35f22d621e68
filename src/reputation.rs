//! Reactive trust scoring for non-authorized ASes.
//!
//! Scores live in [min, max] (default [0, 100]) and move only in
//! response to finalized evidence: attack penalties by kind, repeat
//! and persistent-attacker escalation, slow rewards for sustained
//! legitimate behavior. Every change lands in the entry's history
//! with both the requested and the applied delta, so clamping at
//! the bounds stays visible.

use {
  crate::{config::Config, detector::AttackKind, storage},
  serde::{Deserialize, Serialize},
  std::{collections::BTreeMap, path::Path},
  tracing::{debug, info},
};

const THIRTY_DAYS: i64 = 30 * 24 * 3600;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RatingLevel {
  HighlyTrusted,
  Trusted,
  Neutral,
  Suspicious,
  Bad,
  Critical,
}

impl RatingLevel {
  pub fn from_score(score: f64) -> Self {
    if score >= 90.0 {
      Self::HighlyTrusted
    } else if score >= 70.0 {
      Self::Trusted
    } else if score >= 50.0 {
      Self::Neutral
    } else if score >= 30.0 {
      Self::Suspicious
    } else if score >= 10.0 {
      Self::Bad
    } else {
      Self::Critical
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationReason {
  PrefixHijack,
  SubprefixHijack,
  Bogon,
  RouteLeak,
  RouteFlap,
  RepeatedAttack,
  PersistentAttacker,
  LegitimateAnnouncements,
  MonthlyGoodBehavior,
  HighlyTrustedBonus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationEvent {
  pub reason: ReputationReason,
  pub delta_requested: f64,
  pub delta_applied: f64,
  pub score_after: f64,
  pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationEntry {
  pub trust_score: f64,
  pub rating_level: RatingLevel,
  pub attacks_detected: u64,
  pub legitimate_announcements: u64,
  pub last_attack_timestamp: Option<i64>,
  pub last_good_behavior_timestamp: Option<i64>,
  /// Attack timestamps inside the escalation window.
  recent_attacks: Vec<i64>,
  last_sweep: i64,
  highly_trusted_bonus_granted: bool,
  pub history: Vec<ReputationEvent>,
}

impl ReputationEntry {
  fn new(initial_score: f64, now: i64) -> Self {
    Self {
      trust_score: initial_score,
      rating_level: RatingLevel::from_score(initial_score),
      attacks_detected: 0,
      legitimate_announcements: 0,
      last_attack_timestamp: None,
      last_good_behavior_timestamp: None,
      recent_attacks: Vec::new(),
      last_sweep: now,
      highly_trusted_bonus_granted: false,
      history: Vec::new(),
    }
  }
}

pub struct ReputationStore {
  config: Config,
  entries: BTreeMap<u32, ReputationEntry>,
}

impl ReputationStore {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      entries: BTreeMap::new(),
    }
  }

  fn entry_mut(&mut self, asn: u32, now: i64) -> &mut ReputationEntry {
    let initial = self.config.rating_initial_score;
    self
      .entries
      .entry(asn)
      .or_insert_with(|| ReputationEntry::new(initial, now))
  }

  /// Clamps, records, and re-derives the rating level. The one
  /// place a score ever changes.
  fn apply(
    &mut self,
    asn: u32,
    delta: f64,
    reason: ReputationReason,
    now: i64,
  ) {
    let (min, max) =
      (self.config.rating_min_score, self.config.rating_max_score);
    let entry = self.entry_mut(asn, now);
    let before = entry.trust_score;
    let after = (before + delta).clamp(min, max);
    entry.trust_score = after;
    entry.rating_level = RatingLevel::from_score(after);
    entry.history.push(ReputationEvent {
      reason,
      delta_requested: delta,
      delta_applied: after - before,
      score_after: after,
      timestamp: now,
    });
    debug!(
      "AS{asn} {reason:?}: {before:.1} -> {after:.1} ({:?})",
      entry.rating_level
    );
  }

  fn attack_reason(kind: AttackKind) -> ReputationReason {
    match kind {
      AttackKind::PrefixHijack => ReputationReason::PrefixHijack,
      AttackKind::SubprefixHijack => ReputationReason::SubprefixHijack,
      AttackKind::Bogon => ReputationReason::Bogon,
      AttackKind::RouteLeak => ReputationReason::RouteLeak,
      AttackKind::RouteFlap => ReputationReason::RouteFlap,
    }
  }

  fn attack_penalty(&self, kind: AttackKind) -> f64 {
    match kind {
      AttackKind::PrefixHijack => self.config.penalty_prefix_hijack,
      AttackKind::SubprefixHijack => self.config.penalty_subprefix_hijack,
      AttackKind::Bogon => self.config.penalty_bogon,
      AttackKind::RouteLeak => self.config.penalty_route_leak,
      AttackKind::RouteFlap => self.config.penalty_route_flap,
    }
  }

  /// A finalized attack finding against `asn`. Applies the kind
  /// penalty, then the repeat-offender and persistent-attacker
  /// escalations when the history inside the window justifies
  /// them.
  pub fn record_attack(&mut self, asn: u32, kind: AttackKind, now: i64) {
    let penalty = self.attack_penalty(kind);
    let reason = Self::attack_reason(kind);

    let repeat = {
      let entry = self.entry_mut(asn, now);
      let repeat = entry
        .last_attack_timestamp
        .map(|last| now - last <= THIRTY_DAYS)
        .unwrap_or(false);
      entry.attacks_detected += 1;
      entry.last_attack_timestamp = Some(now);
      entry.recent_attacks.push(now);
      entry.recent_attacks.retain(|ts| now - ts <= THIRTY_DAYS);
      repeat
    };

    self.apply(asn, penalty, reason, now);
    if repeat {
      self.apply(
        asn,
        self.config.penalty_repeated_attack,
        ReputationReason::RepeatedAttack,
        now,
      );
    }
    let persistent = self.entries[&asn].recent_attacks.len()
      >= self.config.persistent_attack_count;
    if persistent {
      self.apply(
        asn,
        self.config.penalty_persistent_attacker,
        ReputationReason::PersistentAttacker,
        now,
      );
    }
  }

  /// A finalized legitimate announcement. Rewards accrue per 100.
  pub fn record_legitimate(&mut self, asn: u32, now: i64) {
    let reward = self.config.reward_per_100_legitimate;
    let due = {
      let entry = self.entry_mut(asn, now);
      entry.legitimate_announcements += 1;
      entry.last_good_behavior_timestamp = Some(now);
      entry.legitimate_announcements % 100 == 0
    };
    if due {
      self.apply(asn, reward, ReputationReason::LegitimateAnnouncements, now);
      self.maybe_grant_trusted_bonus(asn, now);
    }
  }

  /// Monthly sweep: every tracked AS with a clean 30-day record
  /// earns the good-behavior reward.
  pub fn sweep_good_behavior(&mut self, now: i64) {
    let reward = self.config.reward_monthly_good_behavior;
    let due: Vec<u32> = self
      .entries
      .iter()
      .filter(|(_, entry)| {
        now - entry.last_sweep >= THIRTY_DAYS
          && entry
            .last_attack_timestamp
            .map(|last| now - last > THIRTY_DAYS)
            .unwrap_or(true)
      })
      .map(|(&asn, _)| asn)
      .collect();
    for asn in due {
      self.entry_mut(asn, now).last_sweep = now;
      self.apply(asn, reward, ReputationReason::MonthlyGoodBehavior, now);
      self.maybe_grant_trusted_bonus(asn, now);
    }
  }

  /// One-time bonus the first time an AS climbs into the
  /// highly-trusted band.
  fn maybe_grant_trusted_bonus(&mut self, asn: u32, now: i64) {
    let bonus = self.config.reward_highly_trusted_bonus;
    let grant = {
      let entry = match self.entries.get_mut(&asn) {
        Some(entry) => entry,
        None => return,
      };
      if entry.rating_level == RatingLevel::HighlyTrusted
        && !entry.highly_trusted_bonus_granted
      {
        entry.highly_trusted_bonus_granted = true;
        true
      } else {
        false
      }
    };
    if grant {
      info!("AS{asn} reached highly-trusted standing");
      self.apply(asn, bonus, ReputationReason::HighlyTrustedBonus, now);
    }
  }

  pub fn score(&self, asn: u32) -> Option<f64> {
    self.entries.get(&asn).map(|entry| entry.trust_score)
  }

  pub fn get(&self, asn: u32) -> Option<&ReputationEntry> {
    self.entries.get(&asn)
  }

  pub fn entries(&self) -> impl Iterator<Item = (u32, &ReputationEntry)> {
    self.entries.iter().map(|(&asn, entry)| (asn, entry))
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), storage::StorageError> {
    storage::write_json_atomic(path, &self.entries)
  }

  pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), storage::StorageError> {
    if let Some(entries) = storage::read_json_or_sideline(path)? {
      self.entries = entries;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use {
    super::{RatingLevel, ReputationReason, ReputationStore},
    crate::{config::Config, detector::AttackKind},
  };

  const NOW: i64 = 1_700_000_000;
  const DAY: i64 = 24 * 3600;

  fn store() -> ReputationStore {
    ReputationStore::new(Config::default())
  }

  #[test]
  fn hijack_penalty_from_the_default_score() {
    let mut store = store();
    store.record_attack(666, AttackKind::PrefixHijack, NOW);

    let entry = store.get(666).unwrap();
    assert_eq!(entry.trust_score, 30.0);
    assert_eq!(entry.rating_level, RatingLevel::Suspicious);
    assert_eq!(entry.attacks_detected, 1);
  }

  #[test]
  fn repeat_and_persistent_escalations_stack() {
    let mut store = store();
    store.record_attack(666, AttackKind::RouteFlap, NOW);
    // second attack 10 days later: -10 repeat base, -30 repeat
    store.record_attack(666, AttackKind::RouteFlap, NOW + 10 * DAY);
    // third within the window trips the persistent threshold too
    store.record_attack(666, AttackKind::RouteFlap, NOW + 20 * DAY);

    let entry = store.get(666).unwrap();
    assert_eq!(entry.trust_score, 0.0);
    assert_eq!(entry.rating_level, RatingLevel::Critical);
    assert!(entry
      .history
      .iter()
      .any(|e| e.reason == ReputationReason::PersistentAttacker));
  }

  #[test]
  fn clamping_is_recorded_not_hidden() {
    let mut store = store();
    store.record_attack(666, AttackKind::Bogon, NOW);
    store.record_attack(666, AttackKind::Bogon, NOW + 1);

    let entry = store.get(666).unwrap();
    assert_eq!(entry.trust_score, 0.0);
    let clamped = entry
      .history
      .iter()
      .find(|e| e.delta_applied != e.delta_requested)
      .expect("a clamped event");
    assert!(clamped.delta_requested < clamped.delta_applied);
  }

  #[test]
  fn legitimate_reward_accrues_per_hundred() {
    let mut store = store();
    for i in 0..199 {
      store.record_legitimate(65010, NOW + i);
    }
    assert_eq!(store.score(65010), Some(51.0));
    store.record_legitimate(65010, NOW + 199);
    assert_eq!(store.score(65010), Some(52.0));
  }

  #[test]
  fn monthly_sweep_rewards_clean_ases_only() {
    let mut store = store();
    store.record_legitimate(65010, NOW);
    store.record_attack(666, AttackKind::PrefixHijack, NOW + 29 * DAY);

    store.sweep_good_behavior(NOW + 31 * DAY);
    assert_eq!(store.score(65010), Some(55.0));
    // attacker within the window earns nothing
    assert_eq!(store.score(666), Some(30.0));

    // a second sweep right away does not double-pay
    store.sweep_good_behavior(NOW + 31 * DAY + 1);
    assert_eq!(store.score(65010), Some(55.0));
  }

  #[test]
  fn highly_trusted_bonus_is_one_time() {
    let mut config = Config::default();
    config.rating_initial_score = 89.0;
    let mut store = ReputationStore::new(config);

    for i in 0..100 {
      store.record_legitimate(65010, NOW + i);
    }
    // 89 + 1 = 90 crosses the band, +10 bonus lands on top
    assert_eq!(store.score(65010), Some(100.0));
    let bonus_events = store
      .get(65010)
      .unwrap()
      .history
      .iter()
      .filter(|e| e.reason == ReputationReason::HighlyTrustedBonus)
      .count();
    assert_eq!(bonus_events, 1);
  }

  #[test]
  fn snapshot_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reputation.json");

    let mut store = store();
    store.record_attack(666, AttackKind::RouteLeak, NOW);
    store.save(&path).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    let mut restored = ReputationStore::new(Config::default());
    restored.load(&path).unwrap();
    assert_eq!(restored.score(666), Some(35.0));
    restored.save(&path).unwrap();
    assert_eq!(first, std::fs::read_to_string(&path).unwrap());
  }
}
