//! BGP attack classification.
//!
//! The detector is a pure function over one observation plus the
//! read-only ROA and relationship tables; the only state it keeps
//! is the bounded flap history. Rules fire independently except
//! that a sub-prefix hijack is only considered when the exact-match
//! origin check did not fire. Output order is stable: findings are
//! sorted by kind, then attacker AS.

mod bogon;
mod flap;
mod hijack;
mod leak;

pub use flap::FlapTracker;

use {
  crate::{
    config::Config,
    observation::{Observation, ObservationKind},
    primitives::Ipv4Prefix,
    relations::RelationshipTable,
    roa::RoaTable,
  },
  serde::{Deserialize, Serialize},
  std::sync::Arc,
};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
  PrefixHijack,
  SubprefixHijack,
  RouteLeak,
  RouteFlap,
  Bogon,
}

impl std::fmt::Display for AttackKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::PrefixHijack => "prefix_hijack",
      Self::SubprefixHijack => "subprefix_hijack",
      Self::RouteLeak => "route_leak",
      Self::RouteFlap => "route_flap",
      Self::Bogon => "bogon",
    };
    f.write_str(name)
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Low,
  Medium,
  High,
  Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackFinding {
  pub kind: AttackKind,
  pub severity: Severity,
  pub attacker_asn: u32,
  pub victim_asn: Option<u32>,
  pub prefix: Ipv4Prefix,
  pub confidence: f64,
}

impl AttackFinding {
  /// High and Critical findings put the transaction on the attack
  /// consensus path.
  pub fn is_serious(&self) -> bool {
    self.severity >= Severity::High
  }
}

pub struct AttackDetector {
  roa: Arc<RoaTable>,
  relations: Arc<RelationshipTable>,
  flaps: FlapTracker,
}

impl AttackDetector {
  pub fn new(
    roa: Arc<RoaTable>,
    relations: Arc<RelationshipTable>,
    config: &Config,
  ) -> Self {
    Self {
      roa,
      relations,
      flaps: FlapTracker::new(
        config.flap_window,
        config.flap_threshold,
        config.flap_dedup,
      ),
    }
  }

  /// Classifies one observation. Withdrawals only feed the flap
  /// history; every other rule looks at announcements.
  pub fn detect(&mut self, observation: &Observation) -> Vec<AttackFinding> {
    let mut findings = Vec::new();

    if observation.kind == ObservationKind::Announce {
      match hijack::check_origin(&self.roa, observation) {
        Some(finding) => findings.push(finding),
        None => {
          if let Some(finding) = hijack::check_subprefix(&self.roa, observation)
          {
            findings.push(finding);
          }
        }
      }
      if let Some(finding) = leak::check(&self.relations, observation) {
        findings.push(finding);
      }
      if let Some(finding) = bogon::check(&self.roa, observation) {
        findings.push(finding);
      }
    }

    if let Some(finding) = self.flaps.observe(observation) {
      findings.push(finding);
    }

    findings.sort_by_key(|f| (f.kind, f.attacker_asn));
    findings
  }

  /// Re-checks a peer's attack claim without mutating local state:
  /// the stateless rules re-run as-is, and a flap claim is judged
  /// against this node's own flap history instead of feeding the
  /// remote observation into it.
  pub fn verify_claim(&self, observation: &Observation) -> bool {
    if hijack::check_origin(&self.roa, observation).is_some() {
      return true;
    }
    if hijack::check_subprefix(&self.roa, observation).is_some() {
      return true;
    }
    if leak::check(&self.relations, observation).is_some() {
      return true;
    }
    if bogon::check(&self.roa, observation).is_some() {
      return true;
    }
    self.flaps.is_flapping(
      observation.origin_asn,
      &observation.prefix,
      observation.timestamp,
    )
  }

  /// Periodic hygiene for the flap history.
  pub fn prune_flaps(&mut self, now: i64) {
    self.flaps.prune(now);
  }
}
