//! Bogon announcements.
//!
//! Reserved and private space must not show up on the public table
//! unless an authorization explicitly carves it out (lab and
//! documentation deployments register their documentation prefixes
//! in the ROA table, which makes them legitimate sinks).

use {
  super::{AttackFinding, AttackKind, Severity},
  crate::{observation::Observation, roa::RoaTable},
};

pub fn check(
  roa: &RoaTable,
  observation: &Observation,
) -> Option<AttackFinding> {
  if !observation.prefix.is_bogon() {
    return None;
  }
  if roa.is_authorized(&observation.prefix, observation.origin_asn) {
    return None;
  }
  Some(AttackFinding {
    kind: AttackKind::Bogon,
    severity: Severity::High,
    attacker_asn: observation.origin_asn,
    victim_asn: None,
    prefix: observation.prefix,
    confidence: 0.9,
  })
}
