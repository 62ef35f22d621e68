//! Valley-free route-leak rule.
//!
//! A route learned from a provider or peer must not be re-announced
//! to another provider or peer. On the AS path that shows up as a
//! triple (A, B, C) where A is a customer of B and B hands the
//! route onward to a peer or to one of its own providers; B is the
//! leaker.

use {
  super::{AttackFinding, AttackKind, Severity},
  crate::{
    observation::Observation,
    relations::{Relationship, RelationshipTable},
  },
};

pub fn check(
  relations: &RelationshipTable,
  observation: &Observation,
) -> Option<AttackFinding> {
  let path = &observation.as_path;
  if path.len() < 3 {
    return None;
  }
  for triple in path.windows(3) {
    let (a, b, c) = (triple[0], triple[1], triple[2]);
    if relations.lookup(a, b) != Some(Relationship::CustomerOf) {
      continue;
    }
    match relations.lookup(b, c) {
      Some(Relationship::PeerOf) | Some(Relationship::CustomerOf) => {
        return Some(AttackFinding {
          kind: AttackKind::RouteLeak,
          severity: Severity::Medium,
          attacker_asn: b,
          victim_asn: None,
          prefix: observation.prefix,
          confidence: 0.85,
        });
      }
      _ => {}
    }
  }
  None
}
