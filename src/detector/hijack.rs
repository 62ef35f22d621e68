//! Origin and sub-prefix hijack rules.

use {
  super::{AttackFinding, AttackKind, Severity},
  crate::{observation::Observation, roa::RoaTable},
};

/// A ROA exists for exactly this prefix but none of them authorizes
/// the announced origin.
pub fn check_origin(
  roa: &RoaTable,
  observation: &Observation,
) -> Option<AttackFinding> {
  let mut covered = false;
  let mut victims: Vec<u32> = Vec::new();
  for entry in roa.exact_entries(&observation.prefix) {
    covered = true;
    if entry.origin_asn == observation.origin_asn {
      return None;
    }
    victims.push(entry.origin_asn);
  }
  if !covered {
    return None;
  }
  victims.sort_unstable();
  Some(AttackFinding {
    kind: AttackKind::PrefixHijack,
    severity: Severity::Critical,
    attacker_asn: observation.origin_asn,
    victim_asn: victims.first().copied(),
    prefix: observation.prefix,
    confidence: 0.95,
  })
}

/// The announced prefix is strictly more specific than a ROA-covered
/// parent owned by someone else, and the origin is not authorized
/// within the parent's max-length.
pub fn check_subprefix(
  roa: &RoaTable,
  observation: &Observation,
) -> Option<AttackFinding> {
  if roa.is_authorized(&observation.prefix, observation.origin_asn) {
    return None;
  }
  let victim = roa
    .covering_parents(&observation.prefix)
    .filter(|entry| entry.origin_asn != observation.origin_asn)
    .map(|entry| entry.origin_asn)
    .min()?;
  Some(AttackFinding {
    kind: AttackKind::SubprefixHijack,
    severity: Severity::High,
    attacker_asn: observation.origin_asn,
    victim_asn: Some(victim),
    prefix: observation.prefix,
    confidence: 0.9,
  })
}
