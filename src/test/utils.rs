//! Shared fixtures: a keyed committee, lab ROA/relationship tables
//! and an in-process cluster driven with a manual clock so the
//! consensus tests stay deterministic.

use {
  crate::{
    bus::MessageBus,
    config::Config,
    node::Node,
    observation::{Observation, ObservationKind, ObservationSource},
    primitives::{KeyRegistry, Keypair},
    relations::RelationshipTable,
    roa::{RoaEntry, RoaTable},
    stake::StakeRegistry,
  },
  std::{collections::BTreeMap, sync::Arc},
};

pub const T0: i64 = 1_700_000_000;

pub struct TestCommittee {
  pub registry: Arc<KeyRegistry>,
  pub keys: BTreeMap<u32, Keypair>,
}

pub fn committee(asns: &[u32]) -> TestCommittee {
  let keys: BTreeMap<u32, Keypair> =
    asns.iter().map(|&asn| (asn, Keypair::unique())).collect();
  let mut registry = KeyRegistry::default();
  for (&asn, key) in &keys {
    registry.insert(asn, key.public());
  }
  TestCommittee {
    registry: Arc::new(registry),
    keys,
  }
}

/// ROA coverage for the lab address plan.
pub fn lab_roa() -> Arc<RoaTable> {
  Arc::new(RoaTable::new(vec![
    RoaEntry {
      prefix: "203.0.113.0/24".parse().unwrap(),
      origin_asn: 65001,
      max_length: 24,
      trust_anchor: "lab".into(),
    },
    RoaEntry {
      prefix: "8.8.8.0/24".parse().unwrap(),
      origin_asn: 15169,
      max_length: 24,
      trust_anchor: "arin".into(),
    },
    RoaEntry {
      prefix: "198.51.100.0/24".parse().unwrap(),
      origin_asn: 64500,
      max_length: 28,
      trust_anchor: "lab".into(),
    },
  ]))
}

pub fn observation(
  observer: u32,
  prefix: &str,
  origin: u32,
  path: &[u32],
  timestamp: i64,
) -> Observation {
  Observation {
    prefix: prefix.parse().unwrap(),
    origin_asn: origin,
    as_path: path.to_vec(),
    timestamp,
    observer_asn: observer,
    kind: ObservationKind::Announce,
    is_attack: false,
    label: None,
  }
}

/// A whole committee wired to one bus, with per-node observation
/// streams fixed up front. Every step takes an explicit clock.
pub struct Cluster {
  pub bus: Arc<MessageBus>,
  pub nodes: BTreeMap<u32, Node>,
  _dir: tempfile::TempDir,
}

impl Cluster {
  pub fn new(
    committee: &TestCommittee,
    config: Config,
    roa: Arc<RoaTable>,
    relations: Arc<RelationshipTable>,
    stakes: Arc<StakeRegistry>,
    mut streams: BTreeMap<u32, Vec<Observation>>,
  ) -> Self {
    let bus = Arc::new(MessageBus::new());
    let dir = tempfile::tempdir().unwrap();
    let mut nodes = BTreeMap::new();
    for (&asn, keypair) in &committee.keys {
      let observations = streams.remove(&asn).unwrap_or_default();
      let node = Node::new(
        asn,
        keypair.clone(),
        Arc::clone(&committee.registry),
        config.clone(),
        Arc::clone(&roa),
        Arc::clone(&relations),
        Arc::clone(&stakes),
        Arc::clone(&bus),
        ObservationSource::immediate(observations),
        dir.path(),
      )
      .unwrap();
      nodes.insert(asn, node);
    }
    Self {
      bus,
      nodes,
      _dir: dir,
    }
  }

  pub fn poll_all(&mut self, now: i64) {
    for node in self.nodes.values_mut() {
      node.on_poll(now).unwrap();
    }
  }

  /// Delivers gossip to a fixpoint: keeps draining every inbox
  /// until a full round moves nothing.
  pub fn pump(&mut self, now: i64) {
    loop {
      let moved: usize = self
        .nodes
        .values_mut()
        .map(|node| node.drain_inbox(now).unwrap())
        .sum();
      if moved == 0 {
        break;
      }
    }
  }

  pub fn tick_all(&mut self, now: i64) {
    for node in self.nodes.values_mut() {
      node.on_tick(now).unwrap();
    }
    self.pump(now);
  }

  pub fn node(&self, asn: u32) -> &Node {
    &self.nodes[&asn]
  }
}
