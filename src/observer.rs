//! The observer pipeline: ingest, classify, remember, sign.
//!
//! Each poll drains the local observation stream, runs the
//! detector, records what was seen into the knowledge base and
//! topology cache, and emits signed candidate transactions ready
//! for admission into the pool.

use {
  crate::{
    detector::AttackDetector,
    knowledge::{KnowledgeBase, TopologyCache},
    observation::ObservationSource,
    pool::Candidate,
    primitives::Keypair,
    reputation::ReputationStore,
    roa::RoaTable,
  },
  std::sync::Arc,
  tracing::debug,
};

/// A candidate plus the facts the pool needs to admit it.
pub struct PreparedCandidate {
  pub candidate: Candidate,
  /// Origin is ROA-authorized for the announced prefix. Decides
  /// the sampling window and skips reputation tracking.
  pub authorized_origin: bool,
}

pub struct ObserverPipeline {
  asn: u32,
  keypair: Arc<Keypair>,
  source: ObservationSource,
  observed: u64,
}

impl ObserverPipeline {
  pub fn new(
    asn: u32,
    keypair: Arc<Keypair>,
    source: ObservationSource,
  ) -> Self {
    Self {
      asn,
      keypair,
      source,
      observed: 0,
    }
  }

  /// One pipeline pass. Never blocks; an idle stream produces
  /// nothing.
  pub fn poll(
    &mut self,
    detector: &mut AttackDetector,
    knowledge: &KnowledgeBase,
    topology: &mut TopologyCache,
    reputation: &ReputationStore,
    roa: &RoaTable,
    now: i64,
  ) -> Vec<PreparedCandidate> {
    let mut prepared = Vec::new();
    for observation in self.source.poll_new() {
      self.observed += 1;

      let findings = detector.detect(&observation);
      knowledge.record(
        observation.prefix,
        observation.origin_asn,
        observation.timestamp,
        now,
      );

      let authorized_origin =
        roa.is_authorized(&observation.prefix, observation.origin_asn);
      if !authorized_origin {
        topology.record_observation(observation.origin_asn, None, now);
      }

      let trust_score = reputation.score(observation.origin_asn);
      let candidate = Candidate::from_observation(
        &self.keypair,
        &observation,
        findings,
        trust_score,
        now,
      );
      debug!("AS{} prepared {candidate}", self.asn);
      prepared.push(PreparedCandidate {
        candidate,
        authorized_origin,
      });
    }
    prepared
  }

  pub fn observed(&self) -> u64 {
    self.observed
  }

  pub fn skipped(&self) -> u64 {
    self.source.skipped()
  }
}

#[cfg(test)]
mod test {
  use {
    super::ObserverPipeline,
    crate::{
      config::Config,
      detector::AttackDetector,
      knowledge::{KnowledgeBase, TopologyCache},
      observation::{Observation, ObservationKind, ObservationSource},
      primitives::Keypair,
      relations::RelationshipTable,
      reputation::ReputationStore,
      roa::{RoaEntry, RoaTable},
    },
    std::sync::Arc,
  };

  fn roa() -> Arc<RoaTable> {
    Arc::new(RoaTable::new(vec![RoaEntry {
      prefix: "203.0.113.0/24".parse().unwrap(),
      origin_asn: 65001,
      max_length: 24,
      trust_anchor: "lab".into(),
    }]))
  }

  fn observation(prefix: &str, origin: u32) -> Observation {
    Observation {
      prefix: prefix.parse().unwrap(),
      origin_asn: origin,
      as_path: vec![origin],
      timestamp: 1_700_000_000,
      observer_asn: 1,
      kind: ObservationKind::Announce,
      is_attack: false,
      label: None,
    }
  }

  #[test]
  fn pipeline_classifies_records_and_signs() {
    let roa = roa();
    let keypair = Arc::new(Keypair::unique());
    let config = Config::default();
    let mut detector = AttackDetector::new(
      roa.clone(),
      Arc::new(RelationshipTable::default()),
      &config,
    );
    let knowledge = KnowledgeBase::new(
      config.knowledge_window,
      config.knowledge_match_tolerance,
      config.knowledge_max_entries,
    );
    let mut topology = TopologyCache::new(1, [1, 3, 5]);
    let reputation = ReputationStore::new(config);

    let mut pipeline = ObserverPipeline::new(
      1,
      keypair.clone(),
      ObservationSource::immediate(vec![
        observation("203.0.113.0/24", 65001),
        observation("203.0.113.0/24", 666),
      ]),
    );

    let prepared = pipeline.poll(
      &mut detector,
      &knowledge,
      &mut topology,
      &reputation,
      &roa,
      1_700_000_000,
    );

    assert_eq!(prepared.len(), 2);
    assert!(prepared[0].authorized_origin);
    assert!(!prepared[0].candidate.is_attack);
    assert!(!prepared[1].authorized_origin);
    assert!(prepared[1].candidate.is_attack);
    for p in &prepared {
      p.candidate.verify_signature(&keypair.public()).unwrap();
    }

    // both observations are now local knowledge
    assert!(knowledge.matches(
      &"203.0.113.0/24".parse().unwrap(),
      65001,
      1_700_000_000
    ));
    // only the non-authorized origin enters the topology cache
    assert_eq!(topology.relevant_peers(666), vec![3, 5]);
    assert_eq!(topology.tracked(), 1);
    assert_eq!(pipeline.observed(), 2);
  }

  #[test]
  fn empty_stream_is_a_no_op() {
    let roa = roa();
    let config = Config::default();
    let mut detector = AttackDetector::new(
      roa.clone(),
      Arc::new(RelationshipTable::default()),
      &config,
    );
    let knowledge = KnowledgeBase::new(
      config.knowledge_window,
      config.knowledge_match_tolerance,
      config.knowledge_max_entries,
    );
    let mut topology = TopologyCache::new(1, [1, 3]);
    let reputation = ReputationStore::new(config);

    let mut pipeline = ObserverPipeline::new(
      1,
      Arc::new(Keypair::unique()),
      ObservationSource::immediate(vec![]),
    );
    assert!(pipeline
      .poll(
        &mut detector,
        &knowledge,
        &mut topology,
        &reputation,
        &roa,
        1_700_000_000
      )
      .is_empty());
  }
}
