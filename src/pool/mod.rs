//! The consensus core.
//!
//! Every locally observed announcement becomes a signed candidate
//! transaction that must gather a quorum of approving votes from
//! topologically relevant peers before it is finalized, or hit its
//! deadline and take the documented timeout path. The pool is a
//! plain state machine: operations take the current wall clock and
//! return effects (who to gossip to, what finalized) instead of
//! calling outward, so the owning node stays the single writer and
//! message handlers can never re-enter it.

mod transaction;
mod vote;

pub use {
  transaction::{Candidate, FinalizedTransaction, TransactionId},
  vote::{Vote, VoteDecision},
};

use {
  crate::{
    config::Config,
    primitives::{Ipv4Prefix, KeyRegistry, Keypair},
  },
  indexmap::{IndexMap, IndexSet},
  serde::Serialize,
  std::{sync::Arc, time::Duration},
  tracing::{debug, warn},
};

#[derive(Debug)]
struct PendingEntry {
  transaction: Candidate,
  /// All votes in arrival order, keyed by voter AS. A voter's
  /// second vote never makes it in here.
  votes: IndexMap<u32, Vote>,
  deadline: i64,
  asked_peers: Vec<u32>,
}

impl PendingEntry {
  fn approvals(&self) -> usize {
    self.votes.values().filter(|v| v.approved()).count()
  }

  fn rejections(&self) -> usize {
    self.votes.len() - self.approvals()
  }
}

/// Pool health counters, exported with the node's final report.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PoolStats {
  pub admitted: u64,
  pub replays_rejected: u64,
  pub sampled_rejected: u64,
  pub duplicate_votes: u64,
  pub invalid_signatures: u64,
  pub unknown_votes: u64,
  pub finalized_quorum: u64,
  pub finalized_deadline: u64,
  pub dropped_deadline: u64,
  pub evicted_capacity: u64,
}

#[derive(Debug)]
pub enum AdmitOutcome {
  /// Candidate entered the pending set; gossip a vote request to
  /// these peers.
  Admitted { gossip_to: Vec<u32> },
  /// Already committed or already pending.
  Replay,
  /// Suppressed by the (prefix, origin) sampling window.
  Sampled,
}

/// A transaction that left the pending set, together with the
/// peers that were asked to vote but never answered.
#[derive(Debug)]
pub struct FinalizeOutcome {
  pub finalized: FinalizedTransaction,
  pub missed_peers: Vec<u32>,
}

#[derive(Debug)]
pub enum VoteOutcome {
  Recorded,
  Finalized(Box<FinalizeOutcome>),
  Ignored,
}

pub struct TransactionPool {
  my_asn: u32,
  keypair: Arc<Keypair>,
  registry: Arc<KeyRegistry>,
  config: Config,
  pending: IndexMap<TransactionId, PendingEntry>,
  committed_ids: IndexSet<TransactionId>,
  last_seen: IndexMap<(Ipv4Prefix, u32), i64>,
  stats: PoolStats,
}

impl TransactionPool {
  pub fn new(
    my_asn: u32,
    keypair: Arc<Keypair>,
    registry: Arc<KeyRegistry>,
    config: Config,
  ) -> Self {
    Self {
      my_asn,
      keypair,
      registry,
      config,
      pending: IndexMap::new(),
      committed_ids: IndexSet::new(),
      last_seen: IndexMap::new(),
      stats: PoolStats::default(),
    }
  }

  /// Admits a locally observed candidate. The caller picks the
  /// sampling window (long for authorized origins, short
  /// otherwise) and the peer set worth asking.
  pub fn admit(
    &mut self,
    candidate: Candidate,
    now: i64,
    dedup_window: Duration,
    relevant_peers: Vec<u32>,
  ) -> AdmitOutcome {
    let id = candidate.transaction_id;
    if self.committed_ids.contains(&id) || self.pending.contains_key(&id) {
      self.stats.replays_rejected += 1;
      return AdmitOutcome::Replay;
    }

    let key = (candidate.prefix, candidate.origin_asn);
    if !candidate.is_attack {
      if let Some(last) = self.last_seen.get(&key) {
        if now - last < dedup_window.as_secs() as i64 {
          self.stats.sampled_rejected += 1;
          return AdmitOutcome::Sampled;
        }
      }
    }

    self.make_room();

    let timeout = if candidate.is_attack {
      self.config.attack_timeout
    } else {
      self.config.regular_timeout
    };
    let deadline = now + timeout.as_secs() as i64;

    let gossip_to: Vec<u32> = relevant_peers
      .into_iter()
      .filter(|&peer| peer != self.my_asn)
      .take(self.config.max_broadcast_peers)
      .collect();

    // the observer's own judgment is the first vote
    let self_vote = Vote::new(
      &self.keypair,
      id,
      self.my_asn,
      VoteDecision::Approve,
      now,
    );
    let mut votes = IndexMap::new();
    votes.insert(self.my_asn, self_vote);

    debug!(
      "admitted {} (deadline +{}s, {} peers)",
      candidate,
      timeout.as_secs(),
      gossip_to.len()
    );

    self.last_seen.insert(key, now);
    while self.last_seen.len() > self.config.last_seen_max {
      self.last_seen.shift_remove_index(0);
    }

    self.pending.insert(id, PendingEntry {
      transaction: candidate,
      votes,
      deadline,
      asked_peers: gossip_to.clone(),
    });
    self.stats.admitted += 1;
    AdmitOutcome::Admitted { gossip_to }
  }

  /// Evicts oldest regular entries (then oldest attacks) once the
  /// pending set is at capacity.
  fn make_room(&mut self) {
    while self.pending.len() >= self.config.pending_max_capacity {
      let victim = self
        .pending
        .iter()
        .position(|(_, entry)| !entry.transaction.is_attack)
        .unwrap_or(0);
      if let Some((id, _)) = self.pending.shift_remove_index(victim) {
        warn!("pool saturated, evicting pending {id}");
        self.stats.evicted_capacity += 1;
      }
    }
  }

  /// Replay screen for candidates arriving from peers: no vote is
  /// owed on something this node already committed or is itself
  /// collecting votes for.
  pub fn should_vote_on(&mut self, candidate: &Candidate) -> bool {
    if self.committed_ids.contains(&candidate.transaction_id)
      || self.pending.contains_key(&candidate.transaction_id)
    {
      self.stats.replays_rejected += 1;
      return false;
    }
    if candidate.observer_asn == self.my_asn {
      // self-initiated gossip reflected back by the bus
      return false;
    }
    true
  }

  /// Validates a peer candidate's signature against the key
  /// registry.
  pub fn verify_candidate(&mut self, candidate: &Candidate) -> bool {
    let observer = match self.registry.get(candidate.observer_asn) {
      Some(key) => key,
      None => {
        self.stats.invalid_signatures += 1;
        warn!("candidate from unknown validator AS{}", candidate.observer_asn);
        return false;
      }
    };
    match candidate.verify_signature(observer) {
      Ok(()) => true,
      Err(_) => {
        self.stats.invalid_signatures += 1;
        warn!("bad signature on candidate from AS{}", candidate.observer_asn);
        false
      }
    }
  }

  /// Signs this node's answer to a peer's vote request.
  pub fn cast_vote(
    &self,
    transaction_id: TransactionId,
    decision: VoteDecision,
    now: i64,
  ) -> Vote {
    Vote::new(&self.keypair, transaction_id, self.my_asn, decision, now)
  }

  /// Records a peer's vote on one of our pending transactions.
  /// Unknown and already-committed transaction ids, duplicate
  /// voters and bad signatures are all dropped on the floor.
  pub fn on_vote(&mut self, vote: Vote, now: i64) -> VoteOutcome {
    if self.committed_ids.contains(&vote.transaction_id) {
      self.stats.replays_rejected += 1;
      return VoteOutcome::Ignored;
    }
    let entry = match self.pending.get_mut(&vote.transaction_id) {
      Some(entry) => entry,
      None => {
        self.stats.unknown_votes += 1;
        return VoteOutcome::Ignored;
      }
    };
    if entry.votes.contains_key(&vote.voter_asn) {
      self.stats.duplicate_votes += 1;
      debug!(
        "duplicate vote from AS{} on {}",
        vote.voter_asn, vote.transaction_id
      );
      return VoteOutcome::Ignored;
    }
    let voter = match self.registry.get(vote.voter_asn) {
      Some(key) => key,
      None => {
        self.stats.invalid_signatures += 1;
        return VoteOutcome::Ignored;
      }
    };
    if vote.verify_signature(voter).is_err() {
      self.stats.invalid_signatures += 1;
      warn!("bad signature on vote from AS{}", vote.voter_asn);
      return VoteOutcome::Ignored;
    }

    entry.votes.insert(vote.voter_asn, vote.clone());

    if entry.approvals() >= self.config.min_signatures {
      let id = vote.transaction_id;
      let entry = self.pending.shift_remove(&id).expect("entry exists");
      // any finding makes the committed verdict an attack, even
      // below the severity that triggers the attack fast-path
      let committed_as_attack = !entry.transaction.findings.is_empty();
      self.stats.finalized_quorum += 1;
      return VoteOutcome::Finalized(Box::new(self.seal(
        entry,
        committed_as_attack,
        now,
      )));
    }
    VoteOutcome::Recorded
  }

  /// Deadline sweep, run at a steady cadence. Expired entries
  /// either finalize under the timeout policy or are dropped.
  pub fn tick(&mut self, now: i64) -> Vec<FinalizeOutcome> {
    let expired: Vec<TransactionId> = self
      .pending
      .iter()
      .filter(|(_, entry)| now >= entry.deadline)
      .map(|(id, _)| *id)
      .collect();

    let mut finalized = Vec::new();
    for id in expired {
      let entry = self.pending.shift_remove(&id).expect("entry exists");
      let approvals = entry.approvals();
      let rejections = entry.rejections();

      if approvals >= self.config.min_signatures {
        self.stats.finalized_quorum += 1;
        let as_attack = !entry.transaction.findings.is_empty();
        finalized.push(self.seal(entry, as_attack, now));
      } else if entry.transaction.is_attack {
        // fail closed: the local detector's evidence carries the
        // commit unless the committee overwhelmingly disagreed
        let overturned = rejections >= self.config.min_signatures
          && rejections > approvals;
        if overturned {
          debug!("attack {} overturned at deadline", id);
        }
        self.stats.finalized_deadline += 1;
        finalized.push(self.seal(entry, !overturned, now));
      } else if self.config.timeout_commit_partial && approvals >= 1 {
        self.stats.finalized_deadline += 1;
        let as_attack = !entry.transaction.findings.is_empty();
        finalized.push(self.seal(entry, as_attack, now));
      } else {
        debug!("dropping {} at deadline with {approvals} approvals", id);
        self.stats.dropped_deadline += 1;
      }
    }
    finalized
  }

  fn seal(
    &mut self,
    entry: PendingEntry,
    committed_as_attack: bool,
    now: i64,
  ) -> FinalizeOutcome {
    let missed_peers: Vec<u32> = entry
      .asked_peers
      .iter()
      .copied()
      .filter(|peer| !entry.votes.contains_key(peer))
      .collect();

    let mut approvals: IndexMap<u32, Vote> = entry
      .votes
      .iter()
      .filter(|(_, vote)| vote.approved())
      .map(|(asn, vote)| (*asn, vote.clone()))
      .collect();
    while approvals.len() > self.config.cap_signatures {
      approvals.pop();
    }

    let rejections: Vec<u32> = entry
      .votes
      .iter()
      .filter(|(_, vote)| !vote.approved())
      .map(|(asn, _)| *asn)
      .collect();

    self.committed_ids.insert(entry.transaction.transaction_id);
    while self.committed_ids.len() > self.config.committed_ids_max {
      self.committed_ids.shift_remove_index(0);
    }

    FinalizeOutcome {
      finalized: FinalizedTransaction {
        transaction: entry.transaction,
        approvals,
        rejections,
        committed_as_attack,
        finalized_at: now,
      },
      missed_peers,
    }
  }

  pub fn pending_len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_committed(&self, id: &TransactionId) -> bool {
    self.committed_ids.contains(id)
  }

  pub fn stats(&self) -> &PoolStats {
    &self.stats
  }
}

#[cfg(test)]
mod test {
  use {
    super::{
      AdmitOutcome,
      Candidate,
      TransactionPool,
      Vote,
      VoteDecision,
      VoteOutcome,
    },
    crate::{
      config::Config,
      observation::{Observation, ObservationKind},
      primitives::{KeyRegistry, Keypair},
    },
    std::{collections::BTreeMap, sync::Arc, time::Duration},
  };

  struct Committee {
    keys: BTreeMap<u32, Arc<Keypair>>,
    registry: Arc<KeyRegistry>,
  }

  impl Committee {
    fn new(asns: &[u32]) -> Self {
      let keys: BTreeMap<u32, Arc<Keypair>> = asns
        .iter()
        .map(|&asn| (asn, Arc::new(Keypair::unique())))
        .collect();
      let mut registry = KeyRegistry::default();
      for (&asn, key) in &keys {
        registry.insert(asn, key.public());
      }
      Self {
        keys,
        registry: Arc::new(registry),
      }
    }

    fn pool(&self, asn: u32, config: Config) -> TransactionPool {
      TransactionPool::new(
        asn,
        Arc::clone(&self.keys[&asn]),
        Arc::clone(&self.registry),
        config,
      )
    }

    fn vote(
      &self,
      voter: u32,
      candidate: &Candidate,
      decision: VoteDecision,
      now: i64,
    ) -> Vote {
      Vote::new(
        &self.keys[&voter],
        candidate.transaction_id,
        voter,
        decision,
        now,
      )
    }
  }

  fn observation(attack: bool) -> Observation {
    Observation {
      prefix: "203.0.113.0/24".parse().unwrap(),
      origin_asn: 65001,
      as_path: vec![65001],
      timestamp: 1_700_000_000,
      observer_asn: 1,
      kind: ObservationKind::Announce,
      is_attack: attack,
      label: None,
    }
  }

  fn candidate(committee: &Committee, observer: u32, attack: bool) -> Candidate {
    let mut observation = observation(attack);
    observation.observer_asn = observer;
    let findings = if attack {
      vec![crate::detector::AttackFinding {
        kind: crate::detector::AttackKind::PrefixHijack,
        severity: crate::detector::Severity::Critical,
        attacker_asn: 65001,
        victim_asn: Some(15169),
        prefix: observation.prefix,
        confidence: 0.95,
      }]
    } else {
      vec![]
    };
    Candidate::from_observation(
      &committee.keys[&observer],
      &observation,
      findings,
      None,
      1_700_000_000,
    )
  }

  const NOW: i64 = 1_700_000_000;

  #[test]
  fn quorum_finalizes_a_regular_transaction() {
    let committee = Committee::new(&[1, 3, 5, 7, 9]);
    let mut pool = committee.pool(1, Config::default());
    let candidate = candidate(&committee, 1, false);

    let outcome = pool.admit(
      candidate.clone(),
      NOW,
      Duration::from_secs(10),
      vec![3, 5, 7, 9],
    );
    let gossip = match outcome {
      AdmitOutcome::Admitted { gossip_to } => gossip_to,
      other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(gossip, vec![3, 5, 7, 9]);

    let v3 = committee.vote(3, &candidate, VoteDecision::Approve, NOW + 1);
    assert!(matches!(pool.on_vote(v3, NOW + 1), VoteOutcome::Recorded));

    // self vote + AS3 + AS5 reaches the quorum of 3
    let v5 = committee.vote(5, &candidate, VoteDecision::Approve, NOW + 2);
    match pool.on_vote(v5, NOW + 2) {
      VoteOutcome::Finalized(outcome) => {
        assert_eq!(outcome.finalized.approval_count(), 3);
        assert!(!outcome.finalized.committed_as_attack);
        assert_eq!(outcome.missed_peers, vec![7, 9]);
      }
      other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(pool.is_committed(&candidate.transaction_id));
  }

  #[test]
  fn replayed_transaction_id_is_rejected() {
    let committee = Committee::new(&[1, 3, 5]);
    let mut pool = committee.pool(1, Config::default());
    let candidate = candidate(&committee, 1, false);

    pool.admit(candidate.clone(), NOW, Duration::from_secs(10), vec![3, 5]);
    for voter in [3, 5] {
      let vote = committee.vote(voter, &candidate, VoteDecision::Approve, NOW);
      pool.on_vote(vote, NOW);
    }
    assert!(pool.is_committed(&candidate.transaction_id));

    // same transaction id arrives again
    let outcome =
      pool.admit(candidate.clone(), NOW + 1, Duration::from_secs(10), vec![3]);
    assert!(matches!(outcome, AdmitOutcome::Replay));
    assert_eq!(pool.pending_len(), 0);
    assert!(!pool.should_vote_on(&candidate));
  }

  #[test]
  fn duplicate_voter_never_changes_the_tally() {
    let committee = Committee::new(&[1, 3, 5, 7]);
    let mut pool = committee.pool(1, Config::default());
    let candidate = candidate(&committee, 1, false);
    pool.admit(candidate.clone(), NOW, Duration::from_secs(10), vec![3, 5, 7]);

    let vote = committee.vote(3, &candidate, VoteDecision::Approve, NOW);
    assert!(matches!(pool.on_vote(vote.clone(), NOW), VoteOutcome::Recorded));
    // network re-delivery
    assert!(matches!(pool.on_vote(vote, NOW + 1), VoteOutcome::Ignored));
    assert_eq!(pool.stats().duplicate_votes, 1);

    // the third distinct approver still finalizes
    let vote = committee.vote(5, &candidate, VoteDecision::Approve, NOW + 2);
    assert!(matches!(
      pool.on_vote(vote, NOW + 2),
      VoteOutcome::Finalized(_)
    ));
  }

  #[test]
  fn forged_votes_are_dropped() {
    let committee = Committee::new(&[1, 3, 5]);
    let mut pool = committee.pool(1, Config::default());
    let candidate = candidate(&committee, 1, false);
    pool.admit(candidate.clone(), NOW, Duration::from_secs(10), vec![3, 5]);

    // AS5's key signing a vote claiming to be AS3
    let forged = Vote::new(
      &committee.keys[&5],
      candidate.transaction_id,
      3,
      VoteDecision::Approve,
      NOW,
    );
    assert!(matches!(pool.on_vote(forged, NOW), VoteOutcome::Ignored));
    assert_eq!(pool.stats().invalid_signatures, 1);
  }

  #[test]
  fn sampling_window_suppresses_repeat_announcements() {
    let committee = Committee::new(&[1, 3]);
    let mut pool = committee.pool(1, Config::default());

    let first = candidate(&committee, 1, false);
    let second = candidate(&committee, 1, false);
    assert!(matches!(
      pool.admit(first, NOW, Duration::from_secs(10), vec![3]),
      AdmitOutcome::Admitted { .. }
    ));
    assert!(matches!(
      pool.admit(second.clone(), NOW + 5, Duration::from_secs(10), vec![3]),
      AdmitOutcome::Sampled
    ));
    // outside the window it is admitted again
    assert!(matches!(
      pool.admit(second, NOW + 11, Duration::from_secs(10), vec![3]),
      AdmitOutcome::Admitted { .. }
    ));
  }

  #[test]
  fn attack_candidates_bypass_sampling() {
    let committee = Committee::new(&[1, 3]);
    let mut pool = committee.pool(1, Config::default());

    let regular = candidate(&committee, 1, false);
    pool.admit(regular, NOW, Duration::from_secs(3600), vec![3]);

    let attack = candidate(&committee, 1, true);
    assert!(matches!(
      pool.admit(attack, NOW + 1, Duration::from_secs(3600), vec![3]),
      AdmitOutcome::Admitted { .. }
    ));
  }

  #[test]
  fn regular_timeout_commits_partial_approvals_when_allowed() {
    let committee = Committee::new(&[1, 3, 5, 7]);
    let mut pool = committee.pool(1, Config::default());
    let candidate = candidate(&committee, 1, false);
    pool.admit(candidate.clone(), NOW, Duration::from_secs(10), vec![3, 5, 7]);

    let vote = committee.vote(3, &candidate, VoteDecision::Approve, NOW + 1);
    pool.on_vote(vote, NOW + 1);

    assert!(pool.tick(NOW + 59).is_empty());
    let finalized = pool.tick(NOW + 60);
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].finalized.approval_count(), 2);
    assert!(!finalized[0].finalized.committed_as_attack);
    assert_eq!(finalized[0].missed_peers, vec![5, 7]);
  }

  #[test]
  fn regular_timeout_drops_when_partial_commit_is_off() {
    let committee = Committee::new(&[1, 3, 5]);
    let mut config = Config::default();
    config.timeout_commit_partial = false;
    let mut pool = committee.pool(1, config);
    let candidate = candidate(&committee, 1, false);
    pool.admit(candidate.clone(), NOW, Duration::from_secs(10), vec![3, 5]);

    assert!(pool.tick(NOW + 60).is_empty());
    assert_eq!(pool.stats().dropped_deadline, 1);
    assert_eq!(pool.pending_len(), 0);
    // dropped, not committed: it may be re-observed later
    assert!(!pool.is_committed(&candidate.transaction_id));
  }

  #[test]
  fn attack_fails_closed_at_deadline() {
    let committee = Committee::new(&[1, 3, 5, 7]);
    let mut pool = committee.pool(1, Config::default());
    let candidate = candidate(&committee, 1, true);
    pool.admit(candidate.clone(), NOW, Duration::from_secs(10), vec![3, 5, 7]);

    let vote = committee.vote(3, &candidate, VoteDecision::Reject, NOW + 1);
    pool.on_vote(vote, NOW + 1);

    let finalized = pool.tick(NOW + 180);
    assert_eq!(finalized.len(), 1);
    // one rejection is not overwhelming; the local evidence wins
    assert!(finalized[0].finalized.committed_as_attack);
  }

  #[test]
  fn attack_overturned_by_overwhelming_rejection() {
    let committee = Committee::new(&[1, 3, 5, 7, 9]);
    let mut pool = committee.pool(1, Config::default());
    let candidate = candidate(&committee, 1, true);
    pool.admit(
      candidate.clone(),
      NOW,
      Duration::from_secs(10),
      vec![3, 5, 7, 9],
    );

    for voter in [3, 5, 7, 9] {
      let vote = committee.vote(voter, &candidate, VoteDecision::Reject, NOW);
      pool.on_vote(vote, NOW);
    }

    let finalized = pool.tick(NOW + 180);
    assert_eq!(finalized.len(), 1);
    assert!(!finalized[0].finalized.committed_as_attack);
    assert_eq!(finalized[0].finalized.rejections, vec![3, 5, 7, 9]);
  }

  #[test]
  fn saturation_evicts_regular_entries_first() {
    let committee = Committee::new(&[1, 3]);
    let mut config = Config::default();
    config.pending_max_capacity = 2;
    let mut pool = committee.pool(1, config);

    let attack = candidate(&committee, 1, true);
    let attack_id = attack.transaction_id;
    pool.admit(attack, NOW, Duration::from_secs(0), vec![3]);
    pool.admit(
      candidate(&committee, 1, false),
      NOW + 1,
      Duration::from_secs(0),
      vec![3],
    );
    pool.admit(
      candidate(&committee, 1, false),
      NOW + 2,
      Duration::from_secs(0),
      vec![3],
    );

    assert_eq!(pool.pending_len(), 2);
    assert_eq!(pool.stats().evicted_capacity, 1);
    // the attack entry survived the eviction
    assert!(!pool.is_committed(&attack_id));
    assert!(pool.tick(NOW + 200).iter().any(|outcome| {
      outcome.finalized.transaction.transaction_id == attack_id
    }));
  }
}
