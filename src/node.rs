//! One validator node.
//!
//! The node owns every piece of mutable state (pool, ledger,
//! reputation, coins, knowledge, topology, flap history) and is
//! driven by a single task: observation polls, the 1 Hz deadline
//! tick and inbound gossip are all serialized through it, so the
//! state-writer needs no further locking. Pool operations hand
//! back effects; this is where they turn into bus traffic, ledger
//! appends and reputation/coin updates.

use {
  crate::{
    bus::{Envelope, Message, MessageBus},
    coin::{CoinError, CoinLedger, CoinReason},
    config::Config,
    detector::AttackDetector,
    knowledge::{KnowledgeBase, TopologyCache},
    ledger::{Block, LedgerStore},
    observation::{Observation, ObservationKind, ObservationSource},
    observer::{ObserverPipeline, PreparedCandidate},
    pool::{
      AdmitOutcome,
      Candidate,
      FinalizeOutcome,
      PoolStats,
      TransactionPool,
      VoteDecision,
      VoteOutcome,
    },
    primitives::{KeyRegistry, Keypair},
    relations::RelationshipTable,
    reputation::ReputationStore,
    roa::RoaTable,
    stake::StakeRegistry,
    storage::{self, StorageError},
  },
  itertools::Itertools,
  serde::Serialize,
  std::{path::PathBuf, sync::Arc, time::Duration},
  thiserror::Error,
  tokio::sync::{mpsc, watch},
  tracing::{debug, info, warn},
};

#[derive(Debug, Error)]
pub enum NodeError {
  #[error("{0}")]
  Storage(#[from] StorageError),

  // conservation breakage is an internal invariant violation and
  // takes the whole process down
  #[error("{0}")]
  Coin(#[from] CoinError),
}

/// Canonical file layout under one node's data directory.
#[derive(Debug, Clone)]
pub struct NodePaths {
  root: PathBuf,
}

impl NodePaths {
  pub fn new(data_dir: &std::path::Path, asn: u32) -> Self {
    Self {
      root: data_dir.join(format!("as{asn:02}")),
    }
  }

  pub fn chain(&self) -> PathBuf {
    self.root.join("chain.json")
  }

  pub fn reputation(&self) -> PathBuf {
    self.root.join("reputation.json")
  }

  pub fn coins(&self) -> PathBuf {
    self.root.join("bgpcoin.json")
  }

  pub fn knowledge(&self) -> PathBuf {
    self.root.join("knowledge.json")
  }

  pub fn topology(&self) -> PathBuf {
    self.root.join("topology.json")
  }

  pub fn verdicts(&self) -> PathBuf {
    self.root.join("attack_verdicts.jsonl")
  }
}

/// One line of the attack-verdict log.
#[derive(Serialize)]
struct VerdictRecord<'a> {
  transaction: &'a Candidate,
  approvals: Vec<u32>,
  rejections: &'a [u32],
  committed_as_attack: bool,
  attacker_stake: u128,
  finalized_at: i64,
}

/// Final per-node summary returned after shutdown.
#[derive(Debug, Serialize)]
pub struct NodeReport {
  pub asn: u32,
  pub observed: u64,
  pub skipped: u64,
  pub chain_height: usize,
  pub coin_balance: u64,
  pub pool: PoolStats,
}

pub struct Node {
  asn: u32,
  config: Config,
  validators: Vec<u32>,
  roa: Arc<RoaTable>,
  stakes: Arc<StakeRegistry>,
  detector: AttackDetector,
  knowledge: KnowledgeBase,
  topology: TopologyCache,
  observer: ObserverPipeline,
  pool: TransactionPool,
  ledger: LedgerStore,
  reputation: ReputationStore,
  coins: CoinLedger,
  bus: Arc<MessageBus>,
  inbox: mpsc::Receiver<Envelope>,
  paths: NodePaths,
  last_knowledge_cleanup: i64,
  last_snapshot: i64,
  last_heartbeat_day: i64,
}

fn unix_now() -> i64 {
  chrono::Utc::now().timestamp()
}

impl Node {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    asn: u32,
    keypair: Keypair,
    registry: Arc<KeyRegistry>,
    config: Config,
    roa: Arc<RoaTable>,
    relations: Arc<RelationshipTable>,
    stakes: Arc<StakeRegistry>,
    bus: Arc<MessageBus>,
    source: ObservationSource,
    data_dir: &std::path::Path,
  ) -> Result<Self, NodeError> {
    let keypair = Arc::new(keypair);
    let paths = NodePaths::new(data_dir, asn);
    let validators: Vec<u32> = registry.validators().collect();
    let now = unix_now();

    let ledger = LedgerStore::open(
      paths.chain(),
      config.block_batch_size,
      config.block_interval,
    )?;

    let mut reputation = ReputationStore::new(config.clone());
    reputation.load(paths.reputation())?;

    let coins = CoinLedger::load(paths.coins(), config.coin_total_supply)?;
    coins.verify_conservation()?;

    let knowledge = KnowledgeBase::new(
      config.knowledge_window,
      config.knowledge_match_tolerance,
      config.knowledge_max_entries,
    );
    knowledge.load(paths.knowledge())?;

    let topology =
      TopologyCache::load(paths.topology(), asn, validators.clone())?;

    let detector = AttackDetector::new(roa.clone(), relations, &config);
    let observer = ObserverPipeline::new(asn, keypair.clone(), source);
    let pool = TransactionPool::new(asn, keypair, registry, config.clone());
    let inbox = bus.register(asn, 1024);

    Ok(Self {
      asn,
      config,
      validators,
      roa,
      stakes,
      detector,
      knowledge,
      topology,
      observer,
      pool,
      ledger,
      reputation,
      coins,
      bus,
      inbox,
      paths,
      last_knowledge_cleanup: now,
      last_snapshot: now,
      last_heartbeat_day: now / 86400,
    })
  }

  /// The node runloop: poll observations, enforce deadlines at a
  /// steady cadence, react to gossip, until shutdown is signalled.
  pub async fn run(
    mut self,
    mut shutdown: watch::Receiver<bool>,
  ) -> Result<NodeReport, NodeError> {
    info!("AS{} online, committee of {}", self.asn, self.validators.len());

    // bootstrap topology knowledge from whoever is already up
    self.bus.broadcast(
      self.asn,
      self.peers_except_self(),
      Message::TopologyRequest,
    );

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut poll = tokio::time::interval(Duration::from_millis(250));

    loop {
      tokio::select! {
        _ = tick.tick() => {
          self.on_tick(unix_now())?;
        }
        _ = poll.tick() => {
          self.on_poll(unix_now())?;
        }
        Some(envelope) = self.inbox.recv() => {
          self.on_envelope(envelope, unix_now())?;
        }
        _ = shutdown.changed() => {
          break;
        }
      }
    }

    self.finish(unix_now())
  }

  fn peers_except_self(&self) -> Vec<u32> {
    self
      .validators
      .iter()
      .copied()
      .filter(|&v| v != self.asn)
      .collect()
  }

  /// One observer pass: classify, remember, sign, admit, gossip.
  pub fn on_poll(&mut self, now: i64) -> Result<(), NodeError> {
    let prepared = {
      let Self {
        observer,
        detector,
        knowledge,
        topology,
        reputation,
        roa,
        ..
      } = self;
      observer.poll(detector, knowledge, topology, reputation, roa, now)
    };
    for PreparedCandidate {
      candidate,
      authorized_origin,
    } in prepared
    {
      self.admit_candidate(candidate, authorized_origin, now)?;
    }
    Ok(())
  }

  fn admit_candidate(
    &mut self,
    candidate: Candidate,
    authorized_origin: bool,
    now: i64,
  ) -> Result<(), NodeError> {
    let dedup_window = if authorized_origin {
      self.config.rpki_dedup_window
    } else {
      self.config.nonrpki_dedup_window
    };
    let peers = if authorized_origin {
      self.peers_except_self()
    } else {
      self.topology.relevant_peers(candidate.origin_asn)
    };

    match self.pool.admit(candidate.clone(), now, dedup_window, peers) {
      AdmitOutcome::Admitted { gossip_to } => {
        self.bus.broadcast(
          self.asn,
          gossip_to,
          Message::VoteRequest { candidate },
        );
      }
      AdmitOutcome::Replay | AdmitOutcome::Sampled => {}
    }
    Ok(())
  }

  pub fn on_envelope(
    &mut self,
    envelope: Envelope,
    now: i64,
  ) -> Result<(), NodeError> {
    match envelope.message {
      Message::VoteRequest { candidate } => {
        self.on_vote_request(envelope.from, candidate, now)
      }
      Message::VoteResponse { vote } => {
        match self.pool.on_vote(vote, now) {
          VoteOutcome::Finalized(outcome) => self.commit(*outcome, now)?,
          VoteOutcome::Recorded | VoteOutcome::Ignored => {}
        }
        Ok(())
      }
      Message::TopologyRequest => {
        self.bus.send(Envelope {
          from: self.asn,
          to: envelope.from,
          message: Message::TopologyShare {
            export: self.topology.export(),
          },
        });
        Ok(())
      }
      Message::TopologyShare { export } => {
        self.topology.import(&export);
        Ok(())
      }
    }
  }

  /// Votes on a peer's candidate: attack claims are re-verified by
  /// the local detector, everything else is judged against local
  /// knowledge.
  fn on_vote_request(
    &mut self,
    from: u32,
    candidate: Candidate,
    now: i64,
  ) -> Result<(), NodeError> {
    if !self.pool.should_vote_on(&candidate) {
      return Ok(());
    }
    if !self.pool.verify_candidate(&candidate) {
      return Ok(());
    }

    let decision = if candidate.is_attack {
      let claim = Observation {
        prefix: candidate.prefix,
        origin_asn: candidate.origin_asn,
        as_path: candidate.as_path.clone(),
        timestamp: candidate.observation_timestamp,
        observer_asn: candidate.observer_asn,
        kind: ObservationKind::Announce,
        is_attack: false,
        label: None,
      };
      if self.detector.verify_claim(&claim) {
        VoteDecision::Approve
      } else {
        VoteDecision::Reject
      }
    } else if self.knowledge.matches(
      &candidate.prefix,
      candidate.origin_asn,
      candidate.observation_timestamp,
    ) {
      VoteDecision::Approve
    } else {
      VoteDecision::Reject
    };

    debug!(
      "AS{} voting {decision:?} on {} from AS{from}",
      self.asn, candidate.transaction_id
    );
    let vote = self.pool.cast_vote(candidate.transaction_id, decision, now);
    self.bus.send(Envelope {
      from: self.asn,
      to: from,
      message: Message::VoteResponse { vote },
    });
    Ok(())
  }

  /// The 1 Hz housekeeping pass: pool deadlines, the block timer,
  /// cache hygiene, the snapshot cadence.
  pub fn on_tick(&mut self, now: i64) -> Result<(), NodeError> {
    for outcome in self.pool.tick(now) {
      self.commit(outcome, now)?;
    }

    if let Some(block) = self.ledger.tick(now)? {
      self.on_block(&block, now)?;
    }

    if now - self.last_knowledge_cleanup
      >= self.config.knowledge_cleanup_interval.as_secs() as i64
    {
      let removed = self.knowledge.cleanup(now);
      if removed > 0 {
        debug!("AS{} expired {removed} knowledge entries", self.asn);
      }
      self.detector.prune_flaps(now);
      self.last_knowledge_cleanup = now;
    }

    self.reputation.sweep_good_behavior(now);

    if self.config.daily_heartbeat && now / 86400 != self.last_heartbeat_day {
      self.last_heartbeat_day = now / 86400;
      self.coins.reward(
        self.asn,
        self.config.reward_daily_monitoring,
        CoinReason::DailyMonitoring,
        now,
      )?;
    }

    if now - self.last_snapshot >= self.config.snapshot_interval.as_secs() as i64
    {
      self.save_snapshots()?;
      self.last_snapshot = now;
    }
    Ok(())
  }

  /// Applies one finalized transaction exactly once: ledger batch,
  /// incentives for everyone whose vote (or silence) shaped it,
  /// reputation for the origin or the attackers, and the verdict
  /// log for attacks.
  fn commit(
    &mut self,
    outcome: FinalizeOutcome,
    now: i64,
  ) -> Result<(), NodeError> {
    let FinalizeOutcome {
      finalized,
      missed_peers,
    } = outcome;
    let tx = &finalized.transaction;
    let overturned = tx.is_attack && !finalized.committed_as_attack;

    info!(
      "AS{} committing {} with approvals [{}]",
      self.asn,
      tx,
      finalized.approving_voters().map(|v| format!("AS{v}")).join(", ")
    );

    // the committing observer
    self.coins.reward(
      self.asn,
      self.config.reward_first_commit,
      CoinReason::FirstCommit,
      now,
    )?;

    // voters, depending on how the verdict landed
    let approvers: Vec<u32> = finalized.approving_voters().collect();
    for &voter in &approvers {
      if overturned {
        self.coins.penalize(
          voter,
          self.config.penalty_false_approve,
          CoinReason::FalseApprove,
          now,
        )?;
      } else {
        self.coins.reward(
          voter,
          self.config.reward_vote_approve,
          CoinReason::VoteApprove,
          now,
        )?;
      }
    }
    if !overturned {
      for &voter in &finalized.rejections {
        self.coins.penalize(
          voter,
          self.config.penalty_false_reject,
          CoinReason::FalseReject,
          now,
        )?;
      }
    }
    for &peer in &missed_peers {
      self.coins.penalize(
        peer,
        self.config.penalty_missed_participation,
        CoinReason::MissedParticipation,
        now,
      )?;
    }

    if finalized.committed_as_attack {
      self.coins.reward(
        self.asn,
        self.config.reward_attack_detection,
        CoinReason::AttackDetection,
        now,
      )?;
      for &voter in approvers.iter().filter(|&&v| v != self.asn) {
        self.coins.reward(
          voter,
          self.config.reward_attack_vote,
          CoinReason::AttackVote,
          now,
        )?;
      }

      for finding in &tx.findings {
        if !self.roa.is_authorized(&finding.prefix, finding.attacker_asn) {
          self.reputation.record_attack(
            finding.attacker_asn,
            finding.kind,
            tx.observation_timestamp,
          );
        }
      }

      let attacker = tx
        .findings
        .first()
        .map(|f| f.attacker_asn)
        .unwrap_or(tx.origin_asn);
      storage::append_jsonl(self.paths.verdicts(), &VerdictRecord {
        transaction: tx,
        approvals: approvers,
        rejections: &finalized.rejections,
        committed_as_attack: true,
        attacker_stake: self.stakes.current_stake(attacker),
        finalized_at: finalized.finalized_at,
      })?;
    } else if !self.roa.is_authorized(&tx.prefix, tx.origin_asn) {
      self
        .reputation
        .record_legitimate(tx.origin_asn, tx.observation_timestamp);
    }

    if let Some(block) = self.ledger.push(finalized, now)? {
      self.on_block(&block, now)?;
    }
    Ok(())
  }

  fn on_block(&mut self, block: &Block, now: i64) -> Result<(), NodeError> {
    self.coins.reward(
      self.asn,
      self.config.reward_block_commit,
      CoinReason::BlockCommit,
      now,
    )?;
    debug!(
      "AS{} cut {block}, chain height now {}",
      self.asn,
      self.ledger.height()
    );
    Ok(())
  }

  fn save_snapshots(&self) -> Result<(), NodeError> {
    self.reputation.save(self.paths.reputation())?;
    self.coins.save(self.paths.coins())?;
    self.knowledge.save(self.paths.knowledge())?;
    self.topology.save(self.paths.topology())?;
    Ok(())
  }

  /// Handles everything currently queued on the inbox without
  /// waiting for more. Returns how many messages were processed.
  pub fn drain_inbox(&mut self, now: i64) -> Result<usize, NodeError> {
    let mut handled = 0;
    while let Ok(envelope) = self.inbox.try_recv() {
      self.on_envelope(envelope, now)?;
      handled += 1;
    }
    Ok(handled)
  }

  pub fn asn(&self) -> u32 {
    self.asn
  }

  pub fn ledger(&self) -> &LedgerStore {
    &self.ledger
  }

  pub fn reputation(&self) -> &ReputationStore {
    &self.reputation
  }

  pub fn coins(&self) -> &CoinLedger {
    &self.coins
  }

  pub fn topology(&self) -> &TopologyCache {
    &self.topology
  }

  pub fn pool_stats(&self) -> &PoolStats {
    self.pool.stats()
  }

  pub fn paths(&self) -> &NodePaths {
    &self.paths
  }

  /// Clean shutdown: stop admitting, drain what is already queued,
  /// run one final deadline round, flush the chain and snapshots.
  fn finish(mut self, now: i64) -> Result<NodeReport, NodeError> {
    self.drain_inbox(now)?;
    for outcome in self.pool.tick(now) {
      self.commit(outcome, now)?;
    }
    if let Some(block) = self.ledger.flush(now)? {
      self.on_block(&block, now)?;
    }
    self.save_snapshots()?;
    self.bus.unregister(self.asn);

    let report = NodeReport {
      asn: self.asn,
      observed: self.observer.observed(),
      skipped: self.observer.skipped(),
      chain_height: self.ledger.height(),
      coin_balance: self.coins.balance(self.asn),
      pool: self.pool.stats().clone(),
    };
    if report.pool.invalid_signatures > 0 || report.pool.duplicate_votes > 0 {
      warn!(
        "AS{}: dropped {} invalid signatures, {} duplicate votes",
        report.asn, report.pool.invalid_signatures, report.pool.duplicate_votes
      );
    }
    info!(
      "AS{} done: {} observed, chain height {}, balance {}",
      report.asn, report.observed, report.chain_height, report.coin_balance
    );
    Ok(report)
  }
}
