//! BGPCOIN incentive ledger.
//!
//! A fixed supply sits in the treasury at genesis. Rewards move
//! coins from the treasury to validator balances; penalties burn
//! them out of a balance and recycle them straight back into the
//! treasury. Conservation is checked after every movement:
//! `treasury + Σ balances + burned − recycled == total_supply`
//! must hold, and a breach is an internal bug, not a recoverable
//! condition.

use {
  crate::storage,
  serde::{Deserialize, Serialize},
  std::{collections::BTreeMap, path::Path},
  thiserror::Error,
  tracing::{debug, warn},
};

#[derive(Debug, Error)]
pub enum CoinError {
  #[error(
    "coin conservation broken: treasury {treasury} + balances {balances} + \
     burned {burned} - recycled {recycled} != supply {supply}"
  )]
  ConservationBroken {
    treasury: u64,
    balances: u64,
    burned: u64,
    recycled: u64,
    supply: u64,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinReason {
  BlockCommit,
  VoteApprove,
  FirstCommit,
  AttackDetection,
  AttackVote,
  DailyMonitoring,
  FalseApprove,
  FalseReject,
  MissedParticipation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinEvent {
  pub asn: u32,
  /// Positive for rewards, negative for penalties, post-truncation.
  pub amount: i64,
  pub reason: CoinReason,
  pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoinEntry {
  pub balance: u64,
  pub total_earned: u64,
  pub total_penalized: u64,
  pub participation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinLedger {
  total_supply: u64,
  treasury: u64,
  total_burned: u64,
  total_recycled: u64,
  balances: BTreeMap<u32, CoinEntry>,
  history: Vec<CoinEvent>,
}

impl CoinLedger {
  pub fn new(total_supply: u64) -> Self {
    Self {
      total_supply,
      treasury: total_supply,
      total_burned: 0,
      total_recycled: 0,
      balances: BTreeMap::new(),
      history: Vec::new(),
    }
  }

  /// Pays a reward out of the treasury. When the treasury cannot
  /// cover the full amount the reward is truncated, never minted.
  pub fn reward(
    &mut self,
    asn: u32,
    amount: u64,
    reason: CoinReason,
    now: i64,
  ) -> Result<(), CoinError> {
    let paid = amount.min(self.treasury);
    if paid < amount {
      warn!(
        "treasury exhausted: truncating {reason:?} reward for AS{asn} from \
         {amount} to {paid}"
      );
    }
    self.treasury -= paid;
    let entry = self.balances.entry(asn).or_default();
    entry.balance += paid;
    entry.total_earned += paid;
    entry.participation += 1;
    self.history.push(CoinEvent {
      asn,
      amount: paid as i64,
      reason,
      timestamp: now,
    });
    debug!("AS{asn} +{paid} ({reason:?})");
    self.verify_conservation()
  }

  /// Burns a penalty out of a balance and recycles it back into
  /// the treasury. A balance never goes below zero; the penalty is
  /// truncated to what is there.
  pub fn penalize(
    &mut self,
    asn: u32,
    amount: u64,
    reason: CoinReason,
    now: i64,
  ) -> Result<(), CoinError> {
    let entry = self.balances.entry(asn).or_default();
    let taken = amount.min(entry.balance);
    entry.balance -= taken;
    entry.total_penalized += taken;
    self.total_burned += taken;
    self.total_recycled += taken;
    self.treasury += taken;
    self.history.push(CoinEvent {
      asn,
      amount: -(taken as i64),
      reason,
      timestamp: now,
    });
    debug!("AS{asn} -{taken} ({reason:?})");
    self.verify_conservation()
  }

  pub fn verify_conservation(&self) -> Result<(), CoinError> {
    let balances: u64 = self.balances.values().map(|e| e.balance).sum();
    let left = self.treasury + balances + self.total_burned;
    let right = self.total_supply + self.total_recycled;
    if left != right {
      return Err(CoinError::ConservationBroken {
        treasury: self.treasury,
        balances,
        burned: self.total_burned,
        recycled: self.total_recycled,
        supply: self.total_supply,
      });
    }
    Ok(())
  }

  pub fn balance(&self, asn: u32) -> u64 {
    self.balances.get(&asn).map(|e| e.balance).unwrap_or(0)
  }

  pub fn get(&self, asn: u32) -> Option<&CoinEntry> {
    self.balances.get(&asn)
  }

  pub fn treasury(&self) -> u64 {
    self.treasury
  }

  pub fn total_supply(&self) -> u64 {
    self.total_supply
  }

  pub fn history(&self) -> &[CoinEvent] {
    &self.history
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), storage::StorageError> {
    storage::write_json_atomic(path, self)
  }

  pub fn load(
    path: impl AsRef<Path>,
    total_supply: u64,
  ) -> Result<Self, storage::StorageError> {
    match storage::read_json_or_sideline::<Self>(path)? {
      Some(ledger) => Ok(ledger),
      None => Ok(Self::new(total_supply)),
    }
  }
}
