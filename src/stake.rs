//! Read-only view of the staking contract.
//!
//! Non-authorized ASes put up stake through an external contract;
//! the core only ever reads the current amount (it never writes
//! back). The shim is a JSON map of AS number to staked wei,
//! refreshed out of band.

use {
  serde::Deserialize,
  std::{collections::BTreeMap, path::Path},
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum StakeError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("stake file malformed: {0}")]
  Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StakeRegistry {
  stakes: BTreeMap<u32, u128>,
}

impl StakeRegistry {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, StakeError> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
  }

  /// Current stake for an AS; unknown ASes have staked nothing.
  pub fn current_stake(&self, asn: u32) -> u128 {
    self.stakes.get(&asn).copied().unwrap_or(0)
  }

  pub fn len(&self) -> usize {
    self.stakes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stakes.is_empty()
  }
}
