//! Runtime tunables.
//!
//! Every knob is an environment variable with a default, collected
//! once at startup into a [`Config`] value that is cloned into each
//! node. A non-numeric or out-of-range value is fatal before any
//! node starts.

use {std::time::Duration, thiserror::Error};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("environment variable {0} is not a valid number: {1}")]
  NotNumeric(&'static str, String),

  #[error("environment variable {0} is out of range: {1}")]
  OutOfRange(&'static str, String),
}

fn env_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
  match std::env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map_err(|_| ConfigError::NotNumeric(key, raw)),
    Err(_) => Ok(default),
  }
}

fn env_i64(key: &'static str, default: i64) -> Result<i64, ConfigError> {
  match std::env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map_err(|_| ConfigError::NotNumeric(key, raw)),
    Err(_) => Ok(default),
  }
}

fn env_f64(key: &'static str, default: f64) -> Result<f64, ConfigError> {
  match std::env::var(key) {
    Ok(raw) => raw
      .trim()
      .parse()
      .map_err(|_| ConfigError::NotNumeric(key, raw)),
    Err(_) => Ok(default),
  }
}

fn env_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
  match std::env::var(key) {
    Ok(raw) => match raw.trim() {
      "1" | "true" => Ok(true),
      "0" | "false" => Ok(false),
      _ => Err(ConfigError::NotNumeric(key, raw)),
    },
    Err(_) => Ok(default),
  }
}

/// Consensus, pool and detector knobs shared by every node of a run.
#[derive(Debug, Clone)]
pub struct Config {
  // consensus
  pub min_signatures: usize,
  pub cap_signatures: usize,

  // transaction pool
  pub regular_timeout: Duration,
  pub attack_timeout: Duration,
  pub max_broadcast_peers: usize,
  pub rpki_dedup_window: Duration,
  pub nonrpki_dedup_window: Duration,
  pub pending_max_capacity: usize,
  pub committed_ids_max: usize,
  pub last_seen_max: usize,
  pub timeout_commit_partial: bool,

  // knowledge base
  pub knowledge_window: Duration,
  pub knowledge_cleanup_interval: Duration,
  pub knowledge_max_entries: usize,
  pub knowledge_match_tolerance: Duration,

  // flap detector
  pub flap_window: Duration,
  pub flap_threshold: usize,
  pub flap_dedup: Duration,

  // ledger
  pub block_batch_size: usize,
  pub block_interval: Duration,
  pub snapshot_interval: Duration,

  // reputation
  pub rating_initial_score: f64,
  pub rating_min_score: f64,
  pub rating_max_score: f64,
  pub penalty_prefix_hijack: f64,
  pub penalty_subprefix_hijack: f64,
  pub penalty_bogon: f64,
  pub penalty_route_leak: f64,
  pub penalty_route_flap: f64,
  pub penalty_repeated_attack: f64,
  pub penalty_persistent_attacker: f64,
  pub persistent_attack_count: usize,
  pub reward_per_100_legitimate: f64,
  pub reward_monthly_good_behavior: f64,
  pub reward_highly_trusted_bonus: f64,

  // incentive ledger
  pub coin_total_supply: u64,
  pub reward_block_commit: u64,
  pub reward_vote_approve: u64,
  pub reward_first_commit: u64,
  pub reward_attack_detection: u64,
  pub reward_attack_vote: u64,
  pub reward_daily_monitoring: u64,
  pub daily_heartbeat: bool,
  pub penalty_false_approve: u64,
  pub penalty_false_reject: u64,
  pub penalty_missed_participation: u64,
}

impl Config {
  /// Reads every tunable from the environment, falling back to the
  /// defaults. The first invalid value aborts startup.
  pub fn from_env() -> Result<Self, ConfigError> {
    let config = Self {
      min_signatures: env_u64("CONSENSUS_MIN_SIGNATURES", 3)? as usize,
      cap_signatures: env_u64("CONSENSUS_CAP_SIGNATURES", 5)? as usize,

      regular_timeout: Duration::from_secs(env_u64("P2P_REGULAR_TIMEOUT", 60)?),
      attack_timeout: Duration::from_secs(env_u64("P2P_ATTACK_TIMEOUT", 180)?),
      max_broadcast_peers: env_u64("P2P_MAX_BROADCAST_PEERS", 10)? as usize,
      rpki_dedup_window: Duration::from_secs(env_u64(
        "RPKI_DEDUP_WINDOW",
        3600,
      )?),
      nonrpki_dedup_window: Duration::from_secs(env_u64(
        "NONRPKI_DEDUP_WINDOW",
        10,
      )?),
      pending_max_capacity: env_u64("PENDING_MAX_CAPACITY", 5000)? as usize,
      committed_ids_max: env_u64("COMMITTED_IDS_MAX", 50000)? as usize,
      last_seen_max: env_u64("LAST_SEEN_MAX", 100000)? as usize,
      timeout_commit_partial: env_bool("TIMEOUT_COMMIT_PARTIAL", true)?,

      knowledge_window: Duration::from_secs(env_u64(
        "KNOWLEDGE_WINDOW_SECONDS",
        480,
      )?),
      knowledge_cleanup_interval: Duration::from_secs(env_u64(
        "KNOWLEDGE_CLEANUP_INTERVAL",
        60,
      )?),
      knowledge_max_entries: env_u64("KNOWLEDGE_MAX_ENTRIES", 50000)? as usize,
      knowledge_match_tolerance: Duration::from_secs(env_u64(
        "KNOWLEDGE_MATCH_TOLERANCE",
        300,
      )?),

      flap_window: Duration::from_secs(env_u64("FLAP_WINDOW_SECONDS", 60)?),
      flap_threshold: env_u64("FLAP_THRESHOLD", 5)? as usize,
      flap_dedup: Duration::from_secs(env_u64("FLAP_DEDUP_SECONDS", 2)?),

      block_batch_size: env_u64("BLOCK_BATCH_SIZE", 10)? as usize,
      block_interval: Duration::from_secs(env_u64(
        "BLOCK_INTERVAL_SECONDS",
        5,
      )?),
      snapshot_interval: Duration::from_secs(env_u64(
        "SNAPSHOT_INTERVAL_SECONDS",
        30,
      )?),

      rating_initial_score: env_f64("RATING_INITIAL_SCORE", 50.0)?,
      rating_min_score: env_f64("RATING_MIN_SCORE", 0.0)?,
      rating_max_score: env_f64("RATING_MAX_SCORE", 100.0)?,
      penalty_prefix_hijack: env_i64("RATING_PENALTY_PREFIX_HIJACK", -20)?
        as f64,
      penalty_subprefix_hijack: env_i64(
        "RATING_PENALTY_SUBPREFIX_HIJACK",
        -18,
      )? as f64,
      penalty_bogon: env_i64("RATING_PENALTY_BOGON_INJECTION", -25)? as f64,
      penalty_route_leak: env_i64("RATING_PENALTY_ROUTE_LEAK", -15)? as f64,
      penalty_route_flap: env_i64("RATING_PENALTY_ROUTE_FLAPPING", -10)? as f64,
      penalty_repeated_attack: env_i64("RATING_PENALTY_REPEATED_ATTACK", -30)?
        as f64,
      penalty_persistent_attacker: env_i64(
        "RATING_PENALTY_PERSISTENT_ATTACKER",
        -50,
      )? as f64,
      persistent_attack_count: env_u64("RATING_PERSISTENT_ATTACK_COUNT", 3)?
        as usize,
      reward_per_100_legitimate: env_i64("RATING_REWARD_PER_100_LEGITIMATE", 1)?
        as f64,
      reward_monthly_good_behavior: env_i64(
        "RATING_REWARD_MONTHLY_GOOD_BEHAVIOR",
        5,
      )? as f64,
      reward_highly_trusted_bonus: env_i64(
        "RATING_REWARD_HIGHLY_TRUSTED_BONUS",
        10,
      )? as f64,

      coin_total_supply: env_u64("BGPCOIN_TOTAL_SUPPLY", 10_000_000)?,
      reward_block_commit: env_u64("BGPCOIN_REWARD_BLOCK_COMMIT", 10)?,
      reward_vote_approve: env_u64("BGPCOIN_REWARD_VOTE_APPROVE", 1)?,
      reward_first_commit: env_u64("BGPCOIN_REWARD_FIRST_COMMIT_BONUS", 5)?,
      reward_attack_detection: env_u64("BGPCOIN_REWARD_ATTACK_DETECTION", 100)?,
      reward_attack_vote: env_u64("BGPCOIN_REWARD_ATTACK_VOTE", 2)?,
      reward_daily_monitoring: env_u64("BGPCOIN_REWARD_DAILY_MONITORING", 10)?,
      daily_heartbeat: env_bool("BGPCOIN_DAILY_HEARTBEAT", false)?,
      penalty_false_approve: env_u64("BGPCOIN_PENALTY_FALSE_APPROVE", 5)?,
      penalty_false_reject: env_u64("BGPCOIN_PENALTY_FALSE_REJECT", 2)?,
      penalty_missed_participation: env_u64(
        "BGPCOIN_PENALTY_MISSED_PARTICIPATION",
        1,
      )?,
    };
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.min_signatures == 0 {
      return Err(ConfigError::OutOfRange(
        "CONSENSUS_MIN_SIGNATURES",
        "must be at least 1".into(),
      ));
    }
    if self.cap_signatures < self.min_signatures {
      return Err(ConfigError::OutOfRange(
        "CONSENSUS_CAP_SIGNATURES",
        format!(
          "cap {} below minimum {}",
          self.cap_signatures, self.min_signatures
        ),
      ));
    }
    if self.rating_min_score >= self.rating_max_score {
      return Err(ConfigError::OutOfRange(
        "RATING_MIN_SCORE",
        "minimum score must be below maximum".into(),
      ));
    }
    if self.rating_initial_score < self.rating_min_score
      || self.rating_initial_score > self.rating_max_score
    {
      return Err(ConfigError::OutOfRange(
        "RATING_INITIAL_SCORE",
        "initial score outside [min, max]".into(),
      ));
    }
    if self.flap_threshold == 0 {
      return Err(ConfigError::OutOfRange(
        "FLAP_THRESHOLD",
        "must be at least 1".into(),
      ));
    }
    if self.block_batch_size == 0 {
      return Err(ConfigError::OutOfRange(
        "BLOCK_BATCH_SIZE",
        "must be at least 1".into(),
      ));
    }
    Ok(())
  }
}

impl Default for Config {
  /// The defaults without touching the environment. Tests use this
  /// to stay independent of ambient variables.
  fn default() -> Self {
    Self {
      min_signatures: 3,
      cap_signatures: 5,
      regular_timeout: Duration::from_secs(60),
      attack_timeout: Duration::from_secs(180),
      max_broadcast_peers: 10,
      rpki_dedup_window: Duration::from_secs(3600),
      nonrpki_dedup_window: Duration::from_secs(10),
      pending_max_capacity: 5000,
      committed_ids_max: 50000,
      last_seen_max: 100000,
      timeout_commit_partial: true,
      knowledge_window: Duration::from_secs(480),
      knowledge_cleanup_interval: Duration::from_secs(60),
      knowledge_max_entries: 50000,
      knowledge_match_tolerance: Duration::from_secs(300),
      flap_window: Duration::from_secs(60),
      flap_threshold: 5,
      flap_dedup: Duration::from_secs(2),
      block_batch_size: 10,
      block_interval: Duration::from_secs(5),
      snapshot_interval: Duration::from_secs(30),
      rating_initial_score: 50.0,
      rating_min_score: 0.0,
      rating_max_score: 100.0,
      penalty_prefix_hijack: -20.0,
      penalty_subprefix_hijack: -18.0,
      penalty_bogon: -25.0,
      penalty_route_leak: -15.0,
      penalty_route_flap: -10.0,
      penalty_repeated_attack: -30.0,
      penalty_persistent_attacker: -50.0,
      persistent_attack_count: 3,
      reward_per_100_legitimate: 1.0,
      reward_monthly_good_behavior: 5.0,
      reward_highly_trusted_bonus: 10.0,
      coin_total_supply: 10_000_000,
      reward_block_commit: 10,
      reward_vote_approve: 1,
      reward_first_commit: 5,
      reward_attack_detection: 100,
      reward_attack_vote: 2,
      reward_daily_monitoring: 10,
      daily_heartbeat: false,
      penalty_false_approve: 5,
      penalty_false_reject: 2,
      penalty_missed_participation: 1,
    }
  }
}

#[cfg(test)]
mod test {
  use super::Config;

  #[test]
  fn defaults_are_consistent() {
    let config = Config::default();
    assert!(config.cap_signatures >= config.min_signatures);
    assert!(config.attack_timeout > config.regular_timeout);
    config.validate().unwrap();
  }
}
