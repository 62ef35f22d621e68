//! Per-node observation memory.
//!
//! The knowledge base is what lets a validator vote on a peer's
//! transaction from its own evidence: "did I see this (prefix,
//! origin) around the same time?". Entries live for a bounded
//! wall-clock window and the whole cache is capacity-capped, with
//! the oldest entries evicted first.

mod topology;

pub use topology::{TopologyCache, TopologyExport};

use {
  crate::{primitives::Ipv4Prefix, storage},
  dashmap::DashMap,
  serde::{Deserialize, Serialize},
  std::{path::Path, time::Duration},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct KnowledgeEntry {
  /// Timestamp carried by the observation itself.
  timestamp: i64,
  /// Wall clock when this node recorded it.
  observed_at: i64,
}

/// Snapshot row, sorted by key on save so snapshots are
/// byte-stable across save/load/save.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRow {
  prefix: Ipv4Prefix,
  origin_asn: u32,
  timestamp: i64,
  observed_at: i64,
}

pub struct KnowledgeBase {
  window: i64,
  tolerance: i64,
  capacity: usize,
  entries: DashMap<(Ipv4Prefix, u32), KnowledgeEntry>,
}

impl KnowledgeBase {
  pub fn new(
    window: Duration,
    tolerance: Duration,
    capacity: usize,
  ) -> Self {
    Self {
      window: window.as_secs() as i64,
      tolerance: tolerance.as_secs() as i64,
      capacity: capacity.max(1),
      entries: DashMap::new(),
    }
  }

  /// Records a local observation, evicting the oldest entry when
  /// the cache is at capacity.
  pub fn record(
    &self,
    prefix: Ipv4Prefix,
    origin_asn: u32,
    timestamp: i64,
    now: i64,
  ) {
    let key = (prefix, origin_asn);
    if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity
    {
      self.evict_oldest();
    }
    self.entries.insert(key, KnowledgeEntry {
      timestamp,
      observed_at: now,
    });
  }

  fn evict_oldest(&self) {
    let oldest = self
      .entries
      .iter()
      .min_by_key(|entry| entry.value().observed_at)
      .map(|entry| *entry.key());
    if let Some(key) = oldest {
      self.entries.remove(&key);
    }
  }

  /// The voting contract: a remote claim matches local knowledge
  /// when we hold the same (prefix, origin) with a timestamp within
  /// the tolerance.
  pub fn matches(
    &self,
    prefix: &Ipv4Prefix,
    origin_asn: u32,
    remote_timestamp: i64,
  ) -> bool {
    self
      .entries
      .get(&(*prefix, origin_asn))
      .map(|entry| (entry.timestamp - remote_timestamp).abs() <= self.tolerance)
      .unwrap_or(false)
  }

  /// Drops entries recorded longer than the window ago.
  pub fn cleanup(&self, now: i64) -> usize {
    let window = self.window;
    let before = self.entries.len();
    self.entries.retain(|_, entry| now - entry.observed_at <= window);
    before - self.entries.len()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), storage::StorageError> {
    let mut rows: Vec<SnapshotRow> = self
      .entries
      .iter()
      .map(|entry| SnapshotRow {
        prefix: entry.key().0,
        origin_asn: entry.key().1,
        timestamp: entry.value().timestamp,
        observed_at: entry.value().observed_at,
      })
      .collect();
    rows.sort_by_key(|row| (row.prefix, row.origin_asn));
    storage::write_json_atomic(path, &rows)
  }

  /// Restores a snapshot; a corrupted file is renamed aside and the
  /// base starts empty.
  pub fn load(&self, path: impl AsRef<Path>) -> Result<(), storage::StorageError> {
    let rows: Option<Vec<SnapshotRow>> = storage::read_json_or_sideline(path)?;
    for row in rows.unwrap_or_default() {
      self.entries.insert((row.prefix, row.origin_asn), KnowledgeEntry {
        timestamp: row.timestamp,
        observed_at: row.observed_at,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use {super::KnowledgeBase, std::time::Duration};

  fn base() -> KnowledgeBase {
    KnowledgeBase::new(
      Duration::from_secs(480),
      Duration::from_secs(300),
      4,
    )
  }

  #[test]
  fn matching_within_tolerance() {
    let base = base();
    let prefix = "203.0.113.0/24".parse().unwrap();
    base.record(prefix, 65001, 1000, 1000);

    assert!(base.matches(&prefix, 65001, 1000));
    assert!(base.matches(&prefix, 65001, 1299));
    assert!(!base.matches(&prefix, 65001, 1301));
    assert!(!base.matches(&prefix, 65002, 1000));
  }

  #[test]
  fn cleanup_respects_the_window() {
    let base = base();
    let prefix = "203.0.113.0/24".parse().unwrap();
    base.record(prefix, 65001, 1000, 1000);
    base.record("198.51.100.0/24".parse().unwrap(), 65002, 1400, 1400);

    let removed = base.cleanup(1500);
    assert_eq!(removed, 1);
    assert!(!base.matches(&prefix, 65001, 1000));
  }

  #[test]
  fn capacity_evicts_oldest_first() {
    let base = base();
    for i in 0..6u32 {
      let prefix = format!("10.{i}.0.0/16").parse().unwrap();
      base.record(prefix, 65000 + i, 1000 + i as i64, 1000 + i as i64);
    }
    assert_eq!(base.len(), 4);
    // the two earliest records are gone
    assert!(!base.matches(&"10.0.0.0/16".parse().unwrap(), 65000, 1000));
    assert!(base.matches(&"10.5.0.0/16".parse().unwrap(), 65005, 1005));
  }

  #[test]
  fn snapshot_roundtrip_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("knowledge.json");

    let kb = base();
    kb.record("203.0.113.0/24".parse().unwrap(), 65001, 1000, 1000);
    kb.record("198.51.100.0/24".parse().unwrap(), 65002, 1100, 1100);
    kb.save(&path).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    let restored = base();
    restored.load(&path).unwrap();
    assert_eq!(restored.len(), 2);
    restored.save(&path).unwrap();
    let second = std::fs::read_to_string(&path).unwrap();
    assert_eq!(first, second);
  }
}
