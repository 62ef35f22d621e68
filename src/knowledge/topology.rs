//! Topology intelligence for peer selection.
//!
//! Broadcasting every vote request to the whole committee is
//! wasteful; only validators that have actually observed a given
//! non-authorized AS can vote on it from knowledge. The cache maps
//! each non-authorized AS to the validators that have ever seen it,
//! merged with what peers export. Entries only grow; removal is an
//! explicit stale purge.

use {
  crate::storage,
  serde::{Deserialize, Serialize},
  std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
  },
  tracing::debug,
};

/// Wire/export form of a node's topology knowledge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopologyExport {
  pub exporter_asn: u32,
  pub observers: BTreeMap<u32, BTreeSet<u32>>,
  pub observation_counts: BTreeMap<u32, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyCache {
  my_asn: u32,
  validators: BTreeSet<u32>,
  observers: BTreeMap<u32, BTreeSet<u32>>,
  observation_counts: BTreeMap<u32, u64>,
  #[serde(default)]
  last_seen: BTreeMap<u32, i64>,
}

impl TopologyCache {
  pub fn new(my_asn: u32, validators: impl IntoIterator<Item = u32>) -> Self {
    Self {
      my_asn,
      validators: validators.into_iter().collect(),
      observers: BTreeMap::new(),
      observation_counts: BTreeMap::new(),
      last_seen: BTreeMap::new(),
    }
  }

  /// Records that `observed_by` (defaulting to this node) saw an
  /// announcement originated by a non-authorized AS.
  pub fn record_observation(
    &mut self,
    non_authorized_asn: u32,
    observed_by: Option<u32>,
    now: i64,
  ) {
    let observer = observed_by.unwrap_or(self.my_asn);
    let entry = self.observers.entry(non_authorized_asn).or_default();
    if entry.insert(observer) {
      debug!("mapped AS{non_authorized_asn} -> observer AS{observer}");
    }
    *self.observation_counts.entry(non_authorized_asn).or_insert(0) += 1;
    self.last_seen.insert(non_authorized_asn, now);
  }

  /// The peers worth asking about this AS. Falls back to the whole
  /// committee (minus self) when nothing is cached; a cached
  /// non-empty set is authoritative regardless of its size.
  pub fn relevant_peers(&self, non_authorized_asn: u32) -> Vec<u32> {
    let cached: Vec<u32> = self
      .observers
      .get(&non_authorized_asn)
      .map(|set| set.iter().copied().filter(|&v| v != self.my_asn).collect())
      .unwrap_or_default();
    if !cached.is_empty() {
      return cached;
    }
    self
      .validators
      .iter()
      .copied()
      .filter(|&v| v != self.my_asn)
      .collect()
  }

  pub fn is_relevant(&self, non_authorized_asn: u32, validator: u32) -> bool {
    self.relevant_peers(non_authorized_asn).contains(&validator)
  }

  pub fn export(&self) -> TopologyExport {
    TopologyExport {
      exporter_asn: self.my_asn,
      observers: self.observers.clone(),
      observation_counts: self.observation_counts.clone(),
    }
  }

  /// Merges a peer's export. Union only: peers can add observers,
  /// never remove them.
  pub fn import(&mut self, export: &TopologyExport) {
    for (asn, observers) in &export.observers {
      self.observers.entry(*asn).or_default().extend(observers);
    }
    for (asn, count) in &export.observation_counts {
      let current = self.observation_counts.entry(*asn).or_insert(0);
      *current = (*current).max(*count);
    }
    debug!(
      "imported topology from AS{}: {} mappings",
      export.exporter_asn,
      export.observers.len()
    );
  }

  /// Removes ASes not seen for `max_age` seconds. The only removal
  /// path.
  pub fn purge_stale(&mut self, now: i64, max_age: i64) -> usize {
    let stale: Vec<u32> = self
      .last_seen
      .iter()
      .filter(|(_, &seen)| now - seen > max_age)
      .map(|(&asn, _)| asn)
      .collect();
    for asn in &stale {
      self.observers.remove(asn);
      self.observation_counts.remove(asn);
      self.last_seen.remove(asn);
    }
    stale.len()
  }

  pub fn tracked(&self) -> usize {
    self.observers.len()
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), storage::StorageError> {
    storage::write_json_atomic(path, self)
  }

  pub fn load(
    path: impl AsRef<Path>,
    my_asn: u32,
    validators: impl IntoIterator<Item = u32>,
  ) -> Result<Self, storage::StorageError> {
    match storage::read_json_or_sideline::<Self>(path)? {
      Some(mut cache) => {
        // the committee is configuration, not cache content
        cache.my_asn = my_asn;
        cache.validators = validators.into_iter().collect();
        Ok(cache)
      }
      None => Ok(Self::new(my_asn, validators)),
    }
  }
}
