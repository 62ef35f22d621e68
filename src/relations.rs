//! AS business relationships.
//!
//! The table is keyed on ordered pairs `"<A>-<B>"`; a reverse hit
//! swaps the provider/customer direction. Read-only after load.

use {
  serde::Deserialize,
  std::{collections::HashMap, path::Path},
  thiserror::Error,
  tracing::warn,
};

#[derive(Debug, Error)]
pub enum RelationError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("relationship file malformed: {0}")]
  Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
  /// A buys transit from B.
  CustomerOf,
  /// A sells transit to B.
  ProviderOf,
  PeerOf,
  SiblingOf,
}

impl Relationship {
  fn parse(tag: &str) -> Option<Self> {
    match tag {
      "customer-provider" => Some(Self::CustomerOf),
      "provider-customer" => Some(Self::ProviderOf),
      "peer-peer" => Some(Self::PeerOf),
      "sibling-sibling" => Some(Self::SiblingOf),
      _ => None,
    }
  }

  fn reversed(self) -> Self {
    match self {
      Self::CustomerOf => Self::ProviderOf,
      Self::ProviderOf => Self::CustomerOf,
      symmetric => symmetric,
    }
  }
}

#[derive(Debug, Deserialize)]
struct RelationFile {
  relationships: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipTable {
  pairs: HashMap<(u32, u32), Relationship>,
}

impl RelationshipTable {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, RelationError> {
    let json = std::fs::read_to_string(path)?;
    let raw: RelationFile = serde_json::from_str(&json)?;
    let mut table = Self::default();
    for (key, tag) in raw.relationships {
      let pair = match key.split_once('-').and_then(|(a, b)| {
        Some((a.trim().parse::<u32>().ok()?, b.trim().parse::<u32>().ok()?))
      }) {
        Some(pair) => pair,
        None => {
          warn!("skipping relationship with bad key: {key}");
          continue;
        }
      };
      match Relationship::parse(&tag) {
        Some(relationship) => table.insert(pair.0, pair.1, relationship),
        None => warn!("skipping relationship with unknown tag: {tag}"),
      }
    }
    Ok(table)
  }

  pub fn insert(&mut self, a: u32, b: u32, relationship: Relationship) {
    self.pairs.insert((a, b), relationship);
  }

  /// Relationship of `a` towards `b`, trying both key directions.
  pub fn lookup(&self, a: u32, b: u32) -> Option<Relationship> {
    self
      .pairs
      .get(&(a, b))
      .copied()
      .or_else(|| self.pairs.get(&(b, a)).map(|r| r.reversed()))
  }

  pub fn len(&self) -> usize {
    self.pairs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }
}
