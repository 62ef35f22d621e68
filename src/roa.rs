//! Route-origin authorization table.
//!
//! A read-only set of (prefix, origin, maxLength) authorizations
//! loaded at startup and shared by every node in the process. The
//! lookup contract mirrors RPKI origin validation: a route is Valid
//! when a covering entry authorizes its origin within the allowed
//! length, Invalid when covered but unauthorized, NotFound when no
//! entry covers it at all.

use {
  crate::primitives::Ipv4Prefix,
  serde::{Deserialize, Serialize},
  std::path::Path,
  thiserror::Error,
  tracing::warn,
};

#[derive(Debug, Error)]
pub enum RoaError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("ROA file malformed: {0}")]
  Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoaStatus {
  Valid,
  Invalid,
  NotFound,
}

/// ASNs appear in ROA files either as bare integers or as
/// `"AS<n>"` strings depending on the exporter.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AsnField {
  Number(u32),
  Tagged(String),
}

impl AsnField {
  fn parse(&self) -> Option<u32> {
    match self {
      Self::Number(n) => Some(*n),
      Self::Tagged(s) => s.trim_start_matches("AS").parse().ok(),
    }
  }
}

#[derive(Debug, Deserialize)]
struct RawRoa {
  asn: AsnField,
  prefix: String,
  #[serde(rename = "maxLength")]
  max_length: u8,
  #[serde(default)]
  ta: String,
}

#[derive(Debug, Deserialize)]
struct RoaFile {
  roas: Vec<RawRoa>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoaEntry {
  pub prefix: Ipv4Prefix,
  pub origin_asn: u32,
  pub max_length: u8,
  pub trust_anchor: String,
}

#[derive(Debug, Clone, Default)]
pub struct RoaTable {
  entries: Vec<RoaEntry>,
}

impl RoaTable {
  pub fn new(entries: Vec<RoaEntry>) -> Self {
    Self { entries }
  }

  /// Loads the `{"roas": [...]}` export format. Entries that fail
  /// the schema are skipped with a warning; an unreadable file is
  /// an error.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, RoaError> {
    let json = std::fs::read_to_string(path)?;
    let raw: RoaFile = serde_json::from_str(&json)?;
    let mut entries = Vec::with_capacity(raw.roas.len());
    for roa in raw.roas {
      let origin_asn = match roa.asn.parse() {
        Some(asn) => asn,
        None => {
          warn!("skipping ROA with unparseable asn field");
          continue;
        }
      };
      let prefix: Ipv4Prefix = match roa.prefix.parse() {
        Ok(prefix) => prefix,
        Err(e) => {
          warn!("skipping ROA with bad prefix: {e}");
          continue;
        }
      };
      entries.push(RoaEntry {
        prefix,
        origin_asn,
        max_length: roa.max_length,
        trust_anchor: roa.ta,
      });
    }
    Ok(Self { entries })
  }

  /// Origin validation for one announced route.
  pub fn lookup(&self, prefix: &Ipv4Prefix, origin: u32) -> RoaStatus {
    let mut covered = false;
    for entry in &self.entries {
      if !entry.prefix.covers(prefix) {
        continue;
      }
      covered = true;
      if entry.origin_asn == origin && prefix.length() <= entry.max_length {
        return RoaStatus::Valid;
      }
    }
    if covered {
      RoaStatus::Invalid
    } else {
      RoaStatus::NotFound
    }
  }

  pub fn is_authorized(&self, prefix: &Ipv4Prefix, origin: u32) -> bool {
    self.lookup(prefix, origin) == RoaStatus::Valid
  }

  /// Entries registered for exactly this prefix.
  pub fn exact_entries(
    &self,
    prefix: &Ipv4Prefix,
  ) -> impl Iterator<Item = &RoaEntry> {
    let prefix = *prefix;
    self.entries.iter().filter(move |e| e.prefix == prefix)
  }

  /// Entries whose prefix strictly contains the given one.
  pub fn covering_parents(
    &self,
    prefix: &Ipv4Prefix,
  ) -> impl Iterator<Item = &RoaEntry> {
    let prefix = *prefix;
    self
      .entries
      .iter()
      .filter(move |e| prefix.is_subnet_of(&e.prefix))
  }

  /// All origins authorized for this exact prefix, ascending.
  pub fn authorized_origins(&self, prefix: &Ipv4Prefix) -> Vec<u32> {
    let mut origins: Vec<u32> =
      self.exact_entries(prefix).map(|e| e.origin_asn).collect();
    origins.sort_unstable();
    origins.dedup();
    origins
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod test {
  use super::{RoaStatus, RoaTable};
  use std::io::Write;

  fn table() -> RoaTable {
    let json = r#"{
      "roas": [
        {"asn": 65001, "prefix": "203.0.113.0/24", "maxLength": 24, "ta": "apnic"},
        {"asn": "AS15169", "prefix": "8.8.8.0/24", "maxLength": 24, "ta": "arin"},
        {"asn": 64500, "prefix": "198.51.100.0/24", "maxLength": 28, "ta": "ripe"}
      ]
    }"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    RoaTable::load(file.path()).unwrap()
  }

  #[test]
  fn valid_invalid_notfound() {
    let table = table();
    let covered: crate::primitives::Ipv4Prefix =
      "203.0.113.0/24".parse().unwrap();
    let stranger: crate::primitives::Ipv4Prefix =
      "192.0.2.0/24".parse().unwrap();

    assert_eq!(table.lookup(&covered, 65001), RoaStatus::Valid);
    assert_eq!(table.lookup(&covered, 666), RoaStatus::Invalid);
    assert_eq!(table.lookup(&stranger, 666), RoaStatus::NotFound);
  }

  #[test]
  fn max_length_bounds_more_specifics() {
    let table = table();
    let within: crate::primitives::Ipv4Prefix =
      "198.51.100.0/28".parse().unwrap();
    let beyond: crate::primitives::Ipv4Prefix =
      "198.51.100.0/30".parse().unwrap();

    assert_eq!(table.lookup(&within, 64500), RoaStatus::Valid);
    assert_eq!(table.lookup(&beyond, 64500), RoaStatus::Invalid);
  }

  #[test]
  fn tagged_asn_strings_parse() {
    let table = table();
    let google: crate::primitives::Ipv4Prefix = "8.8.8.0/24".parse().unwrap();
    assert_eq!(table.lookup(&google, 15169), RoaStatus::Valid);
    assert_eq!(table.authorized_origins(&google), vec![15169]);
  }
}
