//! BGP observation ingress.
//!
//! Observations arrive either as a JSON-lines file (one object per
//! line, written by an external collector) or as an in-memory list
//! handed over at startup. Both are normalized into [`Observation`]
//! here; records that fail the schema are skipped and counted, never
//! fatal.

use {
  crate::primitives::Ipv4Prefix,
  serde::{Deserialize, Serialize},
  std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    time::Instant,
  },
  tracing::warn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
  Announce,
  Withdraw,
}

impl Default for ObservationKind {
  fn default() -> Self {
    Self::Announce
  }
}

/// A single observed BGP update.
///
/// `is_attack` and `label` are ground-truth annotations carried by
/// simulated feeds for post-run scoring. Nothing on the
/// classification path reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
  pub prefix: Ipv4Prefix,
  pub origin_asn: u32,
  pub as_path: Vec<u32>,
  pub timestamp: i64,
  pub observer_asn: u32,
  #[serde(rename = "type", default)]
  pub kind: ObservationKind,
  #[serde(default)]
  pub is_attack: bool,
  #[serde(default)]
  pub label: Option<String>,
}

/// Where this node's observation stream comes from.
pub enum ObservationSource {
  /// Tail a JSON-lines file. New lines appended between polls are
  /// picked up on the next poll.
  File {
    reader: BufReader<File>,
    skipped: u64,
  },

  /// Replay a preloaded list, releasing each observation when its
  /// offset from the first timestamp has elapsed on the wall clock
  /// (scaled by the speed multiplier).
  Replay {
    items: Vec<Observation>,
    cursor: usize,
    started: Instant,
    first_ts: i64,
    speed: f64,
  },
}

impl ObservationSource {
  pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
    Ok(Self::File {
      reader: BufReader::new(File::open(path)?),
      skipped: 0,
    })
  }

  pub fn replay(items: Vec<Observation>, speed: f64) -> Self {
    let first_ts = items.first().map(|o| o.timestamp).unwrap_or(0);
    Self::Replay {
      items,
      cursor: 0,
      started: Instant::now(),
      first_ts,
      speed: if speed > 0.0 { speed } else { 1.0 },
    }
  }

  /// Everything in one list, released immediately. Used by tests
  /// and by runs that want the whole dataset at once.
  pub fn immediate(items: Vec<Observation>) -> Self {
    Self::Replay {
      items,
      cursor: 0,
      started: Instant::now(),
      first_ts: i64::MAX,
      speed: 1.0,
    }
  }

  /// Returns observations that became available since the last
  /// call. Never blocks; an empty source yields an empty slice.
  pub fn poll_new(&mut self) -> Vec<Observation> {
    match self {
      Self::File { reader, skipped } => {
        let mut fresh = Vec::new();
        let mut line = String::new();
        loop {
          line.clear();
          match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
              let trimmed = line.trim();
              if trimmed.is_empty() {
                continue;
              }
              match serde_json::from_str::<Observation>(trimmed) {
                Ok(observation) => fresh.push(observation),
                Err(e) => {
                  *skipped += 1;
                  warn!("skipping malformed observation: {e}");
                }
              }
            }
            Err(e) => {
              warn!("observation stream read error: {e}");
              break;
            }
          }
        }
        fresh
      }
      Self::Replay {
        items,
        cursor,
        started,
        first_ts,
        speed,
      } => {
        let elapsed = started.elapsed().as_secs_f64() * *speed;
        let mut fresh = Vec::new();
        while *cursor < items.len() {
          let due = (items[*cursor].timestamp - *first_ts).max(0) as f64;
          if due > elapsed && *first_ts != i64::MAX {
            break;
          }
          fresh.push(items[*cursor].clone());
          *cursor += 1;
        }
        fresh
      }
    }
  }

  /// Count of records dropped for failing the schema.
  pub fn skipped(&self) -> u64 {
    match self {
      Self::File { skipped, .. } => *skipped,
      Self::Replay { .. } => 0,
    }
  }
}

/// Reads a whole JSON-lines dataset up front, skipping malformed
/// records with a warning each. Used by the replay path.
pub fn load_dataset(
  path: impl AsRef<Path>,
) -> std::io::Result<(Vec<Observation>, u64)> {
  let file = File::open(path)?;
  let mut observations = Vec::new();
  let mut skipped = 0u64;
  for line in BufReader::new(file).lines() {
    let line = line?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }
    match serde_json::from_str::<Observation>(trimmed) {
      Ok(observation) => observations.push(observation),
      Err(e) => {
        skipped += 1;
        warn!("skipping malformed observation: {e}");
      }
    }
  }
  Ok((observations, skipped))
}

#[cfg(test)]
mod test {
  use super::{load_dataset, Observation, ObservationKind, ObservationSource};
  use std::io::Write;

  fn sample_line() -> &'static str {
    r#"{"prefix": "203.0.113.0/24", "origin_asn": 65001, "as_path": [65001], "timestamp": 1700000000, "observer_asn": 1}"#
  }

  #[test]
  fn parses_minimal_observation() {
    let observation: Observation = serde_json::from_str(sample_line()).unwrap();
    assert_eq!(observation.origin_asn, 65001);
    assert_eq!(observation.kind, ObservationKind::Announce);
    assert!(!observation.is_attack);
  }

  #[test]
  fn unknown_fields_are_ignored() {
    let line = r#"{"prefix": "203.0.113.0/24", "origin_asn": 65001, "as_path": [65001], "timestamp": 1700000000, "observer_asn": 1, "collector": "rrc00"}"#;
    assert!(serde_json::from_str::<Observation>(line).is_ok());
  }

  #[test]
  fn malformed_records_are_skipped_not_fatal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", sample_line()).unwrap();
    writeln!(file, "{{\"prefix\": \"oops\"}}").unwrap();
    writeln!(file, "{}", sample_line()).unwrap();
    file.flush().unwrap();

    let (observations, skipped) = load_dataset(file.path()).unwrap();
    assert_eq!(observations.len(), 2);
    assert_eq!(skipped, 1);
  }

  #[test]
  fn file_source_picks_up_appended_lines() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{}", sample_line()).unwrap();
    file.flush().unwrap();

    let mut source = ObservationSource::from_file(file.path()).unwrap();
    assert_eq!(source.poll_new().len(), 1);
    assert!(source.poll_new().is_empty());

    writeln!(file, "{}", sample_line()).unwrap();
    file.flush().unwrap();
    assert_eq!(source.poll_new().len(), 1);
  }

  #[test]
  fn immediate_source_releases_everything_at_once() {
    let observation: Observation = serde_json::from_str(sample_line()).unwrap();
    let mut source =
      ObservationSource::immediate(vec![observation.clone(), observation]);
    assert_eq!(source.poll_new().len(), 2);
    assert!(source.poll_new().is_empty());
  }
}
