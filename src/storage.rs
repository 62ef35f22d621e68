//! Durable JSON state.
//!
//! Every persisted artifact (chain, snapshots, caches) is
//! human-readable JSON written with the same discipline: serialize
//! to a temp file in the target directory, then rename over the
//! destination so readers never observe a torn write. Loads treat a
//! corrupt file as data loss, not as a crash: the offender is
//! renamed aside with a `.corrupt` suffix and the caller starts
//! from empty state.

use {
  serde::{de::DeserializeOwned, Serialize},
  std::path::Path,
  thiserror::Error,
  tracing::warn,
};

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("Serialization Error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("System IO Error: {0}")]
  SystemIO(#[from] std::io::Error),
}

/// Atomic replace: temp file next to the target, then rename.
pub fn write_json_atomic<T: Serialize>(
  path: impl AsRef<Path>,
  value: &T,
) -> Result<(), StorageError> {
  let path = path.as_ref();
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let tmp = path.with_extension("tmp");
  let json = serde_json::to_string_pretty(value)?;
  std::fs::write(&tmp, json)?;
  std::fs::rename(&tmp, path)?;
  Ok(())
}

/// Loads a JSON file, or `None` when it does not exist. A file
/// that exists but fails to parse is renamed aside and reported as
/// absent, so state restarts empty rather than crashing the node.
pub fn read_json_or_sideline<T: DeserializeOwned>(
  path: impl AsRef<Path>,
) -> Result<Option<T>, StorageError> {
  let path = path.as_ref();
  let json = match std::fs::read_to_string(path) {
    Ok(json) => json,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
    Err(e) => return Err(e.into()),
  };
  match serde_json::from_str(&json) {
    Ok(value) => Ok(Some(value)),
    Err(e) => {
      warn!("corrupt state file {}: {e}; starting fresh", path.display());
      sideline(path)?;
      Ok(None)
    }
  }
}

/// Renames a damaged file to `<name>.corrupt` so a later forensic
/// pass can still look at it.
pub fn sideline(path: &Path) -> Result<(), StorageError> {
  let mut aside = path.as_os_str().to_owned();
  aside.push(".corrupt");
  std::fs::rename(path, aside)?;
  Ok(())
}

/// Appends one JSON object as a line to a log file. Used for the
/// attack-verdict log, which is append-only by nature.
pub fn append_jsonl<T: Serialize>(
  path: impl AsRef<Path>,
  value: &T,
) -> Result<(), StorageError> {
  use std::io::Write;
  let path = path.as_ref();
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let mut file = std::fs::OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)?;
  let json = serde_json::to_string(value)?;
  writeln!(file, "{json}")?;
  Ok(())
}

/// Canonical JSON: object keys sorted, no insignificant whitespace.
/// Content hashes and signatures are computed over this form so two
/// nodes serializing the same value get identical bytes.
pub fn canonical_json<T: Serialize>(
  value: &T,
) -> Result<String, serde_json::Error> {
  // serde_json's Value keeps maps in a BTreeMap, so going through
  // Value sorts object keys.
  let value = serde_json::to_value(value)?;
  serde_json::to_string(&value)
}
