use {
  crate::{pool::FinalizedTransaction, storage},
  multihash::{Sha2_256, StatefulHasher},
  serde::{de, Deserialize, Deserializer, Serialize, Serializer},
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ChainError {
  #[error("block {index}: stored hash does not match contents")]
  HashMismatch { index: u64 },

  #[error("block {index}: previous hash does not chain to its predecessor")]
  BrokenLink { index: u64 },

  #[error("block {index}: expected index {expected}")]
  IndexGap { index: u64, expected: u64 },

  #[error("first block must chain from the zero hash")]
  BadGenesis,
}

/// SHA-256 content hash, hex-encoded in every serialized form. The
/// chain starts from sixty-four zeros.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
  pub const ZERO: BlockHash = BlockHash([0u8; 32]);

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }
}

impl std::fmt::Display for BlockHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&hex::encode(self.0))
  }
}

impl std::fmt::Debug for BlockHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "BlockHash({})", hex::encode(self.0))
  }
}

impl Serialize for BlockHash {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(self.0))
  }
}

impl<'de> Deserialize<'de> for BlockHash {
  fn deserialize<D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Self, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    let bytes = hex::decode(&encoded).map_err(de::Error::custom)?;
    let bytes: [u8; 32] = bytes
      .try_into()
      .map_err(|_| de::Error::custom("hash must be 32 bytes"))?;
    Ok(Self(bytes))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
  pub index: u64,
  pub timestamp: i64,
  pub transactions: Vec<FinalizedTransaction>,
  pub previous_hash: BlockHash,
  pub hash: BlockHash,
}

/// The hashed portion of a block: everything except the hash
/// itself, serialized canonically (sorted keys, no whitespace).
#[derive(Serialize)]
struct HashableBlock<'a> {
  index: u64,
  timestamp: i64,
  transactions: &'a [FinalizedTransaction],
  previous_hash: &'a BlockHash,
}

impl Block {
  pub fn new(
    index: u64,
    timestamp: i64,
    transactions: Vec<FinalizedTransaction>,
    previous_hash: BlockHash,
  ) -> Self {
    let hash =
      Self::content_hash(index, timestamp, &transactions, &previous_hash);
    Self {
      index,
      timestamp,
      transactions,
      previous_hash,
      hash,
    }
  }

  pub fn content_hash(
    index: u64,
    timestamp: i64,
    transactions: &[FinalizedTransaction],
    previous_hash: &BlockHash,
  ) -> BlockHash {
    let canonical = storage::canonical_json(&HashableBlock {
      index,
      timestamp,
      transactions,
      previous_hash,
    })
    .expect("block serialization");
    let mut hasher = Sha2_256::default();
    hasher.update(canonical.as_bytes());
    let digest: [u8; 32] =
      hasher.finalize().as_ref().try_into().expect("sha-256 digest is 32 bytes");
    BlockHash(digest)
  }

  /// Recomputes this block's hash from its contents.
  pub fn recompute_hash(&self) -> BlockHash {
    Self::content_hash(
      self.index,
      self.timestamp,
      &self.transactions,
      &self.previous_hash,
    )
  }
}

impl std::fmt::Display for Block {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "block #{} [{} txs] {}",
      self.index,
      self.transactions.len(),
      self.hash
    )
  }
}

/// Head-to-tail verification: indices are gapless from zero, every
/// stored hash matches the block contents, and every block chains
/// to its predecessor (the first to the zero hash).
pub fn verify_chain(blocks: &[Block]) -> Result<(), ChainError> {
  for (position, block) in blocks.iter().enumerate() {
    let expected = position as u64;
    if block.index != expected {
      return Err(ChainError::IndexGap {
        index: block.index,
        expected,
      });
    }
    if block.recompute_hash() != block.hash {
      return Err(ChainError::HashMismatch { index: block.index });
    }
    if position == 0 {
      if block.previous_hash != BlockHash::ZERO {
        return Err(ChainError::BadGenesis);
      }
    } else if block.previous_hash != blocks[position - 1].hash {
      return Err(ChainError::BrokenLink { index: block.index });
    }
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use super::{verify_chain, Block, BlockHash};

  fn chain(length: u64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut previous = BlockHash::ZERO;
    for index in 0..length {
      let block = Block::new(index, 1_700_000_000 + index as i64, vec![], previous);
      previous = block.hash;
      blocks.push(block);
    }
    blocks
  }

  #[test]
  fn zero_hash_renders_as_64_zeros() {
    assert_eq!(BlockHash::ZERO.to_string(), "0".repeat(64));
  }

  #[test]
  fn valid_chain_verifies() {
    verify_chain(&chain(5)).unwrap();
  }

  #[test]
  fn tampered_contents_fail_verification() {
    let mut blocks = chain(3);
    blocks[1].timestamp += 1;
    assert!(verify_chain(&blocks).is_err());
  }

  #[test]
  fn broken_link_fails_verification() {
    let mut blocks = chain(3);
    blocks[2].previous_hash = BlockHash::ZERO;
    assert!(verify_chain(&blocks).is_err());
  }

  #[test]
  fn hashing_is_deterministic() {
    let a = Block::new(0, 1_700_000_000, vec![], BlockHash::ZERO);
    let b = Block::new(0, 1_700_000_000, vec![], BlockHash::ZERO);
    assert_eq!(a.hash, b.hash);
  }
}
