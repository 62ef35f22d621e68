use {
  super::block::{verify_chain, Block, BlockHash},
  crate::{
    pool::{FinalizedTransaction, TransactionId},
    storage::{self, StorageError},
  },
  std::path::PathBuf,
  tracing::{info, warn},
};

/// One node's copy of the chain plus the batch of finalized
/// transactions waiting for the next block.
///
/// Block formation is deterministic given the order of finalize
/// calls: a block is cut when the batch reaches the configured size
/// or when the block timer elapses with at least one transaction
/// waiting, whichever happens first. An idle node cuts nothing.
pub struct LedgerStore {
  path: PathBuf,
  chain: Vec<Block>,
  batch: Vec<FinalizedTransaction>,
  batch_started: Option<i64>,
  batch_size: usize,
  block_interval: i64,
}

impl LedgerStore {
  /// Loads and verifies the chain file. A file that fails parsing
  /// or hash verification is renamed aside and the chain restarts
  /// from genesis; the data loss is prominent in the log but not
  /// fatal.
  pub fn open(
    path: PathBuf,
    batch_size: usize,
    block_interval: std::time::Duration,
  ) -> Result<Self, StorageError> {
    let chain: Vec<Block> = match storage::read_json_or_sideline(&path)? {
      Some(blocks) => blocks,
      None => Vec::new(),
    };
    let chain = match verify_chain(&chain) {
      Ok(()) => {
        if !chain.is_empty() {
          info!("loaded chain of {} blocks from {}", chain.len(), path.display());
        }
        chain
      }
      Err(e) => {
        warn!(
          "chain verification failed ({e}); sidelining {} and starting from \
           genesis",
          path.display()
        );
        storage::sideline(&path)?;
        Vec::new()
      }
    };
    Ok(Self {
      path,
      chain,
      batch: Vec::new(),
      batch_started: None,
      batch_size: batch_size.max(1),
      block_interval: block_interval.as_secs() as i64,
    })
  }

  /// Queues a finalized transaction and cuts a block if the batch
  /// is full. Returns the block when one was formed.
  pub fn push(
    &mut self,
    transaction: FinalizedTransaction,
    now: i64,
  ) -> Result<Option<Block>, StorageError> {
    if self.batch.is_empty() {
      self.batch_started = Some(now);
    }
    self.batch.push(transaction);
    if self.batch.len() >= self.batch_size {
      return self.form_block(now).map(Some);
    }
    Ok(None)
  }

  /// Timer path: cuts a block when transactions have been waiting
  /// for a full interval.
  pub fn tick(&mut self, now: i64) -> Result<Option<Block>, StorageError> {
    match self.batch_started {
      Some(started) if now - started >= self.block_interval => {
        self.form_block(now).map(Some)
      }
      _ => Ok(None),
    }
  }

  /// Cuts whatever is batched right now. Used on shutdown so the
  /// final partial batch still lands on disk.
  pub fn flush(&mut self, now: i64) -> Result<Option<Block>, StorageError> {
    if self.batch.is_empty() {
      return Ok(None);
    }
    self.form_block(now).map(Some)
  }

  fn form_block(&mut self, now: i64) -> Result<Block, StorageError> {
    let previous_hash = self
      .chain
      .last()
      .map(|block| block.hash)
      .unwrap_or(BlockHash::ZERO);
    let transactions = std::mem::take(&mut self.batch);
    self.batch_started = None;

    let block = Block::new(
      self.chain.len() as u64,
      now,
      transactions,
      previous_hash,
    );
    info!("appending {block}");
    self.chain.push(block.clone());
    storage::write_json_atomic(&self.path, &self.chain)?;
    Ok(block)
  }

  pub fn get(&self, index: u64) -> Option<&Block> {
    self.chain.get(index as usize)
  }

  /// Looks a transaction up across the whole chain.
  pub fn find_transaction(
    &self,
    id: &TransactionId,
  ) -> Option<(&Block, &FinalizedTransaction)> {
    self.chain.iter().find_map(|block| {
      block
        .transactions
        .iter()
        .find(|tx| tx.transaction.transaction_id == *id)
        .map(|tx| (block, tx))
    })
  }

  pub fn contains_transaction(&self, id: &TransactionId) -> bool {
    self.find_transaction(id).is_some()
  }

  pub fn blocks(&self) -> impl Iterator<Item = &Block> {
    self.chain.iter()
  }

  pub fn height(&self) -> usize {
    self.chain.len()
  }

  pub fn head_hash(&self) -> BlockHash {
    self
      .chain
      .last()
      .map(|block| block.hash)
      .unwrap_or(BlockHash::ZERO)
  }

  pub fn batched(&self) -> usize {
    self.batch.len()
  }
}
