//! The append-only block log.
//!
//! Finalized transactions are batched into blocks, hash-chained
//! with SHA-256 over a canonical serialization, and persisted as a
//! single human-readable JSON file with an atomic replace per
//! update.

mod block;
mod store;

pub use {
  block::{verify_chain, Block, BlockHash, ChainError},
  store::LedgerStore,
};
