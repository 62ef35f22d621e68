pub mod b58;
mod keys;
mod prefix;

pub use {
  b58::ToBase58String,
  keys::{KeyRegistry, Keypair, KeypairError, Pubkey},
  prefix::{Ipv4Prefix, PrefixError},
};
