use {
  ed25519_dalek::{PublicKey, SecretKey},
  serde::{
    de::{self, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
  },
  std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
    marker::PhantomData,
    ops::Deref,
    path::Path,
    str::FromStr,
  },
  thiserror::Error,
};

/// Ed25519 public key of a validator node.
///
/// Every validator AS in the committee has exactly one keypair;
/// the public halves are distributed ahead of time through the
/// key registry file and are never discovered at runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; 32]);

impl Deref for Pubkey {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for Pubkey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl Debug for Pubkey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Pubkey({})", bs58::encode(self.0).into_string())
  }
}

impl From<Pubkey> for String {
  fn from(pk: Pubkey) -> Self {
    bs58::encode(pk.0).into_string()
  }
}

impl FromStr for Pubkey {
  type Err = bs58::decode::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; 32];
    bs58::decode(s).into(&mut bytes)?;
    Ok(Self(bytes))
  }
}

impl From<PublicKey> for Pubkey {
  fn from(p: PublicKey) -> Self {
    Self(*p.as_bytes())
  }
}

impl TryFrom<&Pubkey> for PublicKey {
  type Error = ed25519_dalek::ed25519::Error;

  fn try_from(pk: &Pubkey) -> Result<Self, Self::Error> {
    PublicKey::from_bytes(&pk.0)
  }
}

/// A validator keypair on the ed25519 curve.
///
/// The secret half lives in a per-validator base58 file; key
/// generation is handled by external tooling.
pub struct Keypair(ed25519_dalek::Keypair);

impl Keypair {
  pub fn public(&self) -> Pubkey {
    self.0.public.into()
  }

  pub fn secret(&self) -> &SecretKey {
    &self.0.secret
  }

  /// Generates a fresh random keypair. Used by tests and by the
  /// in-memory aggregate mode when no key files are provided.
  pub fn unique() -> Self {
    let seed: [u8; 32] = rand::random();
    let secret = SecretKey::from_bytes(&seed).unwrap();
    let public: PublicKey = (&secret).into();
    Self(ed25519_dalek::Keypair { secret, public })
  }
}

impl Clone for Keypair {
  fn clone(&self) -> Self {
    Self(ed25519_dalek::Keypair::from_bytes(&self.0.to_bytes()).unwrap())
  }
}

impl Deref for Keypair {
  type Target = ed25519_dalek::Keypair;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl std::fmt::Debug for Keypair {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Keypair").field(&self.0.public).finish()
  }
}

impl Display for Keypair {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Keypair({})",
      bs58::encode(self.0.public.as_bytes()).into_string()
    )
  }
}

impl From<ed25519_dalek::Keypair> for Keypair {
  fn from(k: ed25519_dalek::Keypair) -> Self {
    Self(k)
  }
}

#[derive(Debug, Error)]
pub enum KeypairError {
  #[error("Failed parsing base58 string: {0:?}")]
  Base58ParseError(bs58::decode::Error),

  #[error("{0}")]
  Ed25519Error(#[from] ed25519_dalek::ed25519::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  #[error("unknown validator AS{0}")]
  UnknownValidator(u32),
}

impl TryFrom<&[u8]> for Keypair {
  type Error = KeypairError;

  fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
    let secret = SecretKey::from_bytes(value)?;
    let public: PublicKey = (&secret).into();
    Ok(Self(ed25519_dalek::Keypair { secret, public }))
  }
}

impl FromStr for Keypair {
  type Err = KeypairError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let mut secret = [0u8; 32];
    bs58::decode(value.trim())
      .into(&mut secret)
      .map_err(KeypairError::Base58ParseError)?;
    let secret = SecretKey::from_bytes(&secret)?;
    let public = (&secret).into();
    Ok(Keypair(ed25519_dalek::Keypair { secret, public }))
  }
}

impl Keypair {
  /// Reads a validator secret key from its base58 key file.
  pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, KeypairError> {
    std::fs::read_to_string(path)?.parse()
  }
}

/// Deserialize a pubkey from either a user-friendly base58
/// representation or a machine-friendly byte array.
impl<'de> Deserialize<'de> for Pubkey {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    struct StringOrArray<T>(PhantomData<fn() -> T>);

    impl<'de, T> Visitor<'de> for StringOrArray<T>
    where
      T: Deserialize<'de> + FromStr<Err = bs58::decode::Error>,
    {
      type Value = T;

      fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("base58 string or byte array")
      }

      fn visit_str<E>(self, value: &str) -> Result<T, E>
      where
        E: de::Error,
      {
        FromStr::from_str(value)
          .map_err(|e| de::Error::custom(format!("{e:?}")))
      }

      fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
      where
        A: de::SeqAccess<'de>,
      {
        Deserialize::deserialize(de::value::SeqAccessDeserializer::new(seq))
      }
    }

    deserializer.deserialize_str(StringOrArray(PhantomData))
  }
}

impl Serialize for Pubkey {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&bs58::encode(self.0).into_string())
  }
}

/// Directory of validator public keys, keyed by AS number.
///
/// Loaded once at startup from a JSON map (`{"1": "<base58>", ...}`)
/// and read-only afterwards, so it is shared between tasks without
/// locking.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
  keys: BTreeMap<u32, Pubkey>,
}

impl KeyRegistry {
  pub fn new(keys: BTreeMap<u32, Pubkey>) -> Self {
    Self { keys }
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self, KeypairError> {
    let json = std::fs::read_to_string(path)?;
    let raw: BTreeMap<String, String> = serde_json::from_str(&json)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut keys = BTreeMap::new();
    for (asn, key) in raw {
      let asn: u32 = asn.trim_start_matches("AS").parse().map_err(|_| {
        std::io::Error::new(
          std::io::ErrorKind::InvalidData,
          format!("bad AS number key: {asn}"),
        )
      })?;
      let key = key
        .parse()
        .map_err(|e| KeypairError::Base58ParseError(e))?;
      keys.insert(asn, key);
    }
    Ok(Self { keys })
  }

  pub fn get(&self, asn: u32) -> Option<&Pubkey> {
    self.keys.get(&asn)
  }

  pub fn contains(&self, asn: u32) -> bool {
    self.keys.contains_key(&asn)
  }

  pub fn validators(&self) -> impl Iterator<Item = u32> + '_ {
    self.keys.keys().copied()
  }

  pub fn insert(&mut self, asn: u32, key: Pubkey) {
    self.keys.insert(asn, key);
  }

  pub fn len(&self) -> usize {
    self.keys.len()
  }

  pub fn is_empty(&self) -> bool {
    self.keys.is_empty()
  }
}

#[cfg(test)]
mod test {
  use super::{KeyRegistry, Keypair, Pubkey};

  #[test]
  fn pubkey_roundtrips_through_base58() {
    let kp = Keypair::unique();
    let encoded: String = kp.public().into();
    let decoded: Pubkey = encoded.parse().unwrap();
    assert_eq!(decoded, kp.public());
  }

  #[test]
  fn registry_accepts_plain_and_prefixed_asns() {
    let kp = Keypair::unique();
    let json = format!(r#"{{"1": "{}", "AS3": "{}"}}"#, kp.public(), kp.public());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    std::fs::write(&path, json).unwrap();

    let registry = KeyRegistry::load(&path).unwrap();
    assert!(registry.contains(1));
    assert!(registry.contains(3));
    assert_eq!(registry.len(), 2);
  }
}
