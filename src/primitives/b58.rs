/// Serde adapters for signature fields so persisted JSON stays
/// human-readable base58 instead of byte arrays.
pub mod serde {
  pub mod signature {
    use {
      ed25519_dalek::Signature,
      serde::{de, Deserialize, Deserializer, Serializer},
      std::convert::TryFrom,
    };

    pub fn serialize<S: Serializer>(
      signature: &Signature,
      serializer: S,
    ) -> Result<S::Ok, S::Error> {
      serializer.serialize_str(&bs58::encode(signature.to_bytes()).into_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
      deserializer: D,
    ) -> Result<Signature, D::Error> {
      let encoded = String::deserialize(deserializer)?;
      let mut bytes = [0u8; 64];
      bs58::decode(&encoded)
        .into(&mut bytes)
        .map_err(|e| de::Error::custom(format!("{e:?}")))?;
      Signature::try_from(&bytes[..])
        .map_err(|e| de::Error::custom(format!("{e:?}")))
    }
  }
}

pub trait ToBase58String {
  fn to_b58(&self) -> String;
}

impl ToBase58String for ed25519_dalek::Signature {
  fn to_b58(&self) -> String {
    bs58::encode(self.to_bytes()).into_string()
  }
}

impl ToBase58String for &[u8] {
  fn to_b58(&self) -> String {
    bs58::encode(self).into_string()
  }
}

impl<const N: usize> ToBase58String for [u8; N] {
  fn to_b58(&self) -> String {
    bs58::encode(self).into_string()
  }
}
