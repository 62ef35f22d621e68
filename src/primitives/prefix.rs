use {
  once_cell::sync::Lazy,
  serde::{de, Deserialize, Deserializer, Serialize, Serializer},
  std::{
    fmt::{Debug, Display, Formatter},
    net::Ipv4Addr,
    str::FromStr,
  },
  thiserror::Error,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixError {
  #[error("invalid CIDR string: {0}")]
  Malformed(String),

  #[error("prefix length {0} out of range")]
  BadLength(u8),

  #[error("host bits set in {0}")]
  HostBitsSet(String),
}

/// An IPv4 prefix in CIDR form.
///
/// Stored as the network address with host bits zeroed plus the
/// mask length, which makes containment checks plain integer
/// arithmetic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Prefix {
  network: u32,
  length: u8,
}

impl Ipv4Prefix {
  pub fn new(addr: Ipv4Addr, length: u8) -> Result<Self, PrefixError> {
    if length > 32 {
      return Err(PrefixError::BadLength(length));
    }
    let network = u32::from(addr);
    if network & !Self::mask(length) != 0 {
      return Err(PrefixError::HostBitsSet(format!("{addr}/{length}")));
    }
    Ok(Self { network, length })
  }

  fn mask(length: u8) -> u32 {
    if length == 0 {
      0
    } else {
      u32::MAX << (32 - length)
    }
  }

  pub fn length(&self) -> u8 {
    self.length
  }

  pub fn network(&self) -> Ipv4Addr {
    Ipv4Addr::from(self.network)
  }

  /// True when `other` falls entirely within this prefix.
  pub fn covers(&self, other: &Ipv4Prefix) -> bool {
    other.length >= self.length
      && (other.network & Self::mask(self.length)) == self.network
  }

  /// True when this prefix is strictly more specific than `parent`.
  pub fn is_subnet_of(&self, parent: &Ipv4Prefix) -> bool {
    self.length > parent.length && parent.covers(self)
  }

  /// Reserved and non-routable space that must never appear as an
  /// origin announcement on the public table.
  pub fn is_bogon(&self) -> bool {
    BOGON_RANGES.iter().any(|range| range.covers(self))
  }
}

/// RFC 1918, loopback, link-local, TEST-NETs, CGN, class D/E and
/// the unspecified block.
static BOGON_RANGES: Lazy<Vec<Ipv4Prefix>> = Lazy::new(|| {
  [
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
  ]
  .iter()
  .map(|s| s.parse().unwrap())
  .collect()
});

impl FromStr for Ipv4Prefix {
  type Err = PrefixError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (addr, length) = s
      .split_once('/')
      .ok_or_else(|| PrefixError::Malformed(s.to_owned()))?;
    let addr: Ipv4Addr = addr
      .parse()
      .map_err(|_| PrefixError::Malformed(s.to_owned()))?;
    let length: u8 = length
      .parse()
      .map_err(|_| PrefixError::Malformed(s.to_owned()))?;
    Self::new(addr, length)
  }
}

impl Display for Ipv4Prefix {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.network(), self.length)
  }
}

impl Debug for Ipv4Prefix {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Ipv4Prefix({}/{})", self.network(), self.length)
  }
}

impl Serialize for Ipv4Prefix {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for Ipv4Prefix {
  fn deserialize<D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(de::Error::custom)
  }
}
