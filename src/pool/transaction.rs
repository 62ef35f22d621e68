use {
  super::vote::Vote,
  crate::{
    detector::AttackFinding,
    observation::Observation,
    primitives::{Ipv4Prefix, Keypair, Pubkey, ToBase58String},
    storage,
  },
  ed25519_dalek::{PublicKey, Signature, SignatureError, Signer, Verifier},
  indexmap::IndexMap,
  serde::{Deserialize, Serialize},
  uuid::Uuid,
};

/// Unique 128-bit transaction identity. Collisions across the whole
/// committee are treated as impossible.
#[derive(
  Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
  pub fn generate() -> Self {
    Self(Uuid::new_v4())
  }
}

impl std::fmt::Display for TransactionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self.0, f)
  }
}

impl std::fmt::Debug for TransactionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "TransactionId({})", self.0)
  }
}

/// A signed claim by one observer that it saw (and classified) a
/// BGP announcement. This is what gets gossiped for votes and, once
/// enough of the committee corroborates it, lands on the ledger.
#[derive(Clone, Serialize, Deserialize)]
pub struct Candidate {
  pub transaction_id: TransactionId,
  pub observer_asn: u32,
  pub origin_asn: u32,
  pub prefix: Ipv4Prefix,
  pub as_path: Vec<u32>,
  pub observation_timestamp: i64,
  pub findings: Vec<AttackFinding>,
  pub is_attack: bool,
  /// Origin's trust score at creation time, when it is tracked.
  pub trust_score: Option<f64>,
  pub created_at: i64,

  #[serde(with = "crate::primitives::b58::serde::signature")]
  pub signature: Signature,
}

/// The fields covered by the observer's signature. `created_at` is
/// node-local bookkeeping and deliberately outside of it.
#[derive(Serialize)]
struct SignableCandidate<'a> {
  transaction_id: &'a TransactionId,
  observer_asn: u32,
  origin_asn: u32,
  prefix: &'a Ipv4Prefix,
  as_path: &'a [u32],
  observation_timestamp: i64,
  findings: &'a [AttackFinding],
  is_attack: bool,
}

impl std::fmt::Debug for Candidate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Candidate")
      .field("transaction_id", &self.transaction_id)
      .field("observer_asn", &self.observer_asn)
      .field("origin_asn", &self.origin_asn)
      .field("prefix", &self.prefix)
      .field("is_attack", &self.is_attack)
      .field("signature", &self.signature.to_b58())
      .finish()
  }
}

impl std::fmt::Display for Candidate {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "tx {} ({} by AS{})",
      self.transaction_id,
      if self.is_attack { "attack" } else { "regular" },
      self.origin_asn
    )
  }
}

impl Candidate {
  /// Builds and signs a candidate out of a local observation and
  /// its classification.
  pub fn from_observation(
    keypair: &Keypair,
    observation: &Observation,
    findings: Vec<AttackFinding>,
    trust_score: Option<f64>,
    created_at: i64,
  ) -> Self {
    let transaction_id = TransactionId::generate();
    let is_attack = findings.iter().any(|f| f.is_serious());
    let message = Self::signable_bytes(
      &transaction_id,
      observation,
      &findings,
      is_attack,
    );
    let signature = (*keypair).sign(&message);
    Self {
      transaction_id,
      observer_asn: observation.observer_asn,
      origin_asn: observation.origin_asn,
      prefix: observation.prefix,
      as_path: observation.as_path.clone(),
      observation_timestamp: observation.timestamp,
      findings,
      is_attack,
      trust_score,
      created_at,
      signature,
    }
  }

  fn signable_bytes(
    transaction_id: &TransactionId,
    observation: &Observation,
    findings: &[AttackFinding],
    is_attack: bool,
  ) -> Vec<u8> {
    storage::canonical_json(&SignableCandidate {
      transaction_id,
      observer_asn: observation.observer_asn,
      origin_asn: observation.origin_asn,
      prefix: &observation.prefix,
      as_path: &observation.as_path,
      observation_timestamp: observation.timestamp,
      findings,
      is_attack,
    })
    .expect("candidate serialization")
    .into_bytes()
  }

  pub fn verify_signature(
    &self,
    observer: &Pubkey,
  ) -> Result<(), SignatureError> {
    let message = storage::canonical_json(&SignableCandidate {
      transaction_id: &self.transaction_id,
      observer_asn: self.observer_asn,
      origin_asn: self.origin_asn,
      prefix: &self.prefix,
      as_path: &self.as_path,
      observation_timestamp: self.observation_timestamp,
      findings: &self.findings,
      is_attack: self.is_attack,
    })
    .expect("candidate serialization")
    .into_bytes();
    PublicKey::try_from(observer)?.verify(&message, &self.signature)
  }
}

/// A candidate that cleared consensus (or the deadline policy),
/// frozen together with the evidence that carried it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedTransaction {
  pub transaction: Candidate,
  /// Approving votes in arrival order, keyed by voter AS.
  pub approvals: IndexMap<u32, Vote>,
  /// Voters that explicitly rejected.
  pub rejections: Vec<u32>,
  pub committed_as_attack: bool,
  pub finalized_at: i64,
}

impl FinalizedTransaction {
  pub fn approving_voters(&self) -> impl Iterator<Item = u32> + '_ {
    self.approvals.keys().copied()
  }

  pub fn approval_count(&self) -> usize {
    self.approvals.len()
  }
}

#[cfg(test)]
mod test {
  use {
    super::Candidate,
    crate::{
      observation::{Observation, ObservationKind},
      primitives::Keypair,
    },
  };

  fn observation() -> Observation {
    Observation {
      prefix: "203.0.113.0/24".parse().unwrap(),
      origin_asn: 65001,
      as_path: vec![65001],
      timestamp: 1_700_000_000,
      observer_asn: 1,
      kind: ObservationKind::Announce,
      is_attack: false,
      label: None,
    }
  }

  #[test]
  fn signed_candidate_verifies() {
    let keypair = Keypair::unique();
    let candidate = Candidate::from_observation(
      &keypair,
      &observation(),
      vec![],
      None,
      1_700_000_000,
    );
    assert!(!candidate.is_attack);
    candidate.verify_signature(&keypair.public()).unwrap();
  }

  #[test]
  fn tampering_with_the_origin_breaks_the_signature() {
    let keypair = Keypair::unique();
    let mut candidate = Candidate::from_observation(
      &keypair,
      &observation(),
      vec![],
      None,
      1_700_000_000,
    );
    candidate.origin_asn = 666;
    assert!(candidate.verify_signature(&keypair.public()).is_err());
  }

  #[test]
  fn serde_roundtrip_preserves_the_signature() {
    let keypair = Keypair::unique();
    let candidate = Candidate::from_observation(
      &keypair,
      &observation(),
      vec![],
      Some(50.0),
      1_700_000_000,
    );
    let json = serde_json::to_string(&candidate).unwrap();
    let back: Candidate = serde_json::from_str(&json).unwrap();
    back.verify_signature(&keypair.public()).unwrap();
  }
}
