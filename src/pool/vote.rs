use {
  super::transaction::TransactionId,
  crate::{
    primitives::{Keypair, Pubkey, ToBase58String},
    storage,
  },
  ed25519_dalek::{PublicKey, Signature, SignatureError, Signer, Verifier},
  serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDecision {
  Approve,
  Reject,
}

/// A message of this type means that the validator at `voter_asn`
/// judged the referenced candidate transaction from its own
/// knowledge (or its own re-classification, for attack
/// candidates).
///
/// The vote is signed with the voter's private key over the
/// canonical JSON of all fields except the signature itself.
#[derive(Clone, Serialize, Deserialize)]
pub struct Vote {
  pub transaction_id: TransactionId,
  pub voter_asn: u32,
  pub decision: VoteDecision,
  pub timestamp: i64,

  #[serde(with = "crate::primitives::b58::serde::signature")]
  pub signature: Signature,
}

/// The portion of a vote covered by its signature.
#[derive(Serialize)]
struct SignableVote<'a> {
  transaction_id: &'a TransactionId,
  voter_asn: u32,
  decision: VoteDecision,
  timestamp: i64,
}

impl std::fmt::Debug for Vote {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Vote")
      .field("transaction_id", &self.transaction_id)
      .field("voter_asn", &self.voter_asn)
      .field("decision", &self.decision)
      .field("signature", &self.signature.to_b58())
      .finish()
  }
}

impl Vote {
  pub fn new(
    keypair: &Keypair,
    transaction_id: TransactionId,
    voter_asn: u32,
    decision: VoteDecision,
    timestamp: i64,
  ) -> Self {
    let message = Self::signable_bytes(
      &transaction_id,
      voter_asn,
      decision,
      timestamp,
    );
    let signature = (*keypair).sign(&message);
    Self {
      transaction_id,
      voter_asn,
      decision,
      timestamp,
      signature,
    }
  }

  pub fn verify_signature(
    &self,
    voter: &Pubkey,
  ) -> Result<(), SignatureError> {
    let message = Self::signable_bytes(
      &self.transaction_id,
      self.voter_asn,
      self.decision,
      self.timestamp,
    );
    PublicKey::try_from(voter)?.verify(&message, &self.signature)
  }

  fn signable_bytes(
    transaction_id: &TransactionId,
    voter_asn: u32,
    decision: VoteDecision,
    timestamp: i64,
  ) -> Vec<u8> {
    storage::canonical_json(&SignableVote {
      transaction_id,
      voter_asn,
      decision,
      timestamp,
    })
    // serialization of a plain struct of scalars cannot fail
    .expect("vote serialization")
    .into_bytes()
  }

  pub fn approved(&self) -> bool {
    self.decision == VoteDecision::Approve
  }
}

#[cfg(test)]
mod test {
  use {
    super::{Vote, VoteDecision},
    crate::{pool::TransactionId, primitives::Keypair},
  };

  #[test]
  fn signature_roundtrip() {
    let keypair = Keypair::unique();
    let vote = Vote::new(
      &keypair,
      TransactionId::generate(),
      3,
      VoteDecision::Approve,
      1_700_000_000,
    );
    vote.verify_signature(&keypair.public()).unwrap();
  }

  #[test]
  fn wrong_key_fails_verification() {
    let vote = Vote::new(
      &Keypair::unique(),
      TransactionId::generate(),
      3,
      VoteDecision::Reject,
      1_700_000_000,
    );
    assert!(vote.verify_signature(&Keypair::unique().public()).is_err());
  }

  #[test]
  fn tampered_decision_fails_verification() {
    let keypair = Keypair::unique();
    let mut vote = Vote::new(
      &keypair,
      TransactionId::generate(),
      3,
      VoteDecision::Approve,
      1_700_000_000,
    );
    vote.decision = VoteDecision::Reject;
    assert!(vote.verify_signature(&keypair.public()).is_err());
  }
}
