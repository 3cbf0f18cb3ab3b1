use super::{
    assert_fully_signed, place_signature, signatures_from_json, signatures_to_json, SET_STATE_TAG,
};
use crate::channel::{AppInstance, RecordError};
use crate::encode::types::{Address, Hash, Signature};
use crate::encode::{self, to_hash};
use crate::error::EngineError;

use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Commitment to one app state: whoever holds both signatures can put
/// `app_state_hash` at `version_number` in front of the challenge registry.
/// A later fully signed version always beats an earlier one, which is why
/// signing one of these is the protocol's point of no return.
///
/// Participants and signatures stay out of the digest. The participants are
/// already bound through the identity hash, and the signatures are over the
/// digest so they cannot be part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetStateCommitment {
    pub challenge_registry: Address,
    pub app_identity_hash: Hash,
    pub app_state_hash: Hash,
    pub version_number: u64,
    pub timeout: u64,
    #[serde(skip)]
    participants: [Address; 2],
    #[serde(skip)]
    signatures: [Option<Signature>; 2],
}

impl SetStateCommitment {
    /// Commitment binding `app` at its current state and version.
    pub fn new(challenge_registry: Address, app: &AppInstance) -> Self {
        Self {
            challenge_registry,
            app_identity_hash: app.identity_hash(),
            app_state_hash: app.state_hash(),
            version_number: app.version_number(),
            timeout: app.default_timeout(),
            participants: app.participants(),
            signatures: [None, None],
        }
    }

    pub fn digest(&self) -> Result<Hash, encode::Error> {
        to_hash(&(SET_STATE_TAG, self))
    }

    pub fn participants(&self) -> [Address; 2] {
        self.participants
    }

    pub fn signatures(&self) -> &[Option<Signature>; 2] {
        &self.signatures
    }

    pub fn add_signature(&mut self, signer: Address, sig: Signature) -> Result<(), EngineError> {
        place_signature(&self.participants, &mut self.signatures, signer, sig)
    }

    /// Fails unless both slots carry a signature by their participant.
    pub fn assert_signed(&self) -> Result<(), EngineError> {
        assert_fully_signed(self.digest()?, &self.participants, &self.signatures)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetStateCommitmentJson {
    pub challenge_registry: String,
    pub app_identity_hash: String,
    pub app_state_hash: String,
    pub version_number: u64,
    pub timeout: u64,
    pub participants: [String; 2],
    pub signatures: [Option<String>; 2],
}

impl From<&SetStateCommitment> for SetStateCommitmentJson {
    fn from(commitment: &SetStateCommitment) -> Self {
        SetStateCommitmentJson {
            challenge_registry: commitment.challenge_registry.to_string(),
            app_identity_hash: commitment.app_identity_hash.to_string(),
            app_state_hash: commitment.app_state_hash.to_string(),
            version_number: commitment.version_number,
            timeout: commitment.timeout,
            participants: [
                commitment.participants[0].to_string(),
                commitment.participants[1].to_string(),
            ],
            signatures: signatures_to_json(&commitment.signatures),
        }
    }
}

impl TryFrom<&SetStateCommitmentJson> for SetStateCommitment {
    type Error = RecordError;

    fn try_from(record: &SetStateCommitmentJson) -> Result<Self, Self::Error> {
        Ok(SetStateCommitment {
            challenge_registry: Address::from_str(&record.challenge_registry)?,
            app_identity_hash: Hash::from_str(&record.app_identity_hash)?,
            app_state_hash: Hash::from_str(&record.app_state_hash)?,
            version_number: record.version_number,
            timeout: record.timeout,
            participants: [
                Address::from_str(&record.participants[0])?,
                Address::from_str(&record.participants[1])?,
            ],
            signatures: signatures_from_json(&record.signatures)?,
        })
    }
}
