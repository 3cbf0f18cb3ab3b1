use super::{
    assert_fully_signed, place_signature, signatures_from_json, signatures_to_json,
    CONDITIONAL_TX_TAG,
};
use crate::channel::{AppInstance, RecordError, StateChannel};
use crate::encode::types::{Address, Hash, Signature};
use crate::encode::{self, to_hash};
use crate::error::EngineError;

use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Commitment routing an adjudicated app outcome through the multisig: if
/// the app resolves on chain, `interpreter` pays it out of the funds the
/// free balance set aside at install time. Signed by the app participants,
/// one conditional transaction per installed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionalTxCommitment {
    pub multisig_address: Address,
    pub free_balance_identity_hash: Hash,
    pub app_identity_hash: Hash,
    pub interpreter: Address,
    #[serde(skip)]
    participants: [Address; 2],
    #[serde(skip)]
    signatures: [Option<Signature>; 2],
}

impl ConditionalTxCommitment {
    /// Commitment tying `app` to `channel`'s free balance.
    pub fn new(channel: &StateChannel, app: &AppInstance, interpreter: Address) -> Self {
        Self {
            multisig_address: channel.multisig_address(),
            free_balance_identity_hash: channel.free_balance().identity_hash(),
            app_identity_hash: app.identity_hash(),
            interpreter,
            participants: app.participants(),
            signatures: [None, None],
        }
    }

    pub fn digest(&self) -> Result<Hash, encode::Error> {
        to_hash(&(CONDITIONAL_TX_TAG, self))
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

    pub fn assert_signed(&self) -> Result<(), EngineError> {
        assert_fully_signed(self.digest()?, &self.participants, &self.signatures)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalTxCommitmentJson {
    pub multisig_address: String,
    pub free_balance_identity_hash: String,
    pub app_identity_hash: String,
    pub interpreter: String,
    pub participants: [String; 2],
    pub signatures: [Option<String>; 2],
}

impl From<&ConditionalTxCommitment> for ConditionalTxCommitmentJson {
    fn from(commitment: &ConditionalTxCommitment) -> Self {
        ConditionalTxCommitmentJson {
            multisig_address: commitment.multisig_address.to_string(),
            free_balance_identity_hash: commitment.free_balance_identity_hash.to_string(),
            app_identity_hash: commitment.app_identity_hash.to_string(),
            interpreter: commitment.interpreter.to_string(),
            participants: [
                commitment.participants[0].to_string(),
                commitment.participants[1].to_string(),
            ],
            signatures: signatures_to_json(&commitment.signatures),
        }
    }
}

impl TryFrom<&ConditionalTxCommitmentJson> for ConditionalTxCommitment {
    type Error = RecordError;

    fn try_from(record: &ConditionalTxCommitmentJson) -> Result<Self, Self::Error> {
        Ok(ConditionalTxCommitment {
            multisig_address: Address::from_str(&record.multisig_address)?,
            free_balance_identity_hash: Hash::from_str(&record.free_balance_identity_hash)?,
            app_identity_hash: Hash::from_str(&record.app_identity_hash)?,
            interpreter: Address::from_str(&record.interpreter)?,
            participants: [
                Address::from_str(&record.participants[0])?,
                Address::from_str(&record.participants[1])?,
            ],
            signatures: signatures_from_json(&record.signatures)?,
        })
    }
}
