use super::{bytes_from_hex, bytes_to_hex, participants_for, OutcomeType, RecordError};
use crate::channel::app_instance::AppIdentity;
use crate::encode::types::{u256_from_hex, u256_to_hex, Address, Hash, U256};
use crate::error::EngineError;
use crate::sig::PublicIdentifier;

use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// An app a party has offered to install. The proposal fixes everything the
/// install commitments will later bind: the app identity inputs, the initial
/// state, and what each side stakes from the free balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstanceProposal {
    pub identity_hash: Hash,
    pub multisig_address: Address,
    pub app_definition: Address,
    pub initial_state: Vec<u8>,
    pub initiator_deposit: U256,
    pub initiator_deposit_token: Address,
    pub responder_deposit: U256,
    pub responder_deposit_token: Address,
    pub default_timeout: u64,
    pub outcome_type: OutcomeType,
    /// Value of the channel's install counter this proposal consumed.
    pub app_seq_no: u64,
    pub proposed_by: PublicIdentifier,
    pub proposed_to: PublicIdentifier,
}

impl AppInstanceProposal {
    /// On-chain identity the installed app will carry. Participants are the
    /// keys both parties derive at this proposal's sequence number.
    pub fn app_identity(&self) -> Result<AppIdentity, EngineError> {
        let participants =
            participants_for(&[self.proposed_by, self.proposed_to], self.app_seq_no)?;
        Ok(AppIdentity {
            multisig_address: self.multisig_address,
            participants,
            app_definition: self.app_definition,
            default_timeout: self.default_timeout,
            app_seq_no: self.app_seq_no,
        })
    }

    pub fn compute_identity_hash(&self) -> Result<Hash, EngineError> {
        Ok(self.app_identity()?.hash()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceProposalJson {
    pub identity_hash: String,
    pub multisig_address: String,
    pub app_definition: String,
    pub initial_state: String,
    pub initiator_deposit: String,
    pub initiator_deposit_token: String,
    pub responder_deposit: String,
    pub responder_deposit_token: String,
    pub default_timeout: u64,
    pub outcome_type: String,
    pub app_seq_no: u64,
    pub proposed_by: String,
    pub proposed_to: String,
}

impl From<&AppInstanceProposal> for AppInstanceProposalJson {
    fn from(proposal: &AppInstanceProposal) -> Self {
        AppInstanceProposalJson {
            identity_hash: proposal.identity_hash.to_string(),
            multisig_address: proposal.multisig_address.to_string(),
            app_definition: proposal.app_definition.to_string(),
            initial_state: bytes_to_hex(&proposal.initial_state),
            initiator_deposit: u256_to_hex(&proposal.initiator_deposit),
            initiator_deposit_token: proposal.initiator_deposit_token.to_string(),
            responder_deposit: u256_to_hex(&proposal.responder_deposit),
            responder_deposit_token: proposal.responder_deposit_token.to_string(),
            default_timeout: proposal.default_timeout,
            outcome_type: proposal.outcome_type.as_str().to_string(),
            app_seq_no: proposal.app_seq_no,
            proposed_by: proposal.proposed_by.to_string(),
            proposed_to: proposal.proposed_to.to_string(),
        }
    }
}

impl TryFrom<&AppInstanceProposalJson> for AppInstanceProposal {
    type Error = RecordError;

    fn try_from(record: &AppInstanceProposalJson) -> Result<Self, Self::Error> {
        let proposal = AppInstanceProposal {
            identity_hash: Hash::from_str(&record.identity_hash)?,
            multisig_address: Address::from_str(&record.multisig_address)?,
            app_definition: Address::from_str(&record.app_definition)?,
            initial_state: bytes_from_hex(&record.initial_state)?,
            initiator_deposit: u256_from_hex(&record.initiator_deposit)?,
            initiator_deposit_token: Address::from_str(&record.initiator_deposit_token)?,
            responder_deposit: u256_from_hex(&record.responder_deposit)?,
            responder_deposit_token: Address::from_str(&record.responder_deposit_token)?,
            default_timeout: record.default_timeout,
            outcome_type: record.outcome_type.parse()?,
            app_seq_no: record.app_seq_no,
            proposed_by: PublicIdentifier::from_str(&record.proposed_by)?,
            proposed_to: PublicIdentifier::from_str(&record.proposed_to)?,
        };
        let computed = proposal
            .compute_identity_hash()
            .map_err(|_| RecordError::BadIdentifier)?;
        if computed != proposal.identity_hash {
            return Err(RecordError::IdentityHashMismatch {
                stored: proposal.identity_hash,
                computed,
            });
        }
        Ok(proposal)
    }
}
