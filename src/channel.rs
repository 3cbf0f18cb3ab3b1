//! The channel data model: one [StateChannel] per multisig with a free
//! balance app, installed app instances and pending proposals. Every
//! operation is pure and returns a new value; flows sign and persist what
//! the model produced, never the other way around.

mod app_instance;
mod free_balance;
mod proposal;
mod state_channel;

pub use app_instance::{AppIdentity, AppInstance, AppInstanceJson};
pub use free_balance::{
    CoinTransfer, CoinTransferJson, FreeBalanceState, FreeBalanceStateJson, TokenIndexedIncrements,
};
pub use proposal::{AppInstanceProposal, AppInstanceProposalJson};
pub use state_channel::{StateChannel, StateChannelJson};

use crate::encode::types::{Address, Hash, ParseHexError};
use crate::sig::{self, derive_address, PublicIdentifier};

use core::str::FromStr;

/// Timeout bound into free-balance commitments. Long on purpose: disputes
/// over the balance sheet should leave room for every installed app to
/// resolve first.
pub const FREE_BALANCE_APP_TIMEOUT: u64 = 172_800;

/// How an adjudicated outcome of an app would be carried out. Selects the
/// interpreter contract referenced by the app's conditional commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeType {
    TwoPartyFixed,
    SingleAssetTwoPartyCoinTransfer,
    MultiAssetMultiPartyCoinTransfer,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeType::TwoPartyFixed => "TWO_PARTY_FIXED_OUTCOME",
            OutcomeType::SingleAssetTwoPartyCoinTransfer => {
                "SINGLE_ASSET_TWO_PARTY_COIN_TRANSFER"
            }
            OutcomeType::MultiAssetMultiPartyCoinTransfer => {
                "MULTI_ASSET_MULTI_PARTY_COIN_TRANSFER"
            }
        }
    }
}

impl FromStr for OutcomeType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TWO_PARTY_FIXED_OUTCOME" => Ok(OutcomeType::TwoPartyFixed),
            "SINGLE_ASSET_TWO_PARTY_COIN_TRANSFER" => {
                Ok(OutcomeType::SingleAssetTwoPartyCoinTransfer)
            }
            "MULTI_ASSET_MULTI_PARTY_COIN_TRANSFER" => {
                Ok(OutcomeType::MultiAssetMultiPartyCoinTransfer)
            }
            other => Err(RecordError::UnknownOutcomeType(other.to_string())),
        }
    }
}

/// A persisted record could not be converted back into its typed form.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid hex field: {0}")]
    Hex(#[from] ParseHexError),
    #[error("unknown outcome type: {0}")]
    UnknownOutcomeType(String),
    #[error("record identity hash {stored} does not match recomputed {computed}")]
    IdentityHashMismatch { stored: Hash, computed: Hash },
    #[error("identifier field is not a valid public key")]
    BadIdentifier,
    #[error("encoding failed: {0}")]
    Encode(#[from] crate::encode::Error),
    #[error("state bytes malformed: {0}")]
    StateBytes(#[from] serde_json::Error),
}

/// Derived signer addresses of both parties at `seq`, sorted ascending.
///
/// Commitment signature slots and participant lists share this order, so
/// deriving it in one place keeps every call site consistent.
pub fn participants_for(
    identifiers: &[PublicIdentifier; 2],
    seq: u64,
) -> Result<[Address; 2], sig::Error> {
    let a = derive_address(&identifiers[0], seq)?;
    let b = derive_address(&identifiers[1], seq)?;
    Ok(if a <= b { [a, b] } else { [b, a] })
}

/// Hex-serialized identifier pair, used by the channel record shape.
pub(crate) fn identifiers_to_json(ids: &[PublicIdentifier; 2]) -> [String; 2] {
    [ids[0].to_string(), ids[1].to_string()]
}

pub(crate) fn identifiers_from_json(raw: &[String; 2]) -> Result<[PublicIdentifier; 2], RecordError> {
    let a = PublicIdentifier::from_str(&raw[0])?;
    let b = PublicIdentifier::from_str(&raw[1])?;
    Ok([a, b])
}

/// Record shape helpers shared by the DTOs in this module.
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub(crate) fn bytes_from_hex(s: &str) -> Result<Vec<u8>, ParseHexError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(stripped).map_err(|_| ParseHexError::InvalidHex)
}
