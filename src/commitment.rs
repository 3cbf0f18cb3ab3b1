//! Commitments are what actually gets signed. Each one digests to a single
//! keccak256 hash over its slot encoding, with a leading tag slot so the two
//! commitment kinds can never collide on the same digest.
//!
//! Signature slots mirror the participant array: slot `i` belongs to
//! `participants[i]`, and participants are always sorted by address, so both
//! parties agree on slot order without negotiating it.

mod conditional;
mod set_state;

pub use conditional::{ConditionalTxCommitment, ConditionalTxCommitmentJson};
pub use set_state::{SetStateCommitment, SetStateCommitmentJson};

use crate::encode::types::{Address, Hash, Signature};
use crate::error::EngineError;
use crate::sig::recover_signer;

pub(crate) const SET_STATE_TAG: u8 = 1;
pub(crate) const CONDITIONAL_TX_TAG: u8 = 2;

/// Either commitment kind, for call sites that carry one opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commitment {
    SetState(SetStateCommitment),
    Conditional(ConditionalTxCommitment),
}

/// Places `sig` in the slot belonging to `signer`.
fn place_signature(
    participants: &[Address; 2],
    signatures: &mut [Option<Signature>; 2],
    signer: Address,
    sig: Signature,
) -> Result<(), EngineError> {
    let slot = participants
        .iter()
        .position(|p| *p == signer)
        .ok_or(EngineError::Internal("signer is not a commitment participant"))?;
    signatures[slot] = Some(sig);
    Ok(())
}

/// Checks that every slot holds a signature recovering to its participant.
fn assert_fully_signed(
    digest: Hash,
    participants: &[Address; 2],
    signatures: &[Option<Signature>; 2],
) -> Result<(), EngineError> {
    for (expected, slot) in participants.iter().zip(signatures.iter()) {
        let sig = slot
            .as_ref()
            .ok_or(EngineError::Internal("commitment is missing a signature"))?;
        let recovered = recover_signer(digest, sig)?;
        if recovered != *expected {
            return Err(EngineError::SignatureInvalid {
                expected: *expected,
                recovered,
            });
        }
    }
    Ok(())
}

fn signatures_to_json(signatures: &[Option<Signature>; 2]) -> [Option<String>; 2] {
    [
        signatures[0].as_ref().map(Signature::to_string),
        signatures[1].as_ref().map(Signature::to_string),
    ]
}

fn signatures_from_json(
    raw: &[Option<String>; 2],
) -> Result<[Option<Signature>; 2], crate::channel::RecordError> {
    use core::str::FromStr;
    let mut out = [None, None];
    for (slot, value) in out.iter_mut().zip(raw.iter()) {
        if let Some(hex) = value {
            *slot = Some(Signature::from_str(hex)?);
        }
    }
    Ok(out)
}
