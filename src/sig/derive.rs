//! Per-index key derivation.
//!
//! Both parties must agree on which signer addresses back which app without
//! another round trip, so app keys are derived from public material alone:
//!
//! `tweak(id, k) = keccak256(id || k_be) mod n`
//!
//! - child private key: `root + tweak(id, k)`
//! - child public point: `P_id + tweak(id, k) * G`
//!
//! The identifier `id` is the party's compressed root public key, which
//! makes the child address computable by anyone holding the identifier.
//! Index 0 backs the free balance; an app at sequence number `k` is backed
//! by the keys at index `k`.

use super::{address_from_sec1, Error};
use crate::encode::types::{parse_fixed, Address, ParseHexError};

use core::fmt::{Debug, Display};
use core::str::FromStr;
use k256::{
    ecdsa::{SigningKey, VerifyingKey},
    elliptic_curve::{ops::Reduce, sec1::ToEncodedPoint},
    ProjectivePoint, PublicKey, Scalar,
};
use sha3::{Digest, Keccak256};

/// 33-byte compressed SEC1 public key identifying one party everywhere:
/// in channel records, protocol messages and key derivation.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicIdentifier(pub [u8; 33]);

impl PublicIdentifier {
    pub(crate) fn from_verifying_key(key: &VerifyingKey) -> Self {
        let bytes: [u8; 33] = key
            .to_encoded_point(true)
            .as_bytes()
            .try_into()
            .expect("compressed SEC1 point is 33 bytes");
        PublicIdentifier(bytes)
    }
}

impl Debug for PublicIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("0x")?;
        for b in self.0 {
            f.write_fmt(format_args!("{:02x}", b))?;
        }
        Ok(())
    }
}

impl Display for PublicIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl FromStr for PublicIdentifier {
    type Err = ParseHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PublicIdentifier(parse_fixed(s)?))
    }
}

fn tweak_scalar(identifier: &PublicIdentifier, index: u64) -> Scalar {
    let mut hasher = Keccak256::new();
    hasher.update(identifier.0);
    hasher.update(index.to_be_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    <Scalar as Reduce<k256::U256>>::from_be_bytes_reduced(digest.into())
}

/// Signer address of `identifier`'s key at `index`, computed from public
/// material only.
pub fn derive_address(identifier: &PublicIdentifier, index: u64) -> Result<Address, Error> {
    let pk = PublicKey::from_sec1_bytes(&identifier.0).map_err(|_| Error::InvalidIdentifier)?;
    let point = pk.to_projective() + ProjectivePoint::GENERATOR * tweak_scalar(identifier, index);
    if point == ProjectivePoint::IDENTITY {
        return Err(Error::DerivedKeyInvalid);
    }
    let bytes: [u8; 65] = point
        .to_affine()
        .to_encoded_point(false)
        .as_bytes()
        .try_into()
        .expect("uncompressed SEC1 point is 65 bytes");
    Ok(address_from_sec1(&bytes))
}

/// Private counterpart of [derive_address], used by the holder of the root
/// key when an instruction asks for a signature at some index.
pub(super) fn derive_signing_key(
    key: &SigningKey,
    identifier: &PublicIdentifier,
    index: u64,
) -> Result<SigningKey, Error> {
    let root = <Scalar as Reduce<k256::U256>>::from_be_bytes_reduced(key.to_bytes());
    let child = root + tweak_scalar(identifier, index);
    if child == Scalar::ZERO {
        return Err(Error::DerivedKeyInvalid);
    }
    SigningKey::from_bytes(&child.to_bytes()).map_err(Error::Ecdsa)
}
