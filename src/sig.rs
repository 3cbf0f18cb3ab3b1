//! Creation and verification of recoverable signatures, plus the additive
//! key derivation that lets either party compute the other's per-app signer
//! addresses from nothing but their public identifier.

use crate::encode::types::{Address, Hash, Signature};
use core::fmt::Display;
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as K256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

mod derive;

pub use derive::{derive_address, PublicIdentifier};

#[derive(Debug)]
pub enum Error {
    Ecdsa(k256::ecdsa::Error),
    /// The recovery byte is below 27, so this was not produced by
    /// [Signer::sign_eth].
    MalformedSignature,
    /// The 33 identifier bytes do not name a curve point.
    InvalidIdentifier,
    /// Key derivation hit the zero scalar or the identity point. With a
    /// keccak tweak this is unreachable in practice, but it is an error
    /// rather than a panic.
    DerivedKeyInvalid,
}

impl From<k256::ecdsa::Error> for Error {
    fn from(e: k256::ecdsa::Error) -> Self {
        Error::Ecdsa(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Ecdsa(e) => write!(f, "ecdsa failure: {}", e),
            Error::MalformedSignature => f.write_str("signature recovery byte below 27"),
            Error::InvalidIdentifier => f.write_str("identifier is not a valid public key"),
            Error::DerivedKeyInvalid => f.write_str("derived key is zero or the identity point"),
        }
    }
}

impl std::error::Error for Error {}

/// Add the `\x19Ethereum Signed Message:\n32` prefix to a hash.
///
/// Every signature the engine produces or verifies goes over this prefixed
/// form of the digest.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding, so the slot serializer is of no use here.
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        // The uncompressed encoding is 65 bytes; if the dependency ever
        // changes that, the key layout changed too and this impl is wrong
        // anyway.
        let pk_bytes: [u8; 65] = key
            .to_encoded_point(false)
            .as_bytes()
            .try_into()
            .expect("uncompressed SEC1 point is 65 bytes");
        address_from_sec1(&pk_bytes)
    }
}

/// Last 20 bytes of the Keccak-256 over the point body, skipping the SEC1
/// tag byte.
pub(crate) fn address_from_sec1(uncompressed: &[u8; 65]) -> Address {
    let hash: [u8; 32] = Keccak256::digest(&uncompressed[1..]).into();
    let mut addr = Address([0; 20]);
    addr.0.copy_from_slice(&hash[32 - 20..]);
    addr
}

/// Recovers the signer address of an eth-prefixed signature over `msg`.
///
/// Verification is recovery plus an address comparison at the call site, so
/// this needs no key material and no [Signer].
pub fn recover_signer(msg: Hash, eth_sig: &Signature) -> Result<Address, Error> {
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27 to get the plain recovery id back.
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    if sig_bytes[64] < 27 {
        return Err(Error::MalformedSignature);
    }
    sig_bytes[64] -= 27;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
    Ok(verifying_key.into())
}

/// Holds one party's root key. Per-app keys are derived on demand and never
/// stored.
pub struct Signer {
    key: SigningKey,
    addr: Address,
    identifier: PublicIdentifier,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("Signer")
            .field("addr", &self.addr)
            .field("identifier", &self.identifier)
            .finish()
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        Self::from_signing_key(SigningKey::random(rng))
    }

    /// Builds a signer from raw private key bytes. Useful for deterministic
    /// test identities; rejects out-of-range or zero keys.
    pub fn from_bytes(raw: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(raw)?;
        Ok(Self::from_signing_key(key))
    }

    fn from_signing_key(key: SigningKey) -> Self {
        let verifying = key.verifying_key();
        let addr = verifying.into();
        let identifier = PublicIdentifier::from_verifying_key(&verifying);
        Self {
            key,
            addr,
            identifier,
        }
    }

    /// Root signer address (identical to the address derived by
    /// counterparties at no index).
    pub fn address(&self) -> Address {
        self.addr
    }

    /// Compressed public key, shared with counterparties so they can derive
    /// this signer's per-app addresses.
    pub fn identifier(&self) -> PublicIdentifier {
        self.identifier
    }

    /// Signs the eth-prefixed form of `msg` with the root key; `v` carries
    /// the recovery id plus 27.
    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;

        // The recoverable signature already has the 65-byte r || s || v
        // layout; only the 27 offset is missing.
        let mut sig_bytes: [u8; 65] = sig
            .as_bytes()
            .try_into()
            .expect("recoverable signature is 65 bytes");
        debug_assert!(sig_bytes[64] < 2);
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }

    /// Child signer at `index`, per the tweak rule in [derive].
    pub fn derived(&self, index: u64) -> Result<Signer, Error> {
        let key = derive::derive_signing_key(&self.key, &self.identifier, index)?;
        Ok(Self::from_signing_key(key))
    }

    /// Signs with the key derived at `index`; index 0 is the owner key used
    /// for free-balance commitments.
    pub fn sign_derived(&self, msg: Hash, index: u64) -> Result<Signature, Error> {
        self.derived(index)?.sign_eth(msg)
    }
}
