use core::fmt::{Debug, Display};
use core::str::FromStr;

use rand::{distributions::Standard, prelude::Distribution};
use serde::Serialize;
use uint::construct_uint;

/// Failure to parse one of the fixed-width hex leaves used by the JSON
/// record shapes ("0x"-prefixed lowercase hex everywhere).
#[derive(Debug, PartialEq, Eq)]
pub enum ParseHexError {
    InvalidHex,
    BadLength { expected: usize, got: usize },
}

impl Display for ParseHexError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseHexError::InvalidHex => f.write_str("invalid hex string"),
            ParseHexError::BadLength { expected, got } => f.write_fmt(format_args!(
                "hex string of wrong length: expected {} bytes, got {}",
                expected, got
            )),
        }
    }
}

impl std::error::Error for ParseHexError {}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

pub(crate) fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseHexError> {
    let raw = hex::decode(strip_0x(s)).map_err(|_| ParseHexError::InvalidHex)?;
    let got = raw.len();
    raw.try_into()
        .map_err(|_| ParseHexError::BadLength { expected: N, got })
}

macro_rules! impl_hex_fmt {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }

        impl Display for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                Debug::fmt(self, f)
            }
        }

        impl FromStr for $T {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($T(parse_fixed(s)?))
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                $T(rng.gen())
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl_hex_fmt!($T);
    };
}

bytesN!(Bytes32, 32);

/// 32-byte digest. Identity hashes, state hashes and commitment digests are
/// all of this type.
bytesN!(Hash, 32);

impl Serialize for Bytes32 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

/// 65-byte recoverable signature, `r || s || v` with `v` in {27, 28}.
///
/// Signatures are exchanged and persisted but never part of a digest, so
/// there is no slot-encoding impl for them.
bytesN!(Signature, 65);

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }
}

// primitive_types::U256 and ethereum_types::U256 both serde-serialize to hex
// strings, which would bypass the slot writer. They are thin layers over
// construct_uint anyway, so constructing our own keeps the Serialize impl in
// our hands.
construct_uint! {
    pub struct U256(4);
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        serializer.serialize_bytes(&bytes)
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

/// Renders a U256 as minimal "0x…" lowercase hex (so `0` is `"0x0"`).
pub fn u256_to_hex(v: &U256) -> String {
    format!("{:#x}", v)
}

/// Parses "0x…" hex of any length up to 32 bytes into a U256.
pub fn u256_from_hex(s: &str) -> Result<U256, ParseHexError> {
    let stripped = strip_0x(s);
    if stripped.is_empty() || stripped.len() > 64 {
        return Err(ParseHexError::BadLength {
            expected: 32,
            got: (stripped.len() + 1) / 2,
        });
    }
    // hex::decode needs an even number of digits; minimal hex may be odd.
    let padded;
    let even: &str = if stripped.len() % 2 == 0 {
        stripped
    } else {
        padded = format!("0{}", stripped);
        &padded
    };
    let raw = hex::decode(even).map_err(|_| ParseHexError::InvalidHex)?;
    Ok(U256::from_big_endian(&raw))
}

/// 20-byte account address, the rightmost bytes of the Keccak-256 of an
/// uncompressed public key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);
impl_hex_fmt!(Address);

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Addresses occupy a full slot, right aligned like uints.
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(self.0.as_slice());
        serializer.serialize_bytes(&bytes)
    }
}

impl Distribution<Address> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Address {
        Address(rng.gen())
    }
}

/// Token address of the native asset (all-zero by convention).
pub const NATIVE_ASSET: Address = Address([0; 20]);
