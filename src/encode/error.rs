//! Error type and Result alias used by the slot serializer.

use core::fmt::Display;

use serde::ser;

/// Represents all possible errors that can happen while encoding a value
/// into 32-byte slots.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The value contains a type that has no canonical slot representation.
    ///
    /// Maps, enums with payloads, options, floats and signed integers fall
    /// in this category. Commitment digests only ever cover flat tuples of
    /// unsigned integers, addresses and fixed hashes, so rejecting these
    /// outright is safer than inventing an encoding for them.
    TypeNotRepresentable(&'static str),
    /// The type could be given a slot encoding but the serializer does not
    /// implement one.
    TypeNotYetSupported(&'static str),
    /// A sequence did not know its length up front. Slot encoding writes the
    /// length before the elements, so unsized iterators cannot be encoded.
    UnknownSeqLength,
}

impl ser::Error for Error {
    fn custom<T>(_: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::TypeNotRepresentable("custom")
    }
}

impl ser::StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::TypeNotRepresentable(type_name) => {
                f.write_str("type is not representable in slot encoding: ")?;
                f.write_str(type_name)
            }
            Error::TypeNotYetSupported(type_name) => {
                f.write_str("type is not yet implemented: ")?;
                f.write_str(type_name)
            }
            Error::UnknownSeqLength => f.write_str("sequence length unknown before iteration"),
        }
    }
}

/// Alias for `Result` using the [Error] returned by the serializer.
pub type Result<T> = core::result::Result<T, Error>;
