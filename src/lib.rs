//! Two-party state channels driven by an opcode interpreter: shared app
//! state lives off-chain, every transition is countersigned as a
//! commitment, and the five protocols (setup, propose, install, uninstall,
//! take-action) advance both parties' records in lockstep.

pub mod encode {
    mod error;
    mod hashing;
    mod ser;

    pub mod types;

    pub use error::{Error, Result};
    pub use hashing::{keccak256, to_hash};
    pub use ser::{to_writer, Serializer, Writer};

    #[cfg(test)]
    mod tests;
}

pub mod apps;
pub mod chain;
pub mod channel;
pub mod commitment;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod protocol;
pub mod sig;
pub mod store;
pub mod wire;

pub use encode::types::{Address, Hash, Signature, U256};
pub use engine::ProtocolEngine;
pub use error::EngineError;
pub use sig::{PublicIdentifier, Signer};
