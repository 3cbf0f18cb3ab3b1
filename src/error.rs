//! Engine-level error taxonomy. Leaf modules keep their own error types;
//! everything a caller of the engine can see funnels into [EngineError].

use crate::apps::AppLogicError;
use crate::encode::types::{Address, Hash, U256};
use crate::protocol::ProcessId;
use crate::store::StoreError;
use crate::wire::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no state channel for multisig {0}")]
    UnknownChannel(Address),

    #[error("no app instance or proposal for identity hash {0}")]
    UnknownIdentityHash(Hash),

    #[error("state channel already exists for multisig {0}")]
    ChannelExists(Address),

    #[error("stale version: app is at {current}, transition proposed {proposed}")]
    StaleVersion { current: u64, proposed: u64 },

    #[error("validation rejected: {reason}")]
    ValidationRejected { reason: String },

    #[error("signature invalid: expected signer {expected}, recovered {recovered}")]
    SignatureInvalid { expected: Address, recovered: Address },

    #[error("counterparty derived identity hash {theirs}, ours is {ours}")]
    MismatchedIdentityHash { ours: Hash, theirs: Hash },

    #[error("insufficient free balance: owner {owner} has {available} of token {token}, needs {required}")]
    InsufficientFreeBalance {
        token: Address,
        owner: Address,
        available: U256,
        required: U256,
    },

    #[error("no app logic registered for definition {0}")]
    MissingAppLogic(Address),

    #[error("timed out waiting for counterparty in process {process_id}")]
    Timeout { process_id: ProcessId },

    #[error("could not acquire channel lock {key} in time")]
    LockContention { key: String },

    /// A peer message broke the protocol contract (wrong payload shape,
    /// unexpected params, recipient mismatch).
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A flow received an instruction result of the wrong shape, or local
    /// state broke an invariant the flow relies on. Not caused by peers.
    #[error("internal invariant breached: {0}")]
    Internal(&'static str),

    #[error("channel record malformed: {0}")]
    Record(#[from] crate::channel::RecordError),

    #[error("encoding failed: {0}")]
    Encode(#[from] crate::encode::Error),

    #[error("crypto failure: {0}")]
    Crypto(#[from] crate::sig::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transport failure: {0}")]
    Transport(TransportError),

    #[error(transparent)]
    AppLogic(#[from] AppLogicError),
}
