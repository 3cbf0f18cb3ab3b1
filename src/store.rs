//! Durable channel records. The engine only ever persists through
//! [ChannelStore]; flows stay storage-free and hand persistence requests to
//! the interpreter as instructions.
//!
//! Backends store the JSON record forms and re-verify identity hashes when
//! loading, so a corrupted or hand-edited record surfaces as
//! [StoreError::Corrupt] instead of silently entering a protocol run.

mod memory;

pub use memory::MemoryStore;

use crate::channel::{AppInstance, AppInstanceProposal, RecordError, StateChannel};
use crate::commitment::{Commitment, ConditionalTxCommitment, SetStateCommitment};
use crate::encode::types::{Address, Hash};
use crate::protocol::{AppInstancePersistKind, CommitmentPersistKind};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stored record is corrupt: {0}")]
    Corrupt(#[from] RecordError),

    /// The write contradicts what is already stored, e.g. a different
    /// commitment at an already-written version.
    #[error("conflicting write: {reason}")]
    Conflict { reason: String },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Persistence surface of the engine.
///
/// `save_state_channel` replaces whole channel snapshots; the finer-grained
/// saves exist so a backend can keep secondary indexes (identity hash to
/// multisig) in step with the snapshot they accompany.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get_state_channel(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<StateChannel>, StoreError>;

    /// Channel holding the app or proposal with this identity hash.
    async fn get_state_channel_by_app_identity_hash(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<StateChannel>, StoreError>;

    async fn get_app_instance(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<AppInstance>, StoreError>;

    async fn get_app_proposal(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<AppInstanceProposal>, StoreError>;

    async fn save_state_channel(&self, channels: &[StateChannel]) -> Result<(), StoreError>;

    /// Persists `channel` (which already carries the proposal) and indexes
    /// the proposal's identity hash.
    async fn save_app_proposal(
        &self,
        channel: &StateChannel,
        proposal: &AppInstanceProposal,
    ) -> Result<(), StoreError>;

    /// Persists `channel` and keeps the app index in step: `Create` drops
    /// the consumed proposal's index entry, `Remove` drops the app's.
    async fn save_app_instance(
        &self,
        kind: AppInstancePersistKind,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<(), StoreError>;

    /// Persists `channel` (with the proposal already removed) and drops the
    /// proposal's index entry.
    async fn remove_app_proposal(
        &self,
        channel: &StateChannel,
        identity_hash: &Hash,
    ) -> Result<(), StoreError>;

    async fn save_commitment(
        &self,
        kind: CommitmentPersistKind,
        commitment: &Commitment,
        identity_hash: &Hash,
    ) -> Result<(), StoreError>;

    async fn get_set_state_commitment(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<SetStateCommitment>, StoreError>;

    async fn get_conditional_commitment(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<ConditionalTxCommitment>, StoreError>;
}
