use super::{ChannelStore, StoreError};
use crate::channel::{AppInstance, AppInstanceProposal, StateChannel, StateChannelJson};
use crate::commitment::{
    Commitment, ConditionalTxCommitment, ConditionalTxCommitmentJson, SetStateCommitment,
    SetStateCommitmentJson,
};
use crate::encode::types::{Address, Hash};
use crate::protocol::{AppInstancePersistKind, CommitmentPersistKind};

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local [ChannelStore] over the JSON record forms. What goes in is
/// what a file or database backend would hold, so the verify-on-load path
/// is exercised the same way.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<Address, StateChannelJson>,
    /// Identity hash of an installed app (or a free balance) to its multisig.
    app_index: HashMap<Hash, Address>,
    /// Identity hash of a pending proposal to its multisig.
    proposal_index: HashMap<Hash, Address>,
    set_state: HashMap<Hash, SetStateCommitmentJson>,
    conditional: HashMap<Hash, ConditionalTxCommitmentJson>,
}

impl Inner {
    fn put_channel(&mut self, channel: &StateChannel) {
        let multisig = channel.multisig_address();
        self.app_index
            .insert(channel.free_balance().identity_hash(), multisig);
        for hash in channel.app_instances().keys() {
            self.app_index.insert(*hash, multisig);
        }
        for hash in channel.proposed_apps().keys() {
            self.proposal_index.insert(*hash, multisig);
        }
        self.channels.insert(multisig, StateChannelJson::from(channel));
    }

    fn load_channel(&self, multisig: &Address) -> Result<Option<StateChannel>, StoreError> {
        match self.channels.get(multisig) {
            Some(json) => Ok(Some(StateChannel::try_from(json)?)),
            None => Ok(None),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn get_state_channel(
        &self,
        multisig_address: &Address,
    ) -> Result<Option<StateChannel>, StoreError> {
        self.inner.read().await.load_channel(multisig_address)
    }

    async fn get_state_channel_by_app_identity_hash(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<StateChannel>, StoreError> {
        let inner = self.inner.read().await;
        let multisig = inner
            .app_index
            .get(identity_hash)
            .or_else(|| inner.proposal_index.get(identity_hash));
        match multisig {
            Some(multisig) => inner.load_channel(multisig),
            None => Ok(None),
        }
    }

    async fn get_app_instance(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<AppInstance>, StoreError> {
        let inner = self.inner.read().await;
        let multisig = match inner.app_index.get(identity_hash) {
            Some(multisig) => multisig,
            None => return Ok(None),
        };
        let channel = match inner.load_channel(multisig)? {
            Some(channel) => channel,
            None => return Ok(None),
        };
        if channel.free_balance().identity_hash() == *identity_hash {
            return Ok(Some(channel.free_balance().clone()));
        }
        Ok(channel.app_instance(identity_hash).cloned())
    }

    async fn get_app_proposal(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<AppInstanceProposal>, StoreError> {
        let inner = self.inner.read().await;
        let multisig = match inner.proposal_index.get(identity_hash) {
            Some(multisig) => multisig,
            None => return Ok(None),
        };
        let channel = match inner.load_channel(multisig)? {
            Some(channel) => channel,
            None => return Ok(None),
        };
        Ok(channel.proposal(identity_hash).cloned())
    }

    async fn save_state_channel(&self, channels: &[StateChannel]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for channel in channels {
            inner.put_channel(channel);
        }
        Ok(())
    }

    async fn save_app_proposal(
        &self,
        channel: &StateChannel,
        _proposal: &AppInstanceProposal,
    ) -> Result<(), StoreError> {
        self.inner.write().await.put_channel(channel);
        Ok(())
    }

    async fn save_app_instance(
        &self,
        kind: AppInstancePersistKind,
        channel: &StateChannel,
        app: &AppInstance,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.put_channel(channel);
        match kind {
            AppInstancePersistKind::Create => {
                inner.proposal_index.remove(&app.identity_hash());
            }
            AppInstancePersistKind::Update => {}
            AppInstancePersistKind::Remove => {
                inner.app_index.remove(&app.identity_hash());
            }
        }
        Ok(())
    }

    async fn remove_app_proposal(
        &self,
        channel: &StateChannel,
        identity_hash: &Hash,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.put_channel(channel);
        inner.proposal_index.remove(identity_hash);
        Ok(())
    }

    async fn save_commitment(
        &self,
        kind: CommitmentPersistKind,
        commitment: &Commitment,
        identity_hash: &Hash,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match (kind, commitment) {
            (CommitmentPersistKind::CreateSetState, Commitment::SetState(commitment)) => {
                let json = SetStateCommitmentJson::from(commitment);
                match inner.set_state.get(identity_hash) {
                    None => {
                        inner.set_state.insert(*identity_hash, json);
                        Ok(())
                    }
                    Some(existing) if *existing == json => Ok(()),
                    Some(_) => Err(StoreError::Conflict {
                        reason: format!("set-state commitment for {identity_hash} already exists"),
                    }),
                }
            }
            (CommitmentPersistKind::UpdateSetState, Commitment::SetState(commitment)) => {
                let json = SetStateCommitmentJson::from(commitment);
                match inner.set_state.get(identity_hash) {
                    Some(existing) if existing.version_number < json.version_number => {
                        inner.set_state.insert(*identity_hash, json);
                        Ok(())
                    }
                    // Replaying the write that is already stored is fine.
                    Some(existing) if *existing == json => Ok(()),
                    Some(existing) => Err(StoreError::Conflict {
                        reason: format!(
                            "set-state commitment for {identity_hash} is at version {}, refused {}",
                            existing.version_number, json.version_number
                        ),
                    }),
                    None => Err(StoreError::Conflict {
                        reason: format!("no set-state commitment for {identity_hash} to update"),
                    }),
                }
            }
            (CommitmentPersistKind::CreateConditional, Commitment::Conditional(commitment)) => {
                let json = ConditionalTxCommitmentJson::from(commitment);
                match inner.conditional.get(identity_hash) {
                    None => {
                        inner.conditional.insert(*identity_hash, json);
                        Ok(())
                    }
                    Some(existing) if *existing == json => Ok(()),
                    Some(_) => Err(StoreError::Conflict {
                        reason: format!(
                            "conditional commitment for {identity_hash} already exists"
                        ),
                    }),
                }
            }
            (kind, _) => Err(StoreError::Conflict {
                reason: format!("commitment payload does not match persist kind {kind:?}"),
            }),
        }
    }

    async fn get_set_state_commitment(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<SetStateCommitment>, StoreError> {
        let inner = self.inner.read().await;
        match inner.set_state.get(identity_hash) {
            Some(json) => Ok(Some(SetStateCommitment::try_from(json)?)),
            None => Ok(None),
        }
    }

    async fn get_conditional_commitment(
        &self,
        identity_hash: &Hash,
    ) -> Result<Option<ConditionalTxCommitment>, StoreError> {
        let inner = self.inner.read().await;
        match inner.conditional.get(identity_hash) {
            Some(json) => Ok(Some(ConditionalTxCommitment::try_from(json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OutcomeType;
    use crate::config::NetworkContext;
    use crate::encode::types::{U256, NATIVE_ASSET};
    use crate::sig::Signer;
    use rand::{rngs::StdRng, SeedableRng};

    struct Fixture {
        channel: StateChannel,
        proposal: AppInstanceProposal,
        network: NetworkContext,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(0x510e);
        let a = Signer::new(&mut rng);
        let b = Signer::new(&mut rng);
        let network = NetworkContext::default();
        let channel = StateChannel::setup(
            Address([0x71; 20]),
            [a.identifier(), b.identifier()],
            network.identity_app,
        )
        .unwrap();
        let mut proposal = AppInstanceProposal {
            identity_hash: Default::default(),
            multisig_address: channel.multisig_address(),
            app_definition: Address([0x72; 20]),
            initial_state: b"{}".to_vec(),
            initiator_deposit: U256::zero(),
            initiator_deposit_token: NATIVE_ASSET,
            responder_deposit: U256::zero(),
            responder_deposit_token: NATIVE_ASSET,
            default_timeout: 600,
            outcome_type: OutcomeType::TwoPartyFixed,
            app_seq_no: channel.next_app_seq_no(),
            proposed_by: a.identifier(),
            proposed_to: b.identifier(),
        };
        proposal.identity_hash = proposal.compute_identity_hash().unwrap();
        Fixture {
            channel,
            proposal,
            network,
        }
    }

    #[tokio::test]
    async fn lookups_on_an_empty_store_return_none() {
        let store = MemoryStore::new();
        assert!(store
            .get_state_channel(&Address([9; 20]))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_app_instance(&Hash([9; 32]))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_set_state_commitment(&Hash([9; 32]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn channel_snapshots_round_trip_with_indexes() {
        let fx = fixture();
        let store = MemoryStore::new();
        store.save_state_channel(&[fx.channel.clone()]).await.unwrap();

        let loaded = store
            .get_state_channel(&fx.channel.multisig_address())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, fx.channel);

        // The free balance is reachable through the app index.
        let fb_hash = fx.channel.free_balance().identity_hash();
        let by_hash = store
            .get_state_channel_by_app_identity_hash(&fb_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_hash, fx.channel);
        let fb = store.get_app_instance(&fb_hash).await.unwrap().unwrap();
        assert_eq!(fb, *fx.channel.free_balance());
    }

    #[tokio::test]
    async fn proposal_lifecycle_keeps_the_index_in_step() {
        let fx = fixture();
        let store = MemoryStore::new();
        let hash = fx.proposal.identity_hash;

        let with_proposal = fx.channel.add_proposal(fx.proposal.clone()).unwrap();
        store
            .save_app_proposal(&with_proposal, &fx.proposal)
            .await
            .unwrap();
        let found = store.get_app_proposal(&hash).await.unwrap().unwrap();
        assert_eq!(found, fx.proposal);
        assert!(store
            .get_state_channel_by_app_identity_hash(&hash)
            .await
            .unwrap()
            .is_some());

        let rejected = with_proposal.remove_proposal(&hash).unwrap();
        store.remove_app_proposal(&rejected, &hash).await.unwrap();
        assert!(store.get_app_proposal(&hash).await.unwrap().is_none());
        assert!(store
            .get_state_channel_by_app_identity_hash(&hash)
            .await
            .unwrap()
            .is_none());
        // The counter stays burned in the stored snapshot.
        let loaded = store
            .get_state_channel(&fx.channel.multisig_address())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.next_app_seq_no(), fx.channel.next_app_seq_no() + 1);
    }

    #[tokio::test]
    async fn install_moves_the_hash_between_indexes() {
        let fx = fixture();
        let store = MemoryStore::new();
        let hash = fx.proposal.identity_hash;
        let app = AppInstance::new(
            fx.proposal.app_identity().unwrap(),
            fx.proposal.outcome_type,
            fx.proposal.initial_state.clone(),
        )
        .unwrap();

        let with_proposal = fx.channel.add_proposal(fx.proposal.clone()).unwrap();
        store
            .save_app_proposal(&with_proposal, &fx.proposal)
            .await
            .unwrap();
        let installed = with_proposal.install_app(app.clone(), &[]).unwrap();
        store
            .save_app_instance(AppInstancePersistKind::Create, &installed, &app)
            .await
            .unwrap();

        assert!(store.get_app_proposal(&hash).await.unwrap().is_none());
        let found = store.get_app_instance(&hash).await.unwrap().unwrap();
        assert_eq!(found, app);

        let mut outcome = crate::channel::TokenIndexedIncrements::new();
        outcome.insert(NATIVE_ASSET, Default::default());
        let removed = installed.uninstall_app(&hash, &outcome).unwrap();
        store
            .save_app_instance(AppInstancePersistKind::Remove, &removed, &app)
            .await
            .unwrap();
        assert!(store.get_app_instance(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commitment_writes_are_idempotent_but_refuse_conflicts() {
        let fx = fixture();
        let store = MemoryStore::new();
        let fb = fx.channel.free_balance();
        let fb_hash = fb.identity_hash();
        let commitment =
            SetStateCommitment::new(fx.network.challenge_registry, fb);

        store
            .save_commitment(
                CommitmentPersistKind::CreateSetState,
                &Commitment::SetState(commitment.clone()),
                &fb_hash,
            )
            .await
            .unwrap();
        // Replay of the identical create is accepted.
        store
            .save_commitment(
                CommitmentPersistKind::CreateSetState,
                &Commitment::SetState(commitment.clone()),
                &fb_hash,
            )
            .await
            .unwrap();

        let mut advanced = commitment.clone();
        advanced.version_number += 1;
        store
            .save_commitment(
                CommitmentPersistKind::UpdateSetState,
                &Commitment::SetState(advanced.clone()),
                &fb_hash,
            )
            .await
            .unwrap();
        let loaded = store
            .get_set_state_commitment(&fb_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.version_number, advanced.version_number);

        // A different commitment at the same version is refused.
        let mut rival = advanced.clone();
        rival.app_state_hash = Hash([0xee; 32]);
        let err = store
            .save_commitment(
                CommitmentPersistKind::UpdateSetState,
                &Commitment::SetState(rival),
                &fb_hash,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // So is rolling back to an older version.
        let err = store
            .save_commitment(
                CommitmentPersistKind::UpdateSetState,
                &Commitment::SetState(commitment),
                &fb_hash,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
