//! The engine ties everything together: it owns the signer, store,
//! transport and registries, serializes runs per channel, and drives one
//! protocol flow per method call or incoming opening message.

mod locks;
mod runner;

pub use locks::{LockKey, LockManager};

use crate::apps::{AppLogic, AppRegistry};
use crate::channel::{AppInstance, AppInstanceProposal, StateChannel};
use crate::config::{EngineConfig, NetworkContext};
use crate::encode::types::{Address, Hash, U256, NATIVE_ASSET};
use crate::error::EngineError;
use crate::middleware::{ProtocolValidator, ValidationRegistry};
use crate::protocol::{
    CustomData, InstallInitiator, InstallParams, InstallResponder, ProposeInitiator,
    ProposeParams, ProposeResponder, ProtocolKind, ProtocolMsg, ProtocolParam, SetupInitiator,
    SetupParams, SetupResponder, TakeActionInitiator, TakeActionParams, TakeActionResponder,
    UninstallInitiator, UninstallParams, UninstallResponder,
};
use crate::sig::{PublicIdentifier, Signer};
use crate::store::ChannelStore;
use crate::wire::ProtocolTransport;

use runner::ProtocolRunner;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ProtocolEngine<S, T> {
    signer: Signer,
    store: Arc<S>,
    transport: Arc<T>,
    network: NetworkContext,
    locks: LockManager,
    validators: ValidationRegistry,
    apps: Arc<AppRegistry>,
}

impl<S, T> ProtocolEngine<S, T>
where
    S: ChannelStore,
    T: ProtocolTransport,
{
    pub fn new(signer: Signer, store: Arc<S>, transport: Arc<T>, config: EngineConfig) -> Self {
        Self {
            signer,
            store,
            transport,
            network: config.network,
            locks: LockManager::new(config.lock_timeout),
            validators: ValidationRegistry::new(),
            apps: Arc::new(AppRegistry::new()),
        }
    }

    pub fn identifier(&self) -> PublicIdentifier {
        self.signer.identifier()
    }

    /// Registers the transition logic backing an app definition. Must be
    /// called before any run that touches the definition.
    pub fn register_app(
        &mut self,
        app_definition: Address,
        logic: Arc<dyn AppLogic>,
    ) -> Result<(), EngineError> {
        let apps = Arc::get_mut(&mut self.apps)
            .ok_or(EngineError::Internal("app registry is in use by a run"))?;
        apps.register(app_definition, logic);
        Ok(())
    }

    /// Hook consulted at the start of every `protocol` run, either role.
    pub fn register_validator(&mut self, protocol: ProtocolKind, hook: Arc<dyn ProtocolValidator>) {
        self.validators.register(protocol, hook);
    }

    /// Hook scoped to one app definition; beats the global hook for it.
    pub fn register_app_validator(
        &mut self,
        protocol: ProtocolKind,
        app_definition: Address,
        hook: Arc<dyn ProtocolValidator>,
    ) {
        self.validators.register_for_app(protocol, app_definition, hook);
    }

    /// Creates the channel at `multisig_address` with `responder`, both
    /// parties countersigning the initial free-balance commitment.
    pub async fn setup_channel(
        &self,
        multisig_address: Address,
        responder: PublicIdentifier,
    ) -> Result<StateChannel, EngineError> {
        let _guard = self
            .locks
            .acquire(LockKey::pair(self.identifier(), responder))
            .await?;
        if self
            .store
            .get_state_channel(&multisig_address)
            .await?
            .is_some()
        {
            return Err(EngineError::ChannelExists(multisig_address));
        }
        let params = SetupParams {
            multisig_address,
            initiator_identifier: self.identifier(),
            responder_identifier: responder,
        };
        let process_id = rand::random();
        tracing::info!(%multisig_address, %process_id, "starting setup run");
        let output = self
            .runner()
            .drive(SetupInitiator::new(process_id, params, self.network))
            .await?;
        Ok(output.channel)
    }

    /// Proposes an app install to the channel peer. The returned proposal
    /// is pending on both sides until installed or rejected.
    pub async fn propose_app(
        &self,
        params: ProposeParams,
    ) -> Result<AppInstanceProposal, EngineError> {
        if params.initiator_identifier != self.identifier() {
            return Err(EngineError::ProtocolViolation(
                "proposals must name this party as initiator",
            ));
        }
        let _guard = self
            .locks
            .acquire(LockKey::Multisig(params.multisig_address))
            .await?;
        let channel = self.require_channel(&params.multisig_address).await?;
        let process_id = rand::random();
        tracing::info!(multisig_address = %params.multisig_address, %process_id, "starting propose run");
        let output = self
            .runner()
            .drive(ProposeInitiator::new(process_id, params, channel))
            .await?;
        output
            .proposal
            .ok_or(EngineError::Internal("propose run completed without a proposal"))
    }

    /// Installs the proposed app, moving both deposits out of the free
    /// balance. Either party may drive this, not only the proposer.
    pub async fn install_app(&self, identity_hash: Hash) -> Result<AppInstance, EngineError> {
        let multisig = self.multisig_of(&identity_hash).await?;
        let _guard = self.locks.acquire(LockKey::Multisig(multisig)).await?;
        let channel = self.require_channel(&multisig).await?;
        let proposal = channel
            .proposal(&identity_hash)
            .ok_or(EngineError::UnknownIdentityHash(identity_hash))?
            .clone();
        let responder = channel.peer_of(&self.identifier())?;
        let params = InstallParams::from_proposal(&proposal, self.identifier(), responder);
        let process_id = rand::random();
        tracing::info!(%identity_hash, %process_id, "starting install run");
        let output = self
            .runner()
            .drive(InstallInitiator::new(
                process_id,
                params,
                channel,
                self.network,
            ))
            .await?;
        output
            .app
            .ok_or(EngineError::Internal("install run completed without an app"))
    }

    /// Resolves the app through its registered logic and credits the
    /// outcome back to the free balance.
    pub async fn uninstall_app(&self, identity_hash: Hash) -> Result<StateChannel, EngineError> {
        let multisig = self.multisig_of(&identity_hash).await?;
        let _guard = self.locks.acquire(LockKey::Multisig(multisig)).await?;
        let channel = self.require_channel(&multisig).await?;
        let params = UninstallParams {
            multisig_address: multisig,
            initiator_identifier: self.identifier(),
            responder_identifier: channel.peer_of(&self.identifier())?,
            app_identity_hash: identity_hash,
        };
        let process_id = rand::random();
        tracing::info!(%identity_hash, %process_id, "starting uninstall run");
        let output = self
            .runner()
            .drive(UninstallInitiator::new(
                process_id,
                params,
                channel,
                self.network,
                self.apps.clone(),
            ))
            .await?;
        Ok(output.channel)
    }

    /// Advances the app state by one action through its registered logic.
    pub async fn take_action(
        &self,
        identity_hash: Hash,
        action: Vec<u8>,
    ) -> Result<AppInstance, EngineError> {
        let multisig = self.multisig_of(&identity_hash).await?;
        let _guard = self.locks.acquire(LockKey::Multisig(multisig)).await?;
        let channel = self.require_channel(&multisig).await?;
        let params = TakeActionParams {
            multisig_address: multisig,
            initiator_identifier: self.identifier(),
            responder_identifier: channel.peer_of(&self.identifier())?,
            app_identity_hash: identity_hash,
            action,
        };
        let process_id = rand::random();
        tracing::info!(%identity_hash, %process_id, "starting take-action run");
        let output = self
            .runner()
            .drive(TakeActionInitiator::new(
                process_id,
                params,
                channel,
                self.network,
                self.apps.clone(),
            ))
            .await?;
        output
            .app
            .ok_or(EngineError::Internal("take-action run completed without an app"))
    }

    /// Drops a pending proposal locally. Its sequence number stays burned;
    /// no message is exchanged.
    pub async fn reject_proposal(&self, identity_hash: Hash) -> Result<(), EngineError> {
        let multisig = self.multisig_of(&identity_hash).await?;
        let _guard = self.locks.acquire(LockKey::Multisig(multisig)).await?;
        let channel = self.require_channel(&multisig).await?;
        let post = channel.remove_proposal(&identity_hash)?;
        self.store.remove_app_proposal(&post, &identity_hash).await?;
        tracing::info!(%identity_hash, "rejected proposal");
        Ok(())
    }

    /// Runs the responder side of the protocol named by an incoming
    /// opening message. The transport's receive loop feeds this.
    pub async fn handle_message(&self, msg: ProtocolMsg) -> Result<(), EngineError> {
        if msg.seq != 1 {
            return Err(EngineError::ProtocolViolation(
                "only opening messages start responder runs",
            ));
        }
        let process_id = msg.process_id;
        let params = msg.params.ok_or(EngineError::ProtocolViolation(
            "opening message carries no params",
        ))?;
        if params.kind() != msg.protocol {
            return Err(EngineError::ProtocolViolation(
                "message protocol and params disagree",
            ));
        }
        if params.responder_identifier() != self.identifier() {
            return Err(EngineError::ProtocolViolation(
                "message is not addressed to this party",
            ));
        }
        tracing::info!(protocol = %msg.protocol, %process_id, "starting responder run");
        match params {
            ProtocolParam::Setup(p) => {
                let sig = match msg.data {
                    CustomData::Signature(sig) => sig,
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "setup opening must carry a signature",
                        ))
                    }
                };
                let _guard = self
                    .locks
                    .acquire(LockKey::pair(p.initiator_identifier, p.responder_identifier))
                    .await?;
                if self
                    .store
                    .get_state_channel(&p.multisig_address)
                    .await?
                    .is_some()
                {
                    return Err(EngineError::ChannelExists(p.multisig_address));
                }
                let flow = SetupResponder::new(process_id, p, self.network, sig);
                self.runner().drive(flow).await?;
            }
            ProtocolParam::Propose(p) => {
                let _guard = self
                    .locks
                    .acquire(LockKey::Multisig(p.multisig_address))
                    .await?;
                let channel = self.require_channel(&p.multisig_address).await?;
                let flow = ProposeResponder::new(process_id, p, channel);
                self.runner().drive(flow).await?;
            }
            ProtocolParam::Install(p) => {
                let (conditional, free_balance) = match msg.data {
                    CustomData::InstallSignatures {
                        conditional,
                        free_balance,
                    } => (conditional, free_balance),
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "install opening must carry both signatures",
                        ))
                    }
                };
                let _guard = self
                    .locks
                    .acquire(LockKey::Multisig(p.multisig_address))
                    .await?;
                let channel = self.require_channel(&p.multisig_address).await?;
                let flow = InstallResponder::new(
                    process_id,
                    p,
                    channel,
                    self.network,
                    conditional,
                    free_balance,
                );
                self.runner().drive(flow).await?;
            }
            ProtocolParam::Uninstall(p) => {
                let sig = match msg.data {
                    CustomData::Signature(sig) => sig,
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "uninstall opening must carry a signature",
                        ))
                    }
                };
                let _guard = self
                    .locks
                    .acquire(LockKey::Multisig(p.multisig_address))
                    .await?;
                let channel = self.require_channel(&p.multisig_address).await?;
                let flow = UninstallResponder::new(
                    process_id,
                    p,
                    channel,
                    self.network,
                    self.apps.clone(),
                    sig,
                );
                self.runner().drive(flow).await?;
            }
            ProtocolParam::TakeAction(p) => {
                let sig = match msg.data {
                    CustomData::Signature(sig) => sig,
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "take-action opening must carry a signature",
                        ))
                    }
                };
                let _guard = self
                    .locks
                    .acquire(LockKey::Multisig(p.multisig_address))
                    .await?;
                let channel = self.require_channel(&p.multisig_address).await?;
                let flow = TakeActionResponder::new(
                    process_id,
                    p,
                    channel,
                    self.network,
                    self.apps.clone(),
                    sig,
                );
                self.runner().drive(flow).await?;
            }
        }
        Ok(())
    }

    pub async fn state_channel(
        &self,
        multisig_address: &Address,
    ) -> Result<StateChannel, EngineError> {
        self.require_channel(multisig_address).await
    }

    pub async fn app_instance(&self, identity_hash: &Hash) -> Result<AppInstance, EngineError> {
        self.store
            .get_app_instance(identity_hash)
            .await?
            .ok_or(EngineError::UnknownIdentityHash(*identity_hash))
    }

    /// Free-balance holdings per owner address for `token` (the native
    /// asset when none is given).
    pub async fn free_balance(
        &self,
        multisig_address: &Address,
        token: Option<Address>,
    ) -> Result<BTreeMap<Address, U256>, EngineError> {
        let channel = self.require_channel(multisig_address).await?;
        let state = channel.free_balance_state()?;
        let token = token.unwrap_or(NATIVE_ASSET);
        Ok(channel
            .free_balance()
            .participants()
            .into_iter()
            .map(|owner| (owner, state.balance_of(&token, &owner)))
            .collect())
    }

    fn runner(&self) -> ProtocolRunner<'_> {
        ProtocolRunner {
            signer: &self.signer,
            store: &*self.store,
            transport: &*self.transport,
            validators: &self.validators,
        }
    }

    async fn require_channel(&self, multisig: &Address) -> Result<StateChannel, EngineError> {
        self.store
            .get_state_channel(multisig)
            .await?
            .ok_or(EngineError::UnknownChannel(*multisig))
    }

    /// Multisig of the channel holding the app or proposal.
    async fn multisig_of(&self, identity_hash: &Hash) -> Result<Address, EngineError> {
        Ok(self
            .store
            .get_state_channel_by_app_identity_hash(identity_hash)
            .await?
            .ok_or(EngineError::UnknownIdentityHash(*identity_hash))?
            .multisig_address())
    }
}
