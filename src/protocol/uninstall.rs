//! Uninstall: the app's registered logic resolves its final state into a
//! token-indexed outcome, the free balance absorbs it, and both parties
//! sign the resulting free-balance commitment (root-index keys).

use super::{
    assert_valid_signature, expect_done, expect_reply, expect_signature, AppInstancePersistKind,
    CommitmentPersistKind, CustomData, FlowOutput, FlowStep, Instruction, ProcessId, ProtocolFlow,
    ProtocolKind, ProtocolMsg, ProtocolParam, ProtocolRole, Resolution, UninstallParams,
    REPLY_SEQ_NO,
};
use crate::apps::AppRegistry;
use crate::channel::{AppInstance, StateChannel};
use crate::commitment::{Commitment, SetStateCommitment};
use crate::config::NetworkContext;
use crate::encode::types::Signature;
use crate::error::EngineError;
use crate::middleware::MiddlewareContext;
use crate::sig::derive_address;

use std::sync::Arc;

fn compute(
    params: &UninstallParams,
    channel: &StateChannel,
    network: &NetworkContext,
    apps: &AppRegistry,
) -> Result<(StateChannel, AppInstance, SetStateCommitment), EngineError> {
    let app = channel
        .app_instance(&params.app_identity_hash)
        .ok_or(EngineError::UnknownIdentityHash(params.app_identity_hash))?
        .clone();
    let definition = app.identity().app_definition;
    let logic = apps
        .get(&definition)
        .ok_or(EngineError::MissingAppLogic(definition))?;
    let increments = logic.compute_outcome(app.latest_state())?;
    let post = channel.uninstall_app(&params.app_identity_hash, &increments)?;
    let commitment = SetStateCommitment::new(network.challenge_registry, post.free_balance());
    Ok((post, app, commitment))
}

pub struct UninstallInitiator {
    process_id: ProcessId,
    params: UninstallParams,
    channel: StateChannel,
    network: NetworkContext,
    apps: Arc<AppRegistry>,
    state: InitiatorState,
}

enum InitiatorState {
    Validate,
    Sign,
    Exchange {
        post: StateChannel,
        app: AppInstance,
        commitment: SetStateCommitment,
    },
    VerifyReply {
        post: StateChannel,
        app: AppInstance,
        commitment: SetStateCommitment,
    },
    PersistApp {
        post: StateChannel,
        app: AppInstance,
    },
    Complete {
        post: StateChannel,
    },
    Finished,
}

impl UninstallInitiator {
    pub fn new(
        process_id: ProcessId,
        params: UninstallParams,
        channel: StateChannel,
        network: NetworkContext,
        apps: Arc<AppRegistry>,
    ) -> Self {
        Self {
            process_id,
            params,
            channel,
            network,
            apps,
            state: InitiatorState::Validate,
        }
    }
}

impl ProtocolFlow for UninstallInitiator {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, InitiatorState::Finished) {
            InitiatorState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Uninstall(self.params.clone()),
                    role: ProtocolRole::Initiator,
                    channel: Some(self.channel.clone()),
                    app: self.channel.app_instance(&self.params.app_identity_hash).cloned(),
                };
                self.state = InitiatorState::Sign;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Uninstall,
                    context,
                )))
            }
            InitiatorState::Sign => {
                expect_done(last)?;
                let (post, app, commitment) =
                    compute(&self.params, &self.channel, &self.network, &self.apps)?;
                let digest = commitment.digest()?;
                self.state = InitiatorState::Exchange {
                    post,
                    app,
                    commitment,
                };
                Ok(FlowStep::Yield(Instruction::Sign {
                    digest,
                    key_index: 0,
                }))
            }
            InitiatorState::Exchange {
                post,
                app,
                mut commitment,
            } => {
                let sig = expect_signature(last)?;
                let ours = derive_address(&self.params.initiator_identifier, 0)?;
                commitment.add_signature(ours, sig)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Uninstall,
                    process_id: self.process_id,
                    seq: 1,
                    to: self.params.responder_identifier,
                    params: Some(ProtocolParam::Uninstall(self.params.clone())),
                    data: CustomData::Signature(sig),
                };
                self.state = InitiatorState::VerifyReply {
                    post,
                    app,
                    commitment,
                };
                Ok(FlowStep::Yield(Instruction::SendAndWait(msg)))
            }
            InitiatorState::VerifyReply {
                post,
                app,
                mut commitment,
            } => {
                let reply = expect_reply(last)?;
                let sig = match reply.data {
                    CustomData::Signature(sig) => sig,
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "uninstall reply must carry a single signature",
                        ))
                    }
                };
                let theirs = derive_address(&self.params.responder_identifier, 0)?;
                assert_valid_signature(theirs, commitment.digest()?, &sig)?;
                commitment.add_signature(theirs, sig)?;
                let identity_hash = post.free_balance().identity_hash();
                self.state = InitiatorState::PersistApp { post, app };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::UpdateSetState,
                    commitment: Commitment::SetState(commitment),
                    identity_hash,
                }))
            }
            InitiatorState::PersistApp { post, app } => {
                expect_done(last)?;
                self.state = InitiatorState::Complete { post: post.clone() };
                Ok(FlowStep::Yield(Instruction::PersistAppInstance {
                    kind: AppInstancePersistKind::Remove,
                    channel: post,
                    app,
                }))
            }
            InitiatorState::Complete { post } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel: post,
                    app: None,
                    proposal: None,
                }))
            }
            InitiatorState::Finished => {
                Err(EngineError::Internal("uninstall initiator already finished"))
            }
        }
    }
}

pub struct UninstallResponder {
    process_id: ProcessId,
    params: UninstallParams,
    channel: StateChannel,
    network: NetworkContext,
    apps: Arc<AppRegistry>,
    initiator_sig: Signature,
    state: ResponderState,
}

enum ResponderState {
    Validate,
    Sign,
    PersistCommitment {
        post: StateChannel,
        app: AppInstance,
        commitment: SetStateCommitment,
    },
    PersistApp {
        post: StateChannel,
        app: AppInstance,
        our_sig: Signature,
    },
    Reply {
        post: StateChannel,
        our_sig: Signature,
    },
    Complete {
        post: StateChannel,
    },
    Finished,
}

impl UninstallResponder {
    pub fn new(
        process_id: ProcessId,
        params: UninstallParams,
        channel: StateChannel,
        network: NetworkContext,
        apps: Arc<AppRegistry>,
        initiator_sig: Signature,
    ) -> Self {
        Self {
            process_id,
            params,
            channel,
            network,
            apps,
            initiator_sig,
            state: ResponderState::Validate,
        }
    }
}

impl ProtocolFlow for UninstallResponder {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, ResponderState::Finished) {
            ResponderState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Uninstall(self.params.clone()),
                    role: ProtocolRole::Responder,
                    channel: Some(self.channel.clone()),
                    app: self.channel.app_instance(&self.params.app_identity_hash).cloned(),
                };
                self.state = ResponderState::Sign;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Uninstall,
                    context,
                )))
            }
            ResponderState::Sign => {
                expect_done(last)?;
                let (post, app, mut commitment) =
                    compute(&self.params, &self.channel, &self.network, &self.apps)?;
                let theirs = derive_address(&self.params.initiator_identifier, 0)?;
                assert_valid_signature(theirs, commitment.digest()?, &self.initiator_sig)?;
                commitment.add_signature(theirs, self.initiator_sig)?;
                let digest = commitment.digest()?;
                self.state = ResponderState::PersistCommitment {
                    post,
                    app,
                    commitment,
                };
                Ok(FlowStep::Yield(Instruction::Sign {
                    digest,
                    key_index: 0,
                }))
            }
            ResponderState::PersistCommitment {
                post,
                app,
                mut commitment,
            } => {
                let our_sig = expect_signature(last)?;
                let ours = derive_address(&self.params.responder_identifier, 0)?;
                commitment.add_signature(ours, our_sig)?;
                let identity_hash = post.free_balance().identity_hash();
                self.state = ResponderState::PersistApp { post, app, our_sig };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::UpdateSetState,
                    commitment: Commitment::SetState(commitment),
                    identity_hash,
                }))
            }
            ResponderState::PersistApp { post, app, our_sig } => {
                expect_done(last)?;
                self.state = ResponderState::Reply {
                    post: post.clone(),
                    our_sig,
                };
                Ok(FlowStep::Yield(Instruction::PersistAppInstance {
                    kind: AppInstancePersistKind::Remove,
                    channel: post,
                    app,
                }))
            }
            ResponderState::Reply { post, our_sig } => {
                expect_done(last)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Uninstall,
                    process_id: self.process_id,
                    seq: REPLY_SEQ_NO,
                    to: self.params.initiator_identifier,
                    params: None,
                    data: CustomData::Signature(our_sig),
                };
                self.state = ResponderState::Complete { post };
                Ok(FlowStep::Yield(Instruction::Send(msg)))
            }
            ResponderState::Complete { post } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel: post,
                    app: None,
                    proposal: None,
                }))
            }
            ResponderState::Finished => {
                Err(EngineError::Internal("uninstall responder already finished"))
            }
        }
    }
}
