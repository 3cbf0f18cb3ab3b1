//! Install: turns a pending proposal into a live app instance. Two
//! commitments change hands in one round trip: the conditional transaction
//! for the new app (app-seq keys) and the free-balance update that locks
//! the deposits (root-index keys).

use super::{
    assert_valid_signature, expect_done, expect_reply, expect_signature, AppInstancePersistKind,
    CommitmentPersistKind, CustomData, FlowOutput, FlowStep, InstallParams, Instruction,
    ProcessId, ProtocolFlow, ProtocolKind, ProtocolMsg, ProtocolParam, ProtocolRole, Resolution,
    REPLY_SEQ_NO,
};
use crate::channel::{AppInstance, StateChannel};
use crate::commitment::{Commitment, ConditionalTxCommitment, SetStateCommitment};
use crate::config::NetworkContext;
use crate::encode::types::Signature;
use crate::error::EngineError;
use crate::middleware::MiddlewareContext;
use crate::sig::derive_address;

/// Everything both parties derive deterministically before signing.
struct Computed {
    post: StateChannel,
    app: AppInstance,
    conditional: ConditionalTxCommitment,
    free_balance: SetStateCommitment,
}

fn compute(
    params: &InstallParams,
    channel: &StateChannel,
    network: &NetworkContext,
) -> Result<Computed, EngineError> {
    let proposal = channel
        .proposal(&params.app_identity_hash)
        .ok_or(EngineError::UnknownIdentityHash(params.app_identity_hash))?
        .clone();
    // The stored proposal is authoritative; wire params merely have to
    // agree with it.
    if params.app_definition != proposal.app_definition
        || params.initial_state != proposal.initial_state
        || params.initiator_deposit != proposal.initiator_deposit
        || params.initiator_deposit_token != proposal.initiator_deposit_token
        || params.responder_deposit != proposal.responder_deposit
        || params.responder_deposit_token != proposal.responder_deposit_token
        || params.default_timeout != proposal.default_timeout
        || params.outcome_type != proposal.outcome_type
        || params.app_seq_no != proposal.app_seq_no
    {
        return Err(EngineError::ProtocolViolation(
            "install params diverge from the stored proposal",
        ));
    }

    let app = AppInstance::new(
        proposal.app_identity()?,
        proposal.outcome_type,
        proposal.initial_state.clone(),
    )?;
    let proposer_owner = derive_address(&proposal.proposed_by, 0)?;
    let proposee_owner = derive_address(&proposal.proposed_to, 0)?;
    let decrements = [
        (
            proposal.initiator_deposit_token,
            proposer_owner,
            proposal.initiator_deposit,
        ),
        (
            proposal.responder_deposit_token,
            proposee_owner,
            proposal.responder_deposit,
        ),
    ];
    let post = channel.install_app(app.clone(), &decrements)?;
    let conditional =
        ConditionalTxCommitment::new(channel, &app, network.interpreter_for(proposal.outcome_type));
    let free_balance =
        SetStateCommitment::new(network.challenge_registry, post.free_balance());
    Ok(Computed {
        post,
        app,
        conditional,
        free_balance,
    })
}

pub struct InstallInitiator {
    process_id: ProcessId,
    params: InstallParams,
    channel: StateChannel,
    network: NetworkContext,
    state: InitiatorState,
}

enum InitiatorState {
    Validate,
    SignConditional,
    SignFreeBalance {
        computed: Computed,
    },
    Exchange {
        computed: Computed,
        conditional_sig: Signature,
    },
    VerifyReply {
        computed: Computed,
    },
    PersistFreeBalance {
        post: StateChannel,
        app: AppInstance,
        free_balance: SetStateCommitment,
    },
    PersistApp {
        post: StateChannel,
        app: AppInstance,
    },
    Complete {
        post: StateChannel,
        app: AppInstance,
    },
    Finished,
}

impl InstallInitiator {
    pub fn new(
        process_id: ProcessId,
        params: InstallParams,
        channel: StateChannel,
        network: NetworkContext,
    ) -> Self {
        Self {
            process_id,
            params,
            channel,
            network,
            state: InitiatorState::Validate,
        }
    }
}

impl ProtocolFlow for InstallInitiator {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, InitiatorState::Finished) {
            InitiatorState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Install(self.params.clone()),
                    role: ProtocolRole::Initiator,
                    channel: Some(self.channel.clone()),
                    app: None,
                };
                self.state = InitiatorState::SignConditional;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Install,
                    context,
                )))
            }
            InitiatorState::SignConditional => {
                expect_done(last)?;
                let computed = compute(&self.params, &self.channel, &self.network)?;
                let digest = computed.conditional.digest()?;
                let key_index = computed.app.app_seq_no();
                self.state = InitiatorState::SignFreeBalance { computed };
                Ok(FlowStep::Yield(Instruction::Sign { digest, key_index }))
            }
            InitiatorState::SignFreeBalance { mut computed } => {
                let conditional_sig = expect_signature(last)?;
                let ours =
                    derive_address(&self.params.initiator_identifier, computed.app.app_seq_no())?;
                computed.conditional.add_signature(ours, conditional_sig)?;
                let digest = computed.free_balance.digest()?;
                self.state = InitiatorState::Exchange {
                    computed,
                    conditional_sig,
                };
                Ok(FlowStep::Yield(Instruction::Sign {
                    digest,
                    key_index: 0,
                }))
            }
            InitiatorState::Exchange {
                mut computed,
                conditional_sig,
            } => {
                let free_balance_sig = expect_signature(last)?;
                let ours = derive_address(&self.params.initiator_identifier, 0)?;
                computed.free_balance.add_signature(ours, free_balance_sig)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Install,
                    process_id: self.process_id,
                    seq: 1,
                    to: self.params.responder_identifier,
                    params: Some(ProtocolParam::Install(self.params.clone())),
                    data: CustomData::InstallSignatures {
                        conditional: conditional_sig,
                        free_balance: free_balance_sig,
                    },
                };
                self.state = InitiatorState::VerifyReply { computed };
                Ok(FlowStep::Yield(Instruction::SendAndWait(msg)))
            }
            InitiatorState::VerifyReply { mut computed } => {
                let reply = expect_reply(last)?;
                let (their_conditional, their_free_balance) = match reply.data {
                    CustomData::InstallSignatures {
                        conditional,
                        free_balance,
                    } => (conditional, free_balance),
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "install reply must carry both signatures",
                        ))
                    }
                };
                let theirs_app = derive_address(
                    &self.params.responder_identifier,
                    computed.app.app_seq_no(),
                )?;
                let theirs_root = derive_address(&self.params.responder_identifier, 0)?;
                assert_valid_signature(
                    theirs_app,
                    computed.conditional.digest()?,
                    &their_conditional,
                )?;
                assert_valid_signature(
                    theirs_root,
                    computed.free_balance.digest()?,
                    &their_free_balance,
                )?;
                computed
                    .conditional
                    .add_signature(theirs_app, their_conditional)?;
                computed
                    .free_balance
                    .add_signature(theirs_root, their_free_balance)?;

                let Computed {
                    post,
                    app,
                    conditional,
                    free_balance,
                } = computed;
                let identity_hash = app.identity_hash();
                self.state = InitiatorState::PersistFreeBalance {
                    post,
                    app,
                    free_balance,
                };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::CreateConditional,
                    commitment: Commitment::Conditional(conditional),
                    identity_hash,
                }))
            }
            InitiatorState::PersistFreeBalance {
                post,
                app,
                free_balance,
            } => {
                expect_done(last)?;
                let identity_hash = post.free_balance().identity_hash();
                self.state = InitiatorState::PersistApp { post, app };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::UpdateSetState,
                    commitment: Commitment::SetState(free_balance),
                    identity_hash,
                }))
            }
            InitiatorState::PersistApp { post, app } => {
                expect_done(last)?;
                self.state = InitiatorState::Complete {
                    post: post.clone(),
                    app: app.clone(),
                };
                Ok(FlowStep::Yield(Instruction::PersistAppInstance {
                    kind: AppInstancePersistKind::Create,
                    channel: post,
                    app,
                }))
            }
            InitiatorState::Complete { post, app } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel: post,
                    app: Some(app),
                    proposal: None,
                }))
            }
            InitiatorState::Finished => {
                Err(EngineError::Internal("install initiator already finished"))
            }
        }
    }
}

pub struct InstallResponder {
    process_id: ProcessId,
    params: InstallParams,
    channel: StateChannel,
    network: NetworkContext,
    initiator_conditional: Signature,
    initiator_free_balance: Signature,
    state: ResponderState,
}

enum ResponderState {
    Validate,
    SignConditional,
    SignFreeBalance {
        computed: Computed,
    },
    PersistConditional {
        computed: Computed,
        conditional_sig: Signature,
    },
    PersistFreeBalance {
        post: StateChannel,
        app: AppInstance,
        free_balance: SetStateCommitment,
        conditional_sig: Signature,
        free_balance_sig: Signature,
    },
    PersistApp {
        post: StateChannel,
        app: AppInstance,
        conditional_sig: Signature,
        free_balance_sig: Signature,
    },
    Reply {
        post: StateChannel,
        app: AppInstance,
        conditional_sig: Signature,
        free_balance_sig: Signature,
    },
    Complete {
        post: StateChannel,
        app: AppInstance,
    },
    Finished,
}

impl InstallResponder {
    pub fn new(
        process_id: ProcessId,
        params: InstallParams,
        channel: StateChannel,
        network: NetworkContext,
        initiator_conditional: Signature,
        initiator_free_balance: Signature,
    ) -> Self {
        Self {
            process_id,
            params,
            channel,
            network,
            initiator_conditional,
            initiator_free_balance,
            state: ResponderState::Validate,
        }
    }
}

impl ProtocolFlow for InstallResponder {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, ResponderState::Finished) {
            ResponderState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Install(self.params.clone()),
                    role: ProtocolRole::Responder,
                    channel: Some(self.channel.clone()),
                    app: None,
                };
                self.state = ResponderState::SignConditional;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Install,
                    context,
                )))
            }
            ResponderState::SignConditional => {
                expect_done(last)?;
                let mut computed = compute(&self.params, &self.channel, &self.network)?;
                let seq = computed.app.app_seq_no();
                let theirs_app = derive_address(&self.params.initiator_identifier, seq)?;
                let theirs_root = derive_address(&self.params.initiator_identifier, 0)?;
                assert_valid_signature(
                    theirs_app,
                    computed.conditional.digest()?,
                    &self.initiator_conditional,
                )?;
                assert_valid_signature(
                    theirs_root,
                    computed.free_balance.digest()?,
                    &self.initiator_free_balance,
                )?;
                computed
                    .conditional
                    .add_signature(theirs_app, self.initiator_conditional)?;
                computed
                    .free_balance
                    .add_signature(theirs_root, self.initiator_free_balance)?;

                let digest = computed.conditional.digest()?;
                self.state = ResponderState::SignFreeBalance { computed };
                Ok(FlowStep::Yield(Instruction::Sign {
                    digest,
                    key_index: seq,
                }))
            }
            ResponderState::SignFreeBalance { mut computed } => {
                let conditional_sig = expect_signature(last)?;
                let ours =
                    derive_address(&self.params.responder_identifier, computed.app.app_seq_no())?;
                computed.conditional.add_signature(ours, conditional_sig)?;
                let digest = computed.free_balance.digest()?;
                self.state = ResponderState::PersistConditional {
                    computed,
                    conditional_sig,
                };
                Ok(FlowStep::Yield(Instruction::Sign {
                    digest,
                    key_index: 0,
                }))
            }
            ResponderState::PersistConditional {
                mut computed,
                conditional_sig,
            } => {
                let free_balance_sig = expect_signature(last)?;
                let ours = derive_address(&self.params.responder_identifier, 0)?;
                computed.free_balance.add_signature(ours, free_balance_sig)?;

                let Computed {
                    post,
                    app,
                    conditional,
                    free_balance,
                } = computed;
                let identity_hash = app.identity_hash();
                self.state = ResponderState::PersistFreeBalance {
                    post,
                    app,
                    free_balance,
                    conditional_sig,
                    free_balance_sig,
                };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::CreateConditional,
                    commitment: Commitment::Conditional(conditional),
                    identity_hash,
                }))
            }
            ResponderState::PersistFreeBalance {
                post,
                app,
                free_balance,
                conditional_sig,
                free_balance_sig,
            } => {
                expect_done(last)?;
                let identity_hash = post.free_balance().identity_hash();
                self.state = ResponderState::PersistApp {
                    post,
                    app,
                    conditional_sig,
                    free_balance_sig,
                };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::UpdateSetState,
                    commitment: Commitment::SetState(free_balance),
                    identity_hash,
                }))
            }
            ResponderState::PersistApp {
                post,
                app,
                conditional_sig,
                free_balance_sig,
            } => {
                expect_done(last)?;
                self.state = ResponderState::Reply {
                    post: post.clone(),
                    app: app.clone(),
                    conditional_sig,
                    free_balance_sig,
                };
                Ok(FlowStep::Yield(Instruction::PersistAppInstance {
                    kind: AppInstancePersistKind::Create,
                    channel: post,
                    app,
                }))
            }
            ResponderState::Reply {
                post,
                app,
                conditional_sig,
                free_balance_sig,
            } => {
                expect_done(last)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Install,
                    process_id: self.process_id,
                    seq: REPLY_SEQ_NO,
                    to: self.params.initiator_identifier,
                    params: None,
                    data: CustomData::InstallSignatures {
                        conditional: conditional_sig,
                        free_balance: free_balance_sig,
                    },
                };
                self.state = ResponderState::Complete { post, app };
                Ok(FlowStep::Yield(Instruction::Send(msg)))
            }
            ResponderState::Complete { post, app } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel: post,
                    app: Some(app),
                    proposal: None,
                }))
            }
            ResponderState::Finished => {
                Err(EngineError::Internal("install responder already finished"))
            }
        }
    }
}
