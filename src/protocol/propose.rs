//! Propose: both parties derive the same proposal record from the params
//! and their channel's install counter, then compare identity hashes. No
//! commitments yet; signing happens at install.

use super::{
    expect_done, expect_reply, CustomData, FlowOutput, FlowStep, Instruction, ProcessId,
    ProposeParams, ProtocolFlow, ProtocolKind, ProtocolMsg, ProtocolParam, ProtocolRole,
    Resolution, REPLY_SEQ_NO,
};
use crate::channel::{AppInstanceProposal, StateChannel};
use crate::error::EngineError;
use crate::middleware::MiddlewareContext;

/// Proposal record as derived on either side. The identity hash folds in
/// the channel's current counter, so divergent counters surface as a hash
/// mismatch instead of silent disagreement.
fn build_proposal(
    params: &ProposeParams,
    channel: &StateChannel,
) -> Result<AppInstanceProposal, EngineError> {
    let mut proposal = AppInstanceProposal {
        identity_hash: Default::default(),
        multisig_address: params.multisig_address,
        app_definition: params.app_definition,
        initial_state: params.initial_state.clone(),
        initiator_deposit: params.initiator_deposit,
        initiator_deposit_token: params.initiator_deposit_token,
        responder_deposit: params.responder_deposit,
        responder_deposit_token: params.responder_deposit_token,
        default_timeout: params.default_timeout,
        outcome_type: params.outcome_type,
        app_seq_no: channel.next_app_seq_no(),
        proposed_by: params.initiator_identifier,
        proposed_to: params.responder_identifier,
    };
    proposal.identity_hash = proposal.compute_identity_hash()?;
    Ok(proposal)
}

pub struct ProposeInitiator {
    process_id: ProcessId,
    params: ProposeParams,
    channel: StateChannel,
    state: InitiatorState,
}

enum InitiatorState {
    Validate,
    Exchange,
    Persist {
        channel: StateChannel,
        proposal: AppInstanceProposal,
    },
    Complete {
        channel: StateChannel,
        proposal: AppInstanceProposal,
    },
    Finished,
}

impl ProposeInitiator {
    pub fn new(process_id: ProcessId, params: ProposeParams, channel: StateChannel) -> Self {
        Self {
            process_id,
            params,
            channel,
            state: InitiatorState::Validate,
        }
    }
}

impl ProtocolFlow for ProposeInitiator {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, InitiatorState::Finished) {
            InitiatorState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Propose(self.params.clone()),
                    role: ProtocolRole::Initiator,
                    channel: Some(self.channel.clone()),
                    app: None,
                };
                self.state = InitiatorState::Exchange;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Propose,
                    context,
                )))
            }
            InitiatorState::Exchange => {
                expect_done(last)?;
                // Compute before sending so a duplicate proposal dies here,
                // not on the counterparty.
                let proposal = build_proposal(&self.params, &self.channel)?;
                let post = self.channel.add_proposal(proposal.clone())?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Propose,
                    process_id: self.process_id,
                    seq: 1,
                    to: self.params.responder_identifier,
                    params: Some(ProtocolParam::Propose(self.params.clone())),
                    data: CustomData::None,
                };
                self.state = InitiatorState::Persist {
                    channel: post,
                    proposal,
                };
                Ok(FlowStep::Yield(Instruction::SendAndWait(msg)))
            }
            InitiatorState::Persist { channel, proposal } => {
                let reply = expect_reply(last)?;
                let theirs = match reply.data {
                    CustomData::ProposalAck { identity_hash } => identity_hash,
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "propose reply must carry a proposal ack",
                        ))
                    }
                };
                if theirs != proposal.identity_hash {
                    return Err(EngineError::MismatchedIdentityHash {
                        ours: proposal.identity_hash,
                        theirs,
                    });
                }
                self.state = InitiatorState::Complete {
                    channel: channel.clone(),
                    proposal: proposal.clone(),
                };
                Ok(FlowStep::Yield(Instruction::PersistAppProposal {
                    channel,
                    proposal,
                }))
            }
            InitiatorState::Complete { channel, proposal } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel,
                    app: None,
                    proposal: Some(proposal),
                }))
            }
            InitiatorState::Finished => {
                Err(EngineError::Internal("propose initiator already finished"))
            }
        }
    }
}

pub struct ProposeResponder {
    process_id: ProcessId,
    params: ProposeParams,
    channel: StateChannel,
    state: ResponderState,
}

enum ResponderState {
    Validate,
    Persist,
    Reply {
        channel: StateChannel,
        proposal: AppInstanceProposal,
    },
    Complete {
        channel: StateChannel,
        proposal: AppInstanceProposal,
    },
    Finished,
}

impl ProposeResponder {
    pub fn new(process_id: ProcessId, params: ProposeParams, channel: StateChannel) -> Self {
        Self {
            process_id,
            params,
            channel,
            state: ResponderState::Validate,
        }
    }
}

impl ProtocolFlow for ProposeResponder {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, ResponderState::Finished) {
            ResponderState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Propose(self.params.clone()),
                    role: ProtocolRole::Responder,
                    channel: Some(self.channel.clone()),
                    app: None,
                };
                self.state = ResponderState::Persist;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Propose,
                    context,
                )))
            }
            ResponderState::Persist => {
                expect_done(last)?;
                let proposal = build_proposal(&self.params, &self.channel)?;
                let post = self.channel.add_proposal(proposal.clone())?;
                self.state = ResponderState::Reply {
                    channel: post.clone(),
                    proposal: proposal.clone(),
                };
                Ok(FlowStep::Yield(Instruction::PersistAppProposal {
                    channel: post,
                    proposal,
                }))
            }
            ResponderState::Reply { channel, proposal } => {
                expect_done(last)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Propose,
                    process_id: self.process_id,
                    seq: REPLY_SEQ_NO,
                    to: self.params.initiator_identifier,
                    params: None,
                    data: CustomData::ProposalAck {
                        identity_hash: proposal.identity_hash,
                    },
                };
                self.state = ResponderState::Complete { channel, proposal };
                Ok(FlowStep::Yield(Instruction::Send(msg)))
            }
            ResponderState::Complete { channel, proposal } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel,
                    app: None,
                    proposal: Some(proposal),
                }))
            }
            ResponderState::Finished => {
                Err(EngineError::Internal("propose responder already finished"))
            }
        }
    }
}
