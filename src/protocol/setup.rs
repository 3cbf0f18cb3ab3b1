//! Setup: both parties create the same channel record and free-balance app
//! from nothing, then swap signatures over the first free-balance
//! commitment.

use super::{
    assert_valid_signature, expect_done, expect_reply, expect_signature, CommitmentPersistKind,
    CustomData, FlowOutput, FlowStep, Instruction, ProcessId, ProtocolFlow, ProtocolKind,
    ProtocolMsg, ProtocolParam, ProtocolRole, Resolution, SetupParams, REPLY_SEQ_NO,
};
use crate::channel::StateChannel;
use crate::commitment::{Commitment, SetStateCommitment};
use crate::config::NetworkContext;
use crate::encode::types::Signature;
use crate::error::EngineError;
use crate::middleware::MiddlewareContext;
use crate::sig::derive_address;

/// Channel and first commitment both parties derive independently.
fn build(
    params: &SetupParams,
    network: &NetworkContext,
) -> Result<(StateChannel, SetStateCommitment), EngineError> {
    let channel = StateChannel::setup(
        params.multisig_address,
        [params.initiator_identifier, params.responder_identifier],
        network.identity_app,
    )?;
    let commitment = SetStateCommitment::new(network.challenge_registry, channel.free_balance());
    Ok((channel, commitment))
}

pub struct SetupInitiator {
    process_id: ProcessId,
    params: SetupParams,
    network: NetworkContext,
    state: InitiatorState,
}

enum InitiatorState {
    Validate,
    Sign,
    Exchange {
        channel: StateChannel,
        commitment: SetStateCommitment,
    },
    PersistCommitment {
        channel: StateChannel,
        commitment: SetStateCommitment,
    },
    PersistChannel {
        channel: StateChannel,
    },
    Complete {
        channel: StateChannel,
    },
    Finished,
}

impl SetupInitiator {
    pub fn new(process_id: ProcessId, params: SetupParams, network: NetworkContext) -> Self {
        Self {
            process_id,
            params,
            network,
            state: InitiatorState::Validate,
        }
    }
}

impl ProtocolFlow for SetupInitiator {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, InitiatorState::Finished) {
            InitiatorState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Setup(self.params.clone()),
                    role: ProtocolRole::Initiator,
                    channel: None,
                    app: None,
                };
                self.state = InitiatorState::Sign;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Setup,
                    context,
                )))
            }
            InitiatorState::Sign => {
                expect_done(last)?;
                let (channel, commitment) = build(&self.params, &self.network)?;
                let digest = commitment.digest()?;
                self.state = InitiatorState::Exchange { channel, commitment };
                Ok(FlowStep::Yield(Instruction::Sign {
                    digest,
                    key_index: 0,
                }))
            }
            InitiatorState::Exchange {
                channel,
                mut commitment,
            } => {
                let sig = expect_signature(last)?;
                let ours = derive_address(&self.params.initiator_identifier, 0)?;
                commitment.add_signature(ours, sig)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Setup,
                    process_id: self.process_id,
                    seq: 1,
                    to: self.params.responder_identifier,
                    params: Some(ProtocolParam::Setup(self.params.clone())),
                    data: CustomData::Signature(sig),
                };
                self.state = InitiatorState::PersistCommitment { channel, commitment };
                Ok(FlowStep::Yield(Instruction::SendAndWait(msg)))
            }
            InitiatorState::PersistCommitment {
                channel,
                mut commitment,
            } => {
                let reply = expect_reply(last)?;
                let sig = match reply.data {
                    CustomData::Signature(sig) => sig,
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "setup reply must carry a single signature",
                        ))
                    }
                };
                let theirs = derive_address(&self.params.responder_identifier, 0)?;
                assert_valid_signature(theirs, commitment.digest()?, &sig)?;
                commitment.add_signature(theirs, sig)?;
                let identity_hash = channel.free_balance().identity_hash();
                self.state = InitiatorState::PersistChannel { channel };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::CreateSetState,
                    commitment: Commitment::SetState(commitment),
                    identity_hash,
                }))
            }
            InitiatorState::PersistChannel { channel } => {
                expect_done(last)?;
                self.state = InitiatorState::Complete {
                    channel: channel.clone(),
                };
                Ok(FlowStep::Yield(Instruction::PersistStateChannel(vec![
                    channel,
                ])))
            }
            InitiatorState::Complete { channel } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel,
                    app: None,
                    proposal: None,
                }))
            }
            InitiatorState::Finished => {
                Err(EngineError::Internal("setup initiator already finished"))
            }
        }
    }
}

pub struct SetupResponder {
    process_id: ProcessId,
    params: SetupParams,
    network: NetworkContext,
    initiator_sig: Signature,
    state: ResponderState,
}

enum ResponderState {
    Validate,
    Sign,
    PersistCommitment {
        channel: StateChannel,
        commitment: SetStateCommitment,
    },
    PersistChannel {
        channel: StateChannel,
        our_sig: Signature,
    },
    Reply {
        channel: StateChannel,
        our_sig: Signature,
    },
    Complete {
        channel: StateChannel,
    },
    Finished,
}

impl SetupResponder {
    /// Built from the initiator's opening message; `initiator_sig` is the
    /// signature it carried.
    pub fn new(
        process_id: ProcessId,
        params: SetupParams,
        network: NetworkContext,
        initiator_sig: Signature,
    ) -> Self {
        Self {
            process_id,
            params,
            network,
            initiator_sig,
            state: ResponderState::Validate,
        }
    }
}

impl ProtocolFlow for SetupResponder {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, ResponderState::Finished) {
            ResponderState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::Setup(self.params.clone()),
                    role: ProtocolRole::Responder,
                    channel: None,
                    app: None,
                };
                self.state = ResponderState::Sign;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::Setup,
                    context,
                )))
            }
            ResponderState::Sign => {
                expect_done(last)?;
                let (channel, mut commitment) = build(&self.params, &self.network)?;
                let theirs = derive_address(&self.params.initiator_identifier, 0)?;
                assert_valid_signature(theirs, commitment.digest()?, &self.initiator_sig)?;
                commitment.add_signature(theirs, self.initiator_sig)?;
                let digest = commitment.digest()?;
                self.state = ResponderState::PersistCommitment { channel, commitment };
                Ok(FlowStep::Yield(Instruction::Sign {
                    digest,
                    key_index: 0,
                }))
            }
            ResponderState::PersistCommitment {
                channel,
                mut commitment,
            } => {
                let our_sig = expect_signature(last)?;
                let ours = derive_address(&self.params.responder_identifier, 0)?;
                commitment.add_signature(ours, our_sig)?;
                let identity_hash = channel.free_balance().identity_hash();
                self.state = ResponderState::PersistChannel { channel, our_sig };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::CreateSetState,
                    commitment: Commitment::SetState(commitment),
                    identity_hash,
                }))
            }
            ResponderState::PersistChannel { channel, our_sig } => {
                expect_done(last)?;
                self.state = ResponderState::Reply {
                    channel: channel.clone(),
                    our_sig,
                };
                Ok(FlowStep::Yield(Instruction::PersistStateChannel(vec![
                    channel,
                ])))
            }
            ResponderState::Reply { channel, our_sig } => {
                expect_done(last)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::Setup,
                    process_id: self.process_id,
                    seq: REPLY_SEQ_NO,
                    to: self.params.initiator_identifier,
                    params: None,
                    data: CustomData::Signature(our_sig),
                };
                self.state = ResponderState::Complete { channel };
                Ok(FlowStep::Yield(Instruction::Send(msg)))
            }
            ResponderState::Complete { channel } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel,
                    app: None,
                    proposal: None,
                }))
            }
            ResponderState::Finished => {
                Err(EngineError::Internal("setup responder already finished"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::types::Address;
    use crate::sig::Signer;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn fixtures() -> (Signer, Signer, SetupParams, NetworkContext, ProcessId) {
        let mut rng = StdRng::seed_from_u64(0x5e7);
        let initiator = Signer::new(&mut rng);
        let responder = Signer::new(&mut rng);
        let params = SetupParams {
            multisig_address: Address([0x07; 20]),
            initiator_identifier: initiator.identifier(),
            responder_identifier: responder.identifier(),
        };
        let process_id = rng.gen();
        (initiator, responder, params, NetworkContext::default(), process_id)
    }

    fn sign_for(signer: &Signer, instruction: &Instruction) -> Resolution {
        match instruction {
            Instruction::Sign { digest, key_index } => Resolution::Signature(
                signer.sign_derived(*digest, *key_index).unwrap(),
            ),
            other => panic!("expected a sign instruction, got {other:?}"),
        }
    }

    /// Drives both roles by hand, crossing their messages over.
    #[test]
    fn initiator_and_responder_agree_on_the_channel() {
        let (initiator, responder, params, network, process_id) = fixtures();
        let mut left = SetupInitiator::new(process_id, params.clone(), network);

        // Initiator: validate, sign, then suspend on the send.
        let step = left.next(None).unwrap();
        assert!(matches!(step, FlowStep::Yield(Instruction::Validate(ProtocolKind::Setup, _))));
        let step = left.next(Some(Resolution::Done)).unwrap();
        let our_sig = sign_for(&initiator, match &step {
            FlowStep::Yield(i) => i,
            _ => panic!("flow completed early"),
        });
        let step = left.next(Some(our_sig)).unwrap();
        let opening = match step {
            FlowStep::Yield(Instruction::SendAndWait(msg)) => msg,
            other => panic!("expected send-and-wait, got {other:?}"),
        };
        assert_eq!(opening.seq, 1);
        assert_eq!(opening.to, params.responder_identifier);

        // Responder consumes the opening message end to end.
        let initiator_sig = match opening.data {
            CustomData::Signature(sig) => sig,
            other => panic!("expected a signature, got {other:?}"),
        };
        let mut right = SetupResponder::new(process_id, params.clone(), network, initiator_sig);
        let step = right.next(None).unwrap();
        assert!(matches!(step, FlowStep::Yield(Instruction::Validate(_, _))));
        let step = right.next(Some(Resolution::Done)).unwrap();
        let their_sig = sign_for(&responder, match &step {
            FlowStep::Yield(i) => i,
            _ => panic!("flow completed early"),
        });
        let step = right.next(Some(their_sig)).unwrap();
        let commitment = match step {
            FlowStep::Yield(Instruction::PersistCommitment {
                kind: CommitmentPersistKind::CreateSetState,
                commitment: Commitment::SetState(c),
                ..
            }) => c,
            other => panic!("expected the commitment persist, got {other:?}"),
        };
        commitment.assert_signed().unwrap();
        let step = right.next(Some(Resolution::Done)).unwrap();
        let responder_channel = match step {
            FlowStep::Yield(Instruction::PersistStateChannel(channels)) => {
                channels.into_iter().next().unwrap()
            }
            other => panic!("expected the channel persist, got {other:?}"),
        };
        let step = right.next(Some(Resolution::Done)).unwrap();
        let reply = match step {
            FlowStep::Yield(Instruction::Send(msg)) => msg,
            other => panic!("expected the reply send, got {other:?}"),
        };
        assert_eq!(reply.seq, REPLY_SEQ_NO);
        assert_eq!(reply.to, params.initiator_identifier);
        let output = match right.next(Some(Resolution::Done)).unwrap() {
            FlowStep::Complete(out) => out,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(output.channel, responder_channel);

        // Initiator resumes on the reply and persists the same artifacts.
        let step = left.next(Some(Resolution::Reply(reply))).unwrap();
        let commitment = match step {
            FlowStep::Yield(Instruction::PersistCommitment {
                commitment: Commitment::SetState(c),
                ..
            }) => c,
            other => panic!("expected the commitment persist, got {other:?}"),
        };
        commitment.assert_signed().unwrap();
        let step = left.next(Some(Resolution::Done)).unwrap();
        assert!(matches!(step, FlowStep::Yield(Instruction::PersistStateChannel(_))));
        let output = match left.next(Some(Resolution::Done)).unwrap() {
            FlowStep::Complete(out) => out,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(output.channel, responder_channel);
        assert_eq!(output.channel.next_app_seq_no(), 1);
    }

    #[test]
    fn responder_rejects_a_bad_initiator_signature() {
        let (_, _, params, network, process_id) = fixtures();
        let mut rng = StdRng::seed_from_u64(99);
        let imposter = Signer::new(&mut rng);

        let (_, commitment) = build(&params, &network).unwrap();
        let forged = imposter
            .sign_derived(commitment.digest().unwrap(), 0)
            .unwrap();

        let mut right = SetupResponder::new(process_id, params, network, forged);
        right.next(None).unwrap();
        let result = right.next(Some(Resolution::Done));
        assert!(matches!(result, Err(EngineError::SignatureInvalid { .. })));
    }

    #[test]
    fn reply_with_wrong_payload_shape_is_a_protocol_violation() {
        let (initiator, _, params, network, process_id) = fixtures();
        let mut left = SetupInitiator::new(process_id, params.clone(), network);
        left.next(None).unwrap();
        let step = left.next(Some(Resolution::Done)).unwrap();
        let sig = sign_for(&initiator, match &step {
            FlowStep::Yield(i) => i,
            _ => panic!("flow completed early"),
        });
        left.next(Some(sig)).unwrap();

        let bad_reply = ProtocolMsg {
            protocol: ProtocolKind::Setup,
            process_id,
            seq: REPLY_SEQ_NO,
            to: params.initiator_identifier,
            params: None,
            data: CustomData::ProposalAck {
                identity_hash: crate::encode::types::Hash([0; 32]),
            },
        };
        assert!(matches!(
            left.next(Some(Resolution::Reply(bad_reply))),
            Err(EngineError::ProtocolViolation(_))
        ));
    }
}
