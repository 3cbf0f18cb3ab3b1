//! Take-action: both parties run the app's registered transition function
//! over the current state, then countersign a set-state commitment for the
//! successor. Each side computes from its own snapshot; if the snapshots
//! have drifted apart the digests differ and signature checks abort the
//! run before anything persists.

use super::{
    assert_valid_signature, expect_done, expect_reply, expect_signature, AppInstancePersistKind,
    CommitmentPersistKind, CustomData, FlowOutput, FlowStep, Instruction, ProcessId, ProtocolFlow,
    ProtocolKind, ProtocolMsg, ProtocolParam, ProtocolRole, Resolution, TakeActionParams,
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
    params: &TakeActionParams,
    channel: &StateChannel,
    network: &NetworkContext,
    apps: &AppRegistry,
) -> Result<(StateChannel, AppInstance, SetStateCommitment), EngineError> {
    let app = channel
        .app_instance(&params.app_identity_hash)
        .ok_or(EngineError::UnknownIdentityHash(params.app_identity_hash))?;
    let definition = app.identity().app_definition;
    let logic = apps
        .get(&definition)
        .ok_or(EngineError::MissingAppLogic(definition))?;
    let next_state = logic.apply_action(app.latest_state(), &params.action)?;
    let post = channel.set_app_state(
        &params.app_identity_hash,
        next_state,
        app.version_number() + 1,
    )?;
    let advanced = post
        .app_instance(&params.app_identity_hash)
        .ok_or(EngineError::Internal("advanced app missing after set_app_state"))?
        .clone();
    let commitment = SetStateCommitment::new(network.challenge_registry, &advanced);
    Ok((post, advanced, commitment))
}

pub struct TakeActionInitiator {
    process_id: ProcessId,
    params: TakeActionParams,
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
        advanced: AppInstance,
        commitment: SetStateCommitment,
    },
    VerifyReply {
        post: StateChannel,
        advanced: AppInstance,
        commitment: SetStateCommitment,
    },
    PersistApp {
        post: StateChannel,
        advanced: AppInstance,
    },
    Complete {
        post: StateChannel,
        advanced: AppInstance,
    },
    Finished,
}

impl TakeActionInitiator {
    pub fn new(
        process_id: ProcessId,
        params: TakeActionParams,
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

impl ProtocolFlow for TakeActionInitiator {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, InitiatorState::Finished) {
            InitiatorState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::TakeAction(self.params.clone()),
                    role: ProtocolRole::Initiator,
                    channel: Some(self.channel.clone()),
                    app: self.channel.app_instance(&self.params.app_identity_hash).cloned(),
                };
                self.state = InitiatorState::Sign;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::TakeAction,
                    context,
                )))
            }
            InitiatorState::Sign => {
                expect_done(last)?;
                let (post, advanced, commitment) =
                    compute(&self.params, &self.channel, &self.network, &self.apps)?;
                let digest = commitment.digest()?;
                let key_index = advanced.app_seq_no();
                self.state = InitiatorState::Exchange {
                    post,
                    advanced,
                    commitment,
                };
                Ok(FlowStep::Yield(Instruction::Sign { digest, key_index }))
            }
            InitiatorState::Exchange {
                post,
                advanced,
                mut commitment,
            } => {
                let sig = expect_signature(last)?;
                let ours = derive_address(&self.params.initiator_identifier, advanced.app_seq_no())?;
                commitment.add_signature(ours, sig)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::TakeAction,
                    process_id: self.process_id,
                    seq: 1,
                    to: self.params.responder_identifier,
                    params: Some(ProtocolParam::TakeAction(self.params.clone())),
                    data: CustomData::Signature(sig),
                };
                self.state = InitiatorState::VerifyReply {
                    post,
                    advanced,
                    commitment,
                };
                Ok(FlowStep::Yield(Instruction::SendAndWait(msg)))
            }
            InitiatorState::VerifyReply {
                post,
                advanced,
                mut commitment,
            } => {
                let reply = expect_reply(last)?;
                let sig = match reply.data {
                    CustomData::Signature(sig) => sig,
                    _ => {
                        return Err(EngineError::ProtocolViolation(
                            "take-action reply must carry a single signature",
                        ))
                    }
                };
                let theirs =
                    derive_address(&self.params.responder_identifier, advanced.app_seq_no())?;
                assert_valid_signature(theirs, commitment.digest()?, &sig)?;
                commitment.add_signature(theirs, sig)?;
                let identity_hash = advanced.identity_hash();
                self.state = InitiatorState::PersistApp { post, advanced };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::UpdateSetState,
                    commitment: Commitment::SetState(commitment),
                    identity_hash,
                }))
            }
            InitiatorState::PersistApp { post, advanced } => {
                expect_done(last)?;
                self.state = InitiatorState::Complete {
                    post: post.clone(),
                    advanced: advanced.clone(),
                };
                Ok(FlowStep::Yield(Instruction::PersistAppInstance {
                    kind: AppInstancePersistKind::Update,
                    channel: post,
                    app: advanced,
                }))
            }
            InitiatorState::Complete { post, advanced } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel: post,
                    app: Some(advanced),
                    proposal: None,
                }))
            }
            InitiatorState::Finished => {
                Err(EngineError::Internal("take-action initiator already finished"))
            }
        }
    }
}

pub struct TakeActionResponder {
    process_id: ProcessId,
    params: TakeActionParams,
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
        advanced: AppInstance,
        commitment: SetStateCommitment,
    },
    PersistApp {
        post: StateChannel,
        advanced: AppInstance,
        our_sig: Signature,
    },
    Reply {
        post: StateChannel,
        advanced: AppInstance,
        our_sig: Signature,
    },
    Complete {
        post: StateChannel,
        advanced: AppInstance,
    },
    Finished,
}

impl TakeActionResponder {
    pub fn new(
        process_id: ProcessId,
        params: TakeActionParams,
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

impl ProtocolFlow for TakeActionResponder {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError> {
        match std::mem::replace(&mut self.state, ResponderState::Finished) {
            ResponderState::Validate => {
                let context = MiddlewareContext {
                    params: ProtocolParam::TakeAction(self.params.clone()),
                    role: ProtocolRole::Responder,
                    channel: Some(self.channel.clone()),
                    app: self.channel.app_instance(&self.params.app_identity_hash).cloned(),
                };
                self.state = ResponderState::Sign;
                Ok(FlowStep::Yield(Instruction::Validate(
                    ProtocolKind::TakeAction,
                    context,
                )))
            }
            ResponderState::Sign => {
                expect_done(last)?;
                let (post, advanced, mut commitment) =
                    compute(&self.params, &self.channel, &self.network, &self.apps)?;
                let theirs =
                    derive_address(&self.params.initiator_identifier, advanced.app_seq_no())?;
                assert_valid_signature(theirs, commitment.digest()?, &self.initiator_sig)?;
                commitment.add_signature(theirs, self.initiator_sig)?;
                let digest = commitment.digest()?;
                let key_index = advanced.app_seq_no();
                self.state = ResponderState::PersistCommitment {
                    post,
                    advanced,
                    commitment,
                };
                Ok(FlowStep::Yield(Instruction::Sign { digest, key_index }))
            }
            ResponderState::PersistCommitment {
                post,
                advanced,
                mut commitment,
            } => {
                let our_sig = expect_signature(last)?;
                let ours =
                    derive_address(&self.params.responder_identifier, advanced.app_seq_no())?;
                commitment.add_signature(ours, our_sig)?;
                let identity_hash = advanced.identity_hash();
                self.state = ResponderState::PersistApp {
                    post,
                    advanced,
                    our_sig,
                };
                Ok(FlowStep::Yield(Instruction::PersistCommitment {
                    kind: CommitmentPersistKind::UpdateSetState,
                    commitment: Commitment::SetState(commitment),
                    identity_hash,
                }))
            }
            ResponderState::PersistApp {
                post,
                advanced,
                our_sig,
            } => {
                expect_done(last)?;
                self.state = ResponderState::Reply {
                    post: post.clone(),
                    advanced: advanced.clone(),
                    our_sig,
                };
                Ok(FlowStep::Yield(Instruction::PersistAppInstance {
                    kind: AppInstancePersistKind::Update,
                    channel: post,
                    app: advanced,
                }))
            }
            ResponderState::Reply {
                post,
                advanced,
                our_sig,
            } => {
                expect_done(last)?;
                let msg = ProtocolMsg {
                    protocol: ProtocolKind::TakeAction,
                    process_id: self.process_id,
                    seq: REPLY_SEQ_NO,
                    to: self.params.initiator_identifier,
                    params: None,
                    data: CustomData::Signature(our_sig),
                };
                self.state = ResponderState::Complete { post, advanced };
                Ok(FlowStep::Yield(Instruction::Send(msg)))
            }
            ResponderState::Complete { post, advanced } => {
                expect_done(last)?;
                Ok(FlowStep::Complete(FlowOutput {
                    channel: post,
                    app: Some(advanced),
                    proposal: None,
                }))
            }
            ResponderState::Finished => {
                Err(EngineError::Internal("take-action responder already finished"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{AppLogic, AppLogicError};
    use crate::channel::{AppInstanceProposal, OutcomeType, TokenIndexedIncrements};
    use crate::encode::types::{Address, U256, NATIVE_ASSET};
    use crate::sig::Signer;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use serde::{Deserialize, Serialize};

    const APP_DEFINITION: Address = Address([0x7a; 20]);

    #[derive(Serialize, Deserialize)]
    struct CounterState {
        n: u64,
    }

    #[derive(Serialize, Deserialize)]
    struct CounterAction {
        add: u64,
    }

    /// Adds `action.add` to the counter; rejects zero-step actions.
    struct Counter;

    impl AppLogic for Counter {
        fn apply_action(&self, state: &[u8], action: &[u8]) -> Result<Vec<u8>, AppLogicError> {
            let state: CounterState = serde_json::from_slice(state)
                .map_err(|e| AppLogicError::BadState(e.to_string()))?;
            let action: CounterAction = serde_json::from_slice(action)
                .map_err(|e| AppLogicError::ActionRejected(e.to_string()))?;
            if action.add == 0 {
                return Err(AppLogicError::ActionRejected("zero step".into()));
            }
            Ok(serde_json::to_vec(&CounterState {
                n: state.n + action.add,
            })
            .map_err(|e| AppLogicError::BadState(e.to_string()))?)
        }

        fn compute_outcome(&self, _state: &[u8]) -> Result<TokenIndexedIncrements, AppLogicError> {
            Ok(TokenIndexedIncrements::new())
        }
    }

    struct Fixture {
        initiator: Signer,
        responder: Signer,
        channel: StateChannel,
        app: AppInstance,
        apps: Arc<AppRegistry>,
        network: NetworkContext,
        process_id: ProcessId,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(0xac_10);
        let initiator = Signer::new(&mut rng);
        let responder = Signer::new(&mut rng);
        let network = NetworkContext::default();
        let channel = StateChannel::setup(
            Address([0x61; 20]),
            [initiator.identifier(), responder.identifier()],
            network.identity_app,
        )
        .unwrap();

        let mut proposal = AppInstanceProposal {
            identity_hash: Default::default(),
            multisig_address: channel.multisig_address(),
            app_definition: APP_DEFINITION,
            initial_state: serde_json::to_vec(&CounterState { n: 0 }).unwrap(),
            initiator_deposit: U256::zero(),
            initiator_deposit_token: NATIVE_ASSET,
            responder_deposit: U256::zero(),
            responder_deposit_token: NATIVE_ASSET,
            default_timeout: 600,
            outcome_type: OutcomeType::TwoPartyFixed,
            app_seq_no: channel.next_app_seq_no(),
            proposed_by: initiator.identifier(),
            proposed_to: responder.identifier(),
        };
        proposal.identity_hash = proposal.compute_identity_hash().unwrap();
        let app = AppInstance::new(
            proposal.app_identity().unwrap(),
            proposal.outcome_type,
            proposal.initial_state.clone(),
        )
        .unwrap();
        let channel = channel
            .add_proposal(proposal)
            .unwrap()
            .install_app(app.clone(), &[])
            .unwrap();

        let mut apps = AppRegistry::new();
        apps.register(APP_DEFINITION, Arc::new(Counter));
        Fixture {
            initiator,
            responder,
            channel,
            app,
            apps: Arc::new(apps),
            network,
            process_id: rng.gen(),
        }
    }

    fn params_for(fx: &Fixture, add: u64) -> TakeActionParams {
        TakeActionParams {
            multisig_address: fx.channel.multisig_address(),
            initiator_identifier: fx.initiator.identifier(),
            responder_identifier: fx.responder.identifier(),
            app_identity_hash: fx.app.identity_hash(),
            action: serde_json::to_vec(&CounterAction { add }).unwrap(),
        }
    }

    #[test]
    fn full_handshake_advances_the_state() {
        let fx = fixture();
        let params = params_for(&fx, 7);
        let seq = fx.app.app_seq_no();
        let mut left = TakeActionInitiator::new(
            fx.process_id,
            params.clone(),
            fx.channel.clone(),
            fx.network,
            fx.apps.clone(),
        );

        left.next(None).unwrap();
        let step = left.next(Some(Resolution::Done)).unwrap();
        let sig = match &step {
            FlowStep::Yield(Instruction::Sign { digest, key_index }) => {
                assert_eq!(*key_index, seq);
                Resolution::Signature(fx.initiator.sign_derived(*digest, seq).unwrap())
            }
            other => panic!("expected a sign at the app index, got {other:?}"),
        };
        let opening = match left.next(Some(sig)).unwrap() {
            FlowStep::Yield(Instruction::SendAndWait(msg)) => msg,
            other => panic!("expected send-and-wait, got {other:?}"),
        };
        let initiator_sig = match opening.data {
            CustomData::Signature(sig) => sig,
            other => panic!("expected a signature, got {other:?}"),
        };

        let mut right = TakeActionResponder::new(
            fx.process_id,
            params.clone(),
            fx.channel.clone(),
            fx.network,
            fx.apps.clone(),
            initiator_sig,
        );
        right.next(None).unwrap();
        let step = right.next(Some(Resolution::Done)).unwrap();
        let sig = match &step {
            FlowStep::Yield(Instruction::Sign { digest, key_index }) => {
                assert_eq!(*key_index, seq);
                Resolution::Signature(fx.responder.sign_derived(*digest, seq).unwrap())
            }
            other => panic!("expected a sign at the app index, got {other:?}"),
        };
        let step = right.next(Some(sig)).unwrap();
        let commitment = match step {
            FlowStep::Yield(Instruction::PersistCommitment {
                kind: CommitmentPersistKind::UpdateSetState,
                commitment: Commitment::SetState(c),
                identity_hash,
            }) => {
                assert_eq!(identity_hash, fx.app.identity_hash());
                c
            }
            other => panic!("expected the set-state persist, got {other:?}"),
        };
        commitment.assert_signed().unwrap();
        assert_eq!(commitment.version_number, 1);
        right.next(Some(Resolution::Done)).unwrap();
        let reply = match right.next(Some(Resolution::Done)).unwrap() {
            FlowStep::Yield(Instruction::Send(msg)) => msg,
            other => panic!("expected the reply send, got {other:?}"),
        };
        let right_output = match right.next(Some(Resolution::Done)).unwrap() {
            FlowStep::Complete(out) => out,
            other => panic!("expected completion, got {other:?}"),
        };

        left.next(Some(Resolution::Reply(reply))).unwrap();
        left.next(Some(Resolution::Done)).unwrap();
        let left_output = match left.next(Some(Resolution::Done)).unwrap() {
            FlowStep::Complete(out) => out,
            other => panic!("expected completion, got {other:?}"),
        };

        assert_eq!(left_output.channel, right_output.channel);
        let advanced = left_output.app.unwrap();
        assert_eq!(advanced.version_number(), 1);
        let state: CounterState = serde_json::from_slice(advanced.latest_state()).unwrap();
        assert_eq!(state.n, 7);
        // Free balance untouched by pure state transitions.
        assert_eq!(
            left_output.channel.free_balance().version_number(),
            fx.channel.free_balance().version_number()
        );
    }

    #[test]
    fn rejected_action_aborts_before_signing() {
        let fx = fixture();
        let mut flow = TakeActionInitiator::new(
            fx.process_id,
            params_for(&fx, 0),
            fx.channel.clone(),
            fx.network,
            fx.apps.clone(),
        );
        flow.next(None).unwrap();
        assert!(matches!(
            flow.next(Some(Resolution::Done)),
            Err(EngineError::AppLogic(AppLogicError::ActionRejected(_)))
        ));
    }

    #[test]
    fn drifted_snapshots_fail_the_signature_check() {
        let fx = fixture();
        let params = params_for(&fx, 3);
        let seq = fx.app.app_seq_no();
        let mut left = TakeActionInitiator::new(
            fx.process_id,
            params.clone(),
            fx.channel.clone(),
            fx.network,
            fx.apps.clone(),
        );
        left.next(None).unwrap();
        let step = left.next(Some(Resolution::Done)).unwrap();
        let sig = match &step {
            FlowStep::Yield(Instruction::Sign { digest, .. }) => {
                Resolution::Signature(fx.initiator.sign_derived(*digest, seq).unwrap())
            }
            other => panic!("expected a sign, got {other:?}"),
        };
        let opening = match left.next(Some(sig)).unwrap() {
            FlowStep::Yield(Instruction::SendAndWait(msg)) => msg,
            other => panic!("expected send-and-wait, got {other:?}"),
        };
        let initiator_sig = match opening.data {
            CustomData::Signature(sig) => sig,
            other => panic!("expected a signature, got {other:?}"),
        };

        // The responder's snapshot already advanced once, so its recomputed
        // digest is over version 2, not 1.
        let drifted = fx
            .channel
            .set_app_state(
                &fx.app.identity_hash(),
                serde_json::to_vec(&CounterState { n: 100 }).unwrap(),
                1,
            )
            .unwrap();
        let mut right = TakeActionResponder::new(
            fx.process_id,
            params,
            drifted,
            fx.network,
            fx.apps,
            initiator_sig,
        );
        right.next(None).unwrap();
        assert!(matches!(
            right.next(Some(Resolution::Done)),
            Err(EngineError::SignatureInvalid { .. })
        ));
    }
}
