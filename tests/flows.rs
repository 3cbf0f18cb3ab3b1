//! End-to-end protocol runs over two engines wired through the in-process
//! network. Every scenario drives the initiator through the public engine
//! surface while the peer's spawned receive loop answers.

use chantry::apps::{AppLogic, AppLogicError};
use chantry::chain::{ChainError, ChainReader, FixedChainView};
use chantry::channel::{OutcomeType, TokenIndexedIncrements};
use chantry::config::EngineConfig;
use chantry::encode::types::NATIVE_ASSET;
use chantry::middleware::{MiddlewareContext, ProtocolValidator, ValidationError};
use chantry::protocol::{
    CustomData, ProcessId, ProposeParams, ProtocolKind, ProtocolMsg, ProtocolParam,
    UninstallParams,
};
use chantry::store::{ChannelStore, MemoryStore};
use chantry::wire::{MemoryEndpoint, MemoryNetwork, ProtocolTransport};
use chantry::{
    Address, EngineError, ProtocolEngine, PublicIdentifier, Signature, Signer, U256,
};

use async_trait::async_trait;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type Engine = ProtocolEngine<MemoryStore, MemoryEndpoint>;

const MULTISIG: Address = Address([0x3c; 20]);
const COUNTER_APP: Address = Address([0xc0; 20]);
const PAYOUT_APP: Address = Address([0x9a; 20]);

#[derive(Serialize, Deserialize)]
struct CounterState {
    n: u64,
}

#[derive(Serialize, Deserialize)]
struct CounterAction {
    add: u64,
}

/// Pure state machine, no funds at stake unless the proposal says so.
struct Counter;

impl AppLogic for Counter {
    fn apply_action(&self, state: &[u8], action: &[u8]) -> Result<Vec<u8>, AppLogicError> {
        let state: CounterState =
            serde_json::from_slice(state).map_err(|e| AppLogicError::BadState(e.to_string()))?;
        let action: CounterAction = serde_json::from_slice(action)
            .map_err(|e| AppLogicError::ActionRejected(e.to_string()))?;
        if action.add == 0 {
            return Err(AppLogicError::ActionRejected("zero step".into()));
        }
        serde_json::to_vec(&CounterState {
            n: state.n + action.add,
        })
        .map_err(|e| AppLogicError::BadState(e.to_string()))
    }

    fn compute_outcome(&self, _state: &[u8]) -> Result<TokenIndexedIncrements, AppLogicError> {
        Ok(TokenIndexedIncrements::new())
    }
}

/// Resolves to the native-asset credits spelled out in its state. Doubles
/// as the funding vehicle: installing it for free and uninstalling it
/// mirrors an on-chain deposit reconciliation.
#[derive(Serialize, Deserialize)]
struct PayoutState {
    credits: BTreeMap<String, u64>,
}

struct Payout;

impl AppLogic for Payout {
    fn apply_action(&self, _state: &[u8], _action: &[u8]) -> Result<Vec<u8>, AppLogicError> {
        Err(AppLogicError::ActionRejected("payouts have no actions".into()))
    }

    fn compute_outcome(&self, state: &[u8]) -> Result<TokenIndexedIncrements, AppLogicError> {
        let state: PayoutState =
            serde_json::from_slice(state).map_err(|e| AppLogicError::BadState(e.to_string()))?;
        let mut row = BTreeMap::new();
        for (owner, amount) in state.credits {
            let owner = Address::from_str(&owner)
                .map_err(|_| AppLogicError::BadState(format!("bad owner {owner}")))?;
            row.insert(owner, U256::from(amount));
        }
        let mut increments = TokenIndexedIncrements::new();
        increments.insert(NATIVE_ASSET, row);
        Ok(increments)
    }
}

struct Node {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    endpoint: Arc<MemoryEndpoint>,
    id: PublicIdentifier,
    _responder: JoinHandle<()>,
}

fn spawn_node(net: &MemoryNetwork, seed: u64, configure: impl FnOnce(&mut Engine)) -> Node {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let signer = Signer::new(&mut StdRng::seed_from_u64(seed));
    let id = signer.identifier();
    let store = Arc::new(MemoryStore::new());
    let endpoint = Arc::new(net.endpoint(id));
    let mut engine = ProtocolEngine::new(
        signer,
        store.clone(),
        endpoint.clone(),
        EngineConfig::default(),
    );
    engine.register_app(COUNTER_APP, Arc::new(Counter)).unwrap();
    engine.register_app(PAYOUT_APP, Arc::new(Payout)).unwrap();
    configure(&mut engine);
    let engine = Arc::new(engine);
    let responder = {
        let engine = engine.clone();
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            while let Some(msg) = endpoint.recv().await {
                if let Err(err) = engine.handle_message(msg).await {
                    tracing::warn!(%err, "responder run failed");
                }
            }
        })
    };
    Node {
        engine,
        store,
        endpoint,
        id,
        _responder: responder,
    }
}

fn pair() -> (MemoryNetwork, Node, Node) {
    let net = MemoryNetwork::new(Duration::from_millis(200));
    let alice = spawn_node(&net, 1, |_| {});
    let bob = spawn_node(&net, 2, |_| {});
    (net, alice, bob)
}

fn proposal_params(
    from: &Node,
    to: &Node,
    app_definition: Address,
    initial_state: Vec<u8>,
    initiator_stake: u64,
    responder_stake: u64,
) -> ProposeParams {
    ProposeParams {
        multisig_address: MULTISIG,
        initiator_identifier: from.id,
        responder_identifier: to.id,
        app_definition,
        initial_state,
        initiator_deposit: U256::from(initiator_stake),
        initiator_deposit_token: NATIVE_ASSET,
        responder_deposit: U256::from(responder_stake),
        responder_deposit_token: NATIVE_ASSET,
        default_timeout: 600,
        outcome_type: OutcomeType::SingleAssetTwoPartyCoinTransfer,
    }
}

async fn native_balances(node: &Node) -> BTreeMap<Address, U256> {
    node.engine.free_balance(&MULTISIG, None).await.unwrap()
}

/// Seeds `amount_each` of free balance per owner through a zero-stake
/// payout app.
async fn fund_channel(alice: &Node, bob: &Node, amount_each: u64) {
    let channel = alice.engine.state_channel(&MULTISIG).await.unwrap();
    let owners = channel.free_balance().participants();
    let credits = owners
        .iter()
        .map(|owner| (owner.to_string(), amount_each))
        .collect();
    let state = serde_json::to_vec(&PayoutState { credits }).unwrap();
    let proposal = alice
        .engine
        .propose_app(proposal_params(alice, bob, PAYOUT_APP, state, 0, 0))
        .await
        .unwrap();
    alice.engine.install_app(proposal.identity_hash).await.unwrap();
    alice.engine.uninstall_app(proposal.identity_hash).await.unwrap();
}

#[tokio::test]
async fn setup_creates_identical_channels_on_both_nodes() {
    let (_net, alice, bob) = pair();
    let channel = alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();
    assert_eq!(channel.multisig_address(), MULTISIG);

    let on_alice = alice.engine.state_channel(&MULTISIG).await.unwrap();
    let on_bob = bob.engine.state_channel(&MULTISIG).await.unwrap();
    assert_eq!(on_alice, on_bob);

    // Both sides hold the countersigned free-balance commitment.
    let fb_hash = on_alice.free_balance().identity_hash();
    for node in [&alice, &bob] {
        let commitment = node
            .store
            .get_set_state_commitment(&fb_hash)
            .await
            .unwrap()
            .unwrap();
        commitment.assert_signed().unwrap();
    }

    // A fresh channel holds nothing.
    for (_, amount) in native_balances(&alice).await {
        assert_eq!(amount, U256::zero());
    }
}

#[tokio::test]
async fn setting_up_the_same_channel_twice_is_rejected() {
    let (_net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();
    assert!(matches!(
        alice.engine.setup_channel(MULTISIG, bob.id).await,
        Err(EngineError::ChannelExists(_))
    ));
}

#[tokio::test]
async fn funding_flows_through_install_and_uninstall() {
    let (_net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();
    fund_channel(&alice, &bob, 100).await;

    let balances = native_balances(&alice).await;
    assert_eq!(balances.len(), 2);
    for (_, amount) in balances {
        assert_eq!(amount, U256::from(100));
    }
    assert_eq!(
        alice.engine.state_channel(&MULTISIG).await.unwrap(),
        bob.engine.state_channel(&MULTISIG).await.unwrap()
    );
}

#[tokio::test]
async fn install_stakes_funds_and_uninstall_redistributes_them() {
    let (_net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();
    fund_channel(&alice, &bob, 100).await;

    let channel = alice.engine.state_channel(&MULTISIG).await.unwrap();
    let owners = channel.free_balance().participants();
    let alice_owner = chantry::sig::derive_address(&alice.id, 0).unwrap();
    let bob_owner = chantry::sig::derive_address(&bob.id, 0).unwrap();
    assert!(owners.contains(&alice_owner) && owners.contains(&bob_owner));

    // Stakes 40 + 10, resolved 15 to the proposer and 35 to the peer.
    let credits = BTreeMap::from([
        (alice_owner.to_string(), 15),
        (bob_owner.to_string(), 35),
    ]);
    let state = serde_json::to_vec(&PayoutState { credits }).unwrap();
    let proposal = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, PAYOUT_APP, state, 40, 10))
        .await
        .unwrap();

    // The proposee drives the install.
    let app = bob.engine.install_app(proposal.identity_hash).await.unwrap();
    assert_eq!(app.identity_hash(), proposal.identity_hash);

    let staked = native_balances(&alice).await;
    assert_eq!(staked[&alice_owner], U256::from(60));
    assert_eq!(staked[&bob_owner], U256::from(90));

    // Both stores carry the conditional commitment for the app.
    for node in [&alice, &bob] {
        let commitment = node
            .store
            .get_conditional_commitment(&proposal.identity_hash)
            .await
            .unwrap()
            .unwrap();
        commitment.assert_signed().unwrap();
    }

    bob.engine.uninstall_app(proposal.identity_hash).await.unwrap();
    let settled = native_balances(&bob).await;
    assert_eq!(settled[&alice_owner], U256::from(75));
    assert_eq!(settled[&bob_owner], U256::from(125));
    // Total funds conserved across the app's life.
    assert_eq!(
        settled.values().fold(U256::zero(), |acc, v| acc + *v),
        U256::from(200)
    );
    assert!(alice
        .engine
        .app_instance(&proposal.identity_hash)
        .await
        .is_err());
}

#[tokio::test]
async fn take_action_advances_both_replicas() {
    let (_net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();

    let state = serde_json::to_vec(&CounterState { n: 0 }).unwrap();
    let proposal = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 0, 0))
        .await
        .unwrap();
    alice.engine.install_app(proposal.identity_hash).await.unwrap();

    let action = serde_json::to_vec(&CounterAction { add: 7 }).unwrap();
    let advanced = alice
        .engine
        .take_action(proposal.identity_hash, action)
        .await
        .unwrap();
    assert_eq!(advanced.version_number(), 1);

    // Either party may act; roles swap per run.
    let action = serde_json::to_vec(&CounterAction { add: 5 }).unwrap();
    bob.engine
        .take_action(proposal.identity_hash, action)
        .await
        .unwrap();

    for node in [&alice, &bob] {
        let app = node
            .engine
            .app_instance(&proposal.identity_hash)
            .await
            .unwrap();
        assert_eq!(app.version_number(), 2);
        let state: CounterState = serde_json::from_slice(app.latest_state()).unwrap();
        assert_eq!(state.n, 12);
    }
}

#[tokio::test]
async fn forged_openings_leave_the_peer_untouched() {
    let (_net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();
    fund_channel(&alice, &bob, 100).await;

    let state = serde_json::to_vec(&CounterState { n: 0 }).unwrap();
    let proposal = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 5, 5))
        .await
        .unwrap();
    alice.engine.install_app(proposal.identity_hash).await.unwrap();
    let before = bob.engine.state_channel(&MULTISIG).await.unwrap();

    // A forged uninstall with a signature by nobody in particular.
    let forged = ProtocolMsg {
        protocol: ProtocolKind::Uninstall,
        process_id: ProcessId([0x66; 32]),
        seq: 1,
        to: bob.id,
        params: Some(ProtocolParam::Uninstall(UninstallParams {
            multisig_address: MULTISIG,
            initiator_identifier: alice.id,
            responder_identifier: bob.id,
            app_identity_hash: proposal.identity_hash,
        })),
        data: CustomData::Signature(Signature::new(&[0x99; 64], 28)),
    };
    alice.endpoint.send(forged).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Nothing persisted: the app is still installed, the channel unchanged.
    assert_eq!(bob.engine.state_channel(&MULTISIG).await.unwrap(), before);
    bob.engine
        .app_instance(&proposal.identity_hash)
        .await
        .unwrap();
}

#[tokio::test]
async fn offline_peers_surface_as_timeouts_and_retries_recover() {
    let (net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();
    let state = serde_json::to_vec(&CounterState { n: 0 }).unwrap();
    let proposal = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 0, 0))
        .await
        .unwrap();
    alice.engine.install_app(proposal.identity_hash).await.unwrap();

    net.set_online(&bob.id, false);
    let action = serde_json::to_vec(&CounterAction { add: 3 }).unwrap();
    let err = alice
        .engine
        .take_action(proposal.identity_hash, action.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { .. }));

    // The failed run persisted nothing, so a fresh run converges cleanly.
    net.set_online(&bob.id, true);
    let advanced = alice
        .engine
        .take_action(proposal.identity_hash, action)
        .await
        .unwrap();
    assert_eq!(advanced.version_number(), 1);
    assert_eq!(
        alice.engine.state_channel(&MULTISIG).await.unwrap(),
        bob.engine.state_channel(&MULTISIG).await.unwrap()
    );
}

struct RejectEverything(&'static str);

#[async_trait]
impl ProtocolValidator for RejectEverything {
    async fn validate(&self, _context: &MiddlewareContext) -> Result<(), ValidationError> {
        Err(ValidationError::new(self.0))
    }
}

#[tokio::test]
async fn validation_hooks_veto_runs_before_anything_happens() {
    let net = MemoryNetwork::new(Duration::from_millis(200));
    let alice = spawn_node(&net, 1, |engine| {
        engine.register_validator(
            ProtocolKind::Propose,
            Arc::new(RejectEverything("proposals disabled")),
        );
    });
    let bob = spawn_node(&net, 2, |_| {});
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();

    let state = serde_json::to_vec(&CounterState { n: 0 }).unwrap();
    let err = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 0, 0))
        .await
        .unwrap_err();
    match err {
        EngineError::ValidationRejected { reason } => assert_eq!(reason, "proposals disabled"),
        other => panic!("expected a validation rejection, got {other}"),
    }

    // Vetoed before any exchange: neither side holds a proposal.
    for node in [&alice, &bob] {
        let channel = node.engine.state_channel(&MULTISIG).await.unwrap();
        assert!(channel.proposed_apps().is_empty());
        assert_eq!(channel.next_app_seq_no(), 1);
    }
}

/// Refuses runs against a multisig the chain has never seen.
struct MultisigDeployed {
    chain: FixedChainView,
}

#[async_trait]
impl ProtocolValidator for MultisigDeployed {
    async fn validate(&self, context: &MiddlewareContext) -> Result<(), ValidationError> {
        let multisig = context.params.multisig_address();
        self.chain
            .total_withdrawn(multisig, NATIVE_ASSET)
            .await
            .map(|_| ())
            .map_err(|err| ValidationError::new(err.to_string()))
    }
}

#[tokio::test]
async fn chain_checks_gate_setup_through_hooks() {
    let net = MemoryNetwork::new(Duration::from_millis(200));
    let mut chain = FixedChainView::new();
    chain.mark_deployed(Address([0xdd; 20]));
    let alice = spawn_node(&net, 1, move |engine| {
        engine.register_validator(ProtocolKind::Setup, Arc::new(MultisigDeployed { chain }));
    });
    let bob = spawn_node(&net, 2, |_| {});

    // MULTISIG is not deployed in this chain view.
    let err = alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap_err();
    match err {
        EngineError::ValidationRejected { reason } => {
            assert!(reason.contains("no contract deployed"), "reason: {reason}");
        }
        other => panic!("expected a validation rejection, got {other}"),
    }

    // The deployed one goes through.
    alice
        .engine
        .setup_channel(Address([0xdd; 20]), bob.id)
        .await
        .unwrap();
}

/// Requires the multisig to hold collateral covering both proposed stakes.
/// An undeployed multisig has withdrawn nothing, so that read maps to zero
/// instead of failing the run.
struct CollateralCheck {
    chain: Arc<FixedChainView>,
}

#[async_trait]
impl ProtocolValidator for CollateralCheck {
    async fn validate(&self, context: &MiddlewareContext) -> Result<(), ValidationError> {
        let (multisig, required) = match &context.params {
            ProtocolParam::Propose(p) => (
                p.multisig_address,
                p.initiator_deposit + p.responder_deposit,
            ),
            _ => return Ok(()),
        };
        let held = self
            .chain
            .balance_of(multisig, NATIVE_ASSET)
            .await
            .map_err(|err| ValidationError::new(err.to_string()))?;
        let withdrawn = match self.chain.total_withdrawn(multisig, NATIVE_ASSET).await {
            Ok(amount) => amount,
            Err(ChainError::NotDeployed { .. }) => U256::zero(),
            Err(err) => return Err(ValidationError::new(err.to_string())),
        };
        if held - withdrawn < required {
            return Err(ValidationError::new(format!(
                "multisig holds {} after withdrawals, needs {required}",
                held - withdrawn
            )));
        }
        Ok(())
    }
}

#[tokio::test]
async fn deposit_hooks_treat_undeployed_multisigs_as_zero_withdrawn() {
    let net = MemoryNetwork::new(Duration::from_millis(200));
    let mut chain = FixedChainView::new();
    // Funds parked at the multisig address before its contract exists.
    chain.set_balance(MULTISIG, NATIVE_ASSET, U256::from(100));
    let chain = Arc::new(chain);
    let alice = spawn_node(&net, 1, |engine| {
        engine.register_validator(
            ProtocolKind::Propose,
            Arc::new(CollateralCheck { chain: chain.clone() }),
        );
    });
    let bob = spawn_node(&net, 2, |_| {});
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();

    // Covered stakes pass even though total_withdrawn is NotDeployed.
    let state = serde_json::to_vec(&CounterState { n: 0 }).unwrap();
    alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 60, 40))
        .await
        .unwrap();

    // Stakes beyond the parked funds are refused.
    let state = serde_json::to_vec(&CounterState { n: 1 }).unwrap();
    let err = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 90, 40))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationRejected { .. }));
}

#[tokio::test]
async fn rejecting_a_proposal_burns_its_sequence_number() {
    let (_net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();

    let state = serde_json::to_vec(&CounterState { n: 0 }).unwrap();
    let proposal = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 0, 0))
        .await
        .unwrap();
    bob.engine.reject_proposal(proposal.identity_hash).await.unwrap();

    let channel = bob.engine.state_channel(&MULTISIG).await.unwrap();
    assert!(channel.proposed_apps().is_empty());
    assert_eq!(channel.next_app_seq_no(), 2);
    assert!(bob
        .store
        .get_app_proposal(&proposal.identity_hash)
        .await
        .unwrap()
        .is_none());

    // The next proposal consumes the next number on both sides.
    let state = serde_json::to_vec(&CounterState { n: 1 }).unwrap();
    let second = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 0, 0))
        .await
        .unwrap();
    assert_eq!(second.app_seq_no, 2);
    assert_ne!(second.identity_hash, proposal.identity_hash);
}

#[tokio::test]
async fn concurrent_runs_serialize_on_the_channel_lock() {
    let (_net, alice, bob) = pair();
    alice.engine.setup_channel(MULTISIG, bob.id).await.unwrap();
    let state = serde_json::to_vec(&CounterState { n: 0 }).unwrap();
    let proposal = alice
        .engine
        .propose_app(proposal_params(&alice, &bob, COUNTER_APP, state, 0, 0))
        .await
        .unwrap();
    alice.engine.install_app(proposal.identity_hash).await.unwrap();

    let first = serde_json::to_vec(&CounterAction { add: 3 }).unwrap();
    let second = serde_json::to_vec(&CounterAction { add: 9 }).unwrap();
    let (a, b) = tokio::join!(
        alice.engine.take_action(proposal.identity_hash, first),
        alice.engine.take_action(proposal.identity_hash, second),
    );
    a.unwrap();
    b.unwrap();

    for node in [&alice, &bob] {
        let app = node
            .engine
            .app_instance(&proposal.identity_hash)
            .await
            .unwrap();
        assert_eq!(app.version_number(), 2);
        let state: CounterState = serde_json::from_slice(app.latest_state()).unwrap();
        assert_eq!(state.n, 12);
    }
}
