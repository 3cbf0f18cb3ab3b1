//! The protocol backbone: message shapes, the instruction set flows yield,
//! and one explicit state machine per protocol and role.
//!
//! Flows never do IO. They hand the interpreter an [Instruction], suspend,
//! and get the result back through [Resolution] on the next call. Everything
//! observable about a run is the ordered instruction stream, which is what
//! the flow unit tests drive directly.

mod install;
mod propose;
mod setup;
mod take_action;
mod uninstall;

pub use install::{InstallInitiator, InstallResponder};
pub use propose::{ProposeInitiator, ProposeResponder};
pub use setup::{SetupInitiator, SetupResponder};
pub use take_action::{TakeActionInitiator, TakeActionResponder};
pub use uninstall::{UninstallInitiator, UninstallResponder};

use crate::channel::{AppInstance, AppInstanceProposal, OutcomeType, StateChannel};
use crate::commitment::Commitment;
use crate::encode::types::{Address, Hash, Signature, U256};
use crate::error::EngineError;
use crate::middleware::MiddlewareContext;
use crate::sig::{recover_signer, PublicIdentifier};

use core::fmt;
use rand::distributions::{Distribution, Standard};
use rand::Rng;

/// Sequence number of every reply message.
pub const REPLY_SEQ_NO: u32 = 0;

/// Correlates all messages of one protocol run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub [u8; 32]);

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Distribution<ProcessId> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ProcessId {
        ProcessId(rng.gen())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    Setup,
    Propose,
    Install,
    Uninstall,
    TakeAction,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Setup => "setup",
            ProtocolKind::Propose => "propose",
            ProtocolKind::Install => "install",
            ProtocolKind::Uninstall => "uninstall",
            ProtocolKind::TakeAction => "take-action",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    pub multisig_address: Address,
    pub initiator_identifier: PublicIdentifier,
    pub responder_identifier: PublicIdentifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposeParams {
    pub multisig_address: Address,
    pub initiator_identifier: PublicIdentifier,
    pub responder_identifier: PublicIdentifier,
    pub app_definition: Address,
    pub initial_state: Vec<u8>,
    pub initiator_deposit: U256,
    pub initiator_deposit_token: Address,
    pub responder_deposit: U256,
    pub responder_deposit_token: Address,
    pub default_timeout: u64,
    pub outcome_type: OutcomeType,
}

/// Everything the install run needs, resolved out of the stored proposal by
/// the method layer. The initiator here is whoever drives the install, not
/// necessarily whoever proposed; the deposit fields stay aligned with the
/// proposal roles (`initiator_deposit` is the proposer's stake).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallParams {
    pub multisig_address: Address,
    pub initiator_identifier: PublicIdentifier,
    pub responder_identifier: PublicIdentifier,
    pub app_identity_hash: Hash,
    pub app_definition: Address,
    pub initial_state: Vec<u8>,
    pub initiator_deposit: U256,
    pub initiator_deposit_token: Address,
    pub responder_deposit: U256,
    pub responder_deposit_token: Address,
    pub default_timeout: u64,
    pub outcome_type: OutcomeType,
    pub app_seq_no: u64,
}

impl InstallParams {
    /// Params for installing `proposal`, driven by `initiator_identifier`.
    pub fn from_proposal(
        proposal: &AppInstanceProposal,
        initiator_identifier: PublicIdentifier,
        responder_identifier: PublicIdentifier,
    ) -> Self {
        Self {
            multisig_address: proposal.multisig_address,
            initiator_identifier,
            responder_identifier,
            app_identity_hash: proposal.identity_hash,
            app_definition: proposal.app_definition,
            initial_state: proposal.initial_state.clone(),
            initiator_deposit: proposal.initiator_deposit,
            initiator_deposit_token: proposal.initiator_deposit_token,
            responder_deposit: proposal.responder_deposit,
            responder_deposit_token: proposal.responder_deposit_token,
            default_timeout: proposal.default_timeout,
            outcome_type: proposal.outcome_type,
            app_seq_no: proposal.app_seq_no,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallParams {
    pub multisig_address: Address,
    pub initiator_identifier: PublicIdentifier,
    pub responder_identifier: PublicIdentifier,
    pub app_identity_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeActionParams {
    pub multisig_address: Address,
    pub initiator_identifier: PublicIdentifier,
    pub responder_identifier: PublicIdentifier,
    pub app_identity_hash: Hash,
    pub action: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolParam {
    Setup(SetupParams),
    Propose(ProposeParams),
    Install(InstallParams),
    Uninstall(UninstallParams),
    TakeAction(TakeActionParams),
}

impl ProtocolParam {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolParam::Setup(_) => ProtocolKind::Setup,
            ProtocolParam::Propose(_) => ProtocolKind::Propose,
            ProtocolParam::Install(_) => ProtocolKind::Install,
            ProtocolParam::Uninstall(_) => ProtocolKind::Uninstall,
            ProtocolParam::TakeAction(_) => ProtocolKind::TakeAction,
        }
    }

    /// Identifier of the party a responder run answers to.
    pub fn initiator_identifier(&self) -> PublicIdentifier {
        match self {
            ProtocolParam::Setup(p) => p.initiator_identifier,
            ProtocolParam::Propose(p) => p.initiator_identifier,
            ProtocolParam::Install(p) => p.initiator_identifier,
            ProtocolParam::Uninstall(p) => p.initiator_identifier,
            ProtocolParam::TakeAction(p) => p.initiator_identifier,
        }
    }

    pub fn responder_identifier(&self) -> PublicIdentifier {
        match self {
            ProtocolParam::Setup(p) => p.responder_identifier,
            ProtocolParam::Propose(p) => p.responder_identifier,
            ProtocolParam::Install(p) => p.responder_identifier,
            ProtocolParam::Uninstall(p) => p.responder_identifier,
            ProtocolParam::TakeAction(p) => p.responder_identifier,
        }
    }

    /// Multisig the run concerns. Setup runs have no channel record yet but
    /// still name the address it will live at.
    pub fn multisig_address(&self) -> Address {
        match self {
            ProtocolParam::Setup(p) => p.multisig_address,
            ProtocolParam::Propose(p) => p.multisig_address,
            ProtocolParam::Install(p) => p.multisig_address,
            ProtocolParam::Uninstall(p) => p.multisig_address,
            ProtocolParam::TakeAction(p) => p.multisig_address,
        }
    }
}

/// Protocol-specific payload riding on a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomData {
    None,
    Signature(Signature),
    InstallSignatures {
        conditional: Signature,
        free_balance: Signature,
    },
    ProposalAck {
        identity_hash: Hash,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMsg {
    pub protocol: ProtocolKind,
    pub process_id: ProcessId,
    /// 1 for the message opening a run, [REPLY_SEQ_NO] for replies.
    pub seq: u32,
    pub to: PublicIdentifier,
    pub params: Option<ProtocolParam>,
    pub data: CustomData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppInstancePersistKind {
    Create,
    Update,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentPersistKind {
    CreateSetState,
    UpdateSetState,
    CreateConditional,
}

/// One opcode of the interpreter. Flows yield these in a fixed order; the
/// runner executes each and feeds the result back in.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Sign the eth-prefixed digest with the key derived at `key_index`.
    Sign { digest: Hash, key_index: u64 },
    Validate(ProtocolKind, MiddlewareContext),
    Send(ProtocolMsg),
    SendAndWait(ProtocolMsg),
    PersistAppProposal {
        channel: StateChannel,
        proposal: AppInstanceProposal,
    },
    PersistAppInstance {
        kind: AppInstancePersistKind,
        channel: StateChannel,
        app: AppInstance,
    },
    PersistCommitment {
        kind: CommitmentPersistKind,
        commitment: Commitment,
        identity_hash: Hash,
    },
    PersistStateChannel(Vec<StateChannel>),
}

/// Result of one executed instruction, fed into the next `next()` call.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Validate, Send and the persists resolve to this.
    Done,
    Signature(Signature),
    Reply(ProtocolMsg),
}

#[derive(Debug, Clone)]
pub struct FlowOutput {
    pub channel: StateChannel,
    pub app: Option<AppInstance>,
    pub proposal: Option<AppInstanceProposal>,
}

#[derive(Debug)]
pub enum FlowStep {
    Yield(Instruction),
    Complete(FlowOutput),
}

/// One protocol run for one role, advanced by the interpreter.
pub trait ProtocolFlow {
    fn next(&mut self, last: Option<Resolution>) -> Result<FlowStep, EngineError>;
}

pub(crate) fn expect_done(last: Option<Resolution>) -> Result<(), EngineError> {
    match last {
        Some(Resolution::Done) => Ok(()),
        _ => Err(EngineError::Internal("instruction should resolve to done")),
    }
}

pub(crate) fn expect_signature(last: Option<Resolution>) -> Result<Signature, EngineError> {
    match last {
        Some(Resolution::Signature(sig)) => Ok(sig),
        _ => Err(EngineError::Internal("instruction should resolve to a signature")),
    }
}

pub(crate) fn expect_reply(last: Option<Resolution>) -> Result<ProtocolMsg, EngineError> {
    match last {
        Some(Resolution::Reply(msg)) => Ok(msg),
        _ => Err(EngineError::Internal("instruction should resolve to a reply")),
    }
}

/// Recovers the signer of `sig` over `digest` and requires it to be
/// `expected`.
pub(crate) fn assert_valid_signature(
    expected: Address,
    digest: Hash,
    sig: &Signature,
) -> Result<(), EngineError> {
    let recovered = recover_signer(digest, sig)?;
    if recovered != expected {
        return Err(EngineError::SignatureInvalid {
            expected,
            recovered,
        });
    }
    Ok(())
}
