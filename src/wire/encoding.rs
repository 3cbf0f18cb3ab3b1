//! Framing and the mapping between domain messages and the wire schema.
//!
//! Frames are `u16` big-endian length followed by the protobuf-encoded
//! [proto::Envelope]. The length is of the body only.

use super::proto;
use super::TransportError;
use crate::channel::OutcomeType;
use crate::encode::types::{Address, Hash, Signature, U256};
use crate::protocol::{
    CustomData, InstallParams, ProcessId, ProposeParams, ProtocolKind, ProtocolMsg, ProtocolParam,
    SetupParams, TakeActionParams, UninstallParams,
};
use crate::sig::PublicIdentifier;

use prost::Message;

/// Largest body a frame can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("required field {0} is missing")]
    MissingField(&'static str),

    #[error("field {0} has the wrong byte length")]
    ByteLength(&'static str),

    #[error("unknown discriminant {value} for {field}")]
    UnknownDiscriminant { field: &'static str, value: i32 },

    #[error("frame is shorter than its length prefix")]
    Truncated,

    #[error("length prefix declares {declared} bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Frames `msg` for the wire.
pub fn encode_frame(msg: &ProtocolMsg) -> Result<Vec<u8>, TransportError> {
    let envelope = proto::Envelope::from(msg.clone());
    let body = envelope.encode_to_vec();
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(2 + body.len());
    frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parses one whole frame produced by [encode_frame].
pub fn decode_frame(frame: &[u8]) -> Result<ProtocolMsg, TransportError> {
    if frame.len() < 2 {
        return Err(ConversionError::Truncated.into());
    }
    let declared = u16::from_be_bytes([frame[0], frame[1]]) as usize;
    let body = &frame[2..];
    if body.len() != declared {
        return Err(ConversionError::LengthMismatch {
            declared,
            actual: body.len(),
        }
        .into());
    }
    let envelope = proto::Envelope::decode(body).map_err(ConversionError::from)?;
    Ok(ProtocolMsg::try_from(envelope)?)
}

fn fixed<const N: usize>(bytes: Vec<u8>, field: &'static str) -> Result<[u8; N], ConversionError> {
    bytes
        .try_into()
        .map_err(|_| ConversionError::ByteLength(field))
}

fn u256_bytes(v: &U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    v.to_big_endian(&mut buf);
    buf.to_vec()
}

fn u256_from(bytes: Vec<u8>, field: &'static str) -> Result<U256, ConversionError> {
    let raw: [u8; 32] = fixed(bytes, field)?;
    Ok(U256::from_big_endian(&raw))
}

impl From<ProtocolKind> for proto::Protocol {
    fn from(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Setup => proto::Protocol::Setup,
            ProtocolKind::Propose => proto::Protocol::Propose,
            ProtocolKind::Install => proto::Protocol::Install,
            ProtocolKind::Uninstall => proto::Protocol::Uninstall,
            ProtocolKind::TakeAction => proto::Protocol::TakeAction,
        }
    }
}

fn protocol_kind(value: i32) -> Result<ProtocolKind, ConversionError> {
    match proto::Protocol::from_i32(value) {
        Some(proto::Protocol::Setup) => Ok(ProtocolKind::Setup),
        Some(proto::Protocol::Propose) => Ok(ProtocolKind::Propose),
        Some(proto::Protocol::Install) => Ok(ProtocolKind::Install),
        Some(proto::Protocol::Uninstall) => Ok(ProtocolKind::Uninstall),
        Some(proto::Protocol::TakeAction) => Ok(ProtocolKind::TakeAction),
        Some(proto::Protocol::Unspecified) | None => Err(ConversionError::UnknownDiscriminant {
            field: "protocol",
            value,
        }),
    }
}

impl From<OutcomeType> for proto::Outcome {
    fn from(outcome: OutcomeType) -> Self {
        match outcome {
            OutcomeType::TwoPartyFixed => proto::Outcome::TwoPartyFixed,
            OutcomeType::SingleAssetTwoPartyCoinTransfer => {
                proto::Outcome::SingleAssetTwoPartyCoinTransfer
            }
            OutcomeType::MultiAssetMultiPartyCoinTransfer => {
                proto::Outcome::MultiAssetMultiPartyCoinTransfer
            }
        }
    }
}

fn outcome_type(value: i32) -> Result<OutcomeType, ConversionError> {
    match proto::Outcome::from_i32(value) {
        Some(proto::Outcome::TwoPartyFixed) => Ok(OutcomeType::TwoPartyFixed),
        Some(proto::Outcome::SingleAssetTwoPartyCoinTransfer) => {
            Ok(OutcomeType::SingleAssetTwoPartyCoinTransfer)
        }
        Some(proto::Outcome::MultiAssetMultiPartyCoinTransfer) => {
            Ok(OutcomeType::MultiAssetMultiPartyCoinTransfer)
        }
        Some(proto::Outcome::Unspecified) | None => Err(ConversionError::UnknownDiscriminant {
            field: "outcome_type",
            value,
        }),
    }
}

impl From<SetupParams> for proto::SetupMsg {
    fn from(p: SetupParams) -> Self {
        Self {
            multisig_address: p.multisig_address.0.to_vec(),
            initiator_identifier: p.initiator_identifier.0.to_vec(),
            responder_identifier: p.responder_identifier.0.to_vec(),
        }
    }
}

impl TryFrom<proto::SetupMsg> for SetupParams {
    type Error = ConversionError;

    fn try_from(m: proto::SetupMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            multisig_address: Address(fixed(m.multisig_address, "multisig_address")?),
            initiator_identifier: PublicIdentifier(fixed(
                m.initiator_identifier,
                "initiator_identifier",
            )?),
            responder_identifier: PublicIdentifier(fixed(
                m.responder_identifier,
                "responder_identifier",
            )?),
        })
    }
}

impl From<ProposeParams> for proto::ProposeMsg {
    fn from(p: ProposeParams) -> Self {
        Self {
            multisig_address: p.multisig_address.0.to_vec(),
            initiator_identifier: p.initiator_identifier.0.to_vec(),
            responder_identifier: p.responder_identifier.0.to_vec(),
            app_definition: p.app_definition.0.to_vec(),
            initial_state: p.initial_state,
            initiator_deposit: u256_bytes(&p.initiator_deposit),
            initiator_deposit_token: p.initiator_deposit_token.0.to_vec(),
            responder_deposit: u256_bytes(&p.responder_deposit),
            responder_deposit_token: p.responder_deposit_token.0.to_vec(),
            default_timeout: p.default_timeout,
            outcome_type: proto::Outcome::from(p.outcome_type) as i32,
        }
    }
}

impl TryFrom<proto::ProposeMsg> for ProposeParams {
    type Error = ConversionError;

    fn try_from(m: proto::ProposeMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            multisig_address: Address(fixed(m.multisig_address, "multisig_address")?),
            initiator_identifier: PublicIdentifier(fixed(
                m.initiator_identifier,
                "initiator_identifier",
            )?),
            responder_identifier: PublicIdentifier(fixed(
                m.responder_identifier,
                "responder_identifier",
            )?),
            app_definition: Address(fixed(m.app_definition, "app_definition")?),
            initial_state: m.initial_state,
            initiator_deposit: u256_from(m.initiator_deposit, "initiator_deposit")?,
            initiator_deposit_token: Address(fixed(
                m.initiator_deposit_token,
                "initiator_deposit_token",
            )?),
            responder_deposit: u256_from(m.responder_deposit, "responder_deposit")?,
            responder_deposit_token: Address(fixed(
                m.responder_deposit_token,
                "responder_deposit_token",
            )?),
            default_timeout: m.default_timeout,
            outcome_type: outcome_type(m.outcome_type)?,
        })
    }
}

impl From<InstallParams> for proto::InstallMsg {
    fn from(p: InstallParams) -> Self {
        Self {
            multisig_address: p.multisig_address.0.to_vec(),
            initiator_identifier: p.initiator_identifier.0.to_vec(),
            responder_identifier: p.responder_identifier.0.to_vec(),
            app_identity_hash: p.app_identity_hash.0.to_vec(),
            app_definition: p.app_definition.0.to_vec(),
            initial_state: p.initial_state,
            initiator_deposit: u256_bytes(&p.initiator_deposit),
            initiator_deposit_token: p.initiator_deposit_token.0.to_vec(),
            responder_deposit: u256_bytes(&p.responder_deposit),
            responder_deposit_token: p.responder_deposit_token.0.to_vec(),
            default_timeout: p.default_timeout,
            outcome_type: proto::Outcome::from(p.outcome_type) as i32,
            app_seq_no: p.app_seq_no,
        }
    }
}

impl TryFrom<proto::InstallMsg> for InstallParams {
    type Error = ConversionError;

    fn try_from(m: proto::InstallMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            multisig_address: Address(fixed(m.multisig_address, "multisig_address")?),
            initiator_identifier: PublicIdentifier(fixed(
                m.initiator_identifier,
                "initiator_identifier",
            )?),
            responder_identifier: PublicIdentifier(fixed(
                m.responder_identifier,
                "responder_identifier",
            )?),
            app_identity_hash: Hash(fixed(m.app_identity_hash, "app_identity_hash")?),
            app_definition: Address(fixed(m.app_definition, "app_definition")?),
            initial_state: m.initial_state,
            initiator_deposit: u256_from(m.initiator_deposit, "initiator_deposit")?,
            initiator_deposit_token: Address(fixed(
                m.initiator_deposit_token,
                "initiator_deposit_token",
            )?),
            responder_deposit: u256_from(m.responder_deposit, "responder_deposit")?,
            responder_deposit_token: Address(fixed(
                m.responder_deposit_token,
                "responder_deposit_token",
            )?),
            default_timeout: m.default_timeout,
            outcome_type: outcome_type(m.outcome_type)?,
            app_seq_no: m.app_seq_no,
        })
    }
}

impl From<UninstallParams> for proto::UninstallMsg {
    fn from(p: UninstallParams) -> Self {
        Self {
            multisig_address: p.multisig_address.0.to_vec(),
            initiator_identifier: p.initiator_identifier.0.to_vec(),
            responder_identifier: p.responder_identifier.0.to_vec(),
            app_identity_hash: p.app_identity_hash.0.to_vec(),
        }
    }
}

impl TryFrom<proto::UninstallMsg> for UninstallParams {
    type Error = ConversionError;

    fn try_from(m: proto::UninstallMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            multisig_address: Address(fixed(m.multisig_address, "multisig_address")?),
            initiator_identifier: PublicIdentifier(fixed(
                m.initiator_identifier,
                "initiator_identifier",
            )?),
            responder_identifier: PublicIdentifier(fixed(
                m.responder_identifier,
                "responder_identifier",
            )?),
            app_identity_hash: Hash(fixed(m.app_identity_hash, "app_identity_hash")?),
        })
    }
}

impl From<TakeActionParams> for proto::TakeActionMsg {
    fn from(p: TakeActionParams) -> Self {
        Self {
            multisig_address: p.multisig_address.0.to_vec(),
            initiator_identifier: p.initiator_identifier.0.to_vec(),
            responder_identifier: p.responder_identifier.0.to_vec(),
            app_identity_hash: p.app_identity_hash.0.to_vec(),
            action: p.action,
        }
    }
}

impl TryFrom<proto::TakeActionMsg> for TakeActionParams {
    type Error = ConversionError;

    fn try_from(m: proto::TakeActionMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            multisig_address: Address(fixed(m.multisig_address, "multisig_address")?),
            initiator_identifier: PublicIdentifier(fixed(
                m.initiator_identifier,
                "initiator_identifier",
            )?),
            responder_identifier: PublicIdentifier(fixed(
                m.responder_identifier,
                "responder_identifier",
            )?),
            app_identity_hash: Hash(fixed(m.app_identity_hash, "app_identity_hash")?),
            action: m.action,
        })
    }
}

impl From<ProtocolParam> for proto::envelope::Params {
    fn from(params: ProtocolParam) -> Self {
        match params {
            ProtocolParam::Setup(p) => proto::envelope::Params::Setup(p.into()),
            ProtocolParam::Propose(p) => proto::envelope::Params::Propose(p.into()),
            ProtocolParam::Install(p) => proto::envelope::Params::Install(p.into()),
            ProtocolParam::Uninstall(p) => proto::envelope::Params::Uninstall(p.into()),
            ProtocolParam::TakeAction(p) => proto::envelope::Params::TakeAction(p.into()),
        }
    }
}

impl TryFrom<proto::envelope::Params> for ProtocolParam {
    type Error = ConversionError;

    fn try_from(params: proto::envelope::Params) -> Result<Self, Self::Error> {
        Ok(match params {
            proto::envelope::Params::Setup(m) => ProtocolParam::Setup(m.try_into()?),
            proto::envelope::Params::Propose(m) => ProtocolParam::Propose(m.try_into()?),
            proto::envelope::Params::Install(m) => ProtocolParam::Install(m.try_into()?),
            proto::envelope::Params::Uninstall(m) => ProtocolParam::Uninstall(m.try_into()?),
            proto::envelope::Params::TakeAction(m) => ProtocolParam::TakeAction(m.try_into()?),
        })
    }
}

fn data_to_wire(data: CustomData) -> Option<proto::envelope::Data> {
    match data {
        CustomData::None => None,
        CustomData::Signature(sig) => Some(proto::envelope::Data::Signature(sig.0.to_vec())),
        CustomData::InstallSignatures {
            conditional,
            free_balance,
        } => Some(proto::envelope::Data::InstallSignatures(
            proto::InstallSignaturesMsg {
                conditional: conditional.0.to_vec(),
                free_balance: free_balance.0.to_vec(),
            },
        )),
        CustomData::ProposalAck { identity_hash } => {
            Some(proto::envelope::Data::ProposalAck(identity_hash.0.to_vec()))
        }
    }
}

fn custom_data(data: Option<proto::envelope::Data>) -> Result<CustomData, ConversionError> {
    Ok(match data {
        None => CustomData::None,
        Some(proto::envelope::Data::Signature(sig)) => {
            CustomData::Signature(Signature(fixed(sig, "signature")?))
        }
        Some(proto::envelope::Data::InstallSignatures(m)) => CustomData::InstallSignatures {
            conditional: Signature(fixed(m.conditional, "conditional")?),
            free_balance: Signature(fixed(m.free_balance, "free_balance")?),
        },
        Some(proto::envelope::Data::ProposalAck(hash)) => CustomData::ProposalAck {
            identity_hash: Hash(fixed(hash, "proposal_ack")?),
        },
    })
}

impl From<ProtocolMsg> for proto::Envelope {
    fn from(msg: ProtocolMsg) -> Self {
        Self {
            protocol: proto::Protocol::from(msg.protocol) as i32,
            process_id: msg.process_id.0.to_vec(),
            seq: msg.seq,
            to: msg.to.0.to_vec(),
            params: msg.params.map(Into::into),
            data: data_to_wire(msg.data),
        }
    }
}

impl TryFrom<proto::Envelope> for ProtocolMsg {
    type Error = ConversionError;

    fn try_from(envelope: proto::Envelope) -> Result<Self, Self::Error> {
        Ok(Self {
            protocol: protocol_kind(envelope.protocol)?,
            process_id: ProcessId(fixed(envelope.process_id, "process_id")?),
            seq: envelope.seq,
            to: PublicIdentifier(fixed(envelope.to, "to")?),
            params: envelope.params.map(TryInto::try_into).transpose()?,
            data: custom_data(envelope.data)?,
        })
    }
}
