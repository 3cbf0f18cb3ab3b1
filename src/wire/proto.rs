//! Wire schema, kept as hand-maintained prost structs. Field tags are
//! frozen; add new fields with fresh tags and never reuse a retired one.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(enumeration = "Protocol", tag = "1")]
    pub protocol: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub process_id: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub seq: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub to: Vec<u8>,
    #[prost(oneof = "envelope::Params", tags = "5, 6, 7, 8, 9")]
    pub params: Option<envelope::Params>,
    #[prost(oneof = "envelope::Data", tags = "10, 11, 12")]
    pub data: Option<envelope::Data>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Params {
        #[prost(message, tag = "5")]
        Setup(super::SetupMsg),
        #[prost(message, tag = "6")]
        Propose(super::ProposeMsg),
        #[prost(message, tag = "7")]
        Install(super::InstallMsg),
        #[prost(message, tag = "8")]
        Uninstall(super::UninstallMsg),
        #[prost(message, tag = "9")]
        TakeAction(super::TakeActionMsg),
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(bytes = "vec", tag = "10")]
        Signature(Vec<u8>),
        #[prost(message, tag = "11")]
        InstallSignatures(super::InstallSignaturesMsg),
        /// Identity hash the responder derived for the proposal.
        #[prost(bytes = "vec", tag = "12")]
        ProposalAck(Vec<u8>),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Protocol {
    Unspecified = 0,
    Setup = 1,
    Propose = 2,
    Install = 3,
    Uninstall = 4,
    TakeAction = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Outcome {
    Unspecified = 0,
    TwoPartyFixed = 1,
    SingleAssetTwoPartyCoinTransfer = 2,
    MultiAssetMultiPartyCoinTransfer = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetupMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProposeMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub app_definition: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub initial_state: Vec<u8>,
    /// 32-byte big-endian amounts.
    #[prost(bytes = "vec", tag = "6")]
    pub initiator_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub initiator_deposit_token: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub responder_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub responder_deposit_token: Vec<u8>,
    #[prost(uint64, tag = "10")]
    pub default_timeout: u64,
    #[prost(enumeration = "Outcome", tag = "11")]
    pub outcome_type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstallMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub app_identity_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub app_definition: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub initial_state: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub initiator_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub initiator_deposit_token: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub responder_deposit: Vec<u8>,
    #[prost(bytes = "vec", tag = "10")]
    pub responder_deposit_token: Vec<u8>,
    #[prost(uint64, tag = "11")]
    pub default_timeout: u64,
    #[prost(enumeration = "Outcome", tag = "12")]
    pub outcome_type: i32,
    #[prost(uint64, tag = "13")]
    pub app_seq_no: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UninstallMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub app_identity_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TakeActionMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub multisig_address: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub initiator_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub responder_identifier: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub app_identity_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub action: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstallSignaturesMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub conditional: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub free_balance: Vec<u8>,
}
