//! Engine configuration: the on-chain address book commitments reference
//! and the local tunables. Loadable from JSON; the default is a fixed
//! address book good enough for tests and local two-node runs.

use crate::channel::OutcomeType;
use crate::encode::types::{Address, ParseHexError};

use core::str::FromStr;
use core::time::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config address field malformed: {0}")]
    Field(#[from] ParseHexError),
}

/// Deployed contract addresses a network runs against. Commitments embed
/// these, so two parties must load the same book or their digests drift
/// apart on the first install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkContext {
    pub challenge_registry: Address,
    /// App definition backing every free-balance app.
    pub identity_app: Address,
    /// Delegate target the multisig calls to execute a conditional
    /// transaction.
    pub conditional_tx_target: Address,
    pub two_party_fixed_interpreter: Address,
    pub single_asset_interpreter: Address,
    pub multi_asset_interpreter: Address,
}

impl NetworkContext {
    /// Interpreter contract carrying out outcomes of the given type.
    pub fn interpreter_for(&self, outcome: OutcomeType) -> Address {
        match outcome {
            OutcomeType::TwoPartyFixed => self.two_party_fixed_interpreter,
            OutcomeType::SingleAssetTwoPartyCoinTransfer => self.single_asset_interpreter,
            OutcomeType::MultiAssetMultiPartyCoinTransfer => self.multi_asset_interpreter,
        }
    }
}

impl Default for NetworkContext {
    fn default() -> Self {
        Self {
            challenge_registry: Address([0x01; 20]),
            identity_app: Address([0x02; 20]),
            conditional_tx_target: Address([0x03; 20]),
            two_party_fixed_interpreter: Address([0x04; 20]),
            single_asset_interpreter: Address([0x05; 20]),
            multi_asset_interpreter: Address([0x06; 20]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub network: NetworkContext,
    /// How long a run waits for the channel lock before giving up.
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: NetworkContext::default(),
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let record: EngineConfigJson = serde_json::from_str(raw)?;
        Ok(Self {
            network: NetworkContext {
                challenge_registry: Address::from_str(&record.network.challenge_registry)?,
                identity_app: Address::from_str(&record.network.identity_app)?,
                conditional_tx_target: Address::from_str(&record.network.conditional_tx_target)?,
                two_party_fixed_interpreter: Address::from_str(
                    &record.network.two_party_fixed_interpreter,
                )?,
                single_asset_interpreter: Address::from_str(
                    &record.network.single_asset_interpreter,
                )?,
                multi_asset_interpreter: Address::from_str(
                    &record.network.multi_asset_interpreter,
                )?,
            },
            lock_timeout: Duration::from_millis(record.lock_timeout_ms),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkContextJson {
    challenge_registry: String,
    identity_app: String,
    conditional_tx_target: String,
    two_party_fixed_interpreter: String,
    single_asset_interpreter: String,
    multi_asset_interpreter: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EngineConfigJson {
    network: NetworkContextJson,
    lock_timeout_ms: u64,
}
