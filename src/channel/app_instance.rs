use super::{bytes_from_hex, bytes_to_hex, OutcomeType, RecordError};
use crate::encode::types::{Address, Hash};
use crate::encode::{self, keccak256, to_hash};
use crate::error::EngineError;

use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// The identity fields of an app instance. Their hash is the channel-wide
/// unique key under which the instance is installed, persisted and disputed.
///
/// `participants` are the derived signer addresses at `app_seq_no`, sorted
/// ascending (see [participants_for][super::participants_for]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppIdentity {
    pub multisig_address: Address,
    pub participants: [Address; 2],
    pub app_definition: Address,
    pub default_timeout: u64,
    pub app_seq_no: u64,
}

impl AppIdentity {
    pub fn hash(&self) -> Result<Hash, encode::Error> {
        to_hash(self)
    }
}

/// One installed app: identity plus the evolving (state, version) pair.
///
/// The state bytes are opaque here; only the registered app logic and the
/// free-balance helpers interpret them. The identity hash is computed once
/// at construction since the identity fields never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstance {
    identity: AppIdentity,
    identity_hash: Hash,
    outcome_type: OutcomeType,
    latest_state: Vec<u8>,
    version_number: u64,
}

impl AppInstance {
    /// New instance at version 0, the version the install commitments bind.
    pub fn new(
        identity: AppIdentity,
        outcome_type: OutcomeType,
        initial_state: Vec<u8>,
    ) -> Result<Self, encode::Error> {
        let identity_hash = identity.hash()?;
        Ok(Self {
            identity,
            identity_hash,
            outcome_type,
            latest_state: initial_state,
            version_number: 0,
        })
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    pub fn identity_hash(&self) -> Hash {
        self.identity_hash
    }

    pub fn outcome_type(&self) -> OutcomeType {
        self.outcome_type
    }

    pub fn latest_state(&self) -> &[u8] {
        &self.latest_state
    }

    pub fn version_number(&self) -> u64 {
        self.version_number
    }

    pub fn app_seq_no(&self) -> u64 {
        self.identity.app_seq_no
    }

    pub fn participants(&self) -> [Address; 2] {
        self.identity.participants
    }

    pub fn default_timeout(&self) -> u64 {
        self.identity.default_timeout
    }

    /// Keccak-256 of the raw state bytes; the hash the set-state commitment
    /// binds.
    pub fn state_hash(&self) -> Hash {
        keccak256(&self.latest_state)
    }

    /// Successor instance at `new_version`. The version must strictly
    /// exceed the current one; equal or lower versions are stale.
    pub fn with_state(&self, new_state: Vec<u8>, new_version: u64) -> Result<Self, EngineError> {
        if new_version <= self.version_number {
            return Err(EngineError::StaleVersion {
                current: self.version_number,
                proposed: new_version,
            });
        }
        Ok(Self {
            identity: self.identity,
            identity_hash: self.identity_hash,
            outcome_type: self.outcome_type,
            latest_state: new_state,
            version_number: new_version,
        })
    }
}

/// Persisted record shape of an [AppInstance].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInstanceJson {
    pub identity_hash: String,
    pub multisig_address: String,
    pub participants: [String; 2],
    pub app_definition: String,
    pub default_timeout: u64,
    pub app_seq_no: u64,
    pub outcome_type: String,
    pub latest_state: String,
    pub version_number: u64,
}

impl From<&AppInstance> for AppInstanceJson {
    fn from(app: &AppInstance) -> Self {
        AppInstanceJson {
            identity_hash: app.identity_hash.to_string(),
            multisig_address: app.identity.multisig_address.to_string(),
            participants: [
                app.identity.participants[0].to_string(),
                app.identity.participants[1].to_string(),
            ],
            app_definition: app.identity.app_definition.to_string(),
            default_timeout: app.identity.default_timeout,
            app_seq_no: app.identity.app_seq_no,
            outcome_type: app.outcome_type.as_str().to_string(),
            latest_state: bytes_to_hex(&app.latest_state),
            version_number: app.version_number,
        }
    }
}

impl TryFrom<&AppInstanceJson> for AppInstance {
    type Error = RecordError;

    fn try_from(record: &AppInstanceJson) -> Result<Self, Self::Error> {
        let identity = AppIdentity {
            multisig_address: Address::from_str(&record.multisig_address)?,
            participants: [
                Address::from_str(&record.participants[0])?,
                Address::from_str(&record.participants[1])?,
            ],
            app_definition: Address::from_str(&record.app_definition)?,
            default_timeout: record.default_timeout,
            app_seq_no: record.app_seq_no,
        };
        let computed = identity.hash()?;
        let stored = Hash::from_str(&record.identity_hash)?;
        if stored != computed {
            // A hash that no longer matches its fields means the record was
            // corrupted or written by incompatible code.
            return Err(RecordError::IdentityHashMismatch { stored, computed });
        }
        Ok(AppInstance {
            identity,
            identity_hash: computed,
            outcome_type: record.outcome_type.parse()?,
            latest_state: bytes_from_hex(&record.latest_state)?,
            version_number: record.version_number,
        })
    }
}
