use super::{
    identifiers_from_json, identifiers_to_json, participants_for, AppIdentity, AppInstance,
    AppInstanceJson, AppInstanceProposal, AppInstanceProposalJson, FreeBalanceState, OutcomeType,
    RecordError, TokenIndexedIncrements, FREE_BALANCE_APP_TIMEOUT,
};
use crate::encode::types::{Address, Hash, U256};
use crate::error::EngineError;
use crate::sig::PublicIdentifier;

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything both parties agree on about one multisig: the free-balance
/// app, the installed app instances and the proposals still pending.
///
/// Operations never mutate: each returns the successor channel and leaves
/// `self` untouched, so a failed flow cannot leave a half-applied channel
/// behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChannel {
    multisig_address: Address,
    user_identifiers: [PublicIdentifier; 2],
    free_balance: AppInstance,
    app_instances: BTreeMap<Hash, AppInstance>,
    proposed_apps: BTreeMap<Hash, AppInstanceProposal>,
    /// Counts the free-balance app and every proposal ever made here. The
    /// next proposal consumes this value as its app sequence number, so it
    /// only ever grows; rejected proposals leave a gap.
    num_proposed_apps: u64,
}

impl StateChannel {
    /// Channel as the setup protocol leaves it: a zeroed free-balance app
    /// at sequence number 0, no user apps, counter ready at 1.
    pub fn setup(
        multisig_address: Address,
        user_identifiers: [PublicIdentifier; 2],
        identity_app: Address,
    ) -> Result<Self, EngineError> {
        let owners = participants_for(&user_identifiers, 0)?;
        let initial = FreeBalanceState::initial(owners);
        let identity = AppIdentity {
            multisig_address,
            participants: owners,
            app_definition: identity_app,
            default_timeout: FREE_BALANCE_APP_TIMEOUT,
            app_seq_no: 0,
        };
        let free_balance = AppInstance::new(
            identity,
            OutcomeType::MultiAssetMultiPartyCoinTransfer,
            initial.to_bytes()?,
        )?;
        Ok(Self {
            multisig_address,
            user_identifiers,
            free_balance,
            app_instances: BTreeMap::new(),
            proposed_apps: BTreeMap::new(),
            num_proposed_apps: 1,
        })
    }

    pub fn multisig_address(&self) -> Address {
        self.multisig_address
    }

    pub fn user_identifiers(&self) -> &[PublicIdentifier; 2] {
        &self.user_identifiers
    }

    pub fn free_balance(&self) -> &AppInstance {
        &self.free_balance
    }

    /// Decoded balance sheet of the free-balance app.
    pub fn free_balance_state(&self) -> Result<FreeBalanceState, EngineError> {
        Ok(FreeBalanceState::from_bytes(self.free_balance.latest_state())?)
    }

    pub fn app_instances(&self) -> &BTreeMap<Hash, AppInstance> {
        &self.app_instances
    }

    pub fn proposed_apps(&self) -> &BTreeMap<Hash, AppInstanceProposal> {
        &self.proposed_apps
    }

    pub fn app_instance(&self, identity_hash: &Hash) -> Option<&AppInstance> {
        self.app_instances.get(identity_hash)
    }

    pub fn proposal(&self, identity_hash: &Hash) -> Option<&AppInstanceProposal> {
        self.proposed_apps.get(identity_hash)
    }

    /// Sequence number the next proposal will consume.
    pub fn next_app_seq_no(&self) -> u64 {
        self.num_proposed_apps
    }

    /// The other party's identifier.
    pub fn peer_of(&self, identifier: &PublicIdentifier) -> Result<PublicIdentifier, EngineError> {
        if *identifier == self.user_identifiers[0] {
            Ok(self.user_identifiers[1])
        } else if *identifier == self.user_identifiers[1] {
            Ok(self.user_identifiers[0])
        } else {
            Err(EngineError::Internal("identifier is not a channel member"))
        }
    }

    /// Channel with `proposal` pending. The proposal must consume exactly
    /// the current counter value; both parties compute it independently
    /// from their own channel copy, which is what keeps their derived
    /// identity hashes comparable.
    pub fn add_proposal(&self, proposal: AppInstanceProposal) -> Result<Self, EngineError> {
        if self.proposed_apps.contains_key(&proposal.identity_hash)
            || self.app_instances.contains_key(&proposal.identity_hash)
        {
            return Err(EngineError::ProtocolViolation(
                "identity hash already proposed or installed",
            ));
        }
        if proposal.app_seq_no != self.num_proposed_apps {
            return Err(EngineError::Internal(
                "proposal did not consume the current app sequence number",
            ));
        }
        let mut next = self.clone();
        next.num_proposed_apps += 1;
        next.proposed_apps.insert(proposal.identity_hash, proposal);
        Ok(next)
    }

    /// Channel without the pending proposal. The consumed sequence number
    /// stays burned.
    pub fn remove_proposal(&self, identity_hash: &Hash) -> Result<Self, EngineError> {
        let mut next = self.clone();
        if next.proposed_apps.remove(identity_hash).is_none() {
            return Err(EngineError::UnknownIdentityHash(*identity_hash));
        }
        Ok(next)
    }

    /// Channel with `app` installed: its proposal is consumed, the deposits
    /// in `decrements` leave the free balance, and the free-balance app
    /// advances one version.
    pub fn install_app(
        &self,
        app: AppInstance,
        decrements: &[(Address, Address, U256)],
    ) -> Result<Self, EngineError> {
        let identity_hash = app.identity_hash();
        let mut next = self.clone();
        if next.proposed_apps.remove(&identity_hash).is_none() {
            return Err(EngineError::UnknownIdentityHash(identity_hash));
        }
        let balance_sheet = next.free_balance_state()?.with_install(
            next.free_balance.participants(),
            identity_hash,
            decrements,
        )?;
        next.free_balance = next.free_balance.with_state(
            balance_sheet.to_bytes()?,
            next.free_balance.version_number() + 1,
        )?;
        next.app_instances.insert(identity_hash, app);
        Ok(next)
    }

    /// Channel with the app removed and its outcome credited back to the
    /// free balance, which advances one version.
    pub fn uninstall_app(
        &self,
        identity_hash: &Hash,
        increments: &TokenIndexedIncrements,
    ) -> Result<Self, EngineError> {
        let mut next = self.clone();
        if next.app_instances.remove(identity_hash).is_none() {
            return Err(EngineError::UnknownIdentityHash(*identity_hash));
        }
        let balance_sheet = next.free_balance_state()?.with_uninstall(
            next.free_balance.participants(),
            *identity_hash,
            increments,
        )?;
        next.free_balance = next.free_balance.with_state(
            balance_sheet.to_bytes()?,
            next.free_balance.version_number() + 1,
        )?;
        Ok(next)
    }

    /// Channel with one app moved to a later state.
    pub fn set_app_state(
        &self,
        identity_hash: &Hash,
        new_state: Vec<u8>,
        new_version: u64,
    ) -> Result<Self, EngineError> {
        let app = self
            .app_instances
            .get(identity_hash)
            .ok_or(EngineError::UnknownIdentityHash(*identity_hash))?;
        let advanced = app.with_state(new_state, new_version)?;
        let mut next = self.clone();
        next.app_instances.insert(*identity_hash, advanced);
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChannelJson {
    pub multisig_address: String,
    pub user_identifiers: [String; 2],
    pub free_balance: AppInstanceJson,
    pub app_instances: Vec<AppInstanceJson>,
    pub proposed_apps: Vec<AppInstanceProposalJson>,
    pub num_proposed_apps: u64,
}

impl From<&StateChannel> for StateChannelJson {
    fn from(channel: &StateChannel) -> Self {
        StateChannelJson {
            multisig_address: channel.multisig_address.to_string(),
            user_identifiers: identifiers_to_json(&channel.user_identifiers),
            free_balance: AppInstanceJson::from(&channel.free_balance),
            app_instances: channel.app_instances.values().map(AppInstanceJson::from).collect(),
            proposed_apps: channel
                .proposed_apps
                .values()
                .map(AppInstanceProposalJson::from)
                .collect(),
            num_proposed_apps: channel.num_proposed_apps,
        }
    }
}

impl TryFrom<&StateChannelJson> for StateChannel {
    type Error = RecordError;

    fn try_from(record: &StateChannelJson) -> Result<Self, Self::Error> {
        let mut app_instances = BTreeMap::new();
        for app in &record.app_instances {
            let app = AppInstance::try_from(app)?;
            app_instances.insert(app.identity_hash(), app);
        }
        let mut proposed_apps = BTreeMap::new();
        for proposal in &record.proposed_apps {
            let proposal = AppInstanceProposal::try_from(proposal)?;
            proposed_apps.insert(proposal.identity_hash, proposal);
        }
        Ok(StateChannel {
            multisig_address: Address::from_str(&record.multisig_address)?,
            user_identifiers: identifiers_from_json(&record.user_identifiers)?,
            free_balance: AppInstance::try_from(&record.free_balance)?,
            app_instances,
            proposed_apps,
            num_proposed_apps: record.num_proposed_apps,
        })
    }
}
