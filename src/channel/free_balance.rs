use super::RecordError;
use crate::apps::AppLogicError;
use crate::encode::types::{u256_from_hex, u256_to_hex, Address, Hash, U256, NATIVE_ASSET};
use crate::error::EngineError;

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of an uninstalled app: per token, the amount each recipient is
/// owed. Recipients must be the two channel owner addresses.
pub type TokenIndexedIncrements = BTreeMap<Address, BTreeMap<Address, U256>>;

/// One row entry of the balance sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinTransfer {
    pub to: Address,
    pub amount: U256,
}

/// State of the free-balance app: which apps are active and what each owner
/// could withdraw per token. The entry pair of a token row is ordered by
/// owner address ascending, matching the participant order everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeBalanceState {
    active_apps: BTreeSet<Hash>,
    balances: BTreeMap<Address, [CoinTransfer; 2]>,
}

fn zero_row(owners: [Address; 2]) -> [CoinTransfer; 2] {
    [
        CoinTransfer {
            to: owners[0],
            amount: U256::zero(),
        },
        CoinTransfer {
            to: owners[1],
            amount: U256::zero(),
        },
    ]
}

impl FreeBalanceState {
    /// Post-setup state: no active apps, a zeroed native-asset row.
    pub fn initial(owners: [Address; 2]) -> Self {
        let mut balances = BTreeMap::new();
        balances.insert(NATIVE_ASSET, zero_row(owners));
        Self {
            active_apps: BTreeSet::new(),
            balances,
        }
    }

    pub fn balance_of(&self, token: &Address, owner: &Address) -> U256 {
        self.balances
            .get(token)
            .and_then(|row| row.iter().find(|t| t.to == *owner))
            .map(|t| t.amount)
            .unwrap_or_else(U256::zero)
    }

    pub fn balances(&self) -> &BTreeMap<Address, [CoinTransfer; 2]> {
        &self.balances
    }

    pub fn active_apps(&self) -> &BTreeSet<Hash> {
        &self.active_apps
    }

    /// Balance sheet after an install: each `(token, owner, amount)`
    /// decrement is taken from that owner's column and the app becomes
    /// active. Underfunded decrements fail before anything is touched
    /// (the value is copied first, so the original is never half-updated).
    pub fn with_install(
        &self,
        owners: [Address; 2],
        identity_hash: Hash,
        decrements: &[(Address, Address, U256)],
    ) -> Result<Self, EngineError> {
        let mut next = self.clone();
        if !next.active_apps.insert(identity_hash) {
            return Err(EngineError::Internal("app already active in free balance"));
        }
        for (token, owner, amount) in decrements {
            let row = next.balances.entry(*token).or_insert_with(|| zero_row(owners));
            let slot = row
                .iter_mut()
                .find(|t| t.to == *owner)
                .ok_or(EngineError::Internal("deposit owner is not a channel owner"))?;
            slot.amount = slot.amount.checked_sub(*amount).ok_or_else(|| {
                EngineError::InsufficientFreeBalance {
                    token: *token,
                    owner: *owner,
                    available: slot.amount,
                    required: *amount,
                }
            })?;
        }
        Ok(next)
    }

    /// Balance sheet after an uninstall: the app leaves the active set and
    /// its outcome is credited per token and recipient.
    pub fn with_uninstall(
        &self,
        owners: [Address; 2],
        identity_hash: Hash,
        increments: &TokenIndexedIncrements,
    ) -> Result<Self, EngineError> {
        let mut next = self.clone();
        if !next.active_apps.remove(&identity_hash) {
            return Err(EngineError::Internal("uninstalled app was not active"));
        }
        for (token, by_recipient) in increments {
            let row = next.balances.entry(*token).or_insert_with(|| zero_row(owners));
            for (recipient, amount) in by_recipient {
                let slot = row
                    .iter_mut()
                    .find(|t| t.to == *recipient)
                    .ok_or(AppLogicError::ForeignRecipient(*recipient))?;
                slot.amount = slot
                    .amount
                    .checked_add(*amount)
                    .ok_or(AppLogicError::Overflow)?;
            }
        }
        Ok(next)
    }

    /// Canonical state bytes. Both parties must produce identical bytes for
    /// identical logical states: field order is fixed, set and map iteration
    /// is ordered, and all leaves are lowercase hex.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec(&FreeBalanceStateJson::from(self))?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let record: FreeBalanceStateJson = serde_json::from_slice(bytes)?;
        FreeBalanceState::try_from(&record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinTransferJson {
    pub to: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeBalanceStateJson {
    pub active_apps: Vec<String>,
    pub balances: BTreeMap<String, [CoinTransferJson; 2]>,
}

impl From<&FreeBalanceState> for FreeBalanceStateJson {
    fn from(state: &FreeBalanceState) -> Self {
        FreeBalanceStateJson {
            active_apps: state.active_apps.iter().map(Hash::to_string).collect(),
            balances: state
                .balances
                .iter()
                .map(|(token, row)| {
                    (
                        token.to_string(),
                        [
                            CoinTransferJson {
                                to: row[0].to.to_string(),
                                amount: u256_to_hex(&row[0].amount),
                            },
                            CoinTransferJson {
                                to: row[1].to.to_string(),
                                amount: u256_to_hex(&row[1].amount),
                            },
                        ],
                    )
                })
                .collect(),
        }
    }
}

impl TryFrom<&FreeBalanceStateJson> for FreeBalanceState {
    type Error = RecordError;

    fn try_from(record: &FreeBalanceStateJson) -> Result<Self, Self::Error> {
        let mut active_apps = BTreeSet::new();
        for hash in &record.active_apps {
            active_apps.insert(Hash::from_str(hash)?);
        }
        let mut balances = BTreeMap::new();
        for (token, row) in &record.balances {
            balances.insert(
                Address::from_str(token)?,
                [
                    CoinTransfer {
                        to: Address::from_str(&row[0].to)?,
                        amount: u256_from_hex(&row[0].amount)?,
                    },
                    CoinTransfer {
                        to: Address::from_str(&row[1].to)?,
                        amount: u256_from_hex(&row[1].amount)?,
                    },
                ],
            );
        }
        Ok(FreeBalanceState {
            active_apps,
            balances,
        })
    }
}
