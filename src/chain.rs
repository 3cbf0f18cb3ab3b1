//! Read-only view of the chain. The engine itself never sends transactions;
//! hooks use this to cross-check deposits and multisig funding before they
//! let a run proceed.

use crate::encode::types::{Address, U256};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The queried contract has no code yet. Callers that can tolerate an
    /// undeployed multisig match on this instead of failing the run.
    #[error("no contract deployed at {address}")]
    NotDeployed { address: Address },
    #[error("chain query failed: {0}")]
    Rpc(String),
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Balance `address` holds of `token`; the zero token is the native
    /// asset.
    async fn balance_of(&self, address: Address, token: Address) -> Result<U256, ChainError>;

    /// Total ever withdrawn from `multisig` for `token`. Fails with
    /// [ChainError::NotDeployed] until the multisig contract exists.
    async fn total_withdrawn(&self, multisig: Address, token: Address)
        -> Result<U256, ChainError>;
}

/// Canned chain view for tests and local runs.
#[derive(Default)]
pub struct FixedChainView {
    balances: HashMap<(Address, Address), U256>,
    withdrawn: HashMap<(Address, Address), U256>,
    deployed: HashSet<Address>,
}

impl FixedChainView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&mut self, address: Address, token: Address, amount: U256) {
        self.balances.insert((address, token), amount);
    }

    pub fn set_withdrawn(&mut self, multisig: Address, token: Address, amount: U256) {
        self.deployed.insert(multisig);
        self.withdrawn.insert((multisig, token), amount);
    }

    pub fn mark_deployed(&mut self, address: Address) {
        self.deployed.insert(address);
    }
}

#[async_trait]
impl ChainReader for FixedChainView {
    async fn balance_of(&self, address: Address, token: Address) -> Result<U256, ChainError> {
        Ok(self
            .balances
            .get(&(address, token))
            .copied()
            .unwrap_or_else(U256::zero))
    }

    async fn total_withdrawn(
        &self,
        multisig: Address,
        token: Address,
    ) -> Result<U256, ChainError> {
        if !self.deployed.contains(&multisig) {
            return Err(ChainError::NotDeployed { address: multisig });
        }
        Ok(self
            .withdrawn
            .get(&(multisig, token))
            .copied()
            .unwrap_or_else(U256::zero))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::types::NATIVE_ASSET;

    #[tokio::test]
    async fn undeployed_multisig_is_distinguishable_from_zero() {
        let mut view = FixedChainView::new();
        let multisig = Address([0x0f; 20]);
        assert!(matches!(
            view.total_withdrawn(multisig, NATIVE_ASSET).await,
            Err(ChainError::NotDeployed { address }) if address == multisig
        ));

        view.mark_deployed(multisig);
        assert_eq!(
            view.total_withdrawn(multisig, NATIVE_ASSET).await.unwrap(),
            U256::zero()
        );
    }

    #[tokio::test]
    async fn balances_default_to_zero() {
        let mut view = FixedChainView::new();
        let holder = Address([0x01; 20]);
        assert_eq!(
            view.balance_of(holder, NATIVE_ASSET).await.unwrap(),
            U256::zero()
        );
        view.set_balance(holder, NATIVE_ASSET, U256::from(7));
        assert_eq!(
            view.balance_of(holder, NATIVE_ASSET).await.unwrap(),
            U256::from(7)
        );
    }
}
