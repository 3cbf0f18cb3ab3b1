//! App logic the engine delegates to. The engine never looks inside state
//! bytes; whoever registers an app definition supplies the transition and
//! outcome functions for it.

use crate::channel::TokenIndexedIncrements;
use crate::encode::types::Address;

use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AppLogicError {
    /// The action is not legal from the given state.
    #[error("action rejected: {0}")]
    ActionRejected(String),
    /// The state bytes do not decode as this app's state.
    #[error("app state malformed: {0}")]
    BadState(String),
    #[error("outcome recipient {0} is not a channel owner")]
    ForeignRecipient(Address),
    #[error("balance overflow while applying an outcome")]
    Overflow,
}

/// Transition and outcome semantics of one app definition.
///
/// `apply_action` and `compute_outcome` must be pure: both parties run them
/// independently on the same inputs and then compare signatures over the
/// results, so any hidden input would surface as a signature mismatch.
pub trait AppLogic: Send + Sync {
    /// Successor state bytes after `action` is taken from `state`.
    fn apply_action(&self, state: &[u8], action: &[u8]) -> Result<Vec<u8>, AppLogicError>;

    /// What each owner is owed per token if the app resolved at `state`.
    fn compute_outcome(&self, state: &[u8]) -> Result<TokenIndexedIncrements, AppLogicError>;
}

/// App logic keyed by app definition address.
#[derive(Default)]
pub struct AppRegistry {
    logic: HashMap<Address, Arc<dyn AppLogic>>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, app_definition: Address, logic: Arc<dyn AppLogic>) {
        self.logic.insert(app_definition, logic);
    }

    pub fn get(&self, app_definition: &Address) -> Option<Arc<dyn AppLogic>> {
        self.logic.get(app_definition).cloned()
    }
}
