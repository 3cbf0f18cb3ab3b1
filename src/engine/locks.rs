//! Per-channel run serialization. Two protocol runs over the same channel
//! would race each other's version numbers, so every run holds the
//! channel's lock from before its first read until after its last persist.

use crate::encode::types::Address;
use crate::error::EngineError;
use crate::sig::PublicIdentifier;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// What a run serializes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Runs over an existing channel lock its multisig address.
    Multisig(Address),
    /// Setup has no channel record yet, so it locks the party pair.
    Pair([PublicIdentifier; 2]),
}

impl LockKey {
    /// Pair key independent of who initiates.
    pub fn pair(a: PublicIdentifier, b: PublicIdentifier) -> Self {
        if a <= b {
            LockKey::Pair([a, b])
        } else {
            LockKey::Pair([b, a])
        }
    }

    fn describe(&self) -> String {
        match self {
            LockKey::Multisig(address) => format!("multisig {address}"),
            LockKey::Pair([a, b]) => format!("pair {a}/{b}"),
        }
    }
}

pub struct LockManager {
    timeout: Duration,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for the lock behind `key`, giving up after the configured
    /// timeout with [EngineError::LockContention].
    pub async fn acquire(&self, key: LockKey) -> Result<OwnedMutexGuard<()>, EngineError> {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        match tokio::time::timeout(self.timeout, entry.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                let key = key.describe();
                tracing::error!(%key, "channel lock not released in time");
                Err(EngineError::LockContention { key })
            }
        }
    }
}
