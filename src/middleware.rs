//! Validation middleware. Flows pause at a validation point before anything
//! is signed; the hooks registered here decide whether the run proceeds.
//! No hook for a protocol means the step passes.

use crate::channel::{AppInstance, StateChannel};
use crate::encode::types::Address;
use crate::error::EngineError;
use crate::protocol::{ProtocolKind, ProtocolParam, ProtocolRole};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// What a hook gets to look at: the params driving the run, our role in it,
/// and the channel and app they touch as loaded before the run started.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub params: ProtocolParam,
    pub role: ProtocolRole,
    pub channel: Option<StateChannel>,
    pub app: Option<AppInstance>,
}

impl MiddlewareContext {
    /// App definition the run concerns, when the params name one.
    pub fn app_definition(&self) -> Option<Address> {
        match &self.params {
            ProtocolParam::Propose(p) => Some(p.app_definition),
            ProtocolParam::Install(p) => Some(p.app_definition),
            ProtocolParam::Setup(_) => None,
            ProtocolParam::Uninstall(_) | ProtocolParam::TakeAction(_) => {
                self.app.as_ref().map(|app| app.identity().app_definition)
            }
        }
    }
}

/// A validation hook. Hooks run before the flow signs anything, so a
/// rejection leaves no trace beyond the aborted run.
#[async_trait]
pub trait ProtocolValidator: Send + Sync {
    async fn validate(&self, context: &MiddlewareContext) -> Result<(), ValidationError>;
}

/// Hooks keyed by protocol, optionally scoped to one app definition.
/// Definition-scoped hooks win over protocol-wide ones.
#[derive(Default)]
pub struct ValidationRegistry {
    hooks: HashMap<(ProtocolKind, Option<Address>), Arc<dyn ProtocolValidator>>,
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, protocol: ProtocolKind, hook: Arc<dyn ProtocolValidator>) {
        self.hooks.insert((protocol, None), hook);
    }

    pub fn register_for_app(
        &mut self,
        protocol: ProtocolKind,
        app_definition: Address,
        hook: Arc<dyn ProtocolValidator>,
    ) {
        self.hooks.insert((protocol, Some(app_definition)), hook);
    }

    pub async fn run(
        &self,
        protocol: ProtocolKind,
        context: &MiddlewareContext,
    ) -> Result<(), EngineError> {
        let scoped = context
            .app_definition()
            .and_then(|definition| self.hooks.get(&(protocol, Some(definition))));
        let hook = match scoped.or_else(|| self.hooks.get(&(protocol, None))) {
            Some(hook) => hook,
            None => return Ok(()),
        };
        hook.validate(context)
            .await
            .map_err(|e| EngineError::ValidationRejected { reason: e.reason })
    }
}
