//! The instruction interpreter. A flow yields [Instruction]s one at a time;
//! the runner executes each against the engine's services and feeds the
//! [Resolution] back in until the flow completes.

use crate::error::EngineError;
use crate::middleware::ValidationRegistry;
use crate::protocol::{FlowOutput, FlowStep, Instruction, ProtocolFlow, Resolution};
use crate::sig::Signer;
use crate::store::ChannelStore;
use crate::wire::{ProtocolTransport, TransportError};

pub(crate) struct ProtocolRunner<'a> {
    pub signer: &'a Signer,
    pub store: &'a dyn ChannelStore,
    pub transport: &'a dyn ProtocolTransport,
    pub validators: &'a ValidationRegistry,
}

impl ProtocolRunner<'_> {
    pub async fn drive<F: ProtocolFlow>(&self, mut flow: F) -> Result<FlowOutput, EngineError> {
        let mut resolution = None;
        loop {
            match flow.next(resolution.take())? {
                FlowStep::Complete(output) => return Ok(output),
                FlowStep::Yield(instruction) => {
                    resolution = Some(self.execute(instruction).await?);
                }
            }
        }
    }

    async fn execute(&self, instruction: Instruction) -> Result<Resolution, EngineError> {
        match instruction {
            Instruction::Sign { digest, key_index } => {
                tracing::debug!(%digest, key_index, "signing digest");
                let sig = self.signer.sign_derived(digest, key_index)?;
                Ok(Resolution::Signature(sig))
            }
            Instruction::Validate(protocol, context) => {
                tracing::debug!(%protocol, "running validation hooks");
                self.validators.run(protocol, &context).await?;
                Ok(Resolution::Done)
            }
            Instruction::Send(msg) => {
                tracing::debug!(protocol = %msg.protocol, process_id = %msg.process_id, seq = msg.seq, "sending");
                self.transport
                    .send(msg)
                    .await
                    .map_err(EngineError::Transport)?;
                Ok(Resolution::Done)
            }
            Instruction::SendAndWait(msg) => {
                let process_id = msg.process_id;
                tracing::debug!(protocol = %msg.protocol, %process_id, seq = msg.seq, "sending and awaiting reply");
                let reply = self
                    .transport
                    .send_and_wait(msg)
                    .await
                    .map_err(|err| match err {
                        TransportError::Timeout => EngineError::Timeout { process_id },
                        other => EngineError::Transport(other),
                    })?;
                Ok(Resolution::Reply(reply))
            }
            Instruction::PersistAppProposal { channel, proposal } => {
                tracing::debug!(identity_hash = %proposal.identity_hash, "persisting proposal");
                self.store.save_app_proposal(&channel, &proposal).await?;
                Ok(Resolution::Done)
            }
            Instruction::PersistAppInstance { kind, channel, app } => {
                tracing::debug!(identity_hash = %app.identity_hash(), ?kind, "persisting app instance");
                self.store.save_app_instance(kind, &channel, &app).await?;
                Ok(Resolution::Done)
            }
            Instruction::PersistCommitment {
                kind,
                commitment,
                identity_hash,
            } => {
                tracing::debug!(%identity_hash, ?kind, "persisting commitment");
                self.store
                    .save_commitment(kind, &commitment, &identity_hash)
                    .await?;
                Ok(Resolution::Done)
            }
            Instruction::PersistStateChannel(channels) => {
                tracing::debug!(count = channels.len(), "persisting channel snapshots");
                self.store.save_state_channel(&channels).await?;
                Ok(Resolution::Done)
            }
        }
    }
}
