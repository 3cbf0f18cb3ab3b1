//! In-process network of endpoints, for tests and single-process setups.
//! Every message still goes through the frame codec, so whatever passes
//! here also fits on a real socket.

use super::encoding::{decode_frame, encode_frame};
use super::{ProtocolTransport, TransportError};
use crate::protocol::{ProcessId, ProtocolMsg, REPLY_SEQ_NO};
use crate::sig::PublicIdentifier;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

struct Peer {
    inbound: mpsc::UnboundedSender<ProtocolMsg>,
    /// Open send-and-wait calls by this peer, resolved by incoming replies.
    waiters: HashMap<ProcessId, oneshot::Sender<ProtocolMsg>>,
    online: bool,
}

struct NetState {
    reply_timeout: Duration,
    peers: Mutex<HashMap<PublicIdentifier, Peer>>,
}

impl NetState {
    /// Runs one frame through the codec and routes it. Messages to an
    /// offline peer vanish, like they would on a dead socket; the sender
    /// notices through its reply timeout.
    fn deliver(&self, msg: ProtocolMsg) -> Result<(), TransportError> {
        let frame = encode_frame(&msg)?;
        let msg = decode_frame(&frame)?;
        let mut peers = self.peers.lock().map_err(|_| TransportError::Closed)?;
        let peer = peers
            .get_mut(&msg.to)
            .ok_or(TransportError::PeerUnavailable)?;
        if !peer.online {
            tracing::debug!(to = %msg.to, "dropping message to offline peer");
            return Ok(());
        }
        if msg.seq == REPLY_SEQ_NO {
            match peer.waiters.remove(&msg.process_id) {
                Some(tx) => {
                    let _ = tx.send(msg);
                }
                None => {
                    tracing::warn!(process_id = %msg.process_id, "dropping uncorrelated reply");
                }
            }
            Ok(())
        } else {
            peer.inbound.send(msg).map_err(|_| TransportError::Closed)
        }
    }
}

/// Registry the endpoints hang off.
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<NetState>,
}

impl MemoryNetwork {
    pub fn new(reply_timeout: Duration) -> Self {
        Self {
            state: Arc::new(NetState {
                reply_timeout,
                peers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers `identifier` and returns its endpoint. Re-registering
    /// replaces the previous endpoint's inbox.
    pub fn endpoint(&self, identifier: PublicIdentifier) -> MemoryEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut peers) = self.state.peers.lock() {
            peers.insert(
                identifier,
                Peer {
                    inbound: tx,
                    waiters: HashMap::new(),
                    online: true,
                },
            );
        }
        MemoryEndpoint {
            identifier,
            state: self.state.clone(),
            inbound: tokio::sync::Mutex::new(rx),
        }
    }

    /// Simulates the peer going dark. Offline peers silently swallow
    /// everything sent to them.
    pub fn set_online(&self, identifier: &PublicIdentifier, online: bool) {
        if let Ok(mut peers) = self.state.peers.lock() {
            if let Some(peer) = peers.get_mut(identifier) {
                peer.online = online;
            }
        }
    }
}

/// One party's attachment to a [MemoryNetwork].
pub struct MemoryEndpoint {
    identifier: PublicIdentifier,
    state: Arc<NetState>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProtocolMsg>>,
}

impl MemoryEndpoint {
    pub fn identifier(&self) -> PublicIdentifier {
        self.identifier
    }

    /// Next opening message addressed to this endpoint. Replies are routed
    /// to their waiting `send_and_wait` call and never show up here.
    pub async fn recv(&self) -> Option<ProtocolMsg> {
        self.inbound.lock().await.recv().await
    }

    fn drop_waiter(&self, process_id: &ProcessId) {
        if let Ok(mut peers) = self.state.peers.lock() {
            if let Some(own) = peers.get_mut(&self.identifier) {
                own.waiters.remove(process_id);
            }
        }
    }
}

#[async_trait]
impl ProtocolTransport for MemoryEndpoint {
    async fn send(&self, msg: ProtocolMsg) -> Result<(), TransportError> {
        self.state.deliver(msg)
    }

    async fn send_and_wait(&self, msg: ProtocolMsg) -> Result<ProtocolMsg, TransportError> {
        let process_id = msg.process_id;
        let (tx, rx) = oneshot::channel();
        {
            let mut peers = self.state.peers.lock().map_err(|_| TransportError::Closed)?;
            let own = peers
                .get_mut(&self.identifier)
                .ok_or(TransportError::Closed)?;
            own.waiters.insert(process_id, tx);
        }
        if let Err(err) = self.state.deliver(msg) {
            self.drop_waiter(&process_id);
            return Err(err);
        }
        match tokio::time::timeout(self.state.reply_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.drop_waiter(&process_id);
                Err(TransportError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CustomData, ProtocolKind};

    fn identifier(byte: u8) -> PublicIdentifier {
        PublicIdentifier([byte; 33])
    }

    fn opening(to: PublicIdentifier, process_id: ProcessId) -> ProtocolMsg {
        ProtocolMsg {
            protocol: ProtocolKind::Uninstall,
            process_id,
            seq: 1,
            to,
            params: None,
            data: CustomData::None,
        }
    }

    fn reply(to: PublicIdentifier, process_id: ProcessId) -> ProtocolMsg {
        ProtocolMsg {
            protocol: ProtocolKind::Uninstall,
            process_id,
            seq: REPLY_SEQ_NO,
            to,
            params: None,
            data: CustomData::ProposalAck {
                identity_hash: crate::encode::types::Hash([0x77; 32]),
            },
        }
    }

    #[tokio::test]
    async fn request_reaches_the_peer_and_the_reply_resolves_the_wait() {
        let net = MemoryNetwork::new(Duration::from_secs(1));
        let alice = net.endpoint(identifier(1));
        let bob = net.endpoint(identifier(2));
        let process_id = ProcessId([0x0a; 32]);

        let responder = tokio::spawn(async move {
            let incoming = bob.recv().await.unwrap();
            assert_eq!(incoming.seq, 1);
            bob.send(reply(identifier(1), incoming.process_id))
                .await
                .unwrap();
        });

        let got = alice
            .send_and_wait(opening(identifier(2), process_id))
            .await
            .unwrap();
        assert_eq!(got.process_id, process_id);
        assert_eq!(got.seq, REPLY_SEQ_NO);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn uncorrelated_replies_are_dropped() {
        let net = MemoryNetwork::new(Duration::from_millis(50));
        let alice = net.endpoint(identifier(1));
        let bob = net.endpoint(identifier(2));

        // Nobody is waiting on this process id.
        bob.send(reply(identifier(1), ProcessId([0x0b; 32])))
            .await
            .unwrap();

        // The inbox stays empty; replies never surface there.
        let next = tokio::time::timeout(Duration::from_millis(50), alice.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn offline_peers_cause_timeouts_not_errors() {
        let net = MemoryNetwork::new(Duration::from_millis(50));
        let alice = net.endpoint(identifier(1));
        let _bob = net.endpoint(identifier(2));
        net.set_online(&identifier(2), false);

        let err = alice
            .send_and_wait(opening(identifier(2), ProcessId([0x0c; 32])))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn unknown_recipients_are_unavailable() {
        let net = MemoryNetwork::new(Duration::from_millis(50));
        let alice = net.endpoint(identifier(1));
        let err = alice
            .send_and_wait(opening(identifier(9), ProcessId([0x0d; 32])))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerUnavailable));
    }
}
