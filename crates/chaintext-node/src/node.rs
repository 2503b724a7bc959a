//! Node lifecycle and state machine.
//!
//! The [`Node`] is the public entry point for the ChainText runtime.
//! It owns all subsystems and exposes a channel-based API
//! ([`NodeHandle`]) for the daemon, a UI, or tests.
//!
//! # State machine
//!
//! ```text
//! Initializing ──start()──▶ Running ──shutdown()──▶ ShuttingDown ──▶ (dropped)
//! ```
//!
//! Double-start and shutdown-from-initializing are rejected with
//! `ChaintextError::ConfigError`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use chaintext_crypto::aead::{PayloadCipher, PayloadKey, XChaChaCipher};
use chaintext_crypto::signing::{BlockSigner, Ed25519Signer, Ed25519Verifier, SignatureVerifier};
use chaintext_network::config::NetworkConfig;
use chaintext_network::discovery::PeerDirectory;
use chaintext_network::events::TransportEvent;
use chaintext_network::protocol::Signal;
use chaintext_network::signal::SignalBus;
use chaintext_network::supervisor::PeerSupervisor;
use chaintext_network::transport::Negotiator;
use chaintext_storage::block::Block;
use chaintext_storage::chain::{ChainStore, OrphanPolicy};
use chaintext_storage::kv::KeyValueStore;
use chaintext_types::config::AppConfig;
use chaintext_types::{ChaintextError, NodeEvent, PeerId, Result, RoomId};

use crate::command::{NodeCommand, NodeStatus};
use crate::event_loop;
use crate::observer::{ChainObserver, ChainObservers};
use crate::sync::SyncCoordinator;

// ---------------------------------------------------------------------------
// Channel buffer sizes
// ---------------------------------------------------------------------------

/// Bounded command channel capacity.
const COMMAND_CHANNEL_SIZE: usize = 256;

/// Bounded node event channel capacity.
///
/// Events the consumer does not drain in time are dropped.
const EVENT_CHANNEL_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Lifecycle state of the node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// Components created, event loop not started.
    Initializing,
    /// Event loop is active.
    Running,
    /// Graceful shutdown in progress.
    ShuttingDown,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeComponents
// ---------------------------------------------------------------------------

/// Collaborators a node is assembled from.
///
/// The negotiator reports on `transport_events`, so the caller builds
/// both from the same channel.
pub struct NodeComponents {
    /// Local peer id.
    pub peer_id: PeerId,
    /// Block signer.
    pub signer: Arc<dyn BlockSigner>,
    /// Block signature verifier.
    pub verifier: Arc<dyn SignatureVerifier>,
    /// Payload cipher.
    pub cipher: Arc<dyn PayloadCipher>,
    /// Persistence for every room's chain.
    pub store: Arc<dyn KeyValueStore>,
    /// Signaling channel.
    pub bus: Arc<dyn SignalBus>,
    /// Channel negotiator.
    pub negotiator: Arc<dyn Negotiator>,
    /// Receiving end of the negotiator's event channel.
    pub transport_events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl NodeComponents {
    /// Components with a fresh Ed25519 identity and the XChaCha20
    /// payload cipher.
    pub fn with_defaults(
        peer_id: PeerId,
        store: Arc<dyn KeyValueStore>,
        bus: Arc<dyn SignalBus>,
        negotiator: Arc<dyn Negotiator>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            peer_id,
            signer: Arc::new(Ed25519Signer::generate()),
            verifier: Arc::new(Ed25519Verifier),
            cipher: Arc::new(XChaChaCipher),
            store,
            bus,
            negotiator,
            transport_events,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeRuntime (internal)
// ---------------------------------------------------------------------------

/// Owned runtime state moved into the event loop task.
pub(crate) struct NodeRuntime {
    pub peer_id: PeerId,
    pub signer: Arc<dyn BlockSigner>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub cipher: Arc<dyn PayloadCipher>,
    pub store: Arc<dyn KeyValueStore>,
    pub bus: Arc<dyn SignalBus>,
    pub room_key: PayloadKey,
    pub chain: ChainStore,
    pub orphan_policy: OrphanPolicy,
    pub supervisor: PeerSupervisor,
    pub directory: PeerDirectory,
    pub sync: SyncCoordinator,
    pub observers: ChainObservers,
    pub signal_rx: mpsc::UnboundedReceiver<Signal>,
    pub transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    pub event_tx: mpsc::Sender<NodeEvent>,
    pub command_rx: mpsc::Receiver<NodeCommand>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub announce_interval: Duration,
    pub maintenance_interval: Duration,
}

impl NodeRuntime {
    /// Queues a node event, dropping it if the consumer lags.
    pub fn emit(&self, event: NodeEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(error = %e, "node event dropped");
        }
    }

    /// Tells observers and event consumers that the chain changed.
    pub fn chain_changed(&self) {
        let room = self.chain.room().clone();
        self.observers.notify(&room, self.chain.blocks());
        self.emit(NodeEvent::ChainChanged {
            room,
            length: self.chain.len(),
            tail: self.chain.tail().map(|b| b.hash),
        });
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// ChainText node: owns all subsystems and drives the event loop.
///
/// After construction via [`Node::new`], call [`Node::start`] to spawn
/// the event loop. Interact through [`Node::handle`] and
/// [`Node::take_event_receiver`].
pub struct Node {
    state: NodeState,
    runtime: Option<NodeRuntime>,
    command_tx: mpsc::Sender<NodeCommand>,
    event_rx: Option<mpsc::Receiver<NodeEvent>>,
    shutdown_tx: watch::Sender<bool>,
    peer_id: PeerId,
}

impl Node {
    /// Assembles a node and loads the chain for `app_config.room`.
    ///
    /// # Errors
    ///
    /// - `ChaintextError::ConfigError` if either config is invalid.
    /// - `ChaintextError::StorageError` if the chain cannot be loaded.
    pub fn new(
        components: NodeComponents,
        app_config: AppConfig,
        net_config: NetworkConfig,
    ) -> Result<Self> {
        app_config.validate()?;
        net_config.validate()?;

        let NodeComponents {
            peer_id,
            signer,
            verifier,
            cipher,
            store,
            bus,
            negotiator,
            transport_events,
        } = components;

        let room = app_config.room.clone();
        let orphan_policy = OrphanPolicy {
            capacity: app_config.orphan_capacity,
            ttl_secs: app_config.orphan_ttl_secs,
        };
        let chain = ChainStore::open_with_policy(
            room.clone(),
            Arc::clone(&store),
            Arc::clone(&verifier),
            orphan_policy,
        )?;

        let signal_rx = bus.subscribe(peer_id.clone());
        let directory = PeerDirectory::new(
            peer_id.clone(),
            room.clone(),
            Duration::from_secs(app_config.announce_ttl_secs),
        );
        let sync = SyncCoordinator::new(net_config.relay_messages, net_config.max_frame_bytes);
        let supervisor = PeerSupervisor::new(
            peer_id.clone(),
            room.clone(),
            net_config,
            Arc::clone(&bus),
            negotiator,
        );

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(%peer_id, %room, identity = %signer.identity(), "node created");

        let runtime = NodeRuntime {
            peer_id: peer_id.clone(),
            signer,
            verifier,
            cipher,
            store,
            bus,
            room_key: PayloadKey::for_room(&room),
            chain,
            orphan_policy,
            supervisor,
            directory,
            sync,
            observers: ChainObservers::new(),
            signal_rx,
            transport_rx: transport_events,
            event_tx,
            command_rx,
            shutdown_rx,
            announce_interval: Duration::from_secs(app_config.announce_interval_secs),
            maintenance_interval: Duration::from_secs(app_config.maintenance_interval_secs),
        };

        Ok(Self {
            state: NodeState::Initializing,
            runtime: Some(runtime),
            command_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            peer_id,
        })
    }

    /// Starts the event loop in a new tokio task.
    ///
    /// Transitions `Initializing → Running`. The returned handle
    /// resolves when the event loop exits.
    ///
    /// # Errors
    ///
    /// Returns `ChaintextError::ConfigError` if the node is not in
    /// `Initializing` state.
    pub fn start(&mut self) -> Result<JoinHandle<()>> {
        if self.state != NodeState::Initializing {
            return Err(ChaintextError::ConfigError {
                reason: format!(
                    "cannot start node in state '{}'; expected 'initializing'",
                    self.state,
                ),
            });
        }

        let runtime = self.runtime.take().ok_or_else(|| ChaintextError::ConfigError {
            reason: "runtime already consumed (double start?)".into(),
        })?;

        let handle = tokio::spawn(event_loop::run_event_loop(runtime));
        self.state = NodeState::Running;
        Ok(handle)
    }

    /// Signals the event loop to exit. Idempotent once running.
    ///
    /// # Errors
    ///
    /// Returns `ChaintextError::ConfigError` if the node was never
    /// started.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.state {
            NodeState::Initializing => Err(ChaintextError::ConfigError {
                reason: "cannot shutdown a node that has not been started".into(),
            }),
            NodeState::ShuttingDown => Ok(()),
            NodeState::Running => {
                self.state = NodeState::ShuttingDown;
                let _ = self.shutdown_tx.send(true);
                Ok(())
            }
        }
    }

    /// Returns a cloneable handle for driving the node.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            peer_id: self.peer_id.clone(),
            command_tx: self.command_tx.clone(),
        }
    }

    /// Takes the event receiver (can only be called once).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<NodeEvent>> {
        self.event_rx.take()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Local peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

/// Cloneable front end of a running node.
///
/// Every method is a command round-trip through the event loop.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    peer_id: PeerId,
    command_tx: mpsc::Sender<NodeCommand>,
}

fn stopped() -> ChaintextError {
    ChaintextError::NetworkError {
        reason: "node event loop is not running".into(),
    }
}

impl NodeHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> NodeCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Local peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Starts negotiating with `peer`; if already connected, asks it
    /// for its chain again. Returns `true` if a negotiation started.
    ///
    /// # Errors
    ///
    /// Returns the retryable `ChaintextError::PeerConnectFailure` if
    /// the attempt cannot be started.
    pub async fn connect_to_peer(&self, peer: PeerId) -> Result<bool> {
        self.request(|reply| NodeCommand::ConnectToPeer { peer, reply }).await?
    }

    /// Seals, signs, appends, and broadcasts a message.
    ///
    /// # Errors
    ///
    /// Returns the retryable `ChaintextError::AuthoringFailure` if the
    /// block cannot be built or appended.
    pub async fn author_message(&self, plaintext: impl Into<Vec<u8>>) -> Result<Block> {
        let plaintext = plaintext.into();
        self.request(|reply| NodeCommand::AuthorMessage { plaintext, reply }).await?
    }

    /// Merges `block` locally and broadcasts it. Returns the number of
    /// peers it was queued for.
    ///
    /// # Errors
    ///
    /// Returns a block-rejection error if `block` fails its hash or
    /// signature check.
    pub async fn broadcast_message(&self, block: Block) -> Result<usize> {
        self.request(|reply| NodeCommand::BroadcastMessage { block, reply }).await?
    }

    /// Opens `block`'s payload with the current room key.
    ///
    /// # Errors
    ///
    /// Returns `ChaintextError::CryptoError` if it does not open.
    pub async fn read_message(&self, block: Block) -> Result<Vec<u8>> {
        self.request(|reply| NodeCommand::ReadMessage { block, reply }).await?
    }

    /// Peers with an open transport, sorted.
    pub async fn get_connected_peers(&self) -> Result<Vec<PeerId>> {
        self.request(|reply| NodeCommand::GetConnectedPeers { reply }).await
    }

    /// Current chain in acceptance order.
    pub async fn get_chain(&self) -> Result<Vec<Block>> {
        self.request(|reply| NodeCommand::GetChain { reply }).await
    }

    /// Registers `callback` to receive the full chain on every change.
    /// It is invoked once right away with the current chain.
    pub async fn on_chain_changed(
        &self,
        callback: impl Fn(&RoomId, &[Block]) + Send + 'static,
    ) -> Result<()> {
        let observer: ChainObserver = Box::new(callback);
        self.request(|reply| NodeCommand::OnChainChanged { observer, reply }).await
    }

    /// Re-initializes the overlay for `room`: closes every transport,
    /// loads that room's chain, and starts announcing there.
    ///
    /// # Errors
    ///
    /// Returns `ChaintextError::StorageError` if the room's chain
    /// cannot be loaded; the node stays in its previous room.
    pub async fn switch_room(&self, room: RoomId) -> Result<()> {
        self.request(|reply| NodeCommand::SwitchRoom { room, reply }).await?
    }

    /// Sends `sync-request` to every open peer. Returns how many.
    pub async fn request_sync(&self) -> Result<usize> {
        self.request(|reply| NodeCommand::RequestSync { reply }).await
    }

    /// Status snapshot.
    pub async fn status(&self) -> Result<NodeStatus> {
        self.request(|reply| NodeCommand::GetStatus { reply }).await
    }

    /// Asks the event loop to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the event loop is already gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(NodeCommand::Shutdown)
            .await
            .map_err(|_| stopped())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chaintext_network::memory::MemoryHub;
    use chaintext_network::signal::MemorySignalBus;
    use chaintext_storage::kv::MemoryStore;

    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn node() -> Result<Node> {
        let peer = PeerId::new("solo")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = MemoryHub::new(8);
        let components = NodeComponents::with_defaults(
            peer.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySignalBus::new()),
            Arc::new(hub.negotiator(peer, tx)),
            rx,
        );
        Node::new(components, AppConfig::default(), NetworkConfig::default())
    }

    #[tokio::test]
    async fn lifecycle_transitions() -> TestResult {
        let mut node = node()?;
        assert_eq!(node.state(), NodeState::Initializing);
        assert!(node.shutdown().is_err());

        let task = node.start()?;
        assert_eq!(node.state(), NodeState::Running);
        assert!(node.start().is_err());

        node.shutdown()?;
        node.shutdown()?;
        assert_eq!(node.state(), NodeState::ShuttingDown);
        task.await?;
        Ok(())
    }

    #[tokio::test]
    async fn handle_fails_after_exit() -> TestResult {
        let mut node = node()?;
        let handle = node.handle();
        let task = node.start()?;

        assert!(handle.get_chain().await?.is_empty());
        handle.shutdown().await?;
        task.await?;
        assert!(handle.get_chain().await.is_err());
        Ok(())
    }

    #[test]
    fn invalid_config_rejected() -> TestResult {
        let peer = PeerId::new("solo")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let components = NodeComponents::with_defaults(
            peer.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySignalBus::new()),
            Arc::new(MemoryHub::new(8).negotiator(peer, tx)),
            rx,
        );
        let config = AppConfig {
            announce_ttl_secs: 10,
            announce_interval_secs: 30,
            ..AppConfig::default()
        };
        assert!(Node::new(components, config, NetworkConfig::default()).is_err());
        Ok(())
    }
}
