//! Commands and status types for external → node communication.
//!
//! [`NodeCommand`] is the bounded-channel message type that
//! [`NodeHandle`](crate::node::NodeHandle), the daemon, and tests use
//! to drive the node. Each command that produces a result carries a
//! `tokio::sync::oneshot::Sender` for the reply.
//!
//! All commands are processed sequentially inside the event loop, so
//! the chain and the supervisor never see concurrent callers.

use tokio::sync::oneshot;

use chaintext_storage::block::Block;
use chaintext_types::{Identity, PeerId, Result, RoomId, TransportState};

use crate::observer::ChainObserver;

// ---------------------------------------------------------------------------
// NodeCommand
// ---------------------------------------------------------------------------

/// Commands accepted by the node event loop.
pub enum NodeCommand {
    /// Start negotiating with a peer, or re-sync with it if already
    /// connected.
    ConnectToPeer {
        /// Remote peer.
        peer: PeerId,
        /// `true` if a new negotiation was started.
        reply: oneshot::Sender<Result<bool>>,
    },

    /// Seal, sign, append, and broadcast a new message.
    AuthorMessage {
        /// Message body.
        plaintext: Vec<u8>,
        /// The authored block.
        reply: oneshot::Sender<Result<Block>>,
    },

    /// Merge an already-built block locally and broadcast it.
    BroadcastMessage {
        /// The block.
        block: Block,
        /// Number of peers the frame was queued for.
        reply: oneshot::Sender<Result<usize>>,
    },

    /// Open a block's payload with the current room key.
    ReadMessage {
        /// The block.
        block: Block,
        /// The plaintext.
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },

    /// List peers with an open transport.
    GetConnectedPeers {
        /// Sorted peer ids.
        reply: oneshot::Sender<Vec<PeerId>>,
    },

    /// Copy out the current chain.
    GetChain {
        /// Blocks in acceptance order.
        reply: oneshot::Sender<Vec<Block>>,
    },

    /// Register a chain observer.
    OnChainChanged {
        /// Observer invoked on every chain change.
        observer: ChainObserver,
        /// Acknowledges registration.
        reply: oneshot::Sender<()>,
    },

    /// Re-initialize the overlay for another room.
    SwitchRoom {
        /// The new room.
        room: RoomId,
        /// Acknowledges the switch.
        reply: oneshot::Sender<Result<()>>,
    },

    /// Send `sync-request` to every open peer.
    RequestSync {
        /// Number of peers the request was queued for.
        reply: oneshot::Sender<usize>,
    },

    /// Query the current node status.
    GetStatus {
        /// Reply channel for the status snapshot.
        reply: oneshot::Sender<NodeStatus>,
    },

    /// Initiate graceful shutdown. Fire-and-forget; await the
    /// `JoinHandle` from [`Node::start`](crate::node::Node::start) to
    /// confirm completion.
    Shutdown,
}

// Manual Debug because oneshot::Sender and observers do not implement Debug.
impl std::fmt::Debug for NodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectToPeer { peer, .. } => {
                f.debug_struct("ConnectToPeer").field("peer", peer).finish_non_exhaustive()
            }
            Self::AuthorMessage { plaintext, .. } => f
                .debug_struct("AuthorMessage")
                .field("bytes", &plaintext.len())
                .finish_non_exhaustive(),
            Self::BroadcastMessage { block, .. } => f
                .debug_struct("BroadcastMessage")
                .field("hash", &block.hash)
                .finish_non_exhaustive(),
            Self::ReadMessage { block, .. } => f
                .debug_struct("ReadMessage")
                .field("hash", &block.hash)
                .finish_non_exhaustive(),
            Self::GetConnectedPeers { .. } => f.write_str("GetConnectedPeers"),
            Self::GetChain { .. } => f.write_str("GetChain"),
            Self::OnChainChanged { .. } => f.write_str("OnChainChanged"),
            Self::SwitchRoom { room, .. } => {
                f.debug_struct("SwitchRoom").field("room", room).finish_non_exhaustive()
            }
            Self::RequestSync { .. } => f.write_str("RequestSync"),
            Self::GetStatus { .. } => f.write_str("GetStatus"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeStatus
// ---------------------------------------------------------------------------

/// Snapshot of the node's current state.
#[derive(Clone, Debug)]
pub struct NodeStatus {
    /// Local peer id.
    pub peer_id: PeerId,
    /// Identity blocks are signed with.
    pub identity: Identity,
    /// Active room.
    pub room: RoomId,
    /// Number of accepted blocks.
    pub chain_length: usize,
    /// Number of blocks waiting for a predecessor.
    pub orphan_count: usize,
    /// Peers currently announcing in the room.
    pub discovered_peers: Vec<PeerId>,
    /// Every transport and its state.
    pub transports: Vec<(PeerId, TransportState)>,
}
