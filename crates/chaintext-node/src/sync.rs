//! Chain reconciliation between peers.
//!
//! Full-snapshot gossip over open transports:
//!
//! - On open, each side sends `sync-request`.
//! - `sync-request` is answered with the whole chain, split across as
//!   many `sync-response` frames as the frame size limit requires.
//! - `sync-response` and `message` are merged into the local chain.
//! - A `message` that adds blocks is relayed to every other open peer.
//!
//! [`SyncCoordinator`] never touches transports itself. It decides, and
//! the event loop carries out the sends through the supervisor.

use chaintext_network::protocol::SyncMessage;
use chaintext_storage::block::Block;
use chaintext_storage::chain::ChainStore;
use chaintext_types::{PeerId, Result, RoomId, Timestamp};

// ---------------------------------------------------------------------------
// FrameOutcome
// ---------------------------------------------------------------------------

/// What the event loop must do after a frame was handled.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameOutcome {
    /// Blocks newly accepted into the chain.
    pub accepted: usize,
    /// Frames to send back, in order, to the peer the frame came from.
    pub replies: Vec<Vec<u8>>,
    /// Frame to forward to every other open peer.
    pub relay: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// SyncCoordinator
// ---------------------------------------------------------------------------

/// Decides how to react to sync frames.
#[derive(Clone, Copy, Debug)]
pub struct SyncCoordinator {
    relay: bool,
    max_frame_bytes: usize,
}

impl SyncCoordinator {
    /// Creates a coordinator. `relay` controls forwarding of newly
    /// accepted `message` blocks; no reply frame is longer than
    /// `max_frame_bytes`.
    pub fn new(relay: bool, max_frame_bytes: usize) -> Self {
        Self {
            relay,
            max_frame_bytes,
        }
    }

    /// Encodes a `sync-request` for `room`.
    ///
    /// # Errors
    ///
    /// Returns [`chaintext_types::ChaintextError::ProtocolError`] if
    /// encoding fails.
    pub fn sync_request(room: &RoomId) -> Result<Vec<u8>> {
        SyncMessage::SyncRequest { room: room.clone() }.encode()
    }

    /// Encodes a `message` frame carrying `block`.
    ///
    /// # Errors
    ///
    /// Returns [`chaintext_types::ChaintextError::ProtocolError`] if
    /// encoding fails.
    pub fn message(room: &RoomId, block: &Block) -> Result<Vec<u8>> {
        SyncMessage::Message {
            room: room.clone(),
            data: block.clone(),
        }
        .encode()
    }

    /// Handles one frame received from `from`.
    ///
    /// Frames that do not decode, or belong to another room, are
    /// logged and produce an empty outcome.
    pub fn handle_frame(
        &self,
        chain: &mut ChainStore,
        from: &PeerId,
        data: &[u8],
        now: Timestamp,
    ) -> FrameOutcome {
        let msg = match SyncMessage::decode(data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(peer = %from, error = %e, "dropping undecodable frame");
                return FrameOutcome::default();
            }
        };

        if msg.room() != chain.room() {
            tracing::debug!(
                peer = %from,
                kind = msg.kind(),
                room = %msg.room(),
                "dropping frame for another room"
            );
            return FrameOutcome::default();
        }

        tracing::trace!(peer = %from, kind = msg.kind(), "sync frame");

        match msg {
            SyncMessage::SyncRequest { room } => {
                match SyncMessage::encode_snapshot(&room, chain.blocks(), self.max_frame_bytes) {
                    Ok(replies) => {
                        tracing::debug!(
                            peer = %from,
                            blocks = chain.len(),
                            frames = replies.len(),
                            "answering sync request"
                        );
                        FrameOutcome {
                            replies,
                            ..FrameOutcome::default()
                        }
                    }
                    Err(e) => {
                        tracing::warn!(peer = %from, error = %e, "failed to encode sync response");
                        FrameOutcome::default()
                    }
                }
            }

            SyncMessage::SyncResponse { messages, .. } => {
                let offered = messages.len();
                let outcome = chain.merge(messages, now);
                tracing::debug!(
                    peer = %from,
                    offered,
                    accepted = outcome.accepted_count(),
                    buffered = outcome.buffered,
                    duplicates = outcome.duplicates,
                    rejected = outcome.rejected,
                    "sync response merged"
                );
                FrameOutcome {
                    accepted: outcome.accepted_count(),
                    ..FrameOutcome::default()
                }
            }

            SyncMessage::Message { data: block, .. } => {
                let hash = block.hash;
                let outcome = chain.merge(vec![block], now);
                let accepted = outcome.accepted_count();
                if accepted > 0 {
                    tracing::debug!(peer = %from, %hash, accepted, "message merged");
                }
                FrameOutcome {
                    accepted,
                    replies: Vec::new(),
                    relay: (self.relay && outcome.accepted.contains(&hash)).then(|| data.to_vec()),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
