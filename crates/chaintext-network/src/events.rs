//! Events flowing from negotiators to the supervisor, and from the
//! supervisor to the node.
//!
//! Negotiators never call back into the supervisor. Every completion
//! (local description ready, channel open, frame received) is posted
//! as a [`TransportEvent`] on the node actor's channel and handled in
//! order with everything else.

use chaintext_types::PeerId;

use crate::transport::{ChannelHandle, SessionId};

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Completion of an asynchronous negotiator step.
///
/// Every variant carries the [`SessionId`] of the attempt it belongs
/// to; events for an abandoned attempt are discarded by the
/// supervisor.
#[derive(Debug)]
pub enum TransportEvent {
    /// Our offer or answer is ready to be signaled.
    LocalDescription {
        /// Attempt the description belongs to.
        session: SessionId,
        /// Negotiator-specific description.
        sdp: String,
    },
    /// An extra connectivity candidate is ready to be signaled.
    LocalCandidate {
        /// Attempt the candidate belongs to.
        session: SessionId,
        /// Negotiator-specific candidate.
        candidate: String,
    },
    /// The channel is ready for frames.
    ChannelOpened {
        /// Attempt that produced the channel.
        session: SessionId,
        /// Outbound side of the channel.
        channel: ChannelHandle,
    },
    /// The channel (or the attempt to build one) is gone.
    ChannelClosed {
        /// Attempt that ended.
        session: SessionId,
        /// Human-readable cause.
        reason: String,
    },
    /// A frame arrived on the channel.
    Frame {
        /// Attempt whose channel delivered the frame.
        session: SessionId,
        /// Raw frame bytes.
        data: Vec<u8>,
    },
}

impl TransportEvent {
    /// Session this event belongs to.
    pub fn session(&self) -> SessionId {
        match self {
            Self::LocalDescription { session, .. }
            | Self::LocalCandidate { session, .. }
            | Self::ChannelOpened { session, .. }
            | Self::ChannelClosed { session, .. }
            | Self::Frame { session, .. } => *session,
        }
    }
}

// ---------------------------------------------------------------------------
// SupervisorEvent
// ---------------------------------------------------------------------------

/// Peer-level outcome of handling a [`TransportEvent`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SupervisorEvent {
    /// A transport reached `Open`.
    Opened(PeerId),
    /// A transport was removed.
    Closed {
        /// The remote peer.
        peer: PeerId,
        /// Whether it had reached `Open` before closing.
        was_open: bool,
    },
    /// A frame arrived from an open transport.
    Frame {
        /// The remote peer.
        peer: PeerId,
        /// Raw frame bytes.
        data: Vec<u8>,
    },
}
